//! Synthesized PE images for the integration tests.
//!
//! [`ImageBuilder`] fills a [`Metadata`] row by row and lays it out, together with the method
//! bodies, in the `.text` section of a minimal PE32 DLL. Extra sections and a CodeView debug
//! entry can be added to mimic compiler output.

#![allow(dead_code)]

use std::path::Path;

use repolib_patcher::{
    metadata::{
        method::MethodBody,
        tables::{col, CodedIndexType, TableId},
        Metadata,
    },
    Result,
};

const FILE_ALIGNMENT: usize = 0x200;
const SECTION_ALIGNMENT: usize = 0x2000;
const SIZE_OF_HEADERS: usize = 0x200;
const TEXT_RVA: usize = 0x2000;
const PE_SIGNATURE: usize = 0x80;
const COR20_SIZE: usize = 72;
const SECTION_TABLE: usize = PE_SIGNATURE + 4 + 20 + 0xE0;
const SECTION_HEADER_SIZE: usize = 40;
const DEBUG_ENTRY_SIZE: usize = 28;
/// `IMAGE_DEBUG_TYPE_CODEVIEW`
const DEBUG_TYPE_CODEVIEW: u32 = 2;

/// `public static hidebysig`
pub const STATIC_METHOD: u32 = 0x0096;

/// `ELEMENT_TYPE_CLASS`
pub const CLASS: u8 = 0x12;
/// `ELEMENT_TYPE_VOID`
pub const VOID: u8 = 0x01;

fn put_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn align(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Compressed `TypeDefOrRef` of a type in a signature blob.
pub fn type_def_or_ref(table: TableId, row: u32) -> u8 {
    let value = CodedIndexType::TypeDefOrRef.encode(table, row).unwrap();
    assert!(value < 0x80, "fixture signatures use one byte coded indices");
    value as u8
}

/// Builds the metadata and the PE image of one module.
pub struct ImageBuilder {
    pub metadata: Metadata,
    bodies: Vec<(u32, MethodBody)>,
    sections: Vec<([u8; 8], Vec<u8>)>,
    codeview: Option<Vec<u8>>,
}

impl ImageBuilder {
    /// A module `{assembly_name}.dll` with an assembly manifest and the `<Module>` type.
    pub fn new(assembly_name: &str) -> Result<Self> {
        let mut metadata = Metadata::new("v4.0.30319");

        let module_name = metadata.strings.add(&format!("{assembly_name}.dll"))?;
        metadata
            .tables
            .push_row(TableId::Module, &[0, module_name, 0, 0, 0])?;

        let name = metadata.strings.add(assembly_name)?;
        metadata
            .tables
            .push_row(TableId::Assembly, &[0x8004, 1, 0, 0, 0, 0, 0, name, 0])?;

        let mut builder = ImageBuilder {
            metadata,
            bodies: Vec::new(),
            sections: Vec::new(),
            codeview: None,
        };
        builder.type_def("", "<Module>")?;
        Ok(builder)
    }

    pub fn assembly_ref(&mut self, name: &str) -> Result<u32> {
        let name = self.metadata.strings.add(name)?;
        self.metadata
            .tables
            .push_row(TableId::AssemblyRef, &[1, 0, 0, 0, 0, 0, name, 0, 0])
    }

    pub fn type_ref(&mut self, assembly_ref: u32, namespace: &str, name: &str) -> Result<u32> {
        let scope = CodedIndexType::ResolutionScope.encode(TableId::AssemblyRef, assembly_ref)?;
        let name = self.metadata.strings.add(name)?;
        let namespace = self.metadata.strings.add(namespace)?;
        self.metadata
            .tables
            .push_row(TableId::TypeRef, &[scope, name, namespace])
    }

    /// A type owning every method defined after it, up to the next `type_def`.
    pub fn type_def(&mut self, namespace: &str, name: &str) -> Result<u32> {
        let name = self.metadata.strings.add(name)?;
        let namespace = self.metadata.strings.add(namespace)?;
        let method_list = self.metadata.tables.row_count(TableId::MethodDef) + 1;
        self.metadata
            .tables
            .push_row(TableId::TypeDef, &[0x0010_0001, name, namespace, 0, 1, method_list])
    }

    pub fn method(&mut self, name: &str, signature: &[u8], body: Option<MethodBody>) -> Result<u32> {
        let name = self.metadata.strings.add(name)?;
        let signature = self.metadata.blobs.add(signature)?;
        let row = self.metadata.tables.push_row(
            TableId::MethodDef,
            &[0, 0, STATIC_METHOD, name, signature, 1],
        )?;
        if let Some(body) = body {
            self.bodies.push((row, body));
        }
        Ok(row)
    }

    pub fn member_ref(&mut self, type_ref: u32, name: &str, signature: &[u8]) -> Result<u32> {
        let class = CodedIndexType::MemberRefParent.encode(TableId::TypeRef, type_ref)?;
        let name = self.metadata.strings.add(name)?;
        let signature = self.metadata.blobs.add(signature)?;
        self.metadata
            .tables
            .push_row(TableId::MemberRef, &[class, name, signature])
    }

    /// Adds a section holding `data`, placed after `.text` and any earlier section.
    pub fn section(&mut self, name: &str, data: Vec<u8>) {
        let mut raw_name = [0_u8; 8];
        raw_name[..name.len()].copy_from_slice(name.as_bytes());
        self.sections.push((raw_name, data));
    }

    /// Adds a debug directory in `.text` with one CodeView (`RSDS`) entry naming `pdb`.
    pub fn codeview(&mut self, pdb: &str) {
        let mut record = b"RSDS".to_vec();
        record.extend_from_slice(&[0x5A; 16]);
        record.extend_from_slice(&1_u32.to_le_bytes());
        record.extend_from_slice(pdb.as_bytes());
        record.push(0);
        self.codeview = Some(record);
    }

    /// Lays out the CLI header, the bodies and the metadata in `.text`, followed by the extra
    /// sections, and wraps it all in PE headers.
    pub fn build(mut self) -> Result<Vec<u8>> {
        let mut text = vec![0_u8; COR20_SIZE];
        for (row, body) in &self.bodies {
            text.resize(align(text.len(), 4), 0);
            let rva = (TEXT_RVA + text.len()) as u32;
            self.metadata
                .tables
                .set_value(TableId::MethodDef, *row, col::methoddef::RVA, rva)?;
            text.extend_from_slice(&body.encode()?);
        }
        text.resize(align(text.len(), 4), 0);
        let metadata_rva = (TEXT_RVA + text.len()) as u32;
        let metadata = self.metadata.serialize()?;
        text.extend_from_slice(&metadata);

        let mut debug_directory = None;
        if let Some(record) = &self.codeview {
            text.resize(align(text.len(), 4), 0);
            let entry = text.len();
            text.resize(entry + DEBUG_ENTRY_SIZE, 0);
            let record_offset = text.len();
            text.extend_from_slice(record);

            put_u32(&mut text, entry + 12, DEBUG_TYPE_CODEVIEW);
            put_u32(&mut text, entry + 16, record.len() as u32);
            put_u32(&mut text, entry + 20, (TEXT_RVA + record_offset) as u32);
            put_u32(&mut text, entry + 24, (SIZE_OF_HEADERS + record_offset) as u32);
            debug_directory = Some(TEXT_RVA + entry);
        }

        put_u32(&mut text, 0, COR20_SIZE as u32);
        put_u16(&mut text, 4, 2);
        put_u16(&mut text, 6, 5);
        put_u32(&mut text, 8, metadata_rva);
        put_u32(&mut text, 12, metadata.len() as u32);
        // ILONLY
        put_u32(&mut text, 16, 1);

        let code_size = align(text.len(), FILE_ALIGNMENT);

        // (name, data, rva, raw pointer, characteristics)
        let mut layout = vec![(
            *b".text\0\0\0",
            text,
            TEXT_RVA,
            SIZE_OF_HEADERS,
            0x6000_0020_u32,
        )];
        let mut rva = align(TEXT_RVA + layout[0].1.len(), SECTION_ALIGNMENT);
        let mut raw_pointer = SIZE_OF_HEADERS + code_size;
        for (name, data) in std::mem::take(&mut self.sections) {
            let size = data.len();
            // INITIALIZED_DATA | MEM_READ
            layout.push((name, data, rva, raw_pointer, 0x4000_0040));
            rva = align(rva + size, SECTION_ALIGNMENT);
            raw_pointer += align(size, FILE_ALIGNMENT);
        }
        assert!(
            SECTION_TABLE + layout.len() * SECTION_HEADER_SIZE <= SIZE_OF_HEADERS,
            "section headers do not fit the header area"
        );

        let mut image = vec![0_u8; SIZE_OF_HEADERS];

        image[0..2].copy_from_slice(b"MZ");
        put_u32(&mut image, 0x3C, PE_SIGNATURE as u32);
        image[PE_SIGNATURE..PE_SIGNATURE + 4].copy_from_slice(b"PE\0\0");

        let coff = PE_SIGNATURE + 4;
        put_u16(&mut image, coff, 0x014C);
        put_u16(&mut image, coff + 2, layout.len() as u16);
        put_u16(&mut image, coff + 16, 0xE0);
        put_u16(&mut image, coff + 18, 0x2102);

        let optional = coff + 20;
        put_u16(&mut image, optional, 0x010B);
        image[optional + 2] = 8;
        put_u32(&mut image, optional + 4, code_size as u32);
        put_u32(&mut image, optional + 20, TEXT_RVA as u32);
        put_u32(&mut image, optional + 28, 0x1000_0000);
        put_u32(&mut image, optional + 32, SECTION_ALIGNMENT as u32);
        put_u32(&mut image, optional + 36, FILE_ALIGNMENT as u32);
        put_u16(&mut image, optional + 40, 4);
        put_u16(&mut image, optional + 48, 4);
        put_u32(&mut image, optional + 56, rva as u32);
        put_u32(&mut image, optional + 60, SIZE_OF_HEADERS as u32);
        put_u16(&mut image, optional + 68, 3);
        put_u16(&mut image, optional + 70, 0x8540);
        put_u32(&mut image, optional + 72, 0x0010_0000);
        put_u32(&mut image, optional + 76, 0x1000);
        put_u32(&mut image, optional + 80, 0x0010_0000);
        put_u32(&mut image, optional + 84, 0x1000);
        put_u32(&mut image, optional + 92, 16);
        if let Some(directory) = debug_directory {
            put_u32(&mut image, optional + 96 + 6 * 8, directory as u32);
            put_u32(&mut image, optional + 96 + 6 * 8 + 4, DEBUG_ENTRY_SIZE as u32);
        }
        // CLR runtime header directory
        put_u32(&mut image, optional + 96 + 14 * 8, TEXT_RVA as u32);
        put_u32(&mut image, optional + 96 + 14 * 8 + 4, COR20_SIZE as u32);

        for (index, (name, data, rva, raw_pointer, characteristics)) in layout.iter().enumerate() {
            let header = SECTION_TABLE + index * SECTION_HEADER_SIZE;
            let raw_size = align(data.len(), FILE_ALIGNMENT);
            image[header..header + 8].copy_from_slice(name);
            put_u32(&mut image, header + 8, data.len() as u32);
            put_u32(&mut image, header + 12, *rva as u32);
            put_u32(&mut image, header + 16, raw_size as u32);
            put_u32(&mut image, header + 20, *raw_pointer as u32);
            put_u32(&mut image, header + 36, *characteristics);
        }

        for (_, data, _, raw_pointer, _) in &layout {
            image.resize(*raw_pointer, 0);
            image.extend_from_slice(data);
            image.resize(raw_pointer + align(data.len(), FILE_ALIGNMENT), 0);
        }
        Ok(image)
    }
}

/// A tiny-header body for `code`.
pub fn body(code: Vec<u8>) -> MethodBody {
    MethodBody {
        max_stack: 8,
        init_locals: false,
        local_var_sig_token: 0,
        code,
        exception_handlers: Vec::new(),
    }
}

/// `ldnull; call token; ret`
pub fn call_and_return(token: u32) -> Vec<u8> {
    let mut code = vec![0x14, 0x28];
    code.extend_from_slice(&token.to_le_bytes());
    code.push(0x2A);
    code
}

/// `ldnull; call token; pop; ret`
pub fn call_pop_and_return(token: u32) -> Vec<u8> {
    let mut code = vec![0x14, 0x28];
    code.extend_from_slice(&token.to_le_bytes());
    code.extend_from_slice(&[0x26, 0x2A]);
    code
}

/// `static void RegisterValuable(UnityEngine.GameObject)` signature with `GameObject` at
/// `TypeRef` row `game_object`.
pub fn deprecated_signature(game_object: u32) -> Vec<u8> {
    vec![
        0x00,
        0x01,
        VOID,
        CLASS,
        type_def_or_ref(TableId::TypeRef, game_object),
    ]
}

/// The installed library: `REPOLib.Modules.Valuables` with the old and the new
/// `RegisterValuable(GameObject)`, and `REPOLib.Objects.PrefabRef`.
pub fn library_image() -> Result<Vec<u8>> {
    let mut builder = ImageBuilder::new("REPOLib")?;
    let unity = builder.assembly_ref("UnityEngine")?;
    let game_object = builder.type_ref(unity, "UnityEngine", "GameObject")?;

    builder.type_def("REPOLib.Modules", "Valuables")?;
    // PrefabRef is the type defined right after Valuables
    let prefab_ref = builder.metadata.tables.row_count(TableId::TypeDef) + 1;

    builder.method(
        "RegisterValuable",
        &deprecated_signature(game_object),
        Some(body(vec![0x2A])),
    )?;
    builder.method(
        "RegisterValuable",
        &[
            0x00,
            0x01,
            CLASS,
            type_def_or_ref(TableId::TypeDef, prefab_ref),
            CLASS,
            type_def_or_ref(TableId::TypeRef, game_object),
        ],
        Some(body(vec![0x14, 0x2A])),
    )?;
    builder.type_def("REPOLib.Objects", "PrefabRef")?;

    builder.build()
}

/// A plugin with two methods calling the deprecated `RegisterValuable(GameObject)`:
/// `Awake` discards nothing, `Start` already pops.
pub fn plugin_image(assembly_name: &str) -> Result<Vec<u8>> {
    plugin_builder(assembly_name)?.build()
}

/// The builder behind [`plugin_image`], for tests that add sections before building.
pub fn plugin_builder(assembly_name: &str) -> Result<ImageBuilder> {
    let mut builder = ImageBuilder::new(assembly_name)?;
    let repolib = builder.assembly_ref("REPOLib")?;
    let unity = builder.assembly_ref("UnityEngine")?;
    let valuables = builder.type_ref(repolib, "REPOLib.Modules", "Valuables")?;
    let game_object = builder.type_ref(unity, "UnityEngine", "GameObject")?;
    let register = builder.member_ref(
        valuables,
        "RegisterValuable",
        &deprecated_signature(game_object),
    )?;
    let token = 0x0A00_0000 | register;

    builder.type_def("SomeMod", "Plugin")?;
    builder.method(
        "Awake",
        &[0x00, 0x00, VOID],
        Some(body(call_and_return(token))),
    )?;
    builder.method(
        "Start",
        &[0x00, 0x00, VOID],
        Some(body(call_pop_and_return(token))),
    )?;

    Ok(builder)
}

/// A plugin that does not reference the library at all.
pub fn unrelated_image() -> Result<Vec<u8>> {
    let mut builder = ImageBuilder::new("OtherMod")?;
    builder.assembly_ref("UnityEngine")?;
    builder.type_def("OtherMod", "Plugin")?;
    builder.method("Awake", &[0x00, 0x00, VOID], Some(body(vec![0x2A])))?;
    builder.build()
}

/// Writes `data` to `path`, creating parent directories.
pub fn write(path: &Path, data: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, data).unwrap();
}
