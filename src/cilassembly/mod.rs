//! Editable .NET modules backed by a PE image.
//!
//! [`CilAssembly`] is the production implementation of the module interface the patcher is
//! written against. It decodes the metadata of a plugin once, hands out method bodies as
//! index-based [`crate::assembly::CilBody`] values, and records every change in memory:
//!
//! ```text
//! CilAssembly
//! ├── file: File                      // original image, never modified
//! ├── metadata: Metadata              // decoded heaps and tables, appended to on import
//! ├── bodies: BTreeMap<row, MethodBody>   // re-encoded bodies, keyed by MethodDef row
//! └── imports: HashMap<MethodReference, Token>
//! ```
//!
//! Nothing touches the disk until [`crate::patcher::ModuleEditor::save`]. Saving appends a
//! new section carrying the re-encoded bodies and the rewritten metadata, points the CLR
//! header and the `MethodDef` RVAs at it, and replaces the file through a temporary sibling.
//! Original bodies and metadata stay in place as dead bytes, so every RVA the rest of the
//! image uses remains valid.
//!
//! # Usage
//!
//! ```rust,no_run
//! use repolib_patcher::{CilAssembly, OpenMode};
//! use repolib_patcher::patcher::ModuleView;
//! use std::path::Path;
//!
//! let assembly = CilAssembly::open(Path::new("BepInEx/plugins/SomeMod.dll"), OpenMode::ReadOnly)?;
//! println!("{:?} references REPOLib: {}",
//!     assembly.assembly_name(),
//!     assembly.references_assembly("REPOLib"));
//! for ty in assembly.types()? {
//!     println!("{} ({} methods)", ty.full_name, ty.methods.len());
//! }
//! # Ok::<(), repolib_patcher::Error>(())
//! ```

mod import;
mod resolve;
mod writer;

use std::{
    collections::{BTreeMap, HashMap},
    ops::Range,
    path::{Path, PathBuf},
};

use sha1::{Digest, Sha1};

use crate::{
    assembly::CilBody,
    file::File,
    metadata::{
        cor20header::Cor20Header,
        method::{has_il_body, MethodBody},
        tables::{col, TableId},
        token::Token,
        Metadata,
    },
    patcher::{
        AssemblyIdentity, MethodDefinition, MethodReference, ModuleEditor, ModuleProvider,
        ModuleView, TypeDefinition, TypeScope,
    },
    Error::{ReadOnly, TokenNotFound},
    Result,
};

/// `AssemblyFlags.PublicKey`: the key blob holds a full public key rather than a token
const ASSEMBLY_FLAG_PUBLIC_KEY: u32 = 0x0001;

/// How a module is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Memory mapped; every mutating operation fails with [`crate::Error::ReadOnly`]
    ReadOnly,
    /// Read fully into memory so the file can be replaced on save
    ReadWrite,
}

/// A loaded .NET module with pending, in-memory edits.
pub struct CilAssembly {
    file: File,
    path: Option<PathBuf>,
    mode: OpenMode,
    clr_offset: usize,
    cor20: Cor20Header,
    metadata: Metadata,
    module_name: String,
    assembly_name: Option<String>,
    /// `NestedClass`: nested `TypeDef` row to enclosing `TypeDef` row
    enclosing: HashMap<u32, u32>,
    /// `MethodDef` row to declaring `TypeDef` row
    owners: HashMap<u32, u32>,
    scope: TypeScope,
    bodies: BTreeMap<u32, MethodBody>,
    imports: HashMap<MethodReference, Token>,
    modified: bool,
}

impl CilAssembly {
    /// Opens the module at `path`.
    ///
    /// # Errors
    /// Returns an error if the file can not be read, is not a PE image with a CLR header, or
    /// its metadata is malformed.
    pub fn open(path: &Path, mode: OpenMode) -> Result<CilAssembly> {
        let file = match mode {
            OpenMode::ReadOnly => File::from_file(path)?,
            OpenMode::ReadWrite => File::from_file_owned(path)?,
        };
        Self::load(file, Some(path.to_path_buf()), mode)
    }

    /// Loads a module from an in-memory image.
    ///
    /// Such a module has no file to save to; use [`CilAssembly::to_bytes`] instead.
    ///
    /// # Errors
    /// Returns an error if the buffer is not a PE image with a CLR header, or its metadata is
    /// malformed.
    pub fn from_mem(data: Vec<u8>, mode: OpenMode) -> Result<CilAssembly> {
        Self::load(File::from_mem(data)?, None, mode)
    }

    fn load(file: File, path: Option<PathBuf>, mode: OpenMode) -> Result<CilAssembly> {
        let (clr_rva, _) = file.clr();
        let clr_offset = file.rva_to_offset(clr_rva)?;
        let cor20 =
            Cor20Header::read(file.data_slice(clr_offset, file.len().saturating_sub(clr_offset))?)?;

        let metadata_offset = file.rva_to_offset(cor20.meta_data_rva as usize)?;
        let metadata = Metadata::read(
            file.data_slice(metadata_offset, cor20.meta_data_size as usize)?,
        )?;

        let module_name = match metadata.tables.row_count(TableId::Module) {
            0 => String::new(),
            _ => {
                let index = metadata.tables.value(TableId::Module, 1, col::module::NAME)?;
                metadata.strings.get(index as usize)?.to_string()
            }
        };

        let assembly_name = match metadata.tables.row_count(TableId::Assembly) {
            0 => None,
            _ => {
                let index = metadata
                    .tables
                    .value(TableId::Assembly, 1, col::assembly::NAME)?;
                Some(metadata.strings.get(index as usize)?.to_string())
            }
        };

        let enclosing = metadata
            .tables
            .rows(TableId::NestedClass)
            .map(|(_, values)| {
                (
                    values[col::nestedclass::NESTED],
                    values[col::nestedclass::ENCLOSING],
                )
            })
            .collect();

        let mut assembly = CilAssembly {
            file,
            path,
            mode,
            clr_offset,
            cor20,
            metadata,
            module_name,
            assembly_name,
            enclosing,
            owners: HashMap::new(),
            scope: TypeScope::CurrentModule,
            bodies: BTreeMap::new(),
            imports: HashMap::new(),
            modified: false,
        };
        if let Some(identity) = assembly.assembly_identity()? {
            assembly.scope = TypeScope::Assembly(identity);
        }
        assembly.owners = assembly.method_owners()?;
        Ok(assembly)
    }

    /// The decoded metadata, including any rows appended by imports.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The original image.
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    /// The path the module was opened from, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// How the module was opened.
    #[must_use]
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Identity of the assembly manifest, `None` for a bare module.
    ///
    /// # Errors
    /// Returns an error if the `Assembly` row references invalid heap entries.
    pub fn assembly_identity(&self) -> Result<Option<AssemblyIdentity>> {
        if self.metadata.tables.row_count(TableId::Assembly) == 0 {
            return Ok(None);
        }

        let row = self.metadata.tables.row(TableId::Assembly, 1)?;
        let public_key = self
            .metadata
            .blobs
            .get(row[col::assembly::PUBLIC_KEY] as usize)?;

        Ok(Some(AssemblyIdentity {
            name: self.string(row[col::assembly::NAME])?.to_string(),
            version: version_of(row, col::assembly::MAJOR),
            culture: self.string(row[col::assembly::CULTURE])?.to_string(),
            public_key_token: (!public_key.is_empty()).then(|| public_key_token(public_key)),
        }))
    }

    /// Identity of the assembly referenced by `AssemblyRef` row `row`.
    ///
    /// # Errors
    /// Returns an error if the row does not exist or references invalid heap entries.
    pub fn assembly_ref_identity(&self, row: u32) -> Result<AssemblyIdentity> {
        let values = self.metadata.tables.row(TableId::AssemblyRef, row)?;
        let key = self
            .metadata
            .blobs
            .get(values[col::assemblyref::PUBLIC_KEY_OR_TOKEN] as usize)?;

        let public_key_token = if key.is_empty() {
            None
        } else if values[col::assemblyref::FLAGS] & ASSEMBLY_FLAG_PUBLIC_KEY != 0 {
            Some(public_key_token(key))
        } else {
            let mut token = [0_u8; 8];
            if key.len() != token.len() {
                return Err(malformed_error!(
                    "AssemblyRef {} has a {} byte public key token",
                    row,
                    key.len()
                ));
            }
            token.copy_from_slice(key);
            Some(token)
        };

        Ok(AssemblyIdentity {
            name: self.string(values[col::assemblyref::NAME])?.to_string(),
            version: version_of(values, col::assemblyref::MAJOR),
            culture: self.string(values[col::assemblyref::CULTURE])?.to_string(),
            public_key_token,
        })
    }

    /// Encodes the module with all pending edits applied.
    ///
    /// Returns the original image unchanged if nothing was edited.
    ///
    /// # Errors
    /// Returns an error if a body or the metadata can not be encoded, or the image layout
    /// can not take another section.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if !self.modified {
            return Ok(self.file.data().to_vec());
        }
        writer::write_image(self)
    }

    pub(crate) fn string(&self, index: u32) -> Result<&str> {
        self.metadata.strings.get(index as usize)
    }

    /// Scope of types defined in this module.
    pub(crate) fn own_scope(&self) -> TypeScope {
        self.scope.clone()
    }

    /// `MethodDef` rows owned by `TypeDef` row `type_row`.
    pub(crate) fn method_range(&self, type_row: u32) -> Result<Range<u32>> {
        let tables = &self.metadata.tables;
        let end_of_table = tables.row_count(TableId::MethodDef) + 1;

        let start = tables.value(TableId::TypeDef, type_row, col::typedef::METHOD_LIST)?;
        let end = if type_row < tables.row_count(TableId::TypeDef) {
            tables.value(TableId::TypeDef, type_row + 1, col::typedef::METHOD_LIST)?
        } else {
            end_of_table
        };

        let start = start.clamp(1, end_of_table);
        Ok(start..end.clamp(start, end_of_table))
    }

    /// Maps a position in a `TypeDef` method list to a `MethodDef` row, following the
    /// `MethodPtr` indirection of uncompressed tables.
    pub(crate) fn method_row(&self, list_index: u32) -> Result<u32> {
        if self.metadata.tables.row_count(TableId::MethodPtr) == 0 {
            return Ok(list_index);
        }
        self.metadata.tables.value(TableId::MethodPtr, list_index, 0)
    }

    /// The `TypeDef` row declaring `MethodDef` row `method_row`.
    pub(crate) fn owner_of_method(&self, method_row: u32) -> Result<u32> {
        self.owners
            .get(&method_row)
            .copied()
            .ok_or(TokenNotFound(Token::from_parts(TableId::MethodDef, method_row)))
    }

    /// Walks every `TypeDef` method list once. A row claimed by two lists keeps the first
    /// owner.
    fn method_owners(&self) -> Result<HashMap<u32, u32>> {
        let mut owners = HashMap::new();
        for type_row in 1..=self.metadata.tables.row_count(TableId::TypeDef) {
            for list_index in self.method_range(type_row)? {
                owners.entry(self.method_row(list_index)?).or_insert(type_row);
            }
        }
        Ok(owners)
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.mode {
            OpenMode::ReadWrite => Ok(()),
            OpenMode::ReadOnly => Err(ReadOnly),
        }
    }

    fn method_def_row(&self, method: Token) -> Result<u32> {
        if method.table_id() != Some(TableId::MethodDef)
            || method.row() == 0
            || method.row() > self.metadata.tables.row_count(TableId::MethodDef)
        {
            return Err(TokenNotFound(method));
        }
        Ok(method.row())
    }
}

impl ModuleView for CilAssembly {
    fn assembly_name(&self) -> Option<&str> {
        self.assembly_name.as_deref()
    }

    fn module_name(&self) -> &str {
        &self.module_name
    }

    fn references_assembly(&self, name: &str) -> bool {
        self.metadata
            .tables
            .rows(TableId::AssemblyRef)
            .any(|(_, values)| {
                self.string(values[col::assemblyref::NAME])
                    .is_ok_and(|reference| reference == name)
            })
    }

    fn types(&self) -> Result<Vec<TypeDefinition>> {
        let mut types = Vec::new();

        for type_row in 1..=self.metadata.tables.row_count(TableId::TypeDef) {
            let token = Token::from_parts(TableId::TypeDef, type_row);

            let mut methods = Vec::new();
            for list_index in self.method_range(type_row)? {
                let row = self.method_row(list_index)?;
                let values = self.metadata.tables.row(TableId::MethodDef, row)?;
                methods.push(MethodDefinition {
                    token: Token::from_parts(TableId::MethodDef, row),
                    name: self.string(values[col::methoddef::NAME])?.to_string(),
                    has_body: has_il_body(
                        values[col::methoddef::RVA],
                        values[col::methoddef::IMPL_FLAGS],
                        values[col::methoddef::FLAGS],
                    ),
                });
            }

            types.push(TypeDefinition {
                token,
                full_name: self.type_name(token)?.full_name(),
                methods,
            });
        }

        Ok(types)
    }

    fn resolve_method(&self, token: Token) -> Result<Option<MethodReference>> {
        self.method_reference(token)
    }
}

impl ModuleEditor for CilAssembly {
    fn method_body(&self, method: Token) -> Result<Option<CilBody>> {
        let row = self.method_def_row(method)?;
        if let Some(body) = self.bodies.get(&row) {
            return CilBody::decode(body).map(Some);
        }

        let values = self.metadata.tables.row(TableId::MethodDef, row)?;
        let rva = values[col::methoddef::RVA];
        if !has_il_body(
            rva,
            values[col::methoddef::IMPL_FLAGS],
            values[col::methoddef::FLAGS],
        ) {
            return Ok(None);
        }

        let offset = self.file.rva_to_offset(rva as usize)?;
        let body = MethodBody::from(self.file.data_slice(offset, self.file.len().saturating_sub(offset))?)?;
        CilBody::decode(&body).map(Some)
    }

    fn set_method_body(&mut self, method: Token, body: CilBody) -> Result<()> {
        self.ensure_writable()?;
        let row = self.method_def_row(method)?;

        let encoded = body.encode()?;
        self.bodies.insert(row, encoded);
        self.modified = true;
        Ok(())
    }

    fn import_method(&mut self, method: &MethodReference) -> Result<Token> {
        self.ensure_writable()?;
        if let Some(token) = self.imports.get(method) {
            return Ok(*token);
        }

        let token = self.import_member_ref(method)?;
        self.imports.insert(method.clone(), token);
        self.modified = true;
        Ok(token)
    }

    fn is_modified(&self) -> bool {
        self.modified
    }

    fn save(&mut self) -> Result<()> {
        self.ensure_writable()?;
        let Some(path) = self.path.clone() else {
            return Err(crate::Error::Error(
                "Module was loaded from memory and has no file to save to".to_string(),
            ));
        };

        let data = self.to_bytes()?;
        writer::replace_file(&path, &data)?;
        log::debug!(
            target: "repolib_patcher",
            "wrote {} bytes to {}",
            data.len(),
            path.display()
        );
        Ok(())
    }
}

/// Opens [`CilAssembly`] modules from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct CilProvider;

impl ModuleProvider for CilProvider {
    type Module = CilAssembly;

    fn open_read(&self, path: &Path) -> Result<CilAssembly> {
        CilAssembly::open(path, OpenMode::ReadOnly)
    }

    fn open_write(&self, path: &Path) -> Result<CilAssembly> {
        CilAssembly::open(path, OpenMode::ReadWrite)
    }
}

fn version_of(values: &[u32], major: usize) -> [u16; 4] {
    #[allow(clippy::cast_possible_truncation)]
    let part = |index: usize| values[major + index] as u16;
    [part(0), part(1), part(2), part(3)]
}

/// The public key token: the last eight bytes of the key's SHA-1, reversed.
pub(crate) fn public_key_token(public_key: &[u8]) -> [u8; 8] {
    let digest = Sha1::digest(public_key);
    let mut token = [0_u8; 8];
    for (slot, byte) in token.iter_mut().zip(digest.iter().rev()) {
        *slot = *byte;
    }
    token
}
