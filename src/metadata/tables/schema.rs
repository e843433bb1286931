//! Column layouts of the metadata tables (ECMA-335 II.22).
//!
//! Rows are held as plain `u32` column values. The layout tells the tables stream codec how
//! wide each column is for a given [`TableInfo`], and gives the handful of readers in this
//! crate named column positions for the tables they inspect.

use crate::metadata::tables::{CodedIndexType, TableId, TableInfo};

/// The kind of a single table column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    /// A fixed-width little-endian constant of 1, 2 or 4 bytes
    Fixed(u8),
    /// Index into the `#Strings` heap
    Str,
    /// Index into the `#GUID` heap
    Guid,
    /// Index into the `#Blob` heap
    Blob,
    /// Simple index into another table
    Table(TableId),
    /// Coded index into one of several tables
    Coded(CodedIndexType),
}

impl ColumnKind {
    /// Width of the column in bytes under `info`.
    #[must_use]
    pub fn size(&self, info: &TableInfo) -> u8 {
        match self {
            ColumnKind::Fixed(size) => *size,
            ColumnKind::Str => info.str_bytes(),
            ColumnKind::Guid => info.guid_bytes(),
            ColumnKind::Blob => info.blob_bytes(),
            ColumnKind::Table(table) => info.table_index_bytes(*table),
            ColumnKind::Coded(coded) => info.coded_index_bytes(*coded),
        }
    }
}

use ColumnKind::{Blob, Coded, Fixed, Guid, Str, Table};

const U8: ColumnKind = Fixed(1);
const U16: ColumnKind = Fixed(2);
const U32: ColumnKind = Fixed(4);

/// Returns the column layout of `table`.
#[must_use]
pub fn columns(table: TableId) -> &'static [ColumnKind] {
    match table {
        TableId::Module => &[U16, Str, Guid, Guid, Guid],
        TableId::TypeRef => &[Coded(CodedIndexType::ResolutionScope), Str, Str],
        TableId::TypeDef => &[
            U32,
            Str,
            Str,
            Coded(CodedIndexType::TypeDefOrRef),
            Table(TableId::Field),
            Table(TableId::MethodDef),
        ],
        TableId::FieldPtr => &[Table(TableId::Field)],
        TableId::Field => &[U16, Str, Blob],
        TableId::MethodPtr => &[Table(TableId::MethodDef)],
        TableId::MethodDef => &[U32, U16, U16, Str, Blob, Table(TableId::Param)],
        TableId::ParamPtr => &[Table(TableId::Param)],
        TableId::Param => &[U16, U16, Str],
        TableId::InterfaceImpl => &[
            Table(TableId::TypeDef),
            Coded(CodedIndexType::TypeDefOrRef),
        ],
        TableId::MemberRef => &[Coded(CodedIndexType::MemberRefParent), Str, Blob],
        TableId::Constant => &[U8, U8, Coded(CodedIndexType::HasConstant), Blob],
        TableId::CustomAttribute => &[
            Coded(CodedIndexType::HasCustomAttribute),
            Coded(CodedIndexType::CustomAttributeType),
            Blob,
        ],
        TableId::FieldMarshal => &[Coded(CodedIndexType::HasFieldMarshal), Blob],
        TableId::DeclSecurity => &[U16, Coded(CodedIndexType::HasDeclSecurity), Blob],
        TableId::ClassLayout => &[U16, U32, Table(TableId::TypeDef)],
        TableId::FieldLayout => &[U32, Table(TableId::Field)],
        TableId::StandAloneSig => &[Blob],
        TableId::EventMap => &[Table(TableId::TypeDef), Table(TableId::Event)],
        TableId::EventPtr => &[Table(TableId::Event)],
        TableId::Event => &[U16, Str, Coded(CodedIndexType::TypeDefOrRef)],
        TableId::PropertyMap => &[Table(TableId::TypeDef), Table(TableId::Property)],
        TableId::PropertyPtr => &[Table(TableId::Property)],
        TableId::Property => &[U16, Str, Blob],
        TableId::MethodSemantics => &[
            U16,
            Table(TableId::MethodDef),
            Coded(CodedIndexType::HasSemantics),
        ],
        TableId::MethodImpl => &[
            Table(TableId::TypeDef),
            Coded(CodedIndexType::MethodDefOrRef),
            Coded(CodedIndexType::MethodDefOrRef),
        ],
        TableId::ModuleRef => &[Str],
        TableId::TypeSpec => &[Blob],
        TableId::ImplMap => &[
            U16,
            Coded(CodedIndexType::MemberForwarded),
            Str,
            Table(TableId::ModuleRef),
        ],
        TableId::FieldRVA => &[U32, Table(TableId::Field)],
        TableId::EncLog => &[U32, U32],
        TableId::EncMap => &[U32],
        TableId::Assembly => &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
        TableId::AssemblyProcessor => &[U32],
        TableId::AssemblyOS => &[U32, U32, U32],
        TableId::AssemblyRef => &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
        TableId::AssemblyRefProcessor => &[U32, Table(TableId::AssemblyRef)],
        TableId::AssemblyRefOS => &[U32, U32, U32, Table(TableId::AssemblyRef)],
        TableId::File => &[U32, Str, Blob],
        TableId::ExportedType => &[U32, U32, Str, Str, Coded(CodedIndexType::Implementation)],
        TableId::ManifestResource => &[U32, U32, Str, Coded(CodedIndexType::Implementation)],
        TableId::NestedClass => &[Table(TableId::TypeDef), Table(TableId::TypeDef)],
        TableId::GenericParam => &[U16, U16, Coded(CodedIndexType::TypeOrMethodDef), Str],
        TableId::MethodSpec => &[Coded(CodedIndexType::MethodDefOrRef), Blob],
        TableId::GenericParamConstraint => &[
            Table(TableId::GenericParam),
            Coded(CodedIndexType::TypeDefOrRef),
        ],
    }
}

/// Returns the size in bytes of one row of `table` under `info`.
#[must_use]
pub fn row_size(table: TableId, info: &TableInfo) -> usize {
    columns(table)
        .iter()
        .map(|column| usize::from(column.size(info)))
        .sum()
}

/// Column positions of the tables this crate reads or appends to.
#[allow(missing_docs)]
pub mod col {
    pub mod module {
        pub const NAME: usize = 1;
    }

    pub mod typeref {
        pub const RESOLUTION_SCOPE: usize = 0;
        pub const NAME: usize = 1;
        pub const NAMESPACE: usize = 2;
    }

    pub mod typedef {
        pub const FLAGS: usize = 0;
        pub const NAME: usize = 1;
        pub const NAMESPACE: usize = 2;
        pub const EXTENDS: usize = 3;
        pub const FIELD_LIST: usize = 4;
        pub const METHOD_LIST: usize = 5;
    }

    pub mod methoddef {
        pub const RVA: usize = 0;
        pub const IMPL_FLAGS: usize = 1;
        pub const FLAGS: usize = 2;
        pub const NAME: usize = 3;
        pub const SIGNATURE: usize = 4;
        pub const PARAM_LIST: usize = 5;
    }

    pub mod memberref {
        pub const CLASS: usize = 0;
        pub const NAME: usize = 1;
        pub const SIGNATURE: usize = 2;
    }

    pub mod moduleref {
        pub const NAME: usize = 0;
    }

    pub mod typespec {
        pub const SIGNATURE: usize = 0;
    }

    pub mod assembly {
        pub const MAJOR: usize = 1;
        pub const MINOR: usize = 2;
        pub const BUILD: usize = 3;
        pub const REVISION: usize = 4;
        pub const FLAGS: usize = 5;
        pub const PUBLIC_KEY: usize = 6;
        pub const NAME: usize = 7;
        pub const CULTURE: usize = 8;
    }

    pub mod assemblyref {
        pub const MAJOR: usize = 0;
        pub const MINOR: usize = 1;
        pub const BUILD: usize = 2;
        pub const REVISION: usize = 3;
        pub const FLAGS: usize = 4;
        pub const PUBLIC_KEY_OR_TOKEN: usize = 5;
        pub const NAME: usize = 6;
        pub const CULTURE: usize = 7;
        pub const HASH_VALUE: usize = 8;
    }

    pub mod nestedclass {
        pub const NESTED: usize = 0;
        pub const ENCLOSING: usize = 1;
    }

    pub mod methodspec {
        pub const METHOD: usize = 0;
    }
}
