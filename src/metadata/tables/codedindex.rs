//! Coded indices (ECMA-335 II.24.2.6).
//!
//! A coded index stores a row number together with a small tag that selects one of several
//! tables. The tag occupies the low `ceil(log2(n))` bits, where `n` is the number of tables
//! the index may point into.

use strum::{EnumCount, EnumIter};

use crate::{
    metadata::{tables::TableId, token::Token},
    Result,
};

/// Represents all coded index types defined in the CLI metadata specification.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, EnumIter, EnumCount)]
#[repr(usize)]
pub enum CodedIndexType {
    /// References `TypeDef`, `TypeRef`, or `TypeSpec` tables.
    TypeDefOrRef,
    /// References `Field`, `Param`, or `Property` tables.
    HasConstant,
    /// References any of the 22 tables that can carry custom attributes.
    HasCustomAttribute,
    /// References `Field` or `Param` tables.
    HasFieldMarshal,
    /// References `TypeDef`, `MethodDef`, or `Assembly` tables.
    HasDeclSecurity,
    /// References `TypeDef`, `TypeRef`, `ModuleRef`, `MethodDef`, or `TypeSpec` tables.
    MemberRefParent,
    /// References `Event` or `Property` tables.
    HasSemantics,
    /// References `MethodDef` or `MemberRef` tables.
    MethodDefOrRef,
    /// References `Field` or `MethodDef` tables.
    MemberForwarded,
    /// References `File`, `AssemblyRef`, or `ExportedType` tables.
    Implementation,
    /// References `MethodDef` or `MemberRef` tables through tags 2 and 3.
    CustomAttributeType,
    /// References `Module`, `ModuleRef`, `AssemblyRef`, or `TypeRef` tables.
    ResolutionScope,
    /// References `TypeDef` or `MethodDef` tables.
    TypeOrMethodDef,
}

impl CodedIndexType {
    /// Returns the tables this coded index can reference, indexed by tag.
    ///
    /// `CustomAttributeType` reserves tags 0, 1 and 4; they are `None` here.
    #[must_use]
    pub fn tables(&self) -> &'static [Option<TableId>] {
        match self {
            CodedIndexType::TypeDefOrRef => &[
                Some(TableId::TypeDef),
                Some(TableId::TypeRef),
                Some(TableId::TypeSpec),
            ],
            CodedIndexType::HasConstant => &[
                Some(TableId::Field),
                Some(TableId::Param),
                Some(TableId::Property),
            ],
            CodedIndexType::HasCustomAttribute => &[
                Some(TableId::MethodDef),
                Some(TableId::Field),
                Some(TableId::TypeRef),
                Some(TableId::TypeDef),
                Some(TableId::Param),
                Some(TableId::InterfaceImpl),
                Some(TableId::MemberRef),
                Some(TableId::Module),
                Some(TableId::DeclSecurity),
                Some(TableId::Property),
                Some(TableId::Event),
                Some(TableId::StandAloneSig),
                Some(TableId::ModuleRef),
                Some(TableId::TypeSpec),
                Some(TableId::Assembly),
                Some(TableId::AssemblyRef),
                Some(TableId::File),
                Some(TableId::ExportedType),
                Some(TableId::ManifestResource),
                Some(TableId::GenericParam),
                Some(TableId::GenericParamConstraint),
                Some(TableId::MethodSpec),
            ],
            CodedIndexType::HasFieldMarshal => &[Some(TableId::Field), Some(TableId::Param)],
            CodedIndexType::HasDeclSecurity => &[
                Some(TableId::TypeDef),
                Some(TableId::MethodDef),
                Some(TableId::Assembly),
            ],
            CodedIndexType::MemberRefParent => &[
                Some(TableId::TypeDef),
                Some(TableId::TypeRef),
                Some(TableId::ModuleRef),
                Some(TableId::MethodDef),
                Some(TableId::TypeSpec),
            ],
            CodedIndexType::HasSemantics => &[Some(TableId::Event), Some(TableId::Property)],
            CodedIndexType::MethodDefOrRef => &[Some(TableId::MethodDef), Some(TableId::MemberRef)],
            CodedIndexType::MemberForwarded => &[Some(TableId::Field), Some(TableId::MethodDef)],
            CodedIndexType::Implementation => &[
                Some(TableId::File),
                Some(TableId::AssemblyRef),
                Some(TableId::ExportedType),
            ],
            CodedIndexType::CustomAttributeType => &[
                None,
                None,
                Some(TableId::MethodDef),
                Some(TableId::MemberRef),
                None,
            ],
            CodedIndexType::ResolutionScope => &[
                Some(TableId::Module),
                Some(TableId::ModuleRef),
                Some(TableId::AssemblyRef),
                Some(TableId::TypeRef),
            ],
            CodedIndexType::TypeOrMethodDef => &[Some(TableId::TypeDef), Some(TableId::MethodDef)],
        }
    }

    /// Number of low bits holding the tag.
    #[must_use]
    pub fn tag_bits(&self) -> u8 {
        let count = self.tables().len();
        // ceil(log2(count)) for count >= 2
        #[allow(clippy::cast_possible_truncation)]
        let bits = (usize::BITS - (count - 1).leading_zeros()) as u8;
        bits
    }

    /// Splits a raw coded index value into its table and row.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the tag is out of range or reserved.
    pub fn decode(&self, value: u32) -> Result<CodedIndex> {
        let tag_bits = self.tag_bits();
        let tag = (value & ((1 << tag_bits) - 1)) as usize;
        let row = value >> tag_bits;

        match self.tables().get(tag) {
            Some(Some(table)) => Ok(CodedIndex::new(*table, row)),
            _ => Err(malformed_error!(
                "Invalid tag {} for coded index {:?}",
                tag,
                self
            )),
        }
    }

    /// Combines a table and row into a raw coded index value.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `table` can not be referenced by this index.
    pub fn encode(&self, table: TableId, row: u32) -> Result<u32> {
        let Some(tag) = self.tables().iter().position(|t| *t == Some(table)) else {
            return Err(malformed_error!(
                "Table {:?} can not be referenced by coded index {:?}",
                table,
                self
            ));
        };

        #[allow(clippy::cast_possible_truncation)]
        Ok((row << self.tag_bits()) | tag as u32)
    }
}

/// A decoded coded index: the referenced table, its row, and the equivalent token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodedIndex {
    /// The table this index points into
    pub tag: TableId,
    /// The 1-based row number; 0 means null
    pub row: u32,
    /// Token form of `tag` and `row`
    pub token: Token,
}

impl CodedIndex {
    /// Creates a coded index for `row` in `tag`.
    #[must_use]
    pub fn new(tag: TableId, row: u32) -> CodedIndex {
        CodedIndex {
            tag,
            row,
            token: Token::new(tag.token_base() | row),
        }
    }
}
