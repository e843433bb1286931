//! Method attribute and body format flags.

use bitflags::bitflags;

/// Bitmask for `CODE_TYPE` extraction
pub const METHOD_IMPL_CODE_TYPE_MASK: u32 = 0x0003;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq)]
    /// Method implementation code type flags
    pub struct MethodImplCodeType: u32 {
        /// Method impl is IL
        const IL = 0x0000;
        /// Method impl is native
        const NATIVE = 0x0001;
        /// Method impl is OPTIL
        const OPTIL = 0x0002;
        /// Method impl is provided by the runtime
        const RUNTIME = 0x0003;
    }
}

impl MethodImplCodeType {
    /// Extract code type from raw implementation flags
    #[must_use]
    pub fn from_impl_flags(flags: u32) -> Self {
        Self::from_bits_truncate(flags & METHOD_IMPL_CODE_TYPE_MASK)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq)]
    /// Method modifiers and properties
    pub struct MethodModifiers: u32 {
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Implementation is forwarded through PInvoke
        const PINVOKE_IMPL = 0x2000;
    }
}

impl MethodModifiers {
    /// Extract method modifiers from raw method attributes
    #[must_use]
    pub fn from_method_flags(flags: u32) -> Self {
        Self::from_bits_truncate(flags)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq)]
    /// Flags that a method body can have
    pub struct MethodBodyFlags: u16 {
        /// Tiny method header format
        const TINY_FORMAT = 0x2;
        /// Fat method header format
        const FAT_FORMAT = 0x3;
        /// Flag of the fat method header, showing that there are more data sections appended to the header
        const MORE_SECTS = 0x8;
        /// Flag to indicate that this method should call the default constructor on all local variables
        const INIT_LOCALS = 0x10;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq)]
    /// Flags that a method body section can have
    pub struct SectionFlags: u8 {
        /// Indicates that this section contains exception handling data
        const EHTABLE = 0x1;
        /// Reserved, shall be 0
        const OPT_ILTABLE = 0x2;
        /// Indicates that the data section format is far
        const FAT_FORMAT = 0x40;
        /// Indicates that the data section is followed by another one
        const MORE_SECTS = 0x80;
    }
}

/// Whether a `MethodDef` row with these flags and RVA carries an IL body.
#[must_use]
pub fn has_il_body(rva: u32, impl_flags: u32, flags: u32) -> bool {
    let modifiers = MethodModifiers::from_method_flags(flags);
    rva != 0
        && MethodImplCodeType::from_impl_flags(impl_flags) == MethodImplCodeType::IL
        && !modifiers.contains(MethodModifiers::ABSTRACT)
        && !modifiers.contains(MethodModifiers::PINVOKE_IMPL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn il_body_detection() {
        assert!(has_il_body(0x2050, 0, 0x0096));
        assert!(!has_il_body(0, 0, 0x0096));
        assert!(!has_il_body(0x2050, 0x0003, 0x0096));
        assert!(!has_il_body(0x2050, 0, 0x0400 | 0x0040));
        assert!(!has_il_body(0x2050, 0, 0x2000 | 0x0010));
    }
}
