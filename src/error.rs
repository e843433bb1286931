use thiserror::Error;

use crate::metadata::token::Token;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors are grouped by the layer that raises them. The binary layer (PE image, metadata
/// streams, method bodies) reports structural problems, the import layer reports references
/// that could not be materialised in a target module, and I/O errors are passed through.
/// The scanner contains every one of these per plugin file, so a single broken assembly never
/// aborts a scan.
///
/// # Error Categories
///
/// ## File Parsing Errors
/// - [`Error::Malformed`] - Corrupted or invalid file structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond file boundaries
/// - [`Error::NotSupported`] - Unsupported file format or feature
/// - [`Error::Empty`] - Empty input provided
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::GoblinErr`] - PE parsing errors from goblin crate
/// - [`Error::WalkErr`] - Directory traversal errors
///
/// ## Rewriting Errors
/// - [`Error::RecursionLimit`] - Maximum signature nesting depth exceeded
/// - [`Error::TokenNotFound`] - A metadata token does not point at an existing row
/// - [`Error::ImportFailed`] - A reference could not be imported into a module
/// - [`Error::ReadOnly`] - Mutation attempted on a module opened for reading
/// - [`Error::WriteFailed`] - The patched image could not be written
///
/// # Examples
///
/// ```rust,no_run
/// use repolib_patcher::{CilAssembly, Error, OpenMode};
/// use std::path::Path;
///
/// match CilAssembly::open(Path::new("plugin.dll"), OpenMode::ReadOnly) {
///     Ok(_assembly) => println!("loaded"),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed file: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The file is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the file.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This file type or feature is not supported.
    ///
    /// Raised for images that are valid PE files but use metadata features this crate does
    /// not rewrite, such as tables beyond the ECMA-335 assembly set.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error while walking the plugin directory.
    #[error("{0}")]
    WalkErr(#[from] walkdir::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// Recursion limit reached while decoding nested signature types.
    ///
    /// The associated value is the depth limit that was hit.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// A token referenced a table row that does not exist.
    #[error("Token does not reference an existing row - {0}")]
    TokenNotFound(Token),

    /// A method or type reference could not be imported into the target module.
    #[error("Failed to import reference - {0}")]
    ImportFailed(String),

    /// The patched image could not be written to its destination.
    #[error("Failed to write output - {message}")]
    WriteFailed {
        /// What went wrong
        message: String,
    },

    /// A mutating operation was attempted on a module opened for reading only.
    #[error("Module was opened read-only")]
    ReadOnly,
}
