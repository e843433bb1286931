//! # repolib-patcher Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! of the library. Import it to get quick access to everything a patch run, or a tool
//! inspecting plugin assemblies, needs.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all operations
pub use crate::Error;

/// The result type used throughout the crate
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Walks a plugin directory and patches every dependent plugin
pub use crate::patcher::{ScanReport, Scanner};

/// Configuration of a patch run and of the library being patched against
pub use crate::patcher::{LibraryTarget, PatcherConfig};

/// PE-backed modules
pub use crate::cilassembly::{CilAssembly, CilProvider, OpenMode};

/// Low-level file parsing utilities
pub use crate::{File, Parser};

// ================================================================================================
// Module Interface
// ================================================================================================

/// Traits the rewriting logic is written against
pub use crate::patcher::{ModuleEditor, ModuleProvider, ModuleView};

/// Name-based method and type references
pub use crate::patcher::{MethodReference, SignatureKey, TypeName, TypeScope, TypeSig};

// ================================================================================================
// Rewriting
// ================================================================================================

/// Deprecated call detection, replacement lookup and call-site rewriting
pub use crate::patcher::{DeprecatedApi, MethodRewriter, ReferenceResolver, ReplacementTable};

/// Editable method bodies
pub use crate::assembly::{CilBody, Instruction, Operand};

/// Metadata token type for referencing table entries
pub use crate::metadata::token::Token;

// ================================================================================================
// Logging
// ================================================================================================

/// Log sinks
pub use crate::patcher::{LogFacade, LogLevel, LogSink, RecordingSink};
