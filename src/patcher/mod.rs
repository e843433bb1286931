//! Migration of REPOLib plugins from the deprecated registration API.
//!
//! Plugins built against older REPOLib releases call `RegisterItem` and `RegisterValuable`
//! overloads that returned `void`. Current releases return a `PrefabRef` handle from the same
//! operations. This module finds those call sites in installed plugin binaries, retargets them
//! to the current overloads found in the installed library, and discards the new return
//! value with a `pop` so the evaluation stack stays balanced.
//!
//! # Components
//!
//! - [`DeprecatedApi`] - decides whether a called method is a deprecated operation
//! - [`ReplacementTable`] - the overloads that have a known replacement
//! - [`ReferenceResolver`] - finds the replacement in the installed library
//! - [`MethodRewriter`] - retargets the calls inside one method body
//! - [`Scanner`] - walks the plugin directory and saves patched binaries
//!
//! All of them work against the [`ModuleView`], [`ModuleEditor`] and [`ModuleProvider`]
//! traits and report through a [`LogSink`].

mod config;
mod logging;
mod module;
mod replacements;
mod resolver;
mod rewriter;
mod scanner;
mod signature;
mod types;

pub use config::{LibraryTarget, PatcherConfig, DRY_RUN_DEFAULT};
pub use logging::{LogFacade, LogLevel, LogSink, RecordingSink};
pub use module::{
    MethodDefinition, MethodReference, ModuleEditor, ModuleProvider, ModuleView, TypeDefinition,
};
pub use replacements::ReplacementTable;
pub use resolver::ReferenceResolver;
pub use rewriter::MethodRewriter;
pub use scanner::{ScanReport, Scanner};
pub use signature::{DeprecatedApi, SignatureKey};
pub use types::{
    primitive_name, AssemblyIdentity, NamedType, TypeKind, TypeName, TypeScope, TypeSig,
};
