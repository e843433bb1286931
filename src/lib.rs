// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory
// - 'cilassembly/writer.rs' uses mmap to write the patched image

//! # repolib-patcher
//!
//! Rewrites deprecated `REPOLib` registration calls inside installed plugin assemblies.
//!
//! `REPOLib` replaced the `void` returning `Items.RegisterItem` and `Valuables.RegisterValuable`
//! overloads with overloads that return a `PrefabRef`. Plugins compiled against the old
//! overloads fail to bind once the library is updated. This crate walks a plugin directory,
//! finds every call site of a deprecated overload, retargets it to the `PrefabRef` overload
//! exported by the installed `REPOLib.dll`, and discards the new return value with a `pop` so
//! the evaluation stack stays balanced.
//!
//! ## Features
//!
//! - **Pure Rust PE and metadata editing** - no .NET runtime required
//! - **Index-based IL rewriting** - branch targets and exception regions follow inserted
//!   instructions, short branches are widened when they no longer reach
//! - **Idempotent** - patched plugins are recognised and left alone on the next run
//! - **Dry run** - report what would change without writing anything
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use repolib_patcher::prelude::*;
//!
//! let config = PatcherConfig::new("BepInEx/plugins");
//! let report = Scanner::new(&config, &CilProvider, &LogFacade).run();
//! println!(
//!     "{} plugins scanned, {} patched, {} failed",
//!     report.scanned,
//!     report.patched.len(),
//!     report.failed.len()
//! );
//! ```
//!
//! ## Architecture
//!
//! - [`file`](crate::File) - PE image access via `goblin`
//! - [`metadata`] - metadata root, heaps and tables, decoded into editable form
//! - [`assembly`] - CIL instruction decoding, encoding and method body editing
//! - [`cilassembly`] - a module backed by a PE image: resolution, import and writing
//! - [`patcher`] - deprecated call detection, reference resolution, rewriting and the
//!   directory scanner
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`] with [`Error`]. The scanner contains errors
//! per plugin file, so one malformed assembly never stops a scan.

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use repolib_patcher::prelude::*;
///
/// let assembly = CilAssembly::open("Plugin.dll".as_ref(), OpenMode::ReadOnly)?;
/// if assembly.references_assembly("REPOLib") {
///     println!("{} depends on REPOLib", assembly.module_name());
/// }
/// # Ok::<(), repolib_patcher::Error>(())
/// ```
pub mod prelude;

/// CIL instructions and method bodies based on ECMA-335
///
/// Method bodies are decoded into a list of [`assembly::Instruction`] values whose branch
/// targets and exception regions are instruction indices rather than byte offsets. This
/// makes inserting an instruction a list operation: everything that pointed at or past the
/// insertion point follows it, and offsets are recomputed when the body is encoded.
///
/// # Key Types
///
/// - [`assembly::CilBody`] - An editable method body
/// - [`assembly::Instruction`] - A decoded instruction
/// - [`assembly::Operand`] - Instruction operands (immediates, tokens, targets)
///
/// # Examples
///
/// ```rust
/// use repolib_patcher::assembly::{decode_stream, encode_stream};
///
/// let code = [0x00, 0x2A]; // nop, ret
/// let mut stream = decode_stream(&code)?;
/// let (encoded, _) = encode_stream(&mut stream.instructions)?;
/// assert_eq!(encoded, code);
/// # Ok::<(), repolib_patcher::Error>(())
/// ```
pub mod assembly;

/// Editable .NET modules backed by a PE image
///
/// See [`CilAssembly`] for opening, inspecting and saving a module.
pub mod cilassembly;

/// Metadata structures of ECMA-335: root, streams, tables, signatures and method bodies
///
/// # Key Components
///
/// - [`metadata::Metadata`] - the editable metadata image of one module
/// - [`metadata::cor20header`] - CLR 2.0 header information
/// - [`metadata::signatures`] - method and type signatures
/// - [`metadata::tables`] - table identifiers, coded indices and column layouts
/// - [`metadata::token`] - metadata tokens for cross-references
pub mod metadata;

/// Deprecated call rewriting and the plugin directory scanner
///
/// # Key Components
///
/// - [`Scanner`] - walks the plugin directory and patches every dependent plugin
/// - [`patcher::MethodRewriter`] - rewrites the call sites of one method body
/// - [`patcher::ReferenceResolver`] - finds replacement methods in the installed library
/// - [`patcher::ModuleView`], [`patcher::ModuleEditor`], [`patcher::ModuleProvider`] - the
///   module interface the rewriting logic is written against
pub mod patcher;

/// `repolib-patcher` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `repolib-patcher` Error type
///
/// # Examples
///
/// ```rust,no_run
/// use repolib_patcher::{CilAssembly, Error, OpenMode};
///
/// match CilAssembly::open("Plugin.dll".as_ref(), OpenMode::ReadOnly) {
///     Ok(_) => println!("Loaded successfully"),
///     Err(Error::NotSupported) => println!("File format not supported"),
///     Err(Error::Malformed { message, .. }) => println!("Malformed: {}", message),
///     Err(e) => println!("Error: {}", e),
/// }
/// ```
pub use error::Error;

/// A PE-backed module and the provider that opens it from disk.
pub use cilassembly::{CilAssembly, CilProvider, OpenMode};

/// The scanner and its configuration, the entry points of a patch run.
pub use patcher::{LogFacade, LogSink, PatcherConfig, ScanReport, Scanner};

/// Provides access to low-level file and memory parsing utilities.
///
/// # Example
///
/// ```rust
/// use repolib_patcher::Parser;
/// let code = [0x2A, 0x00, 0x00, 0x00];
/// let mut parser = Parser::new(&code);
/// assert_eq!(parser.read_le::<u32>()?, 0x2A);
/// # Ok::<(), repolib_patcher::Error>(())
/// ```
pub use file::{parser::Parser, File};
