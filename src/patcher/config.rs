//! Scan configuration.

use std::path::{Path, PathBuf};

/// Whether scans are dry runs unless configured otherwise, selected by the `dry-run` feature.
pub const DRY_RUN_DEFAULT: bool = cfg!(feature = "dry-run");

/// The library whose deprecated API is rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryTarget {
    /// Assembly name of the library, also used for the dependency and self checks
    pub assembly_name: String,
    /// Directory below the plugin root the library is installed in
    pub publisher: String,
    /// Namespace prefix every deprecated declaring type starts with
    pub deprecated_namespace: String,
    /// Operations that were deprecated, as declaring type full name and method name
    pub deprecated_operations: Vec<(String, String)>,
    /// Suffix the return type of a replacement must end with
    pub wrapper_suffix: String,
}

impl Default for LibraryTarget {
    fn default() -> Self {
        Self {
            assembly_name: "REPOLib".to_string(),
            publisher: "Zehs-REPOLib".to_string(),
            deprecated_namespace: "REPOLib.Modules.".to_string(),
            deprecated_operations: vec![
                ("REPOLib.Modules.Items".to_string(), "RegisterItem".to_string()),
                (
                    "REPOLib.Modules.Valuables".to_string(),
                    "RegisterValuable".to_string(),
                ),
            ],
            wrapper_suffix: "PrefabRef".to_string(),
        }
    }
}

impl LibraryTarget {
    /// Default install location of the library below `plugin_root`.
    #[must_use]
    pub fn reference_path(&self, plugin_root: &Path) -> PathBuf {
        plugin_root
            .join(&self.publisher)
            .join(format!("{}.dll", self.assembly_name))
    }
}

/// Configuration of one scan.
///
/// ```rust
/// use repolib_patcher::PatcherConfig;
///
/// let config = PatcherConfig::new("BepInEx/plugins")
///     .with_dry_run(true)
///     .with_cache_reference_lookups(true);
/// assert!(config.reference_path().ends_with("Zehs-REPOLib/REPOLib.dll"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatcherConfig {
    /// Directory scanned recursively for plugin binaries
    pub plugin_root: PathBuf,
    /// Detect and log only, never write
    pub dry_run: bool,
    /// The library being migrated
    pub library: LibraryTarget,
    /// File extension of candidate binaries, compared case-insensitively
    pub extension: String,
    /// Location of the reference library, if not at its default install location
    pub reference_path: Option<PathBuf>,
    /// Remember replacement lookups for the rest of the scan instead of reopening the
    /// reference library for every call site
    pub cache_reference_lookups: bool,
}

impl Default for PatcherConfig {
    fn default() -> Self {
        Self {
            plugin_root: PathBuf::from("."),
            dry_run: DRY_RUN_DEFAULT,
            library: LibraryTarget::default(),
            extension: "dll".to_string(),
            reference_path: None,
            cache_reference_lookups: false,
        }
    }
}

impl PatcherConfig {
    /// Default configuration for scanning `plugin_root`.
    #[must_use]
    pub fn new(plugin_root: impl Into<PathBuf>) -> Self {
        Self {
            plugin_root: plugin_root.into(),
            ..Self::default()
        }
    }

    /// Sets dry-run mode.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Overrides the location of the reference library.
    #[must_use]
    pub fn with_reference_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.reference_path = Some(path.into());
        self
    }

    /// Enables or disables caching of replacement lookups.
    #[must_use]
    pub fn with_cache_reference_lookups(mut self, cache: bool) -> Self {
        self.cache_reference_lookups = cache;
        self
    }

    /// Replaces the library being migrated.
    #[must_use]
    pub fn with_library(mut self, library: LibraryTarget) -> Self {
        self.library = library;
        self
    }

    /// Where the reference library is loaded from.
    #[must_use]
    pub fn reference_path(&self) -> PathBuf {
        self.reference_path
            .clone()
            .unwrap_or_else(|| self.library.reference_path(&self.plugin_root))
    }

    /// Whether `path` has the candidate extension.
    #[must_use]
    pub fn is_candidate(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| extension.eq_ignore_ascii_case(&self.extension))
    }
}
