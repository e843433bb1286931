//! Plugin directory scanning.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{
    patcher::{
        config::PatcherConfig,
        logging::LogSink,
        module::{MethodDefinition, ModuleEditor, ModuleProvider, ModuleView, TypeDefinition},
        replacements::ReplacementTable,
        resolver::ReferenceResolver,
        rewriter::MethodRewriter,
        signature::DeprecatedApi,
    },
    Result,
};

/// What a scan did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Candidate files found below the plugin root
    pub scanned: usize,
    /// Candidates skipped as the library itself or as not depending on it
    pub skipped: usize,
    /// Files that were patched, or would have been in a dry run
    pub patched: Vec<PathBuf>,
    /// Calls retargeted across all files
    pub substitutions: usize,
    /// Files that could not be processed, with the reason
    pub failed: Vec<(PathBuf, String)>,
}

impl ScanReport {
    /// Whether every candidate was processed without error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Outcome {
    Skipped,
    Unchanged,
    Patched(usize),
}

/// Walks the plugin directory and rewrites every dependent plugin.
///
/// # Examples
///
/// ```rust,no_run
/// use repolib_patcher::{CilProvider, LogFacade, PatcherConfig, Scanner};
///
/// let config = PatcherConfig::new("BepInEx/plugins").with_dry_run(true);
/// let report = Scanner::new(&config, &CilProvider, &LogFacade).run();
/// println!("{} plugins would be patched", report.patched.len());
/// ```
pub struct Scanner<'a, P: ModuleProvider> {
    config: &'a PatcherConfig,
    provider: &'a P,
    log: &'a dyn LogSink,
    api: DeprecatedApi,
    table: ReplacementTable,
}

impl<'a, P: ModuleProvider> Scanner<'a, P> {
    /// A scanner using the built-in replacement table.
    pub fn new(config: &'a PatcherConfig, provider: &'a P, log: &'a dyn LogSink) -> Self {
        Self::with_table(config, provider, log, ReplacementTable::builtin())
    }

    /// A scanner using `table` for replacements.
    pub fn with_table(
        config: &'a PatcherConfig,
        provider: &'a P,
        log: &'a dyn LogSink,
        table: ReplacementTable,
    ) -> Self {
        Scanner {
            config,
            provider,
            log,
            api: DeprecatedApi::new(&config.library),
            table,
        }
    }

    /// Every candidate file below the plugin root, in a stable order.
    #[must_use]
    pub fn candidates(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.config.plugin_root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(error) => {
                    self.log
                        .warning(&format!("Skipping unreadable directory entry: {error}"));
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && self.config.is_candidate(entry.path()))
            .map(walkdir::DirEntry::into_path)
            .collect()
    }

    /// Scans the plugin root.
    ///
    /// Failures are contained per file: they are logged, recorded in the report and the scan
    /// moves on to the next file.
    pub fn run(&self) -> ScanReport {
        self.log.info(&format!(
            "REPOLib patcher initialized! (Dry run = {})",
            self.config.dry_run
        ));

        let mut resolver = ReferenceResolver::new(
            self.provider,
            self.config.reference_path(),
            &self.config.library.wrapper_suffix,
            self.log,
            self.config.cache_reference_lookups,
        );

        let mut report = ScanReport::default();
        for path in self.candidates() {
            report.scanned += 1;

            match self.process(&path, &mut resolver) {
                Ok(Outcome::Skipped) => report.skipped += 1,
                Ok(Outcome::Unchanged) => {}
                Ok(Outcome::Patched(substitutions)) => {
                    report.substitutions += substitutions;
                    report.patched.push(path);
                }
                Err(error) => {
                    self.log.error(&format!(
                        "Failed to check plugin \"{}\": {}",
                        path.display(),
                        error
                    ));
                    report.failed.push((path, error.to_string()));
                }
            }
        }

        self.log.info(&format!(
            "Finished scanning all plugins. {} scanned, {} {}, {} call sites, {} failed.",
            report.scanned,
            report.patched.len(),
            if self.config.dry_run {
                "would be patched"
            } else {
                "patched"
            },
            report.substitutions,
            report.failed.len()
        ));

        report
    }

    fn is_library(&self, module: &P::Module) -> bool {
        let library = &self.config.library.assembly_name;
        if module.assembly_name() == Some(library.as_str()) {
            return true;
        }

        let module_name = module.module_name();
        let stem = Path::new(module_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(module_name);
        stem == library
    }

    fn process(&self, path: &Path, resolver: &mut ReferenceResolver<'a, P>) -> Result<Outcome> {
        {
            let view = self.provider.open_read(path)?;
            if self.is_library(&view) {
                self.log
                    .debug(&format!("Skipping the library itself: {}", path.display()));
                return Ok(Outcome::Skipped);
            }
            if !view.references_assembly(&self.config.library.assembly_name) {
                return Ok(Outcome::Skipped);
            }
        }

        let mut module = self.provider.open_write(path)?;
        let types = module.types()?;
        let module_name = module.module_name().to_string();

        let mut rewriter = MethodRewriter::new(
            &self.api,
            &self.table,
            resolver,
            self.log,
            &module_name,
        );

        let mut substitutions = 0;
        for definition in &types {
            for method in definition.methods.iter().filter(|method| method.has_body) {
                match Self::rewrite_method(&mut module, &mut rewriter, definition, method) {
                    Ok(count) => substitutions += count,
                    Err(error) => self.log.error(&format!(
                        "[{}] Failed to patch method {}::{}: {}",
                        module_name, definition.full_name, method.name, error
                    )),
                }
            }
        }

        if substitutions == 0 {
            return Ok(Outcome::Unchanged);
        }

        let file_name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned());
        if self.config.dry_run {
            self.log
                .info(&format!("[Dry Run] {file_name} would be patched."));
        } else {
            module.save()?;
            self.log.info(&format!("Patched and saved: {file_name}"));
        }

        Ok(Outcome::Patched(substitutions))
    }

    fn rewrite_method(
        module: &mut P::Module,
        rewriter: &mut MethodRewriter<'_, 'a, P>,
        definition: &TypeDefinition,
        method: &MethodDefinition,
    ) -> Result<usize> {
        let Some(mut body) = module.method_body(method.token)? else {
            return Ok(0);
        };

        let name = format!("{}::{}", definition.full_name, method.name);
        let count = rewriter.rewrite(module, &name, &mut body)?;
        if count > 0 {
            module.set_method_body(method.token, body)?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{
        assembly::{opcodes, Instruction},
        patcher::logging::{LogLevel, RecordingSink},
        test::{deprecated_valuable, reference_library, FixtureProvider, ModuleBuilder},
    };

    struct Plugins {
        dir: tempfile::TempDir,
        provider: FixtureProvider,
    }

    impl Plugins {
        fn new() -> Self {
            Plugins {
                dir: tempfile::tempdir().unwrap(),
                provider: FixtureProvider::new(),
            }
        }

        fn add(&self, relative: &str, module: ModuleBuilder) -> PathBuf {
            let path = self.dir.path().join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"").unwrap();
            self.provider.insert(&path, module);
            path
        }

        fn config(&self) -> PatcherConfig {
            PatcherConfig::new(self.dir.path()).with_dry_run(false)
        }
    }

    fn dependent_plugin(with_pop: bool) -> ModuleBuilder {
        let mut builder = ModuleBuilder::new("CoolValuables").with_reference("REPOLib");
        let old = builder.member_ref(deprecated_valuable());
        let mut code = vec![
            Instruction::new(0x02),
            Instruction::with_token(opcodes::CALL, old),
        ];
        if with_pop {
            code.push(Instruction::new(opcodes::POP));
        }
        code.push(Instruction::new(opcodes::RET));
        builder.method_with_body("CoolValuables", "Plugin", "Awake", code);
        builder
    }

    #[test]
    fn patches_dependent_plugins() {
        let plugins = Plugins::new();
        plugins.add("Zehs-REPOLib/REPOLib.dll", reference_library());
        let cool = plugins.add("Someone-Cool/CoolValuables.dll", dependent_plugin(false));
        let sink = RecordingSink::new();

        let config = plugins.config();
        let report = Scanner::new(&config, &plugins.provider, &sink).run();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.patched, vec![cool.clone()]);
        assert_eq!(report.substitutions, 1);
        assert!(report.is_success());
        assert_eq!(plugins.provider.saves(), vec![cool.clone()]);

        let saved = plugins.provider.module(&cool).unwrap();
        let mnemonics: Vec<_> = saved.methods[0]
            .body
            .as_ref()
            .unwrap()
            .instructions
            .iter()
            .map(Instruction::mnemonic)
            .collect();
        assert_eq!(mnemonics, ["ldarg.0", "call", "pop", "ret"]);
        assert!(sink
            .messages(LogLevel::Info)
            .contains(&"Patched and saved: CoolValuables.dll".to_string()));

        // idempotent
        let again = Scanner::new(&config, &plugins.provider, &sink).run();
        assert_eq!(again.substitutions, 0);
        assert!(again.patched.is_empty());
        assert_eq!(plugins.provider.saves().len(), 1);
    }

    #[test]
    fn independent_plugins_are_never_opened_for_write() {
        let plugins = Plugins::new();
        plugins.add("Zehs-REPOLib/REPOLib.dll", reference_library());
        plugins.add("Other/Other.dll", ModuleBuilder::new("Other").with_reference("mscorlib"));
        let sink = RecordingSink::new();

        let report = Scanner::new(&plugins.config(), &plugins.provider, &sink).run();

        assert_eq!(report.skipped, 2);
        assert_eq!(plugins.provider.write_opens(), 0);
    }

    #[test]
    fn library_is_never_a_target() {
        let plugins = Plugins::new();
        // a library build that happens to call its own deprecated API
        let mut library = reference_library().with_reference("REPOLib");
        let old = library.member_ref(deprecated_valuable());
        library.method_with_body(
            "REPOLib",
            "Plugin",
            "Awake",
            vec![
                Instruction::with_token(opcodes::CALL, old),
                Instruction::new(opcodes::RET),
            ],
        );
        plugins.add("Zehs-REPOLib/REPOLib.dll", library);

        let report = Scanner::new(&plugins.config(), &plugins.provider, &RecordingSink::new()).run();
        assert_eq!(report.skipped, 1);
        assert_eq!(plugins.provider.write_opens(), 0);
    }

    #[test]
    fn dry_run_writes_nothing() {
        let plugins = Plugins::new();
        plugins.add("Zehs-REPOLib/REPOLib.dll", reference_library());
        let cool = plugins.add("Cool/CoolValuables.dll", dependent_plugin(true));
        let sink = RecordingSink::new();

        let config = plugins.config().with_dry_run(true);
        let dry = Scanner::new(&config, &plugins.provider, &sink).run();

        assert_eq!(dry.patched, vec![cool]);
        assert!(plugins.provider.saves().is_empty());
        assert!(sink
            .messages(LogLevel::Info)
            .contains(&"[Dry Run] CoolValuables.dll would be patched.".to_string()));

        let live = Scanner::new(&plugins.config(), &plugins.provider, &sink).run();
        assert_eq!(live.patched, dry.patched);
        assert_eq!(plugins.provider.saves(), live.patched);
    }

    #[test]
    fn missing_library_disables_rewriting() {
        let plugins = Plugins::new();
        plugins.add("A/A.dll", dependent_plugin(false));
        plugins.add("B/B.dll", dependent_plugin(true));
        let sink = RecordingSink::new();

        let report = Scanner::new(&plugins.config(), &plugins.provider, &sink).run();

        assert_eq!(report.substitutions, 0);
        assert!(report.patched.is_empty());
        assert!(plugins.provider.saves().is_empty());
        assert_eq!(sink.count(LogLevel::Warning), 1);
    }

    #[test]
    fn broken_files_do_not_stop_the_scan() {
        let plugins = Plugins::new();
        plugins.add("Zehs-REPOLib/REPOLib.dll", reference_library());
        // on disk but unknown to the provider, so opening fails
        let broken = plugins.dir.path().join("Broken/Broken.dll");
        fs::create_dir_all(broken.parent().unwrap()).unwrap();
        fs::write(&broken, b"MZ").unwrap();
        let cool = plugins.add("Cool/CoolValuables.dll", dependent_plugin(false));
        // not a candidate
        fs::write(plugins.dir.path().join("Cool/readme.txt"), b"hi").unwrap();
        let sink = RecordingSink::new();

        let report = Scanner::new(&plugins.config(), &plugins.provider, &sink).run();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, broken);
        assert_eq!(report.patched, vec![cool]);
        assert!(!report.is_success());
    }
}
