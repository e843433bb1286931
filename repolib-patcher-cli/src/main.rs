mod app;

use clap::Parser;
use repolib_patcher::{CilProvider, LogFacade, PatcherConfig, Scanner};

use crate::app::Cli;

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })?;

    let cli = Cli::parse();

    // Info+ on stderr; --verbose enables debug; RUST_LOG overrides
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_module("repolib_patcher", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();

    if !cli.plugin_root.is_dir() {
        anyhow::bail!("{} is not a directory", cli.plugin_root.display());
    }

    let mut config =
        PatcherConfig::new(&cli.plugin_root).with_cache_reference_lookups(cli.cache_lookups);
    if let Some(dry_run) = cli.dry_run() {
        config = config.with_dry_run(dry_run);
    }
    if let Some(reference) = &cli.reference {
        config = config.with_reference_path(reference);
    }

    let report = Scanner::new(&config, &CilProvider, &LogFacade).run();

    if !report.is_success() {
        for (path, error) in &report.failed {
            eprintln!("failed: {}: {error}", path.display());
        }
        std::process::exit(1);
    }

    Ok(())
}
