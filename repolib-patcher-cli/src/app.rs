use std::path::PathBuf;

use clap::Parser;

/// repolib-patcher - retarget deprecated REPOLib registration calls in installed plugins
#[derive(Debug, Parser)]
#[command(name = "repolib-patcher", version, about, long_about = None)]
pub struct Cli {
    /// Plugin directory to scan, e.g. `BepInEx/plugins`.
    #[arg(value_name = "PLUGIN_ROOT")]
    pub plugin_root: PathBuf,

    /// Report what would be patched without writing any file.
    #[arg(long, overrides_with = "no_dry_run")]
    pub dry_run: bool,

    /// Write patched files even if this build defaults to dry runs.
    #[arg(long, overrides_with = "dry_run")]
    pub no_dry_run: bool,

    /// Path of the REPOLib.dll to resolve replacements from.
    ///
    /// Defaults to `<PLUGIN_ROOT>/Zehs-REPOLib/REPOLib.dll`.
    #[arg(long, value_name = "PATH")]
    pub reference: Option<PathBuf>,

    /// Open the reference library once per run instead of once per lookup.
    #[arg(long)]
    pub cache_lookups: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// The dry-run choice made on the command line, `None` to keep the build default.
    ///
    /// The later of `--dry-run` and `--no-dry-run` wins.
    pub fn dry_run(&self) -> Option<bool> {
        if self.dry_run {
            Some(true)
        } else if self.no_dry_run {
            Some(false)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::Parser;

    #[test]
    fn dry_run_defaults_to_build_setting() {
        let cli = Cli::try_parse_from(["repolib-patcher", "plugins"]).unwrap();
        assert_eq!(cli.dry_run(), None);
    }

    #[test]
    fn no_dry_run_forces_live_run() {
        let cli = Cli::try_parse_from(["repolib-patcher", "plugins", "--no-dry-run"]).unwrap();
        assert_eq!(cli.dry_run(), Some(false));
    }

    #[test]
    fn last_dry_run_flag_wins() {
        let cli =
            Cli::try_parse_from(["repolib-patcher", "--dry-run", "--no-dry-run", "plugins"])
                .unwrap();
        assert_eq!(cli.dry_run(), Some(false));

        let cli =
            Cli::try_parse_from(["repolib-patcher", "--no-dry-run", "--dry-run", "plugins"])
                .unwrap();
        assert_eq!(cli.dry_run(), Some(true));
    }
}
