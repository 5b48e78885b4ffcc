//! Command-line argument definitions for the update-fetcher binary.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Fetch, verify and install update artifacts.
#[derive(Parser, Debug)]
#[command(name = "update-fetcher")]
#[command(version, about)]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Fetch a pinned artifact into the cache:\n",
    "    $ update-fetcher fetch --url https://example.com/app.bin \\\n",
    "        --digest sha256:<hex> --size 1048576\n\n",
    "  Check a manifest and install anything newer:\n",
    "    $ update-fetcher check --manifest https://example.com/version.json \\\n",
    "        --current 1.2.0 --install-with ./install.sh\n\n",
    "Settings can also come from UPDATE_FETCHER__* environment variables.",
))]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON).
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Download and verify a single artifact.
    Fetch(FetchArgs),

    /// Query an update manifest, optionally installing a newer release.
    Check(CheckArgs),

    /// Remove cached artifacts and staging files.
    Clean(CleanArgs),

    /// Print the effective configuration.
    Config,
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Source URL of the artifact.
    #[arg(short, long, value_name = "URL")]
    pub url: String,

    /// Expected digest, `sha256:<hex>`, `blake3:<hex>` or bare sha256 hex.
    #[arg(short, long, value_name = "DIGEST")]
    pub digest: Option<String>,

    /// Expected size in bytes.
    #[arg(short, long, value_name = "BYTES")]
    pub size: Option<u64>,

    /// Cache key; derived from the URL when omitted.
    #[arg(short, long, value_name = "KEY")]
    pub key: Option<String>,

    /// Accept an artifact with neither digest nor size.
    #[arg(long)]
    pub allow_unverified: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// URL of the version manifest.
    #[arg(short, long, value_name = "URL")]
    pub manifest: String,

    /// Currently installed version.
    #[arg(long, value_name = "VERSION")]
    pub current: String,

    /// Installer program; receives the artifact path as its last argument.
    #[arg(long, value_name = "PROGRAM")]
    pub install_with: Option<PathBuf>,

    /// Extra arguments passed to the installer before the artifact path.
    #[arg(long = "install-arg", value_name = "ARG", requires = "install_with")]
    pub install_args: Vec<String>,

    /// Accept manifests that publish neither digest nor size.
    #[arg(long)]
    pub allow_unverified: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CleanArgs {
    /// Keys to keep; everything else in the cache is removed.
    #[arg(long = "keep", value_name = "KEY")]
    pub keep: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::parse_from([
            "update-fetcher",
            "-vv",
            "fetch",
            "--url",
            "https://example.com/app.bin",
            "--size",
            "42",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Fetch(args) = cli.command else {
            panic!("Expected fetch");
        };
        assert_eq!(args.size, Some(42));
        assert!(args.digest.is_none());
        assert!(!args.allow_unverified);
    }

    #[test]
    fn test_parse_clean_keep_list() {
        let cli = Cli::parse_from([
            "update-fetcher",
            "clean",
            "--keep",
            "app-1.0.0",
            "--keep",
            "app-1.1.0",
        ]);
        let Command::Clean(args) = cli.command else {
            panic!("Expected clean");
        };
        assert_eq!(args.keep, vec!["app-1.0.0", "app-1.1.0"]);
    }

    #[test]
    fn test_install_arg_requires_installer() {
        let result = Cli::try_parse_from([
            "update-fetcher",
            "check",
            "--manifest",
            "https://example.com/version.json",
            "--current",
            "1.0.0",
            "--install-arg",
            "quiet",
        ]);
        assert!(result.is_err());
    }
}
