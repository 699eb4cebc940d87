// harden/src/cli.rs
//! Command-line interface definition for `harden`.
//! License: MIT OR Apache-2.0

use clap::Parser;
use std::path::PathBuf;

/// Version label used in the transcript when `-v` is not given.
pub const DEFAULT_VERSION_LABEL: &str = "0.01";

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(
    name = "harden",
    author = "Relay",
    version = env!("CARGO_PKG_VERSION"),
    about = "Apply a security hardening standard to this host",
    long_about = "Runs the remediation modules of a hardening standard in order, captures what they report, and leaves a text log, an HTML report and a compressed archive of the results. Without root privileges (or with -t) all changes are confined to a sandbox below the install directory.",
    arg_required_else_help = true,
)]
pub struct Cli {
    /// Hardening standard to apply (e.g. tdsh, stig, scsem).
    #[arg(long = "standard", short = 's', value_name = "STANDARD")]
    pub standard: String,

    /// Run only this module of the standard.
    #[arg(long = "execute-only", short = 'x', value_name = "MODULE")]
    pub module: Option<String>,

    /// Force test mode: confine all changes to the sandbox.
    #[arg(long = "test-mode", short = 't')]
    pub test_mode: bool,

    /// Ask modules to restore their test files after running (test mode only).
    #[arg(long = "reset-test", short = 'r')]
    pub reset_test: bool,

    /// Debug level: 1 prints directories and tool bindings.
    #[arg(long = "debug-level", short = 'd', value_name = "N", default_value_t = 0,
          value_parser = clap::value_parser!(u8).range(0..=1))]
    pub debug_level: u8,

    /// Log level: 0 also writes the HTML report, 1 writes the text log only.
    #[arg(long = "log-level", short = 'l', value_name = "N", default_value_t = 0,
          value_parser = clap::value_parser!(u8).range(0..=1))]
    pub log_level: u8,

    /// Version label shown in the transcript.
    #[arg(long = "version-label", short = 'v', value_name = "LABEL", default_value = DEFAULT_VERSION_LABEL)]
    pub version_label: String,

    /// Directory the installer payload lives in. Defaults to the directory of the executable.
    #[arg(long = "install-root", value_name = "DIR", env = "HARDEN_INSTALL_ROOT")]
    pub install_root: Option<PathBuf>,

    /// Standards registry to use instead of the built-in one.
    #[arg(long = "standards", value_name = "FILE", env = "HARDEN_STANDARDS_FILE")]
    pub standards: Option<PathBuf>,

    /// Tool catalog to use instead of the built-in one.
    #[arg(long = "tools", value_name = "FILE", env = "HARDEN_TOOLS_FILE")]
    pub tools: Option<PathBuf>,

    /// Suppress all log output.
    #[arg(long, short = 'q')]
    pub quiet: bool,
}
