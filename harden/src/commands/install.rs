//! The `harden` installation pipeline.
//!
//! Configuration problems (unknown standard or module, unbound tool, missing
//! ledger catalog) are all detected before the first module starts. Once
//! modules are running, the transcript gathered so far is written to the text
//! log whatever the outcome.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use is_terminal::IsTerminal;
use log::{debug, info};
use owo_colors::OwoColorize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use harden_core::ledger::{self, CatalogState};
use harden_core::report::{self, ArtifactPaths};
use harden_core::runner::PROGRESS_INTERVAL;
use harden_core::{
    ComplianceLedger, EnvironmentResolver, ExecutionContext, LedgerSpec, MergeSummary,
    ModuleDescriptor, ModuleRunner, ProgressSignal, ResolveRequest, StandardsRegistry, ToolCatalog,
    ToolLocator, ToolSet, Transcript,
};

use crate::cli::Cli;
use crate::ui::output_format;

/// Everything the pipeline needs from the command line.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub standard: String,
    pub module: Option<String>,
    pub test_mode: bool,
    pub reset_test: bool,
    pub debug_level: u8,
    pub log_level: u8,
    pub version_label: String,
    pub install_root: PathBuf,
    pub standards_file: Option<PathBuf>,
    pub tools_file: Option<PathBuf>,
}

impl InstallOptions {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let install_root = match cli.install_root {
            Some(root) => root,
            None => default_install_root()?,
        };
        Ok(Self {
            standard: cli.standard,
            module: cli.module,
            test_mode: cli.test_mode,
            reset_test: cli.reset_test,
            debug_level: cli.debug_level,
            log_level: cli.log_level,
            version_label: cli.version_label,
            install_root,
            standards_file: cli.standards,
            tools_file: cli.tools,
        })
    }
}

/// The directory the running executable lives in.
fn default_install_root() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Could not determine the location of the executable")?;
    exe.parent()
        .map(Path::to_path_buf)
        .context("The executable has no parent directory")
}

/// Where a finished run left its results.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub text_log: PathBuf,
    pub report: Option<PathBuf>,
    pub ledger: Option<(PathBuf, MergeSummary)>,
    pub archive: PathBuf,
    pub modules_run: usize,
    pub elapsed_secs: u64,
}

/// Prints a timestamp over the same console line while a module runs.
struct ConsoleProgress;

impl ProgressSignal for ConsoleProgress {
    fn tick(&self, now: DateTime<Local>) {
        let mut stderr = io::stderr();
        let _ = write!(stderr, "\r{}", now.format("%H:%M:%S").cyan());
        let _ = stderr.flush();
    }
}

fn console(msg: impl AsRef<str>) {
    let stdout = io::stdout();
    let supports_color = stdout.is_terminal();
    let _ = output_format::print_info_message(&mut stdout.lock(), msg.as_ref(), supports_color);
}

/// Ledger state carried through the run for the catalog-bearing standard.
struct LedgerRun<'a> {
    spec: &'a LedgerSpec,
    catalog: PathBuf,
    status_file: PathBuf,
    state: CatalogState,
}

fn load_registry(path: Option<&Path>) -> Result<StandardsRegistry> {
    let registry = match path {
        Some(path) => StandardsRegistry::load_from_file(path),
        None => StandardsRegistry::load_default(),
    };
    registry.context("Failed to load the standards registry")
}

fn load_tool_catalog(path: Option<&Path>) -> Result<ToolCatalog> {
    let catalog = match path {
        Some(path) => ToolCatalog::load_from_file(path),
        None => ToolCatalog::load_default(),
    };
    catalog.context("Failed to load the tool catalog")
}

/// Opening lines of the transcript.
fn banner(ctx: &ExecutionContext, tools: &ToolSet, version_label: &str, standard: &str) -> Vec<String> {
    let mut lines = Vec::new();
    if !ctx.is_live() {
        lines.push(format!("Running in {} mode.", ctx.mode()));
        if ctx.reset_test {
            lines.push("Reset files for testing is turned on.".to_string());
        }
        lines.push(format!("Debug level = {}", ctx.debug_level));
        lines.push(format!("Logging level = {}", ctx.log_level));
    }
    if ctx.debug_level >= 1 {
        lines.push(format!("The backup directory is here: {}", ctx.layout.backup_dir.display()));
        lines.push(format!("The logs directory is here: {}", ctx.layout.backup_logs.display()));
        lines.push(String::new());
        lines.push("External programs being used are:".to_string());
        for binding in tools.iter() {
            lines.push(format!("{} = {}", binding.name, binding.resolved_path.display()));
        }
    }
    lines.push(String::new());
    lines.push(format!("Hardening to version {} of {} standard.", version_label, standard));
    lines.push(String::new());
    lines
}

/// Catalog derivation (if needed) followed by every selected module.
async fn execute(
    runner: &ModuleRunner,
    modules: &[ModuleDescriptor],
    ledger: Option<&LedgerRun<'_>>,
    transcript: &mut Transcript,
) -> harden_core::HardenResult<usize> {
    if let Some(LedgerRun {
        catalog,
        state: CatalogState::Derivable { module, .. },
        ..
    }) = ledger
    {
        ledger::derive_catalog(runner, module, catalog, transcript).await?;
    }
    let invocations = runner.run_all(modules, transcript).await?;
    Ok(invocations.len())
}

/// Runs the whole pipeline for one standard.
pub async fn run_install(opts: &InstallOptions) -> Result<InstallOutcome> {
    let started_at = Local::now();
    let clock = Instant::now();
    info!("Starting harden for standard '{}'.", opts.standard);

    // Everything that can be misconfigured is checked before any module runs.
    let registry = load_registry(opts.standards_file.as_deref())?;
    let standard = registry.get(&opts.standard)?;
    let modules = standard.select_modules(opts.module.as_deref())?;

    let ctx = EnvironmentResolver::default()
        .resolve(&ResolveRequest {
            test_mode: opts.test_mode,
            install_root: opts.install_root.clone(),
            debug_level: opts.debug_level,
            log_level: opts.log_level,
            reset_test: opts.reset_test,
            selected_module: opts.module.clone(),
        })
        .context("Failed to resolve the execution environment")?;

    let catalog = load_tool_catalog(opts.tools_file.as_deref())?;
    let tools = ToolLocator::from_env().locate(&catalog)?;
    let tar = tools.require("TAR_PROGRAM")?.to_path_buf();
    let layout = &ctx.layout;

    let ledger_check = match &standard.ledger {
        Some(spec) => {
            let catalog = layout.backup_logs.join(&spec.catalog_file);
            let state = ledger::check_catalog(spec, &catalog, &layout.inst_var)?;
            Some((spec, catalog, state))
        }
        None => None,
    };

    ctx.bootstrap_dirs()?;

    let hostname = match tools.get("HOSTNAME_PROGRAM") {
        Some(program) => report::query_hostname(program).await,
        None => None,
    };
    let paths = ArtifactPaths::new(&layout.backup_logs, &layout.tmp_dir, started_at, hostname.as_deref());
    debug!("Artifacts will be written with stem {}", paths.stem);

    let ledger_run = match ledger_check {
        Some((spec, catalog, state)) => Some(LedgerRun {
            spec,
            catalog,
            status_file: ledger::create_status_file(&layout.tmp_dir, started_at)?,
            state,
        }),
        None => None,
    };

    let module_root = layout.inst_src.join(standard.module_dir());
    let mut runner = ModuleRunner::new(&module_root, &ctx, &tools);
    if ctx.writes_html() {
        runner = runner.with_env("outputHTML", paths.fragment.display().to_string());
    }
    if let Some(run) = &ledger_run {
        runner = runner
            .with_env("stigCSVFile", run.catalog.display().to_string())
            .with_env("stigStatusFile", run.status_file.display().to_string());
        if let CatalogState::Derivable { manual, .. } = &run.state {
            runner = runner.with_env("stigManualFile", manual.display().to_string());
        }
    }
    if io::stderr().is_terminal() {
        runner = runner.with_progress(Arc::new(ConsoleProgress), PROGRESS_INTERVAL);
    }

    let mut transcript = Transcript::new();
    for line in banner(&ctx, &tools, &opts.version_label, &standard.name) {
        println!("{}", line);
        transcript.note(line);
    }
    let banner_len = transcript.len();

    let executed = execute(&runner, &modules, ledger_run.as_ref(), &mut transcript).await;
    if io::stderr().is_terminal() {
        eprintln!();
    }
    for line in &transcript.lines()[banner_len..] {
        println!("{}", line);
    }
    report::write_text_log(&paths.text_log, &transcript)?;
    let modules_run = executed.with_context(|| {
        format!("Hardening stopped; the transcript so far is in {}", paths.text_log.display())
    })?;

    let mut members = Vec::new();
    let report = if ctx.writes_html() {
        let report_dir = report::write_report(
            &paths,
            &standard.upper_name(),
            &transcript,
            &layout.inst_dir.join("docs").join("css"),
            started_at,
        )?;
        members.push(file_name(&report_dir));
        members.push(file_name(&paths.report));
        Some(paths.report.clone())
    } else {
        members.push(file_name(&paths.text_log));
        None
    };

    let ledger = match &ledger_run {
        Some(run) => {
            let records = ledger::read_status_records(&run.status_file)?;
            let mut ledger = ComplianceLedger::load(&run.catalog)?;
            let summary = ledger.reconcile(&records, &run.spec.exceptions)?;
            members.push(file_name(&run.catalog));
            Some((run.catalog.clone(), summary))
        }
        None => None,
    };

    let archive = report::create_archive(&tar, &layout.backup_logs, &members).await?;

    Ok(InstallOutcome {
        text_log: paths.text_log,
        report,
        ledger,
        archive,
        modules_run,
        elapsed_secs: clock.elapsed().as_secs(),
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Prints where the results of a successful run were left.
pub fn print_summary(outcome: &InstallOutcome) {
    console("Results saved to:");
    println!("  text file: {}", outcome.text_log.display());
    if let Some(report) = &outcome.report {
        println!("  web page : {}", report.display());
    }
    if let Some((catalog, summary)) = &outcome.ledger {
        println!();
        println!("  STIG csv file: {}", catalog.display());
        println!(
            "    {} test cases updated from module results, {} from exceptions.",
            summary.executed, summary.excepted
        );
        println!(
            "    Import into a spreadsheet with options set to: UTF-8, separated by Tab, Text Delimiter of \";\", and Merge delimiters."
        );
        println!();
    }
    console("Results archived to:");
    println!("  tar file : {}", outcome.archive.display());
    let archive_name = file_name(&outcome.archive);
    println!("    To extract it, use \"tar -vxzf {}\"", archive_name);

    let stdout = io::stdout();
    let supports_color = stdout.is_terminal();
    let _ = output_format::print_success_message(
        &mut stdout.lock(),
        &format!(
            "\nExecution complete. {} module(s) run. Elapsed time = {} seconds.",
            outcome.modules_run, outcome.elapsed_secs
        ),
        supports_color,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use harden_core::{IdentitySource, HardenResult, ToolBinding};

    struct Nobody;
    impl IdentitySource for Nobody {
        fn current_user(&self) -> HardenResult<String> {
            Ok("nobody".into())
        }
    }

    fn context(reset: bool, debug_level: u8) -> ExecutionContext {
        EnvironmentResolver::new(Box::new(Nobody), None)
            .resolve(&ResolveRequest {
                test_mode: true,
                install_root: PathBuf::from("/opt/hardening"),
                debug_level,
                log_level: 0,
                reset_test: reset,
                selected_module: None,
            })
            .unwrap()
    }

    fn tools() -> ToolSet {
        ToolSet::new(vec![ToolBinding {
            name: "TAR_PROGRAM".into(),
            default_path: "/usr/bin/tar".into(),
            resolved_path: "/bin/tar".into(),
        }])
    }

    #[test_log::test]
    fn test_banner_in_test_mode() {
        let lines = banner(&context(true, 0), &tools(), "0.01", "tdsh");
        assert_eq!(
            lines,
            vec![
                "Running in TEST mode.",
                "Reset files for testing is turned on.",
                "Debug level = 0",
                "Logging level = 0",
                "",
                "Hardening to version 0.01 of tdsh standard.",
                "",
            ]
        );
    }

    #[test]
    fn test_banner_debug_lists_tools() {
        let lines = banner(&context(false, 1), &tools(), "0.01", "stig");
        assert!(lines.contains(&"External programs being used are:".to_string()));
        assert!(lines.contains(&"TAR_PROGRAM = /bin/tar".to_string()));
        assert!(lines
            .iter()
            .any(|l| l == "The logs directory is here: /opt/hardening/payload/sys/root/hardening/logs"));
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name(Path::new("/a/b/results.tgz")), "results.tgz");
    }
}
