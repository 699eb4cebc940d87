//! Supervised execution of remediation modules.
//!
//! Modules are external executables. Each one is started with the execution
//! context and tool bindings published in its environment, waited on without
//! a timeout, and judged by its error stream: any stderr output is a failure,
//! whatever the exit code, and stops the pipeline before the next module.
//! While a module runs, a [`PeriodicTask`] drives a progress signal; the task
//! is cancelled as soon as the wait returns, on every path.
//!
//! License: MIT OR Apache-2.0

use chrono::{DateTime, Local};
use log::{debug, info, warn};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::ModuleDescriptor;
use crate::environment::ExecutionContext;
use crate::errors::{HardenError, HardenResult};
use crate::tools::ToolSet;

/// Default period of the progress signal.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Receives progress ticks while a module is running.
pub trait ProgressSignal: Send + Sync {
    fn tick(&self, now: DateTime<Local>);
}

/// A repeating background task that lives until stopped or dropped.
///
/// The first call happens one period after start. The only state shared with
/// the caller is the completion flag.
#[derive(Debug)]
pub struct PeriodicTask {
    done: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    pub fn start<F>(period: Duration, mut action: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if flag.load(Ordering::Acquire) {
                    break;
                }
                action();
            }
        });
        Self { done, handle: Some(handle) }
    }

    pub fn is_stopped(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Cancels the task; no further ticks are delivered.
    pub fn stop(&mut self) {
        self.done.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Outcome of one module invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationStatus {
    Succeeded,
    Failed,
}

/// Record of one module run.
#[derive(Debug, Clone)]
pub struct ModuleInvocation {
    pub module: String,
    pub path: PathBuf,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub status: InvocationStatus,
}

impl ModuleInvocation {
    pub fn succeeded(&self) -> bool {
        self.status == InvocationStatus::Succeeded
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// The running transcript of a session, one entry per output line.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a single line written by the installer itself.
    pub fn note(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Appends captured output, split into lines.
    pub fn append_output(&mut self, text: &str) {
        self.lines.extend(text.lines().map(str::to_string));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Newline-terminated text, as written to the execution log.
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for line in &self.lines {
            text.push_str(line);
            text.push('\n');
        }
        text
    }
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Runs remediation modules one at a time.
pub struct ModuleRunner {
    module_root: PathBuf,
    env: Vec<(String, String)>,
    progress: Option<Arc<dyn ProgressSignal>>,
    interval: Duration,
}

impl ModuleRunner {
    /// Runner for modules under `module_root`, publishing the context and the
    /// tool bindings to each process.
    pub fn new(module_root: impl Into<PathBuf>, ctx: &ExecutionContext, tools: &ToolSet) -> Self {
        let mut env = ctx.env_vars();
        env.extend(tools.env_vars());
        Self {
            module_root: module_root.into(),
            env,
            progress: None,
            interval: PROGRESS_INTERVAL,
        }
    }

    /// Publishes an additional variable (e.g. ledger file locations).
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((name.into(), value.into()));
        self
    }

    pub fn with_progress(mut self, signal: Arc<dyn ProgressSignal>, interval: Duration) -> Self {
        self.progress = Some(signal);
        self.interval = interval;
        self
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn module_path(&self, module: &ModuleDescriptor) -> PathBuf {
        self.module_root.join(module.file_name())
    }

    /// Runs one module to completion and records what it produced.
    pub async fn invoke(&self, module: &ModuleDescriptor) -> HardenResult<ModuleInvocation> {
        let path = self.module_path(module);
        if !is_executable(&path) {
            return Err(HardenError::execution(
                &module.name,
                format!("{} does not exist or is not executable", path.display()),
            ));
        }

        let mut command = Command::new(&path);
        command
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Executing module {} ({})", module.name, path.display());
        let started_at = Local::now();

        let mut ticker = self.progress.as_ref().map(|signal| {
            let signal = Arc::clone(signal);
            PeriodicTask::start(self.interval, move || signal.tick(Local::now()))
        });
        let output = command.output().await;
        if let Some(ticker) = ticker.as_mut() {
            ticker.stop();
        }

        let output = output.map_err(|e| {
            HardenError::execution(&module.name, format!("could not execute {}: {}", path.display(), e))
        })?;
        let finished_at = Local::now();

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let status = if stderr.is_empty() {
            InvocationStatus::Succeeded
        } else {
            InvocationStatus::Failed
        };

        if status == InvocationStatus::Succeeded && !output.status.success() {
            warn!(
                "Module {} exited with {} but wrote nothing to stderr; treating it as successful.",
                module.name, output.status
            );
        }

        Ok(ModuleInvocation {
            module: module.name.clone(),
            path,
            started_at,
            finished_at,
            stdout,
            stderr,
            exit_code: output.status.code(),
            status,
        })
    }

    /// Runs `modules` in order, appending each module's stdout to
    /// `transcript`. Stops at the first failure.
    pub async fn run_all(
        &self,
        modules: &[ModuleDescriptor],
        transcript: &mut Transcript,
    ) -> HardenResult<Vec<ModuleInvocation>> {
        let mut invocations = Vec::with_capacity(modules.len());

        for module in modules {
            let invocation = self.invoke(module).await?;
            transcript.append_output(&invocation.stdout);

            if !invocation.succeeded() {
                return Err(HardenError::execution(
                    &invocation.module,
                    format!("{}: error output: {}", invocation.path.display(), invocation.stderr.trim_end()),
                ));
            }

            info!(
                "Module {} completed in {} ms",
                invocation.module,
                invocation.elapsed().num_milliseconds()
            );
            invocations.push(invocation);
        }

        Ok(invocations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{EnvironmentResolver, IdentitySource, ResolveRequest};
    use crate::errors::ErrorKind;
    use crate::tools::ToolBinding;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct NoIdentity;
    impl IdentitySource for NoIdentity {
        fn current_user(&self) -> HardenResult<String> {
            Err(HardenError::config("unused"))
        }
    }

    #[derive(Default)]
    struct CountingSignal {
        ticks: AtomicUsize,
    }

    impl ProgressSignal for CountingSignal {
        fn tick(&self, _now: DateTime<Local>) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn context(root: &Path) -> ExecutionContext {
        EnvironmentResolver::new(Box::new(NoIdentity), None)
            .resolve(&ResolveRequest {
                test_mode: true,
                install_root: root.to_path_buf(),
                debug_level: 0,
                log_level: 0,
                reset_test: false,
                selected_module: None,
            })
            .unwrap()
    }

    fn write_module(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn runner(dir: &TempDir) -> ModuleRunner {
        let tools = ToolSet::new(vec![ToolBinding {
            name: "SH_PROGRAM".into(),
            default_path: "/bin/sh".into(),
            resolved_path: "/bin/sh".into(),
        }]);
        ModuleRunner::new(dir.path(), &context(dir.path()), &tools)
    }

    #[tokio::test]
    async fn test_modules_run_in_order_and_fill_transcript() {
        let dir = TempDir::new().unwrap();
        write_module(dir.path(), "first", "echo one");
        write_module(dir.path(), "second", "echo two; echo three");
        let mut transcript = Transcript::new();
        let modules = vec![ModuleDescriptor::new("first"), ModuleDescriptor::new("second")];
        let invocations = runner(&dir).run_all(&modules, &mut transcript).await.unwrap();
        assert_eq!(invocations.len(), 2);
        assert_eq!(transcript.lines(), &["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_stderr_fails_even_with_zero_exit_and_stops_pipeline() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        write_module(dir.path(), "noisy", "echo partial; echo oops >&2; exit 0");
        write_module(dir.path(), "later", &format!("touch {}", marker.display()));
        let mut transcript = Transcript::new();
        let modules = vec![ModuleDescriptor::new("noisy"), ModuleDescriptor::new("later")];
        let err = runner(&dir).run_all(&modules, &mut transcript).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert!(err.to_string().contains("oops"));
        assert_eq!(transcript.lines(), &["partial"]);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_nonzero_exit_without_stderr_is_success() {
        let dir = TempDir::new().unwrap();
        write_module(dir.path(), "grumpy", "echo fine; exit 3");
        let invocation = runner(&dir).invoke(&ModuleDescriptor::new("grumpy")).await.unwrap();
        assert!(invocation.succeeded());
        assert_eq!(invocation.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_missing_module_is_execution_error() {
        let dir = TempDir::new().unwrap();
        let err = runner(&dir).invoke(&ModuleDescriptor::new("absent")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
    }

    #[tokio::test]
    async fn test_context_and_tools_published_to_module() {
        let dir = TempDir::new().unwrap();
        write_module(dir.path(), "env", "echo \"$InstallType|$SH_PROGRAM|$stigStatusFile\"");
        let runner = runner(&dir).with_env("stigStatusFile", "/tmp/status.txt");
        let invocation = runner.invoke(&ModuleDescriptor::new("env")).await.unwrap();
        assert_eq!(invocation.stdout.trim(), "TEST|/bin/sh|/tmp/status.txt");
    }

    #[tokio::test]
    async fn test_progress_ticks_while_waiting_and_stops_after() {
        let dir = TempDir::new().unwrap();
        write_module(dir.path(), "slow", "sleep 1");
        let signal = Arc::new(CountingSignal::default());
        let runner = runner(&dir).with_progress(signal.clone(), Duration::from_millis(100));
        runner.invoke(&ModuleDescriptor::new("slow")).await.unwrap();
        let after = signal.ticks.load(Ordering::SeqCst);
        assert!(after >= 3, "expected ticks during wait, got {}", after);
        time::sleep(Duration::from_millis(350)).await;
        assert_eq!(signal.ticks.load(Ordering::SeqCst), after);
    }

    #[tokio::test]
    async fn test_periodic_task_cancelled_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        {
            let task = PeriodicTask::start(Duration::from_millis(20), move || {
                seen.fetch_add(1, Ordering::SeqCst);
            });
            time::sleep(Duration::from_millis(110)).await;
            assert!(!task.is_stopped());
        }
        let after_drop = count.load(Ordering::SeqCst);
        assert!(after_drop >= 2);
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_drop);
    }

    #[test]
    fn test_transcript_text() {
        let mut transcript = Transcript::new();
        transcript.note("Running in TEST mode.");
        transcript.append_output("a\nb\n");
        assert_eq!(transcript.to_text(), "Running in TEST mode.\na\nb\n");
    }
}
