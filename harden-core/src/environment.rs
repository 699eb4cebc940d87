//! Execution environment resolution.
//!
//! Decides, once per process, whether remediation runs against the real
//! filesystem (`LIVE`) or against a sandbox subtree (`TEST`), and derives the
//! directory layout every later stage and every module works inside. The
//! resulting [`ExecutionContext`] is immutable and is handed to modules by
//! serializing it into their process environment.
//!
//! License: MIT OR Apache-2.0

use log::{debug, info, warn};
use std::fmt;
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::errors::{HardenError, HardenResult};

/// Name of the superuser account that enables live mode.
pub const SUPERUSER: &str = "root";

/// Where remediation is allowed to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Live,
    Test,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Live => "LIVE",
            ExecutionMode::Test => "TEST",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of the invoking user's name.
pub trait IdentitySource {
    fn current_user(&self) -> HardenResult<String>;
}

/// Asks `whoami` on the executable path who is running the installer.
#[derive(Debug, Default)]
pub struct WhoamiIdentity;

impl IdentitySource for WhoamiIdentity {
    fn current_user(&self) -> HardenResult<String> {
        let output = Command::new("whoami").output().map_err(|e| {
            HardenError::config(format!("unable to determine if we are executing as root: {}", e))
        })?;

        if !output.status.success() || !output.stderr.is_empty() {
            return Err(HardenError::config(format!(
                "unable to determine if we are executing as root: whoami exited with {}",
                output.status
            )));
        }

        let user = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if user.is_empty() {
            return Err(HardenError::config(
                "unable to determine if we are executing as root: whoami printed nothing",
            ));
        }
        Ok(user)
    }
}

/// Inputs to environment resolution, taken from the command line.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub test_mode: bool,
    /// Directory the installer is installed in; the sandbox lives below it.
    pub install_root: PathBuf,
    pub debug_level: u8,
    pub log_level: u8,
    pub reset_test: bool,
    pub selected_module: Option<String>,
}

/// Directory layout derived from the mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub inst_dir: PathBuf,
    pub inst_standards: PathBuf,
    pub inst_src: PathBuf,
    pub inst_src_py: PathBuf,
    pub inst_src_tests: PathBuf,
    pub inst_var: PathBuf,
    pub inst_lists: PathBuf,
    pub spec_banner: PathBuf,
    pub user_home: PathBuf,
    pub hard_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub backup_logs: PathBuf,
    pub tmp_dir: PathBuf,
}

impl Layout {
    fn derive(inst_dir: PathBuf, root_prefix: Option<&Path>) -> Self {
        let inst_var = inst_dir.join("var");
        let user_home = match root_prefix {
            Some(root) => root.join("root"),
            None => PathBuf::from("/root"),
        };
        let hard_dir = user_home.join("hardening");
        let inst_src = inst_dir.join("src");
        let inst_src_py = inst_src.join("py");
        Layout {
            inst_standards: inst_dir.join("standards"),
            inst_src_tests: inst_src_py.join("tests"),
            inst_src_py,
            inst_src,
            inst_lists: inst_var.join("lists"),
            spec_banner: inst_var.join("banner.txt"),
            inst_var,
            inst_dir,
            backup_dir: hard_dir.join("backups"),
            backup_logs: hard_dir.join("logs"),
            tmp_dir: hard_dir.join("tmp"),
            hard_dir,
            user_home,
        }
    }
}

/// The resolved, immutable execution environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    mode: ExecutionMode,
    root_prefix: Option<PathBuf>,
    pub debug_level: u8,
    pub log_level: u8,
    pub reset_test: bool,
    pub selected_module: Option<String>,
    pub layout: Layout,
}

impl ExecutionContext {
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Sandbox root, or `None` when operating on the real filesystem root.
    pub fn root_prefix(&self) -> Option<&Path> {
        self.root_prefix.as_deref()
    }

    pub fn is_live(&self) -> bool {
        self.mode == ExecutionMode::Live
    }

    /// Whether modules should write an HTML fragment for the report.
    pub fn writes_html(&self) -> bool {
        self.log_level == 0
    }

    /// Maps an absolute system path into the active root namespace.
    pub fn rooted(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        match &self.root_prefix {
            None => path.to_path_buf(),
            Some(root) => root.join(path.strip_prefix("/").unwrap_or(path)),
        }
    }

    /// Environment variables describing this context, in publication order.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let l = &self.layout;
        let exe_dir = self
            .root_prefix
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let mut vars = vec![
            ("exeScriptname".to_string(), self.selected_module.clone().unwrap_or_default()),
            ("debuglevel".to_string(), self.debug_level.to_string()),
            ("loglevel".to_string(), self.log_level.to_string()),
            ("InstallType".to_string(), self.mode.to_string()),
            ("exeDir".to_string(), exe_dir),
            ("resetTest".to_string(), if self.reset_test { "1" } else { "0" }.to_string()),
        ];
        for (name, path) in [
            ("instDir", &l.inst_dir),
            ("instStandards", &l.inst_standards),
            ("instSrc", &l.inst_src),
            ("instSrcPy", &l.inst_src_py),
            ("instSrcTests", &l.inst_src_tests),
            ("instVar", &l.inst_var),
            ("instLists", &l.inst_lists),
            ("specBanner", &l.spec_banner),
            ("userHome", &l.user_home),
            ("hardDir", &l.hard_dir),
            ("backupDir", &l.backup_dir),
            ("backupLogs", &l.backup_logs),
            ("tmpDir", &l.tmp_dir),
        ] {
            vars.push((name.to_string(), path.display().to_string()));
        }
        vars
    }

    /// Creates the backup, log and tmp directories (mode 0755).
    pub fn bootstrap_dirs(&self) -> HardenResult<()> {
        let mut builder = DirBuilder::new();
        builder.recursive(true).mode(0o755);
        for dir in [&self.layout.backup_dir, &self.layout.backup_logs, &self.layout.tmp_dir] {
            if dir.is_dir() {
                continue;
            }
            debug!("Creating required directory {}", dir.display());
            builder
                .create(dir)
                .map_err(|e| HardenError::resource(dir.clone(), e))?;
        }
        Ok(())
    }
}

/// Produces the [`ExecutionContext`] for this process.
pub struct EnvironmentResolver {
    identity: Box<dyn IdentitySource>,
    home_dir: Option<PathBuf>,
}

impl Default for EnvironmentResolver {
    fn default() -> Self {
        Self::new(Box::new(WhoamiIdentity), dirs::home_dir())
    }
}

impl EnvironmentResolver {
    pub fn new(identity: Box<dyn IdentitySource>, home_dir: Option<PathBuf>) -> Self {
        Self { identity, home_dir }
    }

    pub fn resolve(&self, request: &ResolveRequest) -> HardenResult<ExecutionContext> {
        let mode = if request.test_mode {
            ExecutionMode::Test
        } else {
            let user = self.identity.current_user()?;
            debug!("Invoking identity resolved to '{}'", user);
            if user == SUPERUSER {
                ExecutionMode::Live
            } else {
                ExecutionMode::Test
            }
        };

        let (inst_dir, root_prefix) = match mode {
            ExecutionMode::Test => {
                let inst_dir = request.install_root.join("payload");
                let sandbox = inst_dir.join("sys");
                if sandbox == Path::new("/") || sandbox.parent().is_none() {
                    return Err(HardenError::config(format!(
                        "refusing to use {} as the test sandbox root",
                        sandbox.display()
                    )));
                }
                (inst_dir, Some(sandbox))
            }
            ExecutionMode::Live => {
                let home = self.home_dir.clone().ok_or_else(|| {
                    HardenError::config("required HOME not set in environment")
                })?;
                (home.join("hardening").join("payload"), None)
            }
        };

        if request.reset_test && mode == ExecutionMode::Live {
            warn!("Reset after test only applies in test mode; ignoring it for a LIVE run.");
        }

        let layout = Layout::derive(inst_dir, root_prefix.as_deref());
        info!(
            "Execution mode {} with root {}",
            mode,
            root_prefix
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "/".to_string())
        );

        Ok(ExecutionContext {
            mode,
            root_prefix,
            debug_level: request.debug_level,
            log_level: request.log_level,
            reset_test: request.reset_test && mode == ExecutionMode::Test,
            selected_module: request.selected_module.clone(),
            layout,
        })
    }
}
