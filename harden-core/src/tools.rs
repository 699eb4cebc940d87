//! Binding logical tool names to verified executables.
//!
//! Remediation modules never hard-code program locations; they read them from
//! the environment published by the installer. This module performs the
//! lookup once at startup: every catalog entry is searched for by basename on
//! the executable path, rebound to wherever it was actually found, and the
//! whole run aborts if any entry cannot be resolved.
//!
//! License: MIT OR Apache-2.0

use log::{debug, info, warn};
use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::config::{ToolCatalog, ToolSpec};
use crate::errors::{HardenError, HardenResult};

/// Release file consulted for release-gated tools.
pub const DEFAULT_RELEASE_FILE: &str = "/etc/SuSE-release";

/// A logical tool name bound to an executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolBinding {
    pub name: String,
    pub default_path: PathBuf,
    pub resolved_path: PathBuf,
}

impl ToolBinding {
    /// True when the executable was found somewhere other than its default.
    pub fn rebound(&self) -> bool {
        self.resolved_path != self.default_path
    }
}

/// The verified bindings, in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolSet {
    bindings: Vec<ToolBinding>,
}

impl ToolSet {
    pub fn new(bindings: Vec<ToolBinding>) -> Self {
        Self { bindings }
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.bindings
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.resolved_path.as_path())
    }

    /// Like [`ToolSet::get`], but a missing binding is a configuration error.
    pub fn require(&self, name: &str) -> HardenResult<&Path> {
        self.get(name).ok_or_else(|| {
            HardenError::config(format!("Tool '{}' is not bound; add it to the tool catalog.", name))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolBinding> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn env_vars(&self) -> Vec<(String, String)> {
        self.bindings
            .iter()
            .map(|b| (b.name.clone(), b.resolved_path.display().to_string()))
            .collect()
    }
}

/// Reads the OS release number from a `SuSE-release` style file
/// (`VERSION = 11`).
pub fn read_release(path: &Path) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    text.lines()
        .filter(|line| line.starts_with("VERSION"))
        .find_map(|line| line.split_once('='))
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn is_executable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(metadata) => metadata.is_file() && metadata.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// Resolves a [`ToolCatalog`] into a [`ToolSet`].
#[derive(Debug, Clone)]
pub struct ToolLocator {
    search_path: Vec<PathBuf>,
    release: Option<String>,
}

impl ToolLocator {
    pub fn new(search_path: Vec<PathBuf>, release: Option<String>) -> Self {
        Self { search_path, release }
    }

    /// Locator over `$PATH` with the release read from the system.
    pub fn from_env() -> Self {
        let search_path = env::var_os("PATH")
            .map(|p| env::split_paths(&p).collect())
            .unwrap_or_default();
        let release = read_release(Path::new(DEFAULT_RELEASE_FILE));
        if release.is_none() {
            warn!(
                "Could not determine the OS release from {}; release-gated tools will be skipped.",
                DEFAULT_RELEASE_FILE
            );
        }
        Self::new(search_path, release)
    }

    pub fn release(&self) -> Option<&str> {
        self.release.as_deref()
    }

    /// First executable named `basename` on the search path.
    pub fn search(&self, basename: &str) -> Option<PathBuf> {
        self.search_path
            .iter()
            .map(|dir| dir.join(basename))
            .find(|candidate| is_executable(candidate))
    }

    fn applies(&self, tool: &ToolSpec) -> bool {
        match &tool.requires_release {
            None => true,
            Some(required) => self.release.as_deref() == Some(required.as_str()),
        }
    }

    /// Binds every applicable catalog entry, failing on the first one that
    /// cannot be found.
    pub fn locate(&self, catalog: &ToolCatalog) -> HardenResult<ToolSet> {
        let mut bindings = Vec::with_capacity(catalog.tools.len());

        for tool in &catalog.tools {
            if !self.applies(tool) {
                debug!(
                    "Skipping {}: only needed on release {}",
                    tool.name,
                    tool.requires_release.as_deref().unwrap_or_default()
                );
                continue;
            }

            let basename = tool.basename().ok_or_else(|| HardenError::ToolNotFound {
                name: tool.name.clone(),
                expected: tool.path.clone(),
            })?;

            let resolved = self.search(basename).ok_or_else(|| HardenError::ToolNotFound {
                name: tool.name.clone(),
                expected: tool.path.clone(),
            })?;

            let binding = ToolBinding {
                name: tool.name.clone(),
                default_path: tool.path.clone(),
                resolved_path: resolved,
            };
            if binding.rebound() {
                info!(
                    "{} found at {} instead of {}",
                    binding.name,
                    binding.resolved_path.display(),
                    binding.default_path.display()
                );
            }
            bindings.push(binding);
        }

        debug!("Bound {} external tools.", bindings.len());
        Ok(ToolSet::new(bindings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use tempfile::TempDir;

    fn make_exec(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn catalog(tools: Vec<ToolSpec>) -> ToolCatalog {
        ToolCatalog { tools }
    }

    #[test]
    fn test_binds_at_default_location() {
        let dir = TempDir::new().unwrap();
        let chmod = make_exec(dir.path(), "chmod");
        let locator = ToolLocator::new(vec![dir.path().to_path_buf()], None);
        let set = locator
            .locate(&catalog(vec![ToolSpec::new("CHMOD_PROGRAM", &chmod)]))
            .unwrap();
        let binding = set.iter().next().unwrap();
        assert!(!binding.rebound());
        assert_eq!(set.get("CHMOD_PROGRAM"), Some(chmod.as_path()));
    }

    #[test]
    fn test_rebinds_to_discovered_path() {
        let dir = TempDir::new().unwrap();
        let actual = make_exec(dir.path(), "tar");
        let locator = ToolLocator::new(vec![dir.path().to_path_buf()], None);
        let set = locator
            .locate(&catalog(vec![ToolSpec::new("TAR_PROGRAM", "/bin/tar-not-here/tar")]))
            .unwrap();
        assert_eq!(set.get("TAR_PROGRAM"), Some(actual.as_path()));
        assert!(set.iter().all(|b| is_executable(&b.resolved_path)));
    }

    #[test]
    fn test_first_match_on_search_path_wins() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let expected = make_exec(first.path(), "dig");
        make_exec(second.path(), "dig");
        let locator = ToolLocator::new(vec![first.path().into(), second.path().into()], None);
        let set = locator
            .locate(&catalog(vec![ToolSpec::new("DIG_PROGRAM", "/usr/bin/dig")]))
            .unwrap();
        assert_eq!(set.get("DIG_PROGRAM"), Some(expected.as_path()));
    }

    #[test]
    fn test_non_executable_file_is_not_a_match() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rpm");
        fs::write(&path, "data").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        let locator = ToolLocator::new(vec![dir.path().to_path_buf()], None);
        let err = locator
            .locate(&catalog(vec![ToolSpec::new("RPM_PROGRAM", "/bin/rpm")]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("RPM_PROGRAM"));
    }

    #[test]
    fn test_missing_tool_aborts_whole_lookup() {
        let dir = TempDir::new().unwrap();
        make_exec(dir.path(), "cp");
        let locator = ToolLocator::new(vec![dir.path().to_path_buf()], None);
        let result = locator.locate(&catalog(vec![
            ToolSpec::new("CP_PROGRAM", "/bin/cp"),
            ToolSpec::new("DIG_PROGRAM", "/usr/bin/dig"),
        ]));
        assert!(matches!(result, Err(HardenError::ToolNotFound { ref name, .. }) if name == "DIG_PROGRAM"));
    }

    #[test]
    fn test_release_gated_tool_skipped_on_other_release() {
        let dir = TempDir::new().unwrap();
        make_exec(dir.path(), "cp");
        let mut pam = ToolSpec::new("PAMCONFIG_PROGRAM", "/usr/bin/pam-config");
        pam.requires_release = Some("11".into());
        let tools = catalog(vec![ToolSpec::new("CP_PROGRAM", "/bin/cp"), pam]);

        let locator = ToolLocator::new(vec![dir.path().to_path_buf()], Some("10".into()));
        let set = locator.locate(&tools).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.get("PAMCONFIG_PROGRAM").is_none());

        let locator = ToolLocator::new(vec![dir.path().to_path_buf()], Some("11".into()));
        assert!(locator.locate(&tools).is_err());
    }

    #[test]
    fn test_read_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("SuSE-release");
        fs::write(&path, "SUSE Linux Enterprise Server 11 (x86_64)\nVERSION = 11\nPATCHLEVEL = 3\n").unwrap();
        assert_eq!(read_release(&path).as_deref(), Some("11"));
        assert_eq!(read_release(&dir.path().join("missing")), None);
    }

    #[test]
    fn test_env_vars_and_require() {
        let dir = TempDir::new().unwrap();
        let touch = make_exec(dir.path(), "touch");
        let locator = ToolLocator::new(vec![dir.path().to_path_buf()], None);
        let set = locator
            .locate(&catalog(vec![ToolSpec::new("TOUCH_PROGRAM", "/usr/bin/touch")]))
            .unwrap();
        assert_eq!(
            set.env_vars(),
            vec![("TOUCH_PROGRAM".to_string(), touch.display().to_string())]
        );
        assert!(set.require("TAR_PROGRAM").is_err());
    }
}
