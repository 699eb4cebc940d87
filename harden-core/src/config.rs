//! Configuration management for `harden-core`.
//!
//! Two YAML documents drive a run: the standards registry, which maps a
//! standard name to its ordered remediation modules (and, for the
//! ledger-bearing standard, its catalog and fixed exception records), and the
//! tool catalog, which lists the external programs every module may rely on.
//! Both ship embedded in the binary and can be replaced by a file.
//!
//! License: MIT OR Apache-2.0

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::errors::{HardenError, HardenResult};

/// A single remediation module of a standard.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModuleDescriptor {
    /// Identifier used on the command line and in logs.
    pub name: String,
    /// Executable file name under the standard's module directory.
    /// Defaults to `name`.
    #[serde(default)]
    pub file: Option<String>,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), file: None }
    }

    pub fn file_name(&self) -> &str {
        self.file.as_deref().unwrap_or(&self.name)
    }
}

/// A fixed exception override applied to the compliance ledger.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExceptionEntry {
    /// Test-case identifier the exception applies to.
    pub id: String,
    /// Configuration parameter the test case concerns.
    #[serde(default)]
    pub parameter: String,
    /// Text written into the ledger in place of the status.
    pub rationale: String,
}

/// Ledger settings for a standard backed by a formal test-case catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LedgerSpec {
    /// Catalog file name, created under the logs directory.
    pub catalog_file: String,
    /// Glob (relative to the install `var` directory) of the source manual
    /// the catalog can be derived from.
    #[serde(default)]
    pub manual_pattern: Option<String>,
    /// Module that derives the catalog from the manual.
    #[serde(default)]
    pub derive_module: Option<ModuleDescriptor>,
    #[serde(default)]
    pub exceptions: Vec<ExceptionEntry>,
}

/// One hardening standard.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StandardSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Directory under `instSrc` holding the module executables.
    /// Defaults to the standard name.
    #[serde(default)]
    pub module_dir: Option<String>,
    pub modules: Vec<ModuleDescriptor>,
    #[serde(default)]
    pub ledger: Option<LedgerSpec>,
}

impl StandardSpec {
    pub fn module_dir(&self) -> &str {
        self.module_dir.as_deref().unwrap_or(&self.name)
    }

    /// Finds a module by name, or by file name.
    pub fn module(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules
            .iter()
            .find(|m| m.name == name || m.file_name() == name)
    }

    /// The ordered modules to run: all of them, or exactly the selected one.
    pub fn select_modules(&self, only: Option<&str>) -> HardenResult<Vec<ModuleDescriptor>> {
        match only {
            None => Ok(self.modules.clone()),
            Some(name) => self.module(name).cloned().map(|m| vec![m]).ok_or_else(|| {
                HardenError::config(format!(
                    "Module '{}' is not part of the '{}' standard.",
                    name, self.name
                ))
            }),
        }
    }

    pub fn upper_name(&self) -> String {
        self.name.to_uppercase()
    }
}

/// The registry of every known standard.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct StandardsRegistry {
    pub standards: Vec<StandardSpec>,
}

impl StandardsRegistry {
    /// Loads the registry embedded in the library.
    pub fn load_default() -> HardenResult<Self> {
        debug!("Loading default standards registry from embedded string...");
        let registry = Self::from_yaml(include_str!("../config/standards.yaml"))?;
        debug!("Loaded {} default standards.", registry.standards.len());
        Ok(registry)
    }

    /// Loads a registry from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> HardenResult<Self> {
        let path = path.as_ref();
        info!("Loading standards registry from: {}", path.display());
        let text = read_config_file(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> HardenResult<Self> {
        let registry: StandardsRegistry = serde_yml::from_str(text)?;
        registry.validate()?;
        Ok(registry)
    }

    /// Case-insensitive lookup of a standard.
    pub fn get(&self, name: &str) -> HardenResult<&StandardSpec> {
        self.standards
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                HardenError::config(format!("{} is not a valid hardening standard type", name))
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.standards.iter().map(|s| s.name.as_str()).collect()
    }

    fn validate(&self) -> HardenResult<()> {
        let mut errors = Vec::new();
        let mut names = HashSet::new();

        if self.standards.is_empty() {
            errors.push("The registry defines no standards.".to_string());
        }

        for standard in &self.standards {
            if standard.name.trim().is_empty() {
                errors.push("A standard has an empty `name` field.".to_string());
            } else if !names.insert(standard.name.to_lowercase()) {
                errors.push(format!("Duplicate standard name found: '{}'.", standard.name));
            }

            if standard.modules.is_empty() {
                errors.push(format!("Standard '{}' lists no modules.", standard.name));
            }

            let mut module_names = HashSet::new();
            for module in &standard.modules {
                if module.name.trim().is_empty() {
                    errors.push(format!("Standard '{}' has a module with an empty name.", standard.name));
                } else if !module_names.insert(module.name.as_str()) {
                    errors.push(format!(
                        "Standard '{}' lists module '{}' more than once.",
                        standard.name, module.name
                    ));
                }
            }

            if let Some(ledger) = &standard.ledger {
                if ledger.catalog_file.trim().is_empty() {
                    errors.push(format!("Standard '{}' has an empty ledger `catalog_file`.", standard.name));
                }
                let mut exception_ids = HashSet::new();
                for exception in &ledger.exceptions {
                    if exception.id.trim().is_empty() {
                        errors.push(format!("Standard '{}' has an exception with an empty id.", standard.name));
                    } else if !exception_ids.insert(exception.id.as_str()) {
                        errors.push(format!(
                            "Standard '{}' lists exception '{}' more than once.",
                            standard.name, exception.id
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(HardenError::config(format!(
                "Standards registry validation failed:\n{}",
                errors.join("\n")
            )))
        }
    }
}

/// One external program entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ToolSpec {
    /// Logical name published to modules, e.g. `CHMOD_PROGRAM`.
    pub name: String,
    /// Canonical default location.
    pub path: PathBuf,
    /// Only bind this tool when the OS release equals this value.
    #[serde(default)]
    pub requires_release: Option<String>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self { name: name.into(), path: path.into(), requires_release: None }
    }

    /// The basename searched for on the executable path.
    pub fn basename(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// The list of external programs to bind at startup.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ToolCatalog {
    pub tools: Vec<ToolSpec>,
}

impl ToolCatalog {
    pub fn load_default() -> HardenResult<Self> {
        debug!("Loading default tool catalog from embedded string...");
        Self::from_yaml(include_str!("../config/tools.yaml"))
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> HardenResult<Self> {
        let path = path.as_ref();
        info!("Loading tool catalog from: {}", path.display());
        let text = read_config_file(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> HardenResult<Self> {
        let catalog: ToolCatalog = serde_yml::from_str(text)?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> HardenResult<()> {
        let mut errors = Vec::new();
        let mut names = HashSet::new();

        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                errors.push("A tool has an empty `name` field.".to_string());
            } else if !names.insert(tool.name.as_str()) {
                errors.push(format!("Duplicate tool name found: '{}'.", tool.name));
            }
            if tool.basename().is_none() {
                errors.push(format!("Tool '{}' has no usable file name in `path`.", tool.name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(HardenError::config(format!(
                "Tool catalog validation failed:\n{}",
                errors.join("\n")
            )))
        }
    }
}

fn read_config_file(path: &Path) -> HardenResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        HardenError::config(format!("Failed to read config file {}: {}", path.display(), e))
    })
}
