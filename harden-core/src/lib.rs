// harden-core/src/lib.rs
//! # Harden Core Library
//!
//! `harden-core` drives a security hardening run: it decides where
//! remediation is allowed to write, binds the external programs remediation
//! modules depend on, runs the modules of a standard one at a time under
//! supervision, and turns what they printed into a text log, an HTML report
//! and, for the catalog-bearing standard, an updated compliance ledger.
//!
//! ## Modules
//!
//! * `config`: The standards registry and the tool catalog (embedded YAML, overridable by file).
//! * `environment`: Resolves the `LIVE`/`TEST` execution context and its directory layout.
//! * `tools`: Binds logical tool names to verified executables.
//! * `runner`: Runs modules sequentially with a periodic progress signal.
//! * `transcode`: Rewrites SGR-coded output lines as HTML markup.
//! * `ledger`: The two-pass compliance ledger and its catalog derivation.
//! * `report`: Artifact naming, the text log, the HTML report and the archive.
//! * `errors`: The library's error type.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use harden_core::{EnvironmentResolver, ResolveRequest, StandardsRegistry};
//!
//! # fn main() -> Result<(), harden_core::HardenError> {
//! let registry = StandardsRegistry::load_default()?;
//! let standard = registry.get("TDSH")?;
//! let modules = standard.select_modules(None)?;
//!
//! let ctx = EnvironmentResolver::default().resolve(&ResolveRequest {
//!     test_mode: true,
//!     install_root: "/opt/hardening".into(),
//!     debug_level: 0,
//!     log_level: 0,
//!     reset_test: false,
//!     selected_module: None,
//! })?;
//! println!("{} modules will run in {} mode", modules.len(), ctx.mode());
//! # Ok(())
//! # }
//! ```
//!
//! License: MIT OR Apache-2.0

pub mod config;
pub mod environment;
pub mod errors;
pub mod ledger;
pub mod report;
pub mod runner;
pub mod tools;
pub mod transcode;

pub use config::{
    ExceptionEntry, LedgerSpec, ModuleDescriptor, StandardSpec, StandardsRegistry, ToolCatalog,
    ToolSpec,
};
pub use environment::{
    EnvironmentResolver, ExecutionContext, ExecutionMode, IdentitySource, Layout, ResolveRequest,
    WhoamiIdentity,
};
pub use errors::{ErrorKind, HardenError, HardenResult};
pub use ledger::{
    CatalogState, ComplianceLedger, ComplianceRecord, ComplianceStatus, MergeSummary,
    StatusRecord,
};
pub use report::{ArtifactPaths, ReportPage};
pub use runner::{
    InvocationStatus, ModuleInvocation, ModuleRunner, PeriodicTask, ProgressSignal, Transcript,
};
pub use tools::{ToolBinding, ToolLocator, ToolSet};
pub use transcode::{SgrStyle, StyleSlot, Transcoder};
