//! The compliance ledger of the catalog-bearing standard.
//!
//! The ledger is a tab- or comma-delimited catalog with one row per test
//! case. The first field is the test-case identifier. The status field is the
//! one holding the `Not Executed` placeholder, wherever it sits in the row;
//! once filled, it is tracked by position, and a row that never carried the
//! placeholder uses its last non-empty field. After the modules have run, two
//! passes update it:
//!
//! 1. the execution merge writes the status each module reported into rows
//!    that are still `Not Executed`;
//! 2. the exception merge then overwrites the status of every row named by a
//!    fixed exception record with that record's rationale, regardless of what
//!    pass 1 wrote or whether any module reported on it.
//!
//! Both passes use first-match-wins and write the file back only when a row
//! actually changed. Rows are written back with the delimiter they were read
//! with, and every field other than the status is kept byte for byte.
//!
//! License: MIT OR Apache-2.0

use chrono::{DateTime, Local};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::{ExceptionEntry, LedgerSpec, ModuleDescriptor};
use crate::errors::{HardenError, HardenResult};
use crate::runner::{ModuleRunner, Transcript};

/// Placeholder status of a test case nobody reported on.
pub const NOT_EXECUTED: &str = "Not Executed";

/// Field delimiters, in order of preference when a row contains both.
const DELIMITERS: [char; 2] = ['\t', ','];

/// Status of a single test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComplianceStatus {
    NotExecuted,
    Pass,
    Fail,
    Exception,
    /// Free text, typically an exception rationale.
    Rationale(String),
}

impl FromStr for ComplianceStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s.trim() {
            NOT_EXECUTED => ComplianceStatus::NotExecuted,
            "Pass" => ComplianceStatus::Pass,
            "Fail" => ComplianceStatus::Fail,
            "Exception" => ComplianceStatus::Exception,
            other => ComplianceStatus::Rationale(other.to_string()),
        };
        Ok(status)
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ComplianceStatus::NotExecuted => f.write_str(NOT_EXECUTED),
            ComplianceStatus::Pass => f.write_str("Pass"),
            ComplianceStatus::Fail => f.write_str("Fail"),
            ComplianceStatus::Exception => f.write_str("Exception"),
            ComplianceStatus::Rationale(text) => f.write_str(text),
        }
    }
}

impl ComplianceStatus {
    fn parse(s: &str) -> Self {
        match s.parse() {
            Ok(status) => status,
            Err(never) => match never {},
        }
    }
}

/// A status line reported by a module: `<test-case> <module> <status...>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub test_case: String,
    pub module: String,
    pub status: String,
}

impl StatusRecord {
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        let (test_case, rest) = line.split_once(char::is_whitespace)?;
        let (module, status) = rest.trim_start().split_once(char::is_whitespace)?;
        let status = status.trim();
        if status.is_empty() {
            return None;
        }
        Some(Self {
            test_case: test_case.to_string(),
            module: module.to_string(),
            status: status.to_string(),
        })
    }
}

/// Parses every well-formed status line of a status-records file.
pub fn parse_status_records(text: &str) -> Vec<StatusRecord> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let record = StatusRecord::parse_line(line);
            if record.is_none() {
                warn!("Ignoring malformed status record: '{}'", line);
            }
            record
        })
        .collect()
}

/// One test case of the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceRecord {
    pub test_case: String,
    pub status: ComplianceStatus,
    /// Module whose report set the status, if any.
    pub origin: Option<String>,
    delimiter: char,
    /// Every raw field of the row, in catalog order.
    fields: Vec<String>,
    status_index: usize,
}

/// Splits a raw field into `(prefix, value, suffix)`, where the prefix and
/// suffix hold surrounding whitespace and a pair of double quotes.
fn field_parts(raw: &str) -> (&str, &str, &str) {
    let trimmed = raw.trim();
    let lead = raw.len() - raw.trim_start().len();
    let inner = trimmed
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(trimmed);
    let quote = if inner.len() < trimmed.len() { 1 } else { 0 };
    let start = lead + quote;
    let end = start + inner.len();
    (&raw[..start], inner, &raw[end..])
}

impl ComplianceRecord {
    /// Parses one catalog line. Lines with a single field are not records.
    pub fn parse_line(line: &str) -> Option<Self> {
        let delimiter = DELIMITERS.into_iter().find(|d| line.contains(*d))?;
        let fields: Vec<String> = line.split(delimiter).map(str::to_string).collect();
        let status_index = fields
            .iter()
            .skip(1)
            .position(|f| field_parts(f).1 == NOT_EXECUTED)
            .or_else(|| fields.iter().skip(1).rposition(|f| !field_parts(f).1.is_empty()))
            .map(|i| i + 1)?;
        let test_case = field_parts(&fields[0]).1.to_string();
        if test_case.is_empty() {
            return None;
        }
        Some(Self {
            test_case,
            status: ComplianceStatus::parse(field_parts(&fields[status_index]).1),
            origin: None,
            delimiter,
            fields,
            status_index,
        })
    }

    /// Whether `id` appears in a field of this row other than the status.
    pub fn mentions(&self, id: &str) -> bool {
        self.fields
            .iter()
            .enumerate()
            .any(|(i, f)| i != self.status_index && f.contains(id))
    }

    fn to_line(&self) -> String {
        let mut fields = self.fields.clone();
        let (prefix, _, suffix) = field_parts(&self.fields[self.status_index]);
        let status = self.status.to_string();
        fields[self.status_index] = if self.delimiter == ',' && status.contains(',') && !prefix.ends_with('"') {
            format!("{}\"{}\"{}", prefix, status, suffix)
        } else {
            format!("{}{}{}", prefix, status, suffix)
        };
        fields.join(self.delimiter.to_string().as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LedgerRow {
    Record(ComplianceRecord),
    /// A line without a status field, kept verbatim.
    Other(String),
}

/// How many rows each pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub executed: usize,
    pub excepted: usize,
}

/// The master catalog of test cases, backed by a file.
#[derive(Debug, Clone)]
pub struct ComplianceLedger {
    path: PathBuf,
    rows: Vec<LedgerRow>,
}

impl ComplianceLedger {
    pub fn load(path: impl Into<PathBuf>) -> HardenResult<Self> {
        let path = path.into();
        let text = fs::read_to_string(&path).map_err(|e| HardenError::resource(path.clone(), e))?;
        Ok(Self::from_text(path, &text))
    }

    pub fn from_text(path: impl Into<PathBuf>, text: &str) -> Self {
        let mut seen = HashSet::new();
        let rows = text
            .lines()
            .filter(|l| !l.is_empty())
            .map(|line| match ComplianceRecord::parse_line(line) {
                Some(record) => {
                    if !seen.insert(record.test_case.clone()) {
                        warn!("Test case '{}' appears more than once in the catalog.", record.test_case);
                    }
                    LedgerRow::Record(record)
                }
                None => LedgerRow::Other(line.to_string()),
            })
            .collect();
        Self { path: path.into(), rows }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> impl Iterator<Item = &ComplianceRecord> {
        self.rows.iter().filter_map(|row| match row {
            LedgerRow::Record(r) => Some(r),
            LedgerRow::Other(_) => None,
        })
    }

    fn records_mut(&mut self) -> impl Iterator<Item = &mut ComplianceRecord> {
        self.rows.iter_mut().filter_map(|row| match row {
            LedgerRow::Record(r) => Some(r),
            LedgerRow::Other(_) => None,
        })
    }

    pub fn status_of(&self, test_case: &str) -> Option<&ComplianceStatus> {
        self.records().find(|r| r.test_case == test_case).map(|r| &r.status)
    }

    /// Pass 1: fills `Not Executed` rows from module status records.
    /// Returns the number of rows changed.
    pub fn merge_execution(&mut self, records: &[StatusRecord]) -> usize {
        let mut changed = 0;
        for row in self.records_mut() {
            if row.status != ComplianceStatus::NotExecuted {
                continue;
            }
            if let Some(record) = records.iter().find(|r| row.mentions(&r.test_case)) {
                let status = ComplianceStatus::parse(&record.status);
                if status != row.status {
                    row.status = status;
                    row.origin = Some(record.module.clone());
                    changed += 1;
                }
            }
        }
        debug!("Execution merge changed {} rows.", changed);
        changed
    }

    /// Pass 2: overwrites the status of excepted rows with the rationale.
    /// Returns the number of rows changed.
    pub fn merge_exceptions(&mut self, exceptions: &[ExceptionEntry]) -> usize {
        let mut changed = 0;
        for row in self.records_mut() {
            if let Some(exception) = exceptions.iter().find(|e| row.mentions(&e.id)) {
                let status = ComplianceStatus::Rationale(exception.rationale.clone());
                if status != row.status {
                    row.status = status;
                    row.origin = None;
                    changed += 1;
                }
            }
        }
        debug!("Exception merge changed {} rows.", changed);
        changed
    }

    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for row in &self.rows {
            match row {
                LedgerRow::Record(r) => text.push_str(&r.to_line()),
                LedgerRow::Other(line) => text.push_str(line),
            }
            text.push('\n');
        }
        text
    }

    pub fn save(&self) -> HardenResult<()> {
        fs::write(&self.path, self.to_text()).map_err(|e| HardenError::resource(self.path.clone(), e))
    }

    /// Runs both passes in order, persisting after each pass that changed
    /// something.
    pub fn reconcile(
        &mut self,
        records: &[StatusRecord],
        exceptions: &[ExceptionEntry],
    ) -> HardenResult<MergeSummary> {
        let executed = self.merge_execution(records);
        if executed > 0 {
            self.save()?;
        }

        let excepted = self.merge_exceptions(exceptions);
        if excepted > 0 {
            self.save()?;
        }

        info!(
            "Ledger {} updated: {} executed, {} excepted.",
            self.path.display(),
            executed,
            excepted
        );
        Ok(MergeSummary { executed, excepted })
    }
}

/// Whether the catalog is already in place or can be produced from a manual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogState {
    Present,
    Derivable {
        manual: PathBuf,
        module: ModuleDescriptor,
    },
}

/// First file under `dir` matching the manual name `pattern`.
pub fn find_manual(dir: &Path, pattern: &str) -> Option<PathBuf> {
    let full = format!("{}/{}", glob::Pattern::escape(&dir.to_string_lossy()), pattern);
    let mut matches: Vec<PathBuf> = match glob::glob(&full) {
        Ok(paths) => paths.filter_map(Result::ok).filter(|p| p.is_file()).collect(),
        Err(e) => {
            warn!("Invalid manual pattern '{}': {}", pattern, e);
            return None;
        }
    };
    matches.sort();
    matches.into_iter().next()
}

/// Decides how the catalog at `catalog` will be obtained. A catalog that is
/// neither present nor derivable is a configuration error, reported before
/// any remediation module runs.
pub fn check_catalog(spec: &LedgerSpec, catalog: &Path, manual_dir: &Path) -> HardenResult<CatalogState> {
    if catalog.is_file() {
        debug!("Ledger catalog {} is present.", catalog.display());
        return Ok(CatalogState::Present);
    }

    let pattern = spec.manual_pattern.as_deref().unwrap_or("<no manual configured>");
    let manual = spec.manual_pattern.as_deref().and_then(|p| find_manual(manual_dir, p));

    match (manual, &spec.derive_module) {
        (Some(manual), Some(module)) => {
            info!(
                "Ledger catalog {} is missing; it will be derived from {}.",
                catalog.display(),
                manual.display()
            );
            Ok(CatalogState::Derivable {
                manual,
                module: module.clone(),
            })
        }
        (Some(manual), None) => Err(HardenError::config(format!(
            "Unable to access ledger catalog {}; found {} but no module is configured to derive it",
            catalog.display(),
            manual.display()
        ))),
        (None, _) => Err(HardenError::config(format!(
            "Unable to access ledger catalog {} (or a source manual {}/{} to create it)",
            catalog.display(),
            manual_dir.display(),
            pattern
        ))),
    }
}

/// Runs the derive module and checks that it produced the catalog.
pub async fn derive_catalog(
    runner: &ModuleRunner,
    module: &ModuleDescriptor,
    catalog: &Path,
    transcript: &mut Transcript,
) -> HardenResult<()> {
    runner.run_all(std::slice::from_ref(module), transcript).await?;
    if !catalog.is_file() {
        return Err(HardenError::config(format!(
            "{} completed but ledger catalog {} was not created",
            module.name,
            catalog.display()
        )));
    }
    info!("Derived ledger catalog {}", catalog.display());
    Ok(())
}

/// Creates (or truncates) the status-records file modules append to.
pub fn create_status_file(tmp_dir: &Path, at: DateTime<Local>) -> HardenResult<PathBuf> {
    let path = tmp_dir.join(format!("{}_stigStatus.txt", at.format("%y-%m-%d-%H-%M")));
    fs::File::create(&path).map_err(|e| HardenError::resource(path.clone(), e))?;
    Ok(path)
}

/// Reads the status records modules wrote. A missing file means none.
pub fn read_status_records(path: &Path) -> HardenResult<Vec<StatusRecord>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(parse_status_records(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(HardenError::resource(path, e)),
    }
}
