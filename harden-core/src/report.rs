//! report.rs - Persisted artifacts of an installation run.
//!
//! Every run leaves a plaintext execution log in the logs directory. When the
//! log level is 0 it also leaves an HTML report built from the transcoded
//! transcript, a directory holding the report's stylesheet and images, and a
//! compressed archive bundling the report (and the ledger, for the standard
//! that carries one).
//!
//! All artifact names share a stem of the form
//! `<yy-mm-dd-HH-MM>_installOutput[_<hostname>]`.
//!
//! License: MIT OR Apache-2.0

use chrono::{DateTime, Local};
use log::{debug, warn};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::errors::{HardenError, HardenResult};
use crate::runner::Transcript;
use crate::transcode::transcode_lines;

/// Name of the archive written to the logs directory.
pub const ARCHIVE_NAME: &str = "results.tgz";

/// Files copied from `<instDir>/docs/css` next to the report.
pub const REPORT_ASSETS: [&str; 6] = [
    "hardening.css",
    "bg.gif",
    "bottom.gif",
    "procedure.gif",
    "Teradata.gif",
    "T_Header.gif",
];

/// Timestamp used in artifact names.
pub fn date_stamp(at: DateTime<Local>) -> String {
    at.format("%y-%m-%d-%H-%M").to_string()
}

/// `<date>_installOutput[_<hostname>]`
pub fn artifact_stem(at: DateTime<Local>, hostname: Option<&str>) -> String {
    match hostname.map(str::trim).filter(|h| !h.is_empty()) {
        Some(host) => format!("{}_installOutput_{}", date_stamp(at), host),
        None => format!("{}_installOutput", date_stamp(at)),
    }
}

/// Short host name as reported by `<hostname> -s`. Any failure yields `None`
/// and the stem is built without it.
pub async fn query_hostname(hostname_program: &Path) -> Option<String> {
    let output = Command::new(hostname_program)
        .arg("-s")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| warn!("Could not run {}: {}", hostname_program.display(), e))
        .ok()?;

    if !output.status.success() || !output.stderr.is_empty() {
        warn!("{} -s did not report a host name", hostname_program.display());
        return None;
    }
    let host = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!host.is_empty()).then_some(host)
}

/// Locations of every artifact of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub stem: String,
    pub logs_dir: PathBuf,
    pub text_log: PathBuf,
    pub report: PathBuf,
    pub report_dir: PathBuf,
    /// HTML fragment modules may write for the report (`outputHTML`).
    pub fragment: PathBuf,
    pub archive: PathBuf,
}

impl ArtifactPaths {
    pub fn new(logs_dir: &Path, tmp_dir: &Path, at: DateTime<Local>, hostname: Option<&str>) -> Self {
        let stem = artifact_stem(at, hostname);
        let fragment_name = match hostname.map(str::trim).filter(|h| !h.is_empty()) {
            Some(host) => format!("{}_installOutputBody_{}.html", date_stamp(at), host),
            None => format!("{}_installOutputBody.html", date_stamp(at)),
        };
        Self {
            logs_dir: logs_dir.to_path_buf(),
            text_log: logs_dir.join(format!("{}.txt", stem)),
            report: logs_dir.join(format!("{}.html", stem)),
            report_dir: logs_dir.join(&stem),
            fragment: tmp_dir.join(fragment_name),
            archive: logs_dir.join(ARCHIVE_NAME),
            stem,
        }
    }
}

/// Writes the transcript as the plaintext execution log.
pub fn write_text_log(path: &Path, transcript: &Transcript) -> HardenResult<()> {
    fs::write(path, transcript.to_text()).map_err(|e| HardenError::resource(path, e))?;
    debug!("Wrote {} transcript lines to {}", transcript.len(), path.display());
    Ok(())
}

/// Creates the report's asset directory. If `base` already exists (two runs
/// in the same minute), `<base>_2` is used instead.
pub fn create_report_dir(base: &Path) -> HardenResult<PathBuf> {
    match fs::create_dir(base) {
        Ok(()) => Ok(base.to_path_buf()),
        Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
            let mut name = base.as_os_str().to_owned();
            name.push("_2");
            let fallback = PathBuf::from(name);
            fs::create_dir(&fallback).map_err(|e| HardenError::resource(fallback.clone(), e))?;
            Ok(fallback)
        }
        Err(e) => Err(HardenError::resource(base, e)),
    }
}

/// Copies the report assets that exist under `source`. Returns how many were
/// copied.
pub fn copy_report_assets(source: &Path, dest: &Path) -> HardenResult<usize> {
    let mut copied = 0;
    for asset in REPORT_ASSETS {
        let from = source.join(asset);
        if !from.is_file() {
            warn!("Report asset {} is missing; the web page will render without it.", from.display());
            continue;
        }
        let to = dest.join(asset);
        fs::copy(&from, &to).map_err(|e| HardenError::resource(to.clone(), e))?;
        copied += 1;
    }
    Ok(copied)
}

/// The HTML report of one run.
#[derive(Debug, Clone)]
pub struct ReportPage<'a> {
    /// Upper-cased standard name shown in the title.
    pub standard: &'a str,
    /// Directory name (relative to the report) holding the stylesheet.
    pub asset_dir: &'a str,
    pub date: DateTime<Local>,
}

impl ReportPage<'_> {
    pub fn header(&self) -> String {
        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Security Hardening for Linux V2.0</title>

    <link rel="stylesheet" media="screen" href="{asset_dir}/hardening.css">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <meta name="description" content="Security hardening results.">
</head>

<body id="hardening">
<div class="page-wrapper">

    <section class="intro" id="intro">
        <header role="banner">
            <h1>Security Hardening Procedures for Linux V2.0: {standard}</h1>
        </header>

        <div class="summary" id="summary" >
        <p>{date}</p>
        </div>

    </section>

    <div class="main supporting" id="supporting" >

"#,
            asset_dir = self.asset_dir,
            standard = self.standard,
            date = self.date.format("%B %d, %Y"),
        )
    }

    pub fn trailer() -> &'static str {
        r#"
    </div>

</div>

<div class="extra1" ></div>
<div class="extra2" ></div>
<div class="extra3" ></div>
<div class="extra4" ></div>
<div class="extra5" ></div>
<div class="extra6" ></div>

</body>

</html>
"#
    }

    /// Header, transcoded transcript, optional module fragment, trailer.
    pub fn render(&self, transcript: &Transcript, fragment: Option<&str>) -> String {
        let mut html = self.header();
        html.push_str("<pre>\n");
        for line in transcode_lines(transcript.lines()) {
            html.push_str(&line);
            html.push('\n');
        }
        html.push_str("</pre>\n");
        if let Some(fragment) = fragment {
            html.push_str(fragment);
        }
        html.push_str(Self::trailer());
        html
    }
}

/// Builds the report directory and page. Returns the directory actually
/// used, which may carry the `_2` suffix.
pub fn write_report(
    paths: &ArtifactPaths,
    standard: &str,
    transcript: &Transcript,
    asset_source: &Path,
    date: DateTime<Local>,
) -> HardenResult<PathBuf> {
    let report_dir = create_report_dir(&paths.report_dir)?;
    let copied = copy_report_assets(asset_source, &report_dir)?;
    debug!("Copied {} report assets into {}", copied, report_dir.display());

    let fragment = match fs::read_to_string(&paths.fragment) {
        Ok(text) => Some(text),
        Err(e) if e.kind() == IoErrorKind::NotFound => None,
        Err(e) => return Err(HardenError::resource(paths.fragment.clone(), e)),
    };

    let asset_dir = report_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| paths.stem.clone());
    let page = ReportPage {
        standard,
        asset_dir: &asset_dir,
        date,
    };
    fs::write(&paths.report, page.render(transcript, fragment.as_deref()))
        .map_err(|e| HardenError::resource(paths.report.clone(), e))?;
    Ok(report_dir)
}

/// Bundles `members` (paths relative to `dir`) into [`ARCHIVE_NAME`] with
/// `<tar> -czvf`. Anything on tar's error stream is a failure.
pub async fn create_archive(tar: &Path, dir: &Path, members: &[String]) -> HardenResult<PathBuf> {
    let output = Command::new(tar)
        .current_dir(dir)
        .arg("-czvf")
        .arg(ARCHIVE_NAME)
        .args(members)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| HardenError::execution("archive", format!("could not execute {}: {}", tar.display(), e)))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        return Err(HardenError::execution(
            "archive",
            format!("{} -czvf {}: {}", tar.display(), ARCHIVE_NAME, stderr.trim_end()),
        ));
    }
    if !output.status.success() {
        return Err(HardenError::execution(
            "archive",
            format!("{} exited with {}", tar.display(), output.status),
        ));
    }
    Ok(dir.join(ARCHIVE_NAME))
}
