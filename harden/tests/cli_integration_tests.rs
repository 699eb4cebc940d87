// harden/tests/cli_integration_tests.rs
//! Command-line integration tests for the `harden` binary.
//!
//! Every test runs in test mode against a throwaway install root, with a
//! small standards registry and a tool catalog that only names programs any
//! Unix test host has (`sh`, `tar`). Remediation modules are tiny shell
//! scripts written into `<root>/payload/src/<standard>/`.

use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;
use tempfile::TempDir;

use strip_ansi_escapes::strip as strip_ansi_escapes_fn;

const TOOLS_YAML: &str = "tools:\n  - name: SH_PROGRAM\n    path: /bin/sh\n  - name: TAR_PROGRAM\n    path: /bin/tar\n";

const DEMO_STANDARDS: &str = r#"standards:
  - name: demo
    module_dir: demo
    modules:
      - name: first
      - name: second
"#;

struct Sandbox {
    root: TempDir,
}

impl Sandbox {
    fn new(standards_yaml: &str) -> Result<Self> {
        let root = TempDir::new()?;
        fs::write(root.path().join("standards.yaml"), standards_yaml)?;
        fs::write(root.path().join("tools.yaml"), TOOLS_YAML)?;
        Ok(Self { root })
    }

    fn path(&self) -> &Path {
        self.root.path()
    }

    fn write_module(&self, dir: &str, name: &str, body: &str) -> Result<()> {
        let module_dir = self.path().join("payload/src").join(dir);
        fs::create_dir_all(&module_dir)?;
        let path = module_dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        Ok(())
    }

    fn logs_dir(&self) -> PathBuf {
        self.path().join("payload/sys/root/hardening/logs")
    }

    fn marker(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::cargo_bin("harden").unwrap();
        cmd.env("RUST_LOG", "debug")
            .env_remove("HARDEN_STANDARDS_FILE")
            .env_remove("HARDEN_TOOLS_FILE")
            .arg("-t")
            .arg("--install-root")
            .arg(self.path())
            .arg("--standards")
            .arg(self.path().join("standards.yaml"))
            .arg("--tools")
            .arg(self.path().join("tools.yaml"))
            .args(args);
        cmd
    }

    fn find_log(&self, extension: &str) -> Option<PathBuf> {
        fs::read_dir(self.logs_dir())
            .ok()?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .find(|p| p.is_file() && p.extension().is_some_and(|e| e == extension))
    }

    fn archive_listing(&self) -> Result<String> {
        let output = StdCommand::new("tar")
            .arg("-tzf")
            .arg(self.logs_dir().join("results.tgz"))
            .output()?;
        Ok(String::from_utf8(output.stdout)?)
    }
}

#[test]
fn test_missing_standard_selector_is_usage_error() {
    Command::cargo_bin("harden")
        .unwrap()
        .arg("-t")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--standard"));
}

#[test]
fn test_unknown_standard_fails_with_message() -> Result<()> {
    let sandbox = Sandbox::new(DEMO_STANDARDS)?;
    let assert = sandbox.command(&["-s", "bogus"]).assert().failure();
    let stderr = String::from_utf8(strip_ansi_escapes_fn(&assert.get_output().stderr))?;
    assert!(stderr.contains("bogus is not a valid hardening standard type"), "stderr: {}", stderr);
    assert!(!sandbox.logs_dir().exists());
    Ok(())
}

#[test]
fn test_single_module_run_writes_log_report_and_archive() -> Result<()> {
    let sandbox = Sandbox::new(DEMO_STANDARDS)?;
    sandbox.write_module("demo", "first", "printf '\\033[1mHELLO\\033[0m\\n'; echo \"mode=$InstallType\"")?;
    sandbox.write_module("demo", "second", &format!("touch {}", sandbox.marker("second-ran").display()))?;

    let assert = sandbox.command(&["-s", "DEMO", "-x", "first"]).assert().success();
    let stdout = String::from_utf8(strip_ansi_escapes_fn(&assert.get_output().stdout))?;
    assert!(stdout.contains("Results archived to:"));
    assert!(!sandbox.marker("second-ran").exists());

    let text_log = sandbox.find_log("txt").expect("text log written");
    let text = fs::read_to_string(&text_log)?;
    assert!(text.starts_with("Running in TEST mode.\n"));
    assert!(text.contains("Hardening to version 0.01 of demo standard."));
    assert!(text.contains("mode=TEST"));
    assert!(text.contains("\x1b[1mHELLO\x1b[0m"));

    let report = sandbox.find_log("html").expect("HTML report written");
    let html = fs::read_to_string(&report)?;
    assert!(html.contains("Security Hardening Procedures for Linux V2.0: DEMO"));
    assert!(html.contains("<b>HELLO</b>"));
    assert!(!html.contains('\x1b'));

    let listing = sandbox.archive_listing()?;
    let report_name = report.file_name().unwrap().to_string_lossy().into_owned();
    let report_dir = report.file_stem().unwrap().to_string_lossy().into_owned();
    assert!(listing.lines().any(|l| l == report_name), "listing: {}", listing);
    assert!(listing.lines().any(|l| l.trim_end_matches('/') == report_dir), "listing: {}", listing);
    assert!(!listing.contains("SRG.csv"));
    Ok(())
}

#[test]
fn test_log_level_one_skips_report() -> Result<()> {
    let sandbox = Sandbox::new(DEMO_STANDARDS)?;
    sandbox.write_module("demo", "first", "echo one")?;
    sandbox.write_module("demo", "second", "echo two")?;

    sandbox.command(&["-s", "demo", "-l", "1"]).assert().success();

    let text = fs::read_to_string(sandbox.find_log("txt").expect("text log written"))?;
    assert!(text.contains("one\ntwo\n"));
    assert!(sandbox.find_log("html").is_none());
    assert!(sandbox.logs_dir().join("results.tgz").is_file());
    Ok(())
}

#[test]
fn test_module_error_output_stops_pipeline_and_keeps_log() -> Result<()> {
    let sandbox = Sandbox::new(DEMO_STANDARDS)?;
    sandbox.write_module("demo", "first", "echo partial; echo 'cannot edit /etc/login.defs' >&2")?;
    sandbox.write_module("demo", "second", &format!("touch {}", sandbox.marker("second-ran").display()))?;

    let assert = sandbox.command(&["-s", "demo"]).assert().failure();
    let stderr = String::from_utf8(strip_ansi_escapes_fn(&assert.get_output().stderr))?;
    assert!(stderr.contains("cannot edit /etc/login.defs"), "stderr: {}", stderr);
    assert!(!sandbox.marker("second-ran").exists());

    let text = fs::read_to_string(sandbox.find_log("txt").expect("text log written on failure"))?;
    assert!(text.contains("partial"));
    assert!(!sandbox.logs_dir().join("results.tgz").exists());
    Ok(())
}

#[test]
fn test_ledger_standard_without_catalog_fails_before_modules() -> Result<()> {
    let standards = r#"standards:
  - name: stig
    module_dir: stig
    modules:
      - name: collect_system_info
    ledger:
      catalog_file: SRG.csv
      manual_pattern: "U_UNIX_V*_SRG_Manual-xccdf.xml"
      derive_module:
        name: parse_srg_manual
"#;
    let sandbox = Sandbox::new(standards)?;
    let marker = sandbox.marker("module-ran");
    sandbox.write_module("stig", "collect_system_info", &format!("touch {}", marker.display()))?;

    let assert = sandbox.command(&["-s", "stig"]).assert().failure();
    let stderr = String::from_utf8(strip_ansi_escapes_fn(&assert.get_output().stderr))?;
    assert!(stderr.contains("Unable to access ledger catalog"), "stderr: {}", stderr);
    assert!(stderr.contains("SRG.csv"));
    assert!(!marker.exists());
    Ok(())
}

#[test]
fn test_ledger_merges_status_records_and_exceptions() -> Result<()> {
    let standards = r#"standards:
  - name: stig
    module_dir: stig
    modules:
      - name: sshd_config
    ledger:
      catalog_file: SRG.csv
      exceptions:
        - id: TC_Y
          parameter: Kerberos
          rationale: "Systems do not require kerberos."
"#;
    let sandbox = Sandbox::new(standards)?;
    fs::create_dir_all(sandbox.logs_dir())?;
    fs::write(
        sandbox.logs_dir().join("SRG.csv"),
        "TC_X\tProtocol 2\tNot Executed\nTC_Y\tKerberos\tNot Executed\nTC_Z\tBanner\tNot Executed\n",
    )?;
    sandbox.write_module(
        "stig",
        "sshd_config",
        "echo \"TC_X sshd_config Fail\" >> \"$stigStatusFile\"; echo \"TC_Y sshd_config Pass\" >> \"$stigStatusFile\"",
    )?;

    let assert = sandbox.command(&["-s", "stig"]).assert().success();
    let stdout = String::from_utf8(strip_ansi_escapes_fn(&assert.get_output().stdout))?;
    assert!(stdout.contains("STIG csv file:"));

    let ledger = fs::read_to_string(sandbox.logs_dir().join("SRG.csv"))?;
    assert_eq!(
        ledger,
        "TC_X\tProtocol 2\tFail\nTC_Y\tKerberos\tSystems do not require kerberos.\nTC_Z\tBanner\tNot Executed\n"
    );
    assert!(sandbox.archive_listing()?.lines().any(|l| l == "SRG.csv"));
    Ok(())
}

#[test]
fn test_ledger_merges_comma_delimited_catalog() -> Result<()> {
    let standards = r#"standards:
  - name: stig
    module_dir: stig
    modules:
      - name: sshd_config
    ledger:
      catalog_file: SRG.csv
      exceptions:
        - id: TC_Y
          parameter: Kerberos
          rationale: "Systems do not require kerberos."
"#;
    let sandbox = Sandbox::new(standards)?;
    fs::create_dir_all(sandbox.logs_dir())?;
    fs::write(
        sandbox.logs_dir().join("SRG.csv"),
        "TC_X,Not Executed,CAT II\nTC_Y,Kerberos,Not Executed,\n",
    )?;
    sandbox.write_module("stig", "sshd_config", "echo \"TC_X sshd_config Pass\" >> \"$stigStatusFile\"")?;

    sandbox.command(&["-s", "stig"]).assert().success();

    let ledger = fs::read_to_string(sandbox.logs_dir().join("SRG.csv"))?;
    assert_eq!(ledger, "TC_X,Pass,CAT II\nTC_Y,Kerberos,Systems do not require kerberos.,\n");
    Ok(())
}
