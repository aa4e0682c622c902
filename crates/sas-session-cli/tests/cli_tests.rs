//! End-to-end tests for the startsas binary.

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn startsas(cwd: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_startsas"));
    cmd.current_dir(cwd)
        .args(args)
        .env_remove("SAS_TASKLOGDIR")
        .env_remove("SAS_TASKLOGFMODE")
        .env_remove("SAS_VERBOSITY");
    cmd
}

fn run(cmd: &mut Command) -> Output {
    cmd.output().expect("failed to run startsas")
}

#[test]
fn test_config_set_and_show() {
    let temp = TempDir::new().unwrap();
    let settings = temp.path().join("sas.json");
    let settings = settings.to_str().unwrap();

    let out = run(&mut startsas(
        temp.path(),
        &["--settings", settings, "config", "set", "verbosity", "7"],
    ));
    assert!(out.status.success());

    let out = run(&mut startsas(temp.path(), &["--settings", settings, "config", "show"]));
    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.contains("\"verbosity\": 7"));

    assert!(temp.path().join("startsas.log").is_file());
}

#[test]
fn test_unknown_option_exits_with_config_code() {
    let temp = TempDir::new().unwrap();
    let settings = temp.path().join("sas.json");

    let out = run(&mut startsas(
        temp.path(),
        &["--settings", settings.to_str().unwrap(), "config", "set", "colour", "blue"],
    ));
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn test_run_without_selection_is_a_config_error() {
    let temp = TempDir::new().unwrap();
    let settings = temp.path().join("sas.json");

    let out = run(&mut startsas(
        temp.path(),
        &["--settings", settings.to_str().unwrap(), "run"],
    ));
    assert_eq!(out.status.code(), Some(2));
    assert!(out.stdout.is_empty());
}

#[test]
fn test_run_without_sas_environment() {
    let temp = TempDir::new().unwrap();
    let settings = temp.path().join("sas.json");

    let out = run(startsas(
        temp.path(),
        &["--settings", settings.to_str().unwrap(), "run", "--odfid", "0104860501"],
    )
    .env_remove("SAS_DIR")
    .env_remove("SAS_CCFPATH"));
    assert_eq!(out.status.code(), Some(3));
    assert!(!temp.path().join("0104860501").exists());
}

#[test]
fn test_init_prints_exports() {
    let temp = TempDir::new().unwrap();
    let settings = temp.path().join("sas.json");
    let sas_dir = temp.path().join("xmmsas");
    let ccf = temp.path().join("ccf");

    let out = run(startsas(
        temp.path(),
        &[
            "--settings",
            settings.to_str().unwrap(),
            "init",
            "--sas-dir",
            sas_dir.to_str().unwrap(),
            "--sas-ccfpath",
            ccf.to_str().unwrap(),
        ],
    )
    .env("LHEASOFT", "/opt/heasoft"));
    assert!(out.status.success());

    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.contains(&format!("export SAS_DIR='{}'", sas_dir.display())));
    assert!(stdout.contains(&format!("export SAS_CCFPATH='{}'", ccf.display())));
    assert!(stdout.contains("export SAS_VERBOSITY='4'"));
    assert!(!settings.exists());
}

#[test]
fn test_init_requires_heasoft() {
    let temp = TempDir::new().unwrap();
    let settings = temp.path().join("sas.json");

    let out = run(startsas(
        temp.path(),
        &[
            "--settings",
            settings.to_str().unwrap(),
            "init",
            "--sas-dir",
            "/opt/xmmsas",
            "--sas-ccfpath",
            "/ccf",
        ],
    )
    .env_remove("LHEASOFT"));
    assert_eq!(out.status.code(), Some(3));
}
