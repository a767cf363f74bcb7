//! Command-line surface tests for the `spool` binary
//!
//! None of these reach a database: they cover argument handling and the
//! failures reported before a connection is made.

use assert_cmd::Command;
use predicates::prelude::*;

fn spool() -> Command {
    let mut cmd = Command::cargo_bin("spool").unwrap();
    cmd.env_remove("DATABASE_URL")
        .env("LOG_LEVEL", "error")
        .env("DATABASE_CONNECT_TIMEOUT", "1");
    cmd
}

#[test]
fn test_help_lists_commands() {
    spool()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("abandon"));
}

#[test]
fn test_no_arguments_prints_help() {
    spool()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_import_requires_input_table_and_fields() {
    spool()
        .args(["import", "--table", "customer_stg"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--input"));
}

#[test]
fn test_status_rejects_malformed_id() {
    spool()
        .args(["status", "not-a-uuid"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_unreachable_database_exits_with_error() {
    spool()
        .args(["--database-url", "postgresql://spool@127.0.0.1:1/spool", "list", "importJob"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_malformed_param_exits_with_usage_status() {
    // Rejected before any connection attempt
    spool()
        .args([
            "--database-url",
            "postgresql://spool@127.0.0.1:1/spool",
            "import",
            "--input",
            "customers.csv",
            "--table",
            "customer_stg",
            "--fields",
            "customer_id,name",
            "--param",
            "runDate(date)=yesterday",
        ])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--param"));
}

#[test]
fn test_bad_delimiter_exits_with_usage_status() {
    spool()
        .args([
            "import",
            "--input",
            "customers.csv",
            "--table",
            "customer_stg",
            "--fields",
            "customer_id",
            "--delimiter",
            ";;",
        ])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--delimiter"));
}

#[test]
fn test_abandon_requires_execution_id() {
    spool().args(["abandon"]).assert().failure().code(2);
}
