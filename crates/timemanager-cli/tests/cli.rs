//! In-process CLI scenarios: exit-code mapping and pure codec/dispatch
//! behavior that doesn't require multi-second timing or a second process.
//! Scenarios that exercise fork-based activation, lock contention across
//! processes, or crash cleanup are documented as manual/soak scenarios in
//! DESIGN.md instead of run here.

use assert_cmd::Command;
use predicates::str::contains;

fn timemanager() -> Command {
    Command::cargo_bin("timemanager").expect("binary should build")
}

#[test]
fn malformed_schedule_string_on_add_exits_with_misuse_code() {
    timemanager()
        .args(["-d", "5", "add"])
        .write_stdin("not-a-schedule-string")
        .assert()
        .code(2)
        .stderr(contains("invalid schedule string"));
}

#[test]
fn unknown_subcommand_is_a_clap_usage_error() {
    timemanager().arg("bogus-command").assert().failure();
}

#[test]
fn help_is_available_without_touching_the_registry() {
    timemanager()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("temporal dispatcher"));
}

#[test]
fn schedule_with_no_entries_prints_nothing_and_succeeds() {
    timemanager()
        .args(["-d", "4", "schedule", "--all"])
        .assert()
        .success()
        .stdout("");
}

#[test]
fn crontab_rejects_malformed_expression() {
    timemanager()
        .args(["crontab", "not a cron expr"])
        .write_stdin("1700000000:60:demo")
        .assert()
        .code(2);
}
