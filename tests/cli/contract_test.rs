//! CLI surface checks: subcommands exist and help renders.

use assert_cmd::Command;

#[test]
fn help_lists_every_subcommand() {
    let mut cmd = Command::cargo_bin("straylight").expect("binary should build");
    let assert = cmd.arg("--help").assert().success();

    let output = assert.get_output().stdout.clone();
    let help = String::from_utf8(output).expect("help should be UTF-8");
    for subcommand in ["start", "pair", "send", "status"] {
        assert!(help.contains(subcommand), "help is missing {subcommand}");
    }
}

#[test]
fn send_requires_recipients() {
    let mut cmd = Command::cargo_bin("straylight").expect("binary should build");
    cmd.arg("send").assert().failure();
}
