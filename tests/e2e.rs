use std::process::Command;

const HEADER: &str = "user,balance,income,affiliate_income,machines";

fn run(fixture: &str, config: Option<&str>) -> (String, String, bool) {
    let path = format!("tests/fixtures/{fixture}");
    let mut command = Command::new(env!("CARGO_BIN_EXE_hashfarm"));
    command.arg(&path);
    if let Some(config) = config {
        command.arg(format!("tests/fixtures/{config}"));
    }
    let output = command
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn valid_operations() {
    let (stdout, stderr, success) = run("valid.csv", Some("config.toml"));

    assert!(success);
    assert!(stderr.is_empty(), "unexpected stderr: {stderr}");

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            HEADER,
            "admin,1005.00,0.00,5.00,",
            "alice,6.50,0.00,10.50,",
            "bob,108.00,7.00,1.00,BTC",
            "carol,5.00,15.00,0.00,XMR",
        ]
    );
}

#[test]
fn errors_warn_but_do_not_block() {
    let (stdout, stderr, success) = run("with_errors.csv", Some("config.toml"));

    assert!(success);
    assert!(stderr.contains("unrecognized operation 'mine'"));
    assert!(stderr.contains("bonus missing amount"));

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], HEADER);
    assert_eq!(lines[1], "admin,1000.00,0.00,0.00,");
    assert_eq!(lines[2], "alice,40.00,0.00,0.00,BTC XMR");
    assert_eq!(lines.len(), 3);
}

#[test]
fn default_config_catalog() {
    let (stdout, _, success) = run("default_config.csv", None);

    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], HEADER);
    assert_eq!(lines[1], "alice,150.00,0.00,150.00,");
    assert_eq!(lines[2], "bob,0.00,0.00,0.00,BTC");
}

#[test]
fn missing_input_fails() {
    let (_, stderr, success) = run("does_not_exist.csv", None);
    assert!(!success);
    assert!(stderr.contains("failed to open operations file"));
}
