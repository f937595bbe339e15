//! The `cpi` binary end to end: envelope on stdin, envelope on stdout.

#![allow(clippy::expect_used, deprecated)]

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

const CONFIG: &str = r#"
cloud: { username: u, api_key: k, endpoint: "http://127.0.0.1:1" }
agent: { mbus: "nats://0.0.0.0:4222", blobstore: { provider: local } }
"#;

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("temp config");
    f.write_all(contents.as_bytes()).expect("write config");
    f
}

fn cpi(config: &tempfile::NamedTempFile) -> Command {
    let mut cmd = Command::cargo_bin("cpi").expect("cpi binary should exist");
    cmd.arg("--config")
        .arg(config.path())
        .env_remove("SOFTLAYER_CPI_CONFIG")
        .env_remove("SOFTLAYER_CPI_USERNAME")
        .env_remove("SOFTLAYER_CPI_API_KEY")
        .env("RUST_LOG", "info");
    cmd
}

fn response(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("stdout is one JSON envelope")
}

#[test]
fn info_answers_on_stdout() {
    let config = config_file(CONFIG);
    let out = cpi(&config)
        .write_stdin(r#"{"method":"info","arguments":[]}"#)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let resp = response(&out);
    assert_eq!(resp["result"]["stemcell_formats"][0], "softlayer-light");
    assert!(resp["error"].is_null());
    assert!(resp["log"].as_str().expect("log text").contains("dispatching"));
}

#[test]
fn unknown_method_is_reported_in_the_envelope() {
    let config = config_file(CONFIG);
    cpi(&config)
        .write_stdin(r#"{"method":"snapshot_disk","arguments":["1"]}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""type":"NotImplemented""#))
        .stdout(predicate::str::contains("unknown method 'snapshot_disk'"));
}

#[test]
fn missing_config_is_a_cpi_error() {
    let mut cmd = Command::cargo_bin("cpi").expect("cpi binary should exist");
    cmd.arg("--config")
        .arg("/nonexistent/cpi.yml")
        .write_stdin(r#"{"method":"info"}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""type":"CpiError""#))
        .stdout(predicate::str::contains("/nonexistent/cpi.yml"));
}

#[test]
fn config_path_is_required() {
    Command::cargo_bin("cpi")
        .expect("cpi binary should exist")
        .env_remove("SOFTLAYER_CPI_CONFIG")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--config"));
}
