// Command-line behaviour of the rdec binary
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const GRAPH: &str = r#"[
  { "address": "0x1000", "instructions": [
      { "address": "0x1000", "mnemonic": "mov", "operands": ["eax", "1"] },
      { "address": "0x1005", "mnemonic": "ret" } ] }
]"#;

fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}

/// `rdec` with a config path that does not exist, so user settings never leak in.
fn rdec(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("rdec").unwrap();
    cmd.arg("--config").arg(dir.path().join("missing.json"));
    cmd
}

#[test]
fn lists_architectures() {
    let dir = TempDir::new().unwrap();
    rdec(&dir)
        .arg("--list-archs")
        .assert()
        .success()
        .stdout("arm\nmips\nppc\nx86\n");
}

#[test]
fn decompiles_graph_file() {
    let dir = TempDir::new().unwrap();
    let graph = write(dir.path(), "graph.json", GRAPH);
    rdec(&dir)
        .args(["--arch", "x86", "--graph"])
        .arg(&graph)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("/* rdec pseudo code output */\n"))
        .stdout(predicate::str::contains("    eax = 1;\n    return;\n}\n"));
}

#[test]
fn reads_graph_from_stdin() {
    let dir = TempDir::new().unwrap();
    rdec(&dir)
        .args(["-a", "x86"])
        .write_stdin(GRAPH)
        .assert()
        .success()
        .stdout(predicate::str::contains("eax = 1;"));
}

#[test]
fn unknown_architecture_exits_with_one() {
    let dir = TempDir::new().unwrap();
    let graph = write(dir.path(), "graph.json", GRAPH);
    rdec(&dir)
        .args(["--arch", "z80", "--graph"])
        .arg(&graph)
        .assert()
        .code(1)
        .stdout(predicate::str::starts_with("z80 is not currently supported."))
        .stdout(predicate::str::contains("arm, mips, ppc, x86"));
}

#[test]
fn empty_graph_exits_with_one() {
    let dir = TempDir::new().unwrap();
    let graph = write(dir.path(), "graph.json", "[]");
    rdec(&dir)
        .args(["--arch", "x86", "--graph"])
        .arg(&graph)
        .assert()
        .code(1)
        .stdout("Error: no data available.\nPlease analyze the function/binary first.\n");
}

#[test]
fn missing_architecture_is_an_error() {
    let dir = TempDir::new().unwrap();
    let graph = write(dir.path(), "graph.json", GRAPH);
    rdec(&dir)
        .arg("--graph")
        .arg(&graph)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--list-archs"));
}

#[test]
fn issue_bundle_replays() {
    let dir = TempDir::new().unwrap();
    let graph = write(dir.path(), "graph.json", GRAPH);
    let captured = rdec(&dir)
        .args(["--arch", "x86", "--issue", "--graph"])
        .arg(&graph)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"agj\""))
        .get_output()
        .stdout
        .clone();
    let bundle = write(dir.path(), "issue.json", &String::from_utf8(captured).unwrap());

    rdec(&dir)
        .arg("--bundle")
        .arg(&bundle)
        .assert()
        .success()
        .stdout(predicate::str::contains("/* x86 @ 0x00001000 */"))
        .stdout(predicate::str::contains("eax = 1;"));
}

#[test]
fn bundle_conflicts_with_graph() {
    let dir = TempDir::new().unwrap();
    let graph = write(dir.path(), "graph.json", GRAPH);
    rdec(&dir)
        .arg("--bundle")
        .arg(&graph)
        .arg("--graph")
        .arg(&graph)
        .assert()
        .failure();
}

#[test]
fn html_output() {
    let dir = TempDir::new().unwrap();
    let graph = write(dir.path(), "graph.json", GRAPH);
    rdec(&dir)
        .args(["--arch", "x86", "--html", "--graph"])
        .arg(&graph)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("<pre class=\"rdec\">\n"))
        .stdout(predicate::str::ends_with("</pre>\n"));
}

#[test]
fn config_file_supplies_defaults() {
    let dir = TempDir::new().unwrap();
    let graph = write(dir.path(), "graph.json", GRAPH);
    let config = write(dir.path(), "config.json", r#"{ "assembly": true }"#);
    Command::cargo_bin("rdec")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["--arch", "x86", "--graph"])
        .arg(&graph)
        .assert()
        .success()
        .stdout(predicate::str::contains("0x00001000  mov eax, 1"));
}

#[test]
fn bad_address_is_rejected_by_the_parser() {
    let dir = TempDir::new().unwrap();
    rdec(&dir)
        .args(["--arch", "x86", "--address", "nowhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid address"));
}

#[test]
fn paddr_switches_the_assembly_column() {
    let dir = TempDir::new().unwrap();
    let graph = write(
        dir.path(),
        "graph.json",
        r#"[ { "address": "0x1000", "instructions": [
            { "address": "0x1000", "paddr": "0x400", "mnemonic": "mov", "operands": ["eax", "1"] },
            { "address": "0x1005", "paddr": "0x405", "mnemonic": "ret" } ] } ]"#,
    );
    rdec(&dir)
        .args(["--arch", "x86", "--assembly", "--paddr", "--graph"])
        .arg(&graph)
        .assert()
        .success()
        .stdout(predicate::str::contains("0x00000400  mov eax, 1"))
        .stdout(predicate::str::contains("0x00001000  mov").not());
}
