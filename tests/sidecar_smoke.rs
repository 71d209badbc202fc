use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_flockportd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn flockportd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn ok_result(value: &serde_json::Value) -> &serde_json::Value {
    assert_eq!(value["ok"], true, "request failed: {value}");
    &value["result"]
}

fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let f = std::fs::File::create(path).expect("create zip");
    let mut zip = zip::ZipWriter::new(f);
    for (name, text) in entries {
        zip.start_file(*name, zip::write::FileOptions::default())
            .expect("start entry");
        zip.write_all(text.as_bytes()).expect("write entry");
    }
    zip.finish().expect("finish zip");
}

#[test]
fn import_export_round_trip_through_the_sidecar() {
    let workspace = temp_dir("flockport-sidecar-ws");
    let out_dir = temp_dir("flockport-sidecar-out");
    let in_zip = out_dir.join("legacy.zip");
    let out_zip = out_dir.join("export.zip");
    write_zip(
        &in_zip,
        &[
            (
                "people.csv",
                "importKey,lastName,firstName\n1,Smith,John\n2,,\n3,Jones,Ann\n",
            ),
            (
                "donations.csv",
                "batch,date,personKey,amount,fund\n\
                 General Fund Drive,2024-01-07,1,50.00,Missions\n\
                 General Fund Drive,2024-01-14,3,75.00,Missions\n",
            ),
        ],
    );

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(ok_result(&health)["workspacePath"].is_null());

    let no_ws = request(
        &mut stdin,
        &mut reader,
        "2",
        "archive.import",
        json!({ "inPath": in_zip.to_string_lossy() }),
    );
    assert_eq!(no_ws["error"]["code"], "no_workspace");

    let selected = request(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(ok_result(&selected)["config"]["maxConcurrency"], 3);

    let preview = request(
        &mut stdin,
        &mut reader,
        "4",
        "archive.preview",
        json!({ "inPath": in_zip.to_string_lossy() }),
    );
    let preview = ok_result(&preview);
    assert_eq!(preview["counts"]["people"], 2);
    assert_eq!(preview["counts"]["donations"], 2);
    assert_eq!(preview["warningsCount"], 1);
    assert_eq!(preview["warnings"][0]["code"], "blank_row");
    assert_eq!(preview["canImport"], true);

    let imported = request(
        &mut stdin,
        &mut reader,
        "5",
        "archive.import",
        json!({ "inPath": in_zip.to_string_lossy(), "maxConcurrency": 1 }),
    );
    let imported = ok_result(&imported);
    assert_eq!(imported["created"]["people"], 2);
    assert_eq!(imported["created"]["donationBatches"], 1);
    assert_eq!(imported["created"]["fundDonations"], 2);
    let steps = imported["steps"].as_array().expect("steps");
    assert_eq!(steps.len(), 19);
    assert!(steps.iter().all(|s| s["status"] == "complete"));

    let status = request(&mut stdin, &mut reader, "6", "import.status", json!({}));
    assert_eq!(ok_result(&status)["statuses"]["answers"], "complete");

    let again = request(
        &mut stdin,
        &mut reader,
        "7",
        "archive.import",
        json!({ "inPath": in_zip.to_string_lossy() }),
    );
    assert_eq!(again["ok"], false);
    assert_eq!(again["error"]["code"], "already_imported");

    let exported = request(
        &mut stdin,
        &mut reader,
        "8",
        "archive.export",
        json!({ "outPath": out_zip.to_string_lossy() }),
    );
    let exported = ok_result(&exported);
    assert_eq!(exported["rows"]["people.csv"], 2);
    assert_eq!(exported["rows"]["donations.csv"], 2);
    assert_eq!(exported["warningsCount"], 0);
    assert!(out_zip.is_file());

    let reread = request(
        &mut stdin,
        &mut reader,
        "9",
        "archive.preview",
        json!({ "inPath": out_zip.to_string_lossy() }),
    );
    let reread = ok_result(&reread);
    assert_eq!(reread["counts"]["people"], 2);
    assert_eq!(reread["counts"]["funds"], 1);
    assert_eq!(reread["errorsCount"], 0);

    let unknown = request(&mut stdin, &mut reader, "10", "songs.list", json!({}));
    assert_eq!(unknown["error"]["code"], "not_implemented");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn failed_validation_reports_errors_and_writes_nothing() {
    let workspace = temp_dir("flockport-sidecar-invalid");
    let in_zip = workspace.join("bad.zip");
    write_zip(
        &in_zip,
        &[
            ("people.csv", "importKey,lastName\n1,Smith\n"),
            ("groupmembers.csv", "groupKey,personKey\nmissing,1\n"),
        ],
    );

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "archive.import",
        json!({ "inPath": in_zip.to_string_lossy() }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "validation_failed");
    assert_eq!(resp["error"]["details"]["errors"][0]["field"], "groupKey");
    assert_eq!(resp["error"]["details"]["errors"][0]["line"], 2);

    let status = request(&mut stdin, &mut reader, "3", "import.status", json!({}));
    assert_eq!(ok_result(&status)["statuses"]["people"], "pending");

    let missing = request(
        &mut stdin,
        &mut reader,
        "4",
        "archive.preview",
        json!({ "inPath": workspace.join("nope.zip").to_string_lossy() }),
    );
    assert_eq!(missing["error"]["code"], "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
