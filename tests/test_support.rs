#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

use vmsyncd::salesforce::{SObject, SalesforceClient, SalesforceError};

pub fn temp_dir(prefix: &str) -> PathBuf {
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

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_vmsyncd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        // Keep crm.connect behavior deterministic regardless of the host env.
        .env_remove("VMS_SF_CLIENT_ID")
        .env_remove("VMS_SF_CLIENT_SECRET")
        .env_remove("VMS_SF_USERNAME")
        .env_remove("VMS_SF_PASSWORD")
        .spawn()
        .expect("spawn vmsyncd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
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

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{method} failed: {value}"
    );
    value.get("result").cloned().expect("result payload")
}

/// In-memory CRM double. Queries route to the first entry whose key appears
/// in the SOQL text, so one fake can serve several record types that live on
/// the same CRM object (Account record types, Contact record types).
pub struct FakeCrm {
    routes: Vec<(&'static str, Vec<SObject>)>,
    failing: Vec<&'static str>,
}

impl FakeCrm {
    pub fn new() -> FakeCrm {
        FakeCrm {
            routes: Vec::new(),
            failing: Vec::new(),
        }
    }

    pub fn route(mut self, key: &'static str, records: Vec<SObject>) -> FakeCrm {
        self.routes.push((key, records));
        self
    }

    pub fn failing(mut self, key: &'static str) -> FakeCrm {
        self.failing.push(key);
        self
    }

    fn lookup(&self, soql: &str) -> Result<Vec<SObject>, SalesforceError> {
        if self.failing.iter().any(|key| soql.contains(key)) {
            return Err(SalesforceError::Query(format!(
                "no such object in query: {soql}"
            )));
        }
        Ok(self
            .routes
            .iter()
            .find(|(key, _)| soql.contains(key))
            .map(|(_, records)| records.clone())
            .unwrap_or_default())
    }
}

impl SalesforceClient for FakeCrm {
    fn connect(&self) -> Result<(), SalesforceError> {
        Ok(())
    }

    fn query_all(&self, soql: &str) -> Result<Vec<SObject>, SalesforceError> {
        self.lookup(soql)
    }

    fn query_count(&self, soql: &str) -> Result<usize, SalesforceError> {
        Ok(self.lookup(soql)?.len())
    }

    fn query_chunk(
        &self,
        soql: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SObject>, SalesforceError> {
        let records = self.lookup(soql)?;
        if offset >= records.len() {
            return Ok(Vec::new());
        }
        let end = (offset + limit).min(records.len());
        Ok(records[offset..end].to_vec())
    }
}

/// 18-character alphanumeric CRM id.
pub fn sf_id(prefix: &str, n: usize) -> String {
    format!("{prefix}{:0width$}", n, width = 18 - prefix.len())
}

pub fn district_record(n: usize) -> SObject {
    SObject::from_value(json!({
        "Id": sf_id("001D", n),
        "Name": format!("District {n}")
    }))
    .expect("district record")
}

pub fn school_record(n: usize, parent: Option<&str>) -> SObject {
    SObject::from_value(json!({
        "Id": sf_id("001S", n),
        "Name": format!("School {n}"),
        "ParentId": parent,
        "School_Level__c": "Elementary"
    }))
    .expect("school record")
}

pub fn volunteer_record(n: usize) -> SObject {
    SObject::from_value(json!({
        "Id": sf_id("003V", n),
        "FirstName": "Vol",
        "LastName": format!("Unteer {n}"),
        "Email": format!("vol{n}@example.org")
    }))
    .expect("volunteer record")
}

pub fn memory_db() -> rusqlite::Connection {
    let conn = rusqlite::Connection::open_in_memory().expect("open in-memory db");
    vmsyncd::db::init_schema(&conn).expect("schema");
    conn
}
