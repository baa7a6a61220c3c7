use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use serde::Serialize;

use crate::retry::ErrorKind;
use crate::salesforce::{SObject, SalesforceClient, SalesforceError};
use crate::validate;

/// Knobs for one import run. Immutable once handed to the importer.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Records per savepoint-scoped batch.
    pub batch_size: usize,
    /// Attempts for the connect/query phases (fixed-delay retries).
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Run universal + custom validation before processing each record.
    pub validate_data: bool,
    pub log_progress: bool,
    /// Outer transaction is committed to disk every this many batches.
    pub commit_frequency: usize,
    /// Soft wall-clock guard, checked at batch boundaries only.
    pub timeout: Duration,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            batch_size: 1000,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            validate_data: true,
            log_progress: true,
            commit_frequency: 10,
            timeout: Duration::from_secs(3600),
        }
    }
}

/// Outcome of processing a single record. `Skipped` means the processor
/// looked at the record and deliberately did nothing (counted separately
/// from successes and errors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Skipped,
}

/// Summary of one full import run. `success` is true iff no record errored.
#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub success: bool,
    pub total_records: usize,
    pub processed_count: usize,
    pub success_count: usize,
    pub created_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl ImportResult {
    fn begin(start_time: DateTime<Utc>) -> ImportResult {
        ImportResult {
            success: false,
            total_records: 0,
            processed_count: 0,
            success_count: 0,
            created_count: 0,
            updated_count: 0,
            skipped_count: 0,
            error_count: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            start_time,
            end_time: start_time,
            duration_seconds: 0.0,
        }
    }

    fn finish(&mut self) {
        self.end_time = Utc::now();
        self.duration_seconds = (self.end_time - self.start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.success = self.error_count == 0;
    }
}

pub type ValidationFn = dyn Fn(&SObject) -> Vec<String>;
pub type ProcessFn<'p> = dyn FnMut(&SObject, &Connection) -> anyhow::Result<Outcome> + 'p;
pub type ProgressFn<'p> = dyn FnMut(usize, usize, &str) + 'p;

/// Batch ETL engine: fetch everything a query matches, partition into
/// fixed-size batches, validate and process each record inside a savepoint
/// per batch, and report aggregate statistics. Per-record failures are
/// recovered and counted; only connection-level failures abort the run.
pub struct SalesforceImporter<'a> {
    client: &'a dyn SalesforceClient,
    config: ImportConfig,
}

impl<'a> SalesforceImporter<'a> {
    pub fn new(client: &'a dyn SalesforceClient) -> SalesforceImporter<'a> {
        SalesforceImporter {
            client,
            config: ImportConfig::default(),
        }
    }

    pub fn with_config(
        client: &'a dyn SalesforceClient,
        config: ImportConfig,
    ) -> SalesforceImporter<'a> {
        SalesforceImporter { client, config }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn import_data(
        &self,
        conn: &Connection,
        query: &str,
        validation: Option<&ValidationFn>,
        process: &mut ProcessFn,
        progress: Option<&mut ProgressFn>,
    ) -> anyhow::Result<ImportResult> {
        let mut result = ImportResult::begin(Utc::now());
        let deadline = Instant::now() + self.config.timeout;

        self.retry_fixed("connect", || self.client.connect())?;
        let records = self.retry_fixed("query", || self.client.query_all(query))?;

        result.total_records = records.len();
        if records.is_empty() {
            // "Nothing to sync" is not a failure.
            result
                .warnings
                .push("No records found in Salesforce".to_string());
            result.finish();
            return Ok(result);
        }

        self.run_batches(conn, &records, validation, process, progress, deadline, &mut result)?;

        if result.error_count * 10 > result.total_records {
            result.warnings.push(format!(
                "High error rate: {} of {} records failed",
                result.error_count, result.total_records
            ));
        }
        result.finish();
        Ok(result)
    }

    /// Offset/limit variant for the large entities (10^4..10^5 rows): count
    /// first, then pull one page at a time so the whole result set is never
    /// resident. Terminates on an empty or short page.
    pub fn import_chunked(
        &self,
        conn: &Connection,
        count_query: &str,
        query: &str,
        chunk_size: usize,
        validation: Option<&ValidationFn>,
        process: &mut ProcessFn,
        mut progress: Option<&mut ProgressFn>,
    ) -> anyhow::Result<ImportResult> {
        let mut result = ImportResult::begin(Utc::now());
        let deadline = Instant::now() + self.config.timeout;
        let chunk_size = chunk_size.max(1);

        self.retry_fixed("connect", || self.client.connect())?;
        let total = self.retry_fixed("count", || self.client.query_count(count_query))?;

        result.total_records = total;
        if total == 0 {
            result
                .warnings
                .push("No records found in Salesforce".to_string());
            result.finish();
            return Ok(result);
        }

        let mut offset = 0usize;
        loop {
            let chunk = self.retry_fixed("query", || {
                self.client.query_chunk(query, chunk_size, offset)
            })?;
            if chunk.is_empty() {
                break;
            }
            let timed_out = self.run_batches(
                conn,
                &chunk,
                validation,
                process,
                progress.as_deref_mut(),
                deadline,
                &mut result,
            )?;
            if timed_out {
                break;
            }
            offset += chunk.len();
            if chunk.len() < chunk_size {
                break;
            }
        }

        if result.error_count * 10 > result.total_records.max(1) {
            result.warnings.push(format!(
                "High error rate: {} of {} records failed",
                result.error_count, result.total_records
            ));
        }
        result.finish();
        Ok(result)
    }

    /// Batch loop shared by `import_data` and the chunked sync workflows:
    /// one savepoint per batch inside an outer transaction that is committed
    /// every `commit_frequency` batches. The deadline spans the whole run,
    /// not one call; returns true when it fired so chunked callers stop
    /// fetching further pages.
    pub fn run_batches(
        &self,
        conn: &Connection,
        records: &[SObject],
        validation: Option<&ValidationFn>,
        process: &mut ProcessFn,
        mut progress: Option<&mut ProgressFn>,
        deadline: Instant,
        result: &mut ImportResult,
    ) -> anyhow::Result<bool> {
        let total = records.len();
        let mut tx = conn.unchecked_transaction()?;
        let mut batches_since_commit = 0usize;
        let mut timed_out = false;

        for batch in records.chunks(self.config.batch_size.max(1)) {
            if Instant::now() >= deadline {
                result.warnings.push(format!(
                    "Import timed out after {}s; remaining records were not attempted",
                    self.config.timeout.as_secs()
                ));
                timed_out = true;
                break;
            }

            self.run_batch(&mut tx, batch, validation, process, result);

            batches_since_commit += 1;
            if batches_since_commit >= self.config.commit_frequency.max(1) {
                tx.commit()?;
                tx = conn.unchecked_transaction()?;
                batches_since_commit = 0;
            }

            let message = format!("processed {}/{}", result.processed_count, total);
            if let Some(cb) = progress.as_deref_mut() {
                cb(result.processed_count, total, &message);
            }
            if self.config.log_progress {
                tracing::info!(
                    processed = result.processed_count,
                    total,
                    errors = result.error_count,
                    "import progress"
                );
            }
        }

        tx.commit()?;
        Ok(timed_out)
    }

    fn run_batch(
        &self,
        tx: &mut Transaction<'_>,
        batch: &[SObject],
        validation: Option<&ValidationFn>,
        process: &mut ProcessFn,
        result: &mut ImportResult,
    ) {
        let mut tally = BatchTally::default();

        let commit_err = {
            let sp = match tx.savepoint() {
                Ok(sp) => sp,
                Err(e) => {
                    result.processed_count += batch.len();
                    result.error_count += batch.len();
                    result
                        .errors
                        .push(format!("Could not open savepoint for batch: {e}"));
                    return;
                }
            };

            for record in batch {
                let rid = record.id();
                let rid = if rid.is_empty() { "<no id>" } else { rid.as_str() };

                if self.config.validate_data {
                    let mut violations = validate::validate_base(record);
                    if let Some(vf) = validation {
                        violations.extend(vf(record));
                    }
                    if !violations.is_empty() {
                        tally.errors += 1;
                        for v in violations {
                            tally.messages.push(format!("Record {rid}: {v}"));
                        }
                        continue;
                    }
                }

                match process(record, &sp) {
                    Ok(Outcome::Created) => tally.created += 1,
                    Ok(Outcome::Updated) => tally.updated += 1,
                    Ok(Outcome::Skipped) => tally.skipped += 1,
                    Err(e) => {
                        tally.errors += 1;
                        tally
                            .messages
                            .push(format!("Error processing record {rid}: {e:#}"));
                    }
                }
            }

            sp.commit().err()
        };

        apply_batch_outcome(result, batch.len(), tally, commit_err);
    }

    /// Fixed-delay retry for the connect/query phases. Authentication and
    /// transient failures are retried up to `max_retries`; anything else
    /// (malformed query, fatal server error) propagates immediately.
    fn retry_fixed<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, SalesforceError>,
    ) -> Result<T, SalesforceError> {
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) => {
                    let kind = ErrorKind::classify(&e.to_string());
                    let worth_retrying =
                        kind == ErrorKind::Authentication || kind.is_retryable();
                    attempt += 1;
                    if !worth_retrying || attempt >= self.config.max_retries.max(1) {
                        return Err(e);
                    }
                    tracing::warn!(
                        phase = what,
                        error = %e,
                        attempt,
                        "salesforce call failed, retrying"
                    );
                    std::thread::sleep(self.config.retry_delay);
                }
            }
        }
    }
}

/// Per-batch counters accumulated while the savepoint is open. Folded into
/// the run result only once the savepoint outcome is known.
#[derive(Default)]
struct BatchTally {
    created: usize,
    updated: usize,
    skipped: usize,
    errors: usize,
    messages: Vec<String>,
}

/// Folds one batch into the run result. A failed savepoint commit rolled
/// the whole batch back, so every record in it counts as an error, once;
/// the per-record messages are kept for diagnosis.
fn apply_batch_outcome(
    result: &mut ImportResult,
    batch_len: usize,
    mut tally: BatchTally,
    commit_err: Option<rusqlite::Error>,
) {
    result.processed_count += batch_len;
    match commit_err {
        None => {
            result.created_count += tally.created;
            result.updated_count += tally.updated;
            result.success_count += tally.created + tally.updated;
            result.skipped_count += tally.skipped;
            result.error_count += tally.errors;
            result.errors.append(&mut tally.messages);
        }
        Some(e) => {
            result.error_count += batch_len;
            result.errors.append(&mut tally.messages);
            result.errors.push(format!(
                "Batch commit failed, rolled back {batch_len} records: {e}"
            ));
        }
    }
}
