use std::time::Instant;

use rusqlite::Connection;
use serde_json::{json, Value};

use crate::importer::{ImportConfig, ImportResult, Outcome, SalesforceImporter};
use crate::processors;
use crate::retry::ErrorKind;
use crate::salesforce::{SObject, SalesforceClient};
use crate::validate;

/// Result dictionaries carry at most this many error strings.
const ERROR_SAMPLE: usize = 10;
/// Page size for the chunked (offset/limit) entities.
const CHUNK_SIZE: usize = 2000;

/// One entity's pull from the CRM: what to query, how to validate each
/// record, and which processor writes it. `count_query` switches the job to
/// the chunked offset/limit loop.
struct EntityJob {
    /// Singular key used in the result dictionary (`district_success`).
    key: &'static str,
    title: &'static str,
    query: &'static str,
    count_query: Option<&'static str>,
    validation: fn(&SObject) -> Vec<String>,
    process: fn(&SObject, &Connection) -> anyhow::Result<Outcome>,
}

const DISTRICT: EntityJob = EntityJob {
    key: "district",
    title: "District",
    query: "SELECT Id, Name FROM Account WHERE RecordType.Name = 'School District'",
    count_query: None,
    validation: validate::validate_district,
    process: processors::process_district_record,
};

const SCHOOL: EntityJob = EntityJob {
    key: "school",
    title: "School",
    query: "SELECT Id, Name, ParentId, School_Level__c FROM Account \
            WHERE RecordType.Name = 'School'",
    count_query: None,
    validation: validate::validate_school,
    process: processors::process_school_record,
};

const ORGANIZATION: EntityJob = EntityJob {
    key: "organization",
    title: "Organization",
    query: "SELECT Id, Name, Type, BillingCity, Active__c FROM Account \
            WHERE RecordType.Name = 'Organization'",
    count_query: None,
    validation: validate::validate_organization,
    process: processors::process_organization_record,
};

const CLASS: EntityJob = EntityJob {
    key: "class",
    title: "Class",
    query: "SELECT Id, Name, School__c, Year__c FROM Class__c",
    count_query: None,
    validation: validate::validate_class,
    process: processors::process_class_record,
};

const TEACHER: EntityJob = EntityJob {
    key: "teacher",
    title: "Teacher",
    query: "SELECT Id, FirstName, LastName, Email, npsp__Primary_Affiliation__c \
            FROM Contact WHERE RecordType.Name = 'Teacher'",
    count_query: Some("SELECT COUNT() FROM Contact WHERE RecordType.Name = 'Teacher'"),
    validation: validate::validate_teacher,
    process: processors::process_teacher_record,
};

const STUDENT: EntityJob = EntityJob {
    key: "student",
    title: "Student",
    query: "SELECT Id, FirstName, LastName, Birthdate, Grade__c, AccountId \
            FROM Contact WHERE RecordType.Name = 'Student'",
    count_query: Some("SELECT COUNT() FROM Contact WHERE RecordType.Name = 'Student'"),
    validation: validate::validate_student,
    process: processors::process_student_record,
};

const VOLUNTEER: EntityJob = EntityJob {
    key: "volunteer",
    title: "Volunteer",
    query: "SELECT Id, FirstName, LastName, Email, Phone, Volunteer_Skills__c, \
            npsp__Primary_Affiliation__c FROM Contact \
            WHERE RecordType.Name = 'Volunteer'",
    count_query: Some("SELECT COUNT() FROM Contact WHERE RecordType.Name = 'Volunteer'"),
    validation: validate::validate_volunteer,
    process: processors::process_volunteer_record,
};

const AFFILIATION: EntityJob = EntityJob {
    key: "affiliation",
    title: "Affiliation",
    query: "SELECT Id, npe5__Organization__c, npe5__Contact__c, npe5__Role__c, \
            npe5__Status__c FROM npe5__Affiliation__c",
    count_query: None,
    validation: validate::validate_affiliation,
    process: processors::process_affiliation_record,
};

const EVENT: EntityJob = EntityJob {
    key: "event",
    title: "Event",
    query: "SELECT Id, Name, Start_Date__c, Location__c FROM Event__c",
    count_query: None,
    validation: validate::validate_event,
    process: processors::process_event_record,
};

const PATHWAY: EntityJob = EntityJob {
    key: "pathway",
    title: "Pathway",
    query: "SELECT Id, Name FROM Pathway__c",
    count_query: None,
    validation: validate::validate_pathway,
    process: processors::process_pathway_record,
};

const HISTORY: EntityJob = EntityJob {
    key: "history",
    title: "Volunteer history",
    query: "SELECT Id, WhoId, Subject, ActivityDate, Status, Hours__c FROM Task \
            WHERE WhoId != null",
    count_query: None,
    validation: validate::validate_activity,
    process: processors::process_activity_record,
};

fn run_job(
    client: &dyn SalesforceClient,
    conn: &Connection,
    job: &EntityJob,
    config: ImportConfig,
) -> anyhow::Result<ImportResult> {
    let importer = SalesforceImporter::with_config(client, config);
    let mut process = job.process;
    match job.count_query {
        None => importer.import_data(
            conn,
            job.query,
            Some(&job.validation),
            &mut process,
            None,
        ),
        Some(count_query) => importer.import_chunked(
            conn,
            count_query,
            job.query,
            CHUNK_SIZE,
            Some(&job.validation),
            &mut process,
            None,
        ),
    }
}

/// Turns an import outcome into the result dictionary the callers relay.
/// Nothing here panics: a failed run becomes `{success: false, error,
/// error_type}` with the taxonomy classification.
fn sync_result(job: &EntityJob, outcome: anyhow::Result<ImportResult>) -> Value {
    match outcome {
        Ok(result) => {
            let mut dict = serde_json::Map::new();
            dict.insert("success".to_string(), json!(result.success));
            dict.insert(
                "message".to_string(),
                json!(format!(
                    "{} sync completed: {} succeeded, {} failed",
                    job.title, result.success_count, result.error_count
                )),
            );
            dict.insert(format!("{}_success", job.key), json!(result.success_count));
            dict.insert(format!("{}_errors", job.key), json!(result.error_count));
            dict.insert(
                "errors".to_string(),
                json!(result
                    .errors
                    .iter()
                    .take(ERROR_SAMPLE)
                    .collect::<Vec<_>>()),
            );
            dict.insert("warnings".to_string(), json!(result.warnings));
            dict.insert(
                "duration".to_string(),
                json!(format!("{:.1} seconds", result.duration_seconds)),
            );
            Value::Object(dict)
        }
        Err(e) => {
            let message = format!("{e:#}");
            let kind = ErrorKind::classify(&message);
            tracing::error!(entity = job.key, error = %message, "sync failed");
            json!({
                "success": false,
                "error": message,
                "error_type": kind.as_str(),
            })
        }
    }
}

fn run_entity_sync_with(
    client: &dyn SalesforceClient,
    conn: &Connection,
    job: &EntityJob,
    config: ImportConfig,
) -> Value {
    tracing::info!(entity = job.key, "sync starting");
    sync_result(job, run_job(client, conn, job, config))
}

fn run_entity_sync(client: &dyn SalesforceClient, conn: &Connection, job: &EntityJob) -> Value {
    run_entity_sync_with(client, conn, job, ImportConfig::default())
}

pub fn district_sync(client: &dyn SalesforceClient, conn: &Connection) -> Value {
    run_entity_sync(client, conn, &DISTRICT)
}

pub fn school_sync(client: &dyn SalesforceClient, conn: &Connection) -> Value {
    run_entity_sync(client, conn, &SCHOOL)
}

pub fn organization_sync(client: &dyn SalesforceClient, conn: &Connection) -> Value {
    run_entity_sync(client, conn, &ORGANIZATION)
}

pub fn class_sync(client: &dyn SalesforceClient, conn: &Connection) -> Value {
    run_entity_sync(client, conn, &CLASS)
}

pub fn teacher_sync(client: &dyn SalesforceClient, conn: &Connection) -> Value {
    run_entity_sync(client, conn, &TEACHER)
}

pub fn student_sync(client: &dyn SalesforceClient, conn: &Connection) -> Value {
    run_entity_sync(client, conn, &STUDENT)
}

pub fn volunteer_sync(client: &dyn SalesforceClient, conn: &Connection) -> Value {
    run_entity_sync(client, conn, &VOLUNTEER)
}

/// Affiliations link contacts to accounts after both sides have synced; the
/// full-sync order does not include them, so they run on demand.
pub fn affiliation_sync(client: &dyn SalesforceClient, conn: &Connection) -> Value {
    run_entity_sync(client, conn, &AFFILIATION)
}

pub fn event_sync(client: &dyn SalesforceClient, conn: &Connection) -> Value {
    run_entity_sync(client, conn, &EVENT)
}

pub fn pathway_sync(client: &dyn SalesforceClient, conn: &Connection) -> Value {
    run_entity_sync(client, conn, &PATHWAY)
}

pub fn history_sync(client: &dyn SalesforceClient, conn: &Connection) -> Value {
    run_entity_sync(client, conn, &HISTORY)
}

/// Dependency order for the orchestrator. Parents sync before children so
/// cross-references resolve, but nothing enforces it: a failed step only
/// means later steps find fewer resolvable references.
const FULL_SYNC_STEPS: [(&str, &EntityJob); 10] = [
    ("districts", &DISTRICT),
    ("schools", &SCHOOL),
    ("organizations", &ORGANIZATION),
    ("classes", &CLASS),
    ("teachers", &TEACHER),
    ("students", &STUDENT),
    ("volunteers", &VOLUNTEER),
    ("events", &EVENT),
    ("pathways", &PATHWAY),
    ("history", &HISTORY),
];

pub fn full_salesforce_sync(client: &dyn SalesforceClient, conn: &Connection) -> Value {
    full_salesforce_sync_with(client, conn, ImportConfig::default())
}

fn full_salesforce_sync_with(
    client: &dyn SalesforceClient,
    conn: &Connection,
    config: ImportConfig,
) -> Value {
    let started = Instant::now();
    let mut sync_results = serde_json::Map::new();
    let mut successful_syncs = 0usize;
    let mut failed_syncs = 0usize;
    let mut failed_syncs_list: Vec<&str> = Vec::new();
    let mut total_success_count = 0u64;
    let mut total_error_count = 0u64;
    let mut errors: Vec<String> = Vec::new();

    for (step, job) in FULL_SYNC_STEPS {
        let result = run_entity_sync_with(client, conn, job, config.clone());

        let ok = result
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if ok {
            successful_syncs += 1;
        } else {
            failed_syncs += 1;
            failed_syncs_list.push(step);
            if let Some(e) = result.get("error").and_then(Value::as_str) {
                errors.push(format!("{step}: {e}"));
            }
        }

        total_success_count += result
            .get(format!("{}_success", job.key))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        total_error_count += result
            .get(format!("{}_errors", job.key))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if let Some(step_errors) = result.get("errors").and_then(Value::as_array) {
            errors.extend(
                step_errors
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|e| format!("{step}: {e}")),
            );
        }

        sync_results.insert(step.to_string(), result);
    }

    tracing::info!(
        successful_syncs,
        failed_syncs,
        total_success_count,
        total_error_count,
        "full sync finished"
    );

    json!({
        "success": failed_syncs == 0,
        "successful_syncs": successful_syncs,
        "failed_syncs": failed_syncs,
        "failed_syncs_list": failed_syncs_list,
        "total_success_count": total_success_count,
        "total_error_count": total_error_count,
        "sync_results": Value::Object(sync_results),
        "errors": errors,
        "duration": format!("{:.1} seconds", started.elapsed().as_secs_f64()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::salesforce::SalesforceError;
    use serde_json::json as j;
    use std::time::Duration;

    /// Serves canned records routed by a substring of the SOQL text, so one
    /// fake can distinguish the record types that share a CRM object.
    struct FakeCrm {
        routes: Vec<(&'static str, Vec<SObject>)>,
        fail_connect: bool,
    }

    impl FakeCrm {
        fn empty() -> FakeCrm {
            FakeCrm {
                routes: Vec::new(),
                fail_connect: false,
            }
        }

        fn records_for(&self, soql: &str) -> Vec<SObject> {
            self.routes
                .iter()
                .find(|(key, _)| soql.contains(key))
                .map(|(_, records)| records.clone())
                .unwrap_or_default()
        }
    }

    impl SalesforceClient for FakeCrm {
        fn connect(&self) -> Result<(), SalesforceError> {
            if self.fail_connect {
                return Err(SalesforceError::Query("org unavailable".to_string()));
            }
            Ok(())
        }

        fn query_all(&self, soql: &str) -> Result<Vec<SObject>, SalesforceError> {
            if self.fail_connect {
                return Err(SalesforceError::Query("org unavailable".to_string()));
            }
            Ok(self.records_for(soql))
        }

        fn query_count(&self, soql: &str) -> Result<usize, SalesforceError> {
            if self.fail_connect {
                return Err(SalesforceError::Query("org unavailable".to_string()));
            }
            Ok(self.records_for(soql).len())
        }

        fn query_chunk(
            &self,
            soql: &str,
            limit: usize,
            offset: usize,
        ) -> Result<Vec<SObject>, SalesforceError> {
            let records = self.records_for(soql);
            if offset >= records.len() {
                return Ok(Vec::new());
            }
            let end = (offset + limit).min(records.len());
            Ok(records[offset..end].to_vec())
        }
    }

    fn fast_config() -> ImportConfig {
        ImportConfig {
            retry_delay: Duration::from_millis(1),
            log_progress: false,
            ..ImportConfig::default()
        }
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        conn
    }

    fn districts(n: usize) -> Vec<SObject> {
        (0..n)
            .map(|i| {
                SObject::from_value(j!({
                    "Id": format!("001{:09}DIST00", i),
                    "Name": format!("District {i}")
                }))
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn district_sync_reports_per_entity_counts() {
        let conn = test_conn();
        let crm = FakeCrm {
            routes: vec![("'School District'", districts(3))],
            fail_connect: false,
        };

        let result = run_entity_sync_with(&crm, &conn, &DISTRICT, fast_config());
        assert_eq!(result["success"], j!(true));
        assert_eq!(result["district_success"], j!(3));
        assert_eq!(result["district_errors"], j!(0));
        assert!(result["message"]
            .as_str()
            .unwrap()
            .starts_with("District sync completed"));
        assert!(result["duration"].as_str().unwrap().ends_with("seconds"));
    }

    #[test]
    fn second_run_updates_instead_of_inserting() {
        let conn = test_conn();
        let crm = FakeCrm {
            routes: vec![("'School District'", districts(4))],
            fail_connect: false,
        };

        run_entity_sync_with(&crm, &conn, &DISTRICT, fast_config());
        let second = run_entity_sync_with(&crm, &conn, &DISTRICT, fast_config());
        assert_eq!(second["success"], j!(true));
        assert_eq!(second["district_success"], j!(4));

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM districts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 4);
    }

    #[test]
    fn failure_becomes_structured_error_dict() {
        let conn = test_conn();
        let crm = FakeCrm {
            routes: Vec::new(),
            fail_connect: true,
        };

        let result = run_entity_sync_with(&crm, &conn, &DISTRICT, fast_config());
        assert_eq!(result["success"], j!(false));
        assert!(result["error"].as_str().unwrap().contains("org unavailable"));
        assert_eq!(result["error_type"], j!("UNKNOWN_ERROR"));
        assert!(result.get("district_success").is_none());
    }

    #[test]
    fn volunteer_sync_uses_chunked_path_end_to_end() {
        let conn = test_conn();
        let volunteers: Vec<SObject> = (0..5)
            .map(|i| {
                SObject::from_value(j!({
                    "Id": format!("003{:09}VOLU00", i),
                    "FirstName": "Vol",
                    "LastName": format!("Unteer {i}")
                }))
                .unwrap()
            })
            .collect();
        let crm = FakeCrm {
            routes: vec![("'Volunteer'", volunteers)],
            fail_connect: false,
        };

        let result = run_entity_sync_with(&crm, &conn, &VOLUNTEER, fast_config());
        assert_eq!(result["success"], j!(true));
        assert_eq!(result["volunteer_success"], j!(5));

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM volunteers", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 5);
    }

    #[test]
    fn errors_are_capped_at_the_sample_size() {
        let conn = test_conn();
        // 30 records with no Id all fail validation.
        let broken: Vec<SObject> = (0..30)
            .map(|i| SObject::from_value(j!({ "Name": format!("D {i}") })).unwrap())
            .collect();
        let crm = FakeCrm {
            routes: vec![("'School District'", broken)],
            fail_connect: false,
        };

        let result = run_entity_sync_with(&crm, &conn, &DISTRICT, fast_config());
        assert_eq!(result["success"], j!(false));
        assert_eq!(result["district_errors"], j!(30));
        assert_eq!(result["errors"].as_array().unwrap().len(), ERROR_SAMPLE);
    }

    #[test]
    fn full_sync_runs_every_step_and_aggregates() {
        let conn = test_conn();
        let crm = FakeCrm::empty();

        let result = full_salesforce_sync_with(&crm, &conn, fast_config());
        assert_eq!(result["success"], j!(true));
        assert_eq!(result["successful_syncs"], j!(10));
        assert_eq!(result["failed_syncs"], j!(0));
        assert_eq!(result["total_success_count"], j!(0));

        let steps = result["sync_results"].as_object().unwrap();
        assert_eq!(steps.len(), 10);
        for (_, step_result) in steps {
            assert_eq!(step_result["success"], j!(true));
        }
    }

    #[test]
    fn full_sync_orders_parents_before_children() {
        let district_id = "001DDDDDDDDDDDDDD1";
        let conn = test_conn();
        let crm = FakeCrm {
            routes: vec![
                (
                    "'School District'",
                    vec![SObject::from_value(j!({ "Id": district_id, "Name": "District" }))
                        .unwrap()],
                ),
                (
                    "'School'",
                    vec![SObject::from_value(j!({
                        "Id": "001SSSSSSSSSSSSSS1",
                        "Name": "School",
                        "ParentId": district_id
                    }))
                    .unwrap()],
                ),
            ],
            fail_connect: false,
        };

        let result = full_salesforce_sync_with(&crm, &conn, fast_config());
        assert_eq!(result["success"], j!(true));
        assert_eq!(result["total_success_count"], j!(2));

        // Districts ran first, so the school resolved its parent within one
        // full sync pass instead of needing a second run.
        let district_fk: Option<String> = conn
            .query_row("SELECT district_id FROM schools", [], |r| r.get(0))
            .unwrap();
        assert!(district_fk.is_some());
    }

    #[test]
    fn one_failed_step_does_not_stop_the_rest() {
        let conn = test_conn();
        let crm = FakeCrm {
            routes: Vec::new(),
            fail_connect: true,
        };

        let result = full_salesforce_sync_with(&crm, &conn, fast_config());
        assert_eq!(result["success"], j!(false));
        assert_eq!(result["failed_syncs"], j!(10));
        assert_eq!(
            result["failed_syncs_list"].as_array().unwrap().len(),
            10
        );
        // Every step still reported a structured result.
        assert_eq!(result["sync_results"].as_object().unwrap().len(), 10);
        assert!(result["errors"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e.as_str().unwrap().starts_with("districts:")));
    }
}
