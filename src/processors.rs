use anyhow::anyhow;
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use crate::coerce::{safe_bool, safe_float, safe_int, safe_list, safe_opt_string, safe_string};
use crate::importer::Outcome;
use crate::salesforce::SObject;

/// Looks up a local row's surrogate id by its Salesforce ID. Returns None for
/// blank external ids so empty CRM references never match anything.
pub fn find_by_external_id(
    conn: &Connection,
    table: &str,
    external_id: &str,
) -> anyhow::Result<Option<String>> {
    if external_id.is_empty() {
        return Ok(None);
    }
    let sql = format!("SELECT id FROM {table} WHERE external_id = ?");
    let id = conn
        .query_row(&sql, [external_id], |r| r.get::<_, String>(0))
        .optional()?;
    Ok(id)
}

/// Create-or-update by external id: if a row with this `external_id` exists,
/// overwrite every mapped field on it; otherwise insert a fresh row with a
/// new surrogate key. Returns the local id and whether a row was created.
pub fn create_or_update_record(
    conn: &Connection,
    table: &str,
    external_id: &str,
    fields: Vec<(&str, Value)>,
) -> anyhow::Result<(String, bool)> {
    let now = Utc::now().to_rfc3339();

    if let Some(local_id) = find_by_external_id(conn, table, external_id)? {
        let assignments: Vec<String> = fields
            .iter()
            .map(|(col, _)| format!("{col} = ?"))
            .chain(std::iter::once("updated_at = ?".to_string()))
            .collect();
        let sql = format!(
            "UPDATE {table} SET {} WHERE id = ?",
            assignments.join(", ")
        );
        let mut params: Vec<Value> = fields.into_iter().map(|(_, v)| v).collect();
        params.push(Value::Text(now));
        params.push(Value::Text(local_id.clone()));
        conn.execute(&sql, params_from_iter(params))?;
        return Ok((local_id, false));
    }

    let local_id = Uuid::new_v4().to_string();
    let columns: Vec<&str> = ["id", "external_id"]
        .into_iter()
        .chain(fields.iter().map(|(col, _)| *col))
        .chain(std::iter::once("updated_at"))
        .collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {table}({}) VALUES({placeholders})",
        columns.join(", ")
    );
    let mut params: Vec<Value> = vec![
        Value::Text(local_id.clone()),
        Value::Text(external_id.to_string()),
    ];
    params.extend(fields.into_iter().map(|(_, v)| v));
    params.push(Value::Text(now));
    conn.execute(&sql, params_from_iter(params))?;
    Ok((local_id, true))
}

fn outcome(created: bool) -> Outcome {
    if created {
        Outcome::Created
    } else {
        Outcome::Updated
    }
}

fn opt_text(v: Option<String>) -> Value {
    match v {
        Some(s) => Value::Text(s),
        None => Value::Null,
    }
}

/// Resolves an optional parent reference. Missing parents produce a null
/// foreign key and a logged warning; the record itself still imports.
fn resolve_optional(
    conn: &Connection,
    table: &str,
    parent_external_id: &str,
    child_id: &str,
) -> anyhow::Result<Value> {
    if parent_external_id.is_empty() {
        return Ok(Value::Null);
    }
    match find_by_external_id(conn, table, parent_external_id)? {
        Some(id) => Ok(Value::Text(id)),
        None => {
            tracing::warn!(
                table,
                parent = parent_external_id,
                record = child_id,
                "parent reference not found, storing null foreign key"
            );
            Ok(Value::Null)
        }
    }
}

pub fn process_organization_record(record: &SObject, conn: &Connection) -> anyhow::Result<Outcome> {
    let fields = vec![
        ("name", Value::Text(safe_string(record.get("Name")))),
        ("org_type", opt_text(safe_opt_string(record.get("Type")))),
        (
            "billing_city",
            opt_text(safe_opt_string(record.get("BillingCity"))),
        ),
        (
            "active",
            Value::Integer(if safe_bool(record.get("Active__c")) { 1 } else { 0 }),
        ),
    ];
    let (_, created) = create_or_update_record(conn, "organizations", &record.id(), fields)?;
    Ok(outcome(created))
}

pub fn process_district_record(record: &SObject, conn: &Connection) -> anyhow::Result<Outcome> {
    let fields = vec![("name", Value::Text(safe_string(record.get("Name"))))];
    let (_, created) = create_or_update_record(conn, "districts", &record.id(), fields)?;
    Ok(outcome(created))
}

/// Schools keep importing even when their parent district is unknown; the
/// district link is filled in by a later run once the district exists.
pub fn process_school_record(record: &SObject, conn: &Connection) -> anyhow::Result<Outcome> {
    let sf_id = record.id();
    let district = resolve_optional(
        conn,
        "districts",
        &safe_string(record.get("ParentId")),
        &sf_id,
    )?;
    let fields = vec![
        ("name", Value::Text(safe_string(record.get("Name")))),
        ("district_id", district),
        (
            "school_level",
            opt_text(safe_opt_string(record.get("School_Level__c"))),
        ),
    ];
    let (_, created) = create_or_update_record(conn, "schools", &sf_id, fields)?;
    Ok(outcome(created))
}

/// Classes hard-require their school: a class row with no school is useless
/// to every downstream feature, so the record errors instead.
pub fn process_class_record(record: &SObject, conn: &Connection) -> anyhow::Result<Outcome> {
    let school_sf_id = safe_string(record.get("School__c"));
    let Some(school_id) = find_by_external_id(conn, "schools", &school_sf_id)? else {
        return Err(anyhow!("School with Salesforce ID {school_sf_id} not found"));
    };
    let fields = vec![
        ("name", Value::Text(safe_string(record.get("Name")))),
        ("school_id", Value::Text(school_id)),
        ("year", Value::Integer(safe_int(record.get("Year__c")))),
    ];
    let (_, created) = create_or_update_record(conn, "classes", &record.id(), fields)?;
    Ok(outcome(created))
}

pub fn process_teacher_record(record: &SObject, conn: &Connection) -> anyhow::Result<Outcome> {
    let sf_id = record.id();
    let school = resolve_optional(
        conn,
        "schools",
        &safe_string(record.get("npsp__Primary_Affiliation__c")),
        &sf_id,
    )?;
    let fields = vec![
        (
            "first_name",
            Value::Text(safe_string(record.get("FirstName"))),
        ),
        ("last_name", Value::Text(safe_string(record.get("LastName")))),
        ("email", opt_text(safe_opt_string(record.get("Email")))),
        ("school_id", school),
    ];
    let (_, created) = create_or_update_record(conn, "teachers", &sf_id, fields)?;
    Ok(outcome(created))
}

pub fn process_student_record(record: &SObject, conn: &Connection) -> anyhow::Result<Outcome> {
    let sf_id = record.id();
    let school = resolve_optional(
        conn,
        "schools",
        &safe_string(record.get("AccountId")),
        &sf_id,
    )?;
    let fields = vec![
        (
            "first_name",
            Value::Text(safe_string(record.get("FirstName"))),
        ),
        ("last_name", Value::Text(safe_string(record.get("LastName")))),
        (
            "birth_date",
            opt_text(safe_opt_string(record.get("Birthdate"))),
        ),
        ("grade", opt_text(safe_opt_string(record.get("Grade__c")))),
        ("school_id", school),
    ];
    let (_, created) = create_or_update_record(conn, "students", &sf_id, fields)?;
    Ok(outcome(created))
}

pub fn process_volunteer_record(record: &SObject, conn: &Connection) -> anyhow::Result<Outcome> {
    let sf_id = record.id();
    let organization = resolve_optional(
        conn,
        "organizations",
        &safe_string(record.get("npsp__Primary_Affiliation__c")),
        &sf_id,
    )?;
    let skills = safe_list(record.get("Volunteer_Skills__c"), ';');
    let fields = vec![
        (
            "first_name",
            Value::Text(safe_string(record.get("FirstName"))),
        ),
        ("last_name", Value::Text(safe_string(record.get("LastName")))),
        ("email", opt_text(safe_opt_string(record.get("Email")))),
        ("phone", opt_text(safe_opt_string(record.get("Phone")))),
        (
            "skills",
            if skills.is_empty() {
                Value::Null
            } else {
                Value::Text(skills.join(";"))
            },
        ),
        ("organization_id", organization),
    ];
    let (_, created) = create_or_update_record(conn, "volunteers", &sf_id, fields)?;
    Ok(outcome(created))
}

/// The CRM stores one account-side field that may point at an organization,
/// a school, or a district, and one contact-side field that may point at a
/// volunteer, teacher, or student. Each side is tried in turn; an
/// affiliation with a dangling side errors rather than importing.
pub fn process_affiliation_record(record: &SObject, conn: &Connection) -> anyhow::Result<Outcome> {
    let account_sf_id = safe_string(record.get("npe5__Organization__c"));
    let account = ["organizations", "schools", "districts"]
        .iter()
        .find_map(|table| {
            find_by_external_id(conn, table, &account_sf_id)
                .transpose()
                .map(|r| r.map(|id| (*table, id)))
        })
        .transpose()?;
    let Some((account_type, account_id)) = account else {
        return Err(anyhow!(
            "Organization/School/District with Salesforce ID {account_sf_id} not found"
        ));
    };

    let contact_sf_id = safe_string(record.get("npe5__Contact__c"));
    let contact = ["volunteers", "teachers", "students"]
        .iter()
        .find_map(|table| {
            find_by_external_id(conn, table, &contact_sf_id)
                .transpose()
                .map(|r| r.map(|id| (*table, id)))
        })
        .transpose()?;
    let Some((contact_type, contact_id)) = contact else {
        return Err(anyhow!(
            "Contact with Salesforce ID {contact_sf_id} not found"
        ));
    };

    let fields = vec![
        ("contact_type", Value::Text(contact_type.to_string())),
        ("contact_id", Value::Text(contact_id)),
        ("account_type", Value::Text(account_type.to_string())),
        ("account_id", Value::Text(account_id)),
        (
            "role",
            opt_text(safe_opt_string(record.get("npe5__Role__c"))),
        ),
        (
            "status",
            opt_text(safe_opt_string(record.get("npe5__Status__c"))),
        ),
    ];
    let (_, created) = create_or_update_record(conn, "affiliations", &record.id(), fields)?;
    Ok(outcome(created))
}

pub fn process_event_record(record: &SObject, conn: &Connection) -> anyhow::Result<Outcome> {
    let fields = vec![
        ("name", Value::Text(safe_string(record.get("Name")))),
        (
            "start_date",
            opt_text(safe_opt_string(record.get("Start_Date__c"))),
        ),
        (
            "location",
            opt_text(safe_opt_string(record.get("Location__c"))),
        ),
    ];
    let (_, created) = create_or_update_record(conn, "events", &record.id(), fields)?;
    Ok(outcome(created))
}

pub fn process_pathway_record(record: &SObject, conn: &Connection) -> anyhow::Result<Outcome> {
    let fields = vec![("name", Value::Text(safe_string(record.get("Name"))))];
    let (_, created) = create_or_update_record(conn, "pathways", &record.id(), fields)?;
    Ok(outcome(created))
}

/// Volunteer history entries hard-require their contact: an activity with no
/// volunteer attached has nothing to report against.
pub fn process_activity_record(record: &SObject, conn: &Connection) -> anyhow::Result<Outcome> {
    let contact_sf_id = safe_string(record.get("WhoId"));
    let Some(volunteer_id) = find_by_external_id(conn, "volunteers", &contact_sf_id)? else {
        return Err(anyhow!(
            "Contact with Salesforce ID {contact_sf_id} not found"
        ));
    };
    let fields = vec![
        ("volunteer_id", Value::Text(volunteer_id)),
        ("subject", opt_text(safe_opt_string(record.get("Subject")))),
        (
            "activity_date",
            opt_text(safe_opt_string(record.get("ActivityDate"))),
        ),
        ("status", opt_text(safe_opt_string(record.get("Status")))),
        ("hours", Value::Real(safe_float(record.get("Hours__c")))),
    ];
    let (_, created) = create_or_update_record(conn, "activities", &record.id(), fields)?;
    Ok(outcome(created))
}
