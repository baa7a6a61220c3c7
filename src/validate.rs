use crate::coerce::{safe_string, safe_uint_parses};
use crate::salesforce::SObject;

pub const MAX_NAME_LEN: usize = 255;

/// Salesforce record IDs are 15 (case-sensitive) or 18 (case-safe) characters,
/// alphanumeric only.
pub fn is_valid_salesforce_id(id: &str) -> bool {
    (id.len() == 15 || id.len() == 18) && id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Universal rules applied to every entity type before type-specific rules.
/// Returns human-readable violations; a record is valid iff the list is empty.
pub fn validate_base(record: &SObject) -> Vec<String> {
    let mut errors = Vec::new();
    let id = record.id();
    if id.is_empty() {
        errors.push("Missing Salesforce ID".to_string());
    } else if !is_valid_salesforce_id(&id) {
        errors.push("Invalid Salesforce ID format".to_string());
    }
    errors
}

fn require_name(record: &SObject, errors: &mut Vec<String>) {
    let name = safe_string(record.get("Name"));
    if name.is_empty() {
        errors.push("Missing required field: Name".to_string());
    } else if name.len() > MAX_NAME_LEN {
        errors.push(format!("Name exceeds {MAX_NAME_LEN} characters"));
    }
}

fn require_person_names(record: &SObject, errors: &mut Vec<String>) {
    if safe_string(record.get("FirstName")).is_empty() {
        errors.push("Missing required field: FirstName".to_string());
    }
    if safe_string(record.get("LastName")).is_empty() {
        errors.push("Missing required field: LastName".to_string());
    }
}

fn require_reference(record: &SObject, field: &str, errors: &mut Vec<String>) {
    let id = safe_string(record.get(field));
    if id.is_empty() {
        errors.push(format!("Missing required field: {field}"));
    } else if !is_valid_salesforce_id(&id) {
        errors.push(format!("Invalid Salesforce ID format for {field}"));
    }
}

pub fn validate_organization(record: &SObject) -> Vec<String> {
    let mut errors = Vec::new();
    require_name(record, &mut errors);
    errors
}

pub fn validate_district(record: &SObject) -> Vec<String> {
    let mut errors = Vec::new();
    require_name(record, &mut errors);
    errors
}

pub fn validate_school(record: &SObject) -> Vec<String> {
    let mut errors = Vec::new();
    require_name(record, &mut errors);
    errors
}

pub fn validate_class(record: &SObject) -> Vec<String> {
    let mut errors = Vec::new();
    require_name(record, &mut errors);
    require_reference(record, "School__c", &mut errors);
    if !safe_uint_parses(record.get("Year__c")) {
        errors.push("Missing or non-numeric field: Year__c".to_string());
    }
    errors
}

pub fn validate_teacher(record: &SObject) -> Vec<String> {
    let mut errors = Vec::new();
    require_person_names(record, &mut errors);
    errors
}

pub fn validate_student(record: &SObject) -> Vec<String> {
    let mut errors = Vec::new();
    require_person_names(record, &mut errors);
    errors
}

pub fn validate_volunteer(record: &SObject) -> Vec<String> {
    let mut errors = Vec::new();
    require_person_names(record, &mut errors);
    errors
}

pub fn validate_affiliation(record: &SObject) -> Vec<String> {
    let mut errors = Vec::new();
    require_reference(record, "npe5__Organization__c", &mut errors);
    require_reference(record, "npe5__Contact__c", &mut errors);
    errors
}

pub fn validate_event(record: &SObject) -> Vec<String> {
    let mut errors = Vec::new();
    require_name(record, &mut errors);
    errors
}

pub fn validate_pathway(record: &SObject) -> Vec<String> {
    let mut errors = Vec::new();
    require_name(record, &mut errors);
    errors
}

pub fn validate_activity(record: &SObject) -> Vec<String> {
    let mut errors = Vec::new();
    require_reference(record, "WhoId", &mut errors);
    errors
}
