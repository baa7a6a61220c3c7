use rusqlite::Connection;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::salesforce::SalesforceClient;
use crate::sync;

/// Every sync method needs a selected workspace and a connected CRM client.
fn with_sync_context(
    state: &AppState,
    req: &Request,
    run: impl FnOnce(&dyn SalesforceClient, &Connection) -> serde_json::Value,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "no workspace selected", None);
    };
    let Some(client) = state.client.as_deref() else {
        return err(&req.id, "no_crm", "crm.connect has not been called", None);
    };
    ok(&req.id, run(client, conn))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run = match req.method.as_str() {
        "sync.districts" => sync::district_sync,
        "sync.schools" => sync::school_sync,
        "sync.organizations" => sync::organization_sync,
        "sync.classes" => sync::class_sync,
        "sync.teachers" => sync::teacher_sync,
        "sync.students" => sync::student_sync,
        "sync.volunteers" => sync::volunteer_sync,
        "sync.affiliations" => sync::affiliation_sync,
        "sync.events" => sync::event_sync,
        "sync.pathways" => sync::pathway_sync,
        "sync.history" => sync::history_sync,
        "sync.full" => sync::full_salesforce_sync,
        _ => return None,
    };
    Some(with_sync_context(state, req, run))
}
