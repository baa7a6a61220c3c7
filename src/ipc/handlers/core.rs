use std::path::PathBuf;

use serde_json::json;

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::salesforce::{CrmConfig, RestClient};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "crmConnected": state.client.is_some(),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

/// Builds the REST client from VMS_SF_* environment variables. Missing
/// variables fail the whole request up front instead of surfacing later as
/// a mid-sync auth error.
fn handle_crm_connect(state: &mut AppState, req: &Request) -> serde_json::Value {
    let config = match CrmConfig::from_env() {
        Ok(c) => c,
        Err(missing) => {
            return err(
                &req.id,
                "bad_config",
                format!("missing environment variables: {}", missing.join(", ")),
                Some(json!({ "missing": missing })),
            );
        }
    };

    let login_url = config.login_url.clone();
    match RestClient::new(config) {
        Ok(client) => {
            state.client = Some(Box::new(client));
            ok(&req.id, json!({ "loginUrl": login_url }))
        }
        Err(e) => err(&req.id, "crm_client_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "crm.connect" => Some(handle_crm_connect(state, req)),
        _ => None,
    }
}
