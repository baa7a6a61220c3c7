use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::salesforce::SalesforceClient;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Mutable per-process state: the selected workspace, its database, and the
/// CRM client once `crm.connect` has run.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub client: Option<Box<dyn SalesforceClient>>,
}

impl AppState {
    pub fn new() -> AppState {
        AppState {
            workspace: None,
            db: None,
            client: None,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        AppState::new()
    }
}
