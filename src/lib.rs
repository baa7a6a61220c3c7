pub mod coerce;
pub mod db;
pub mod importer;
pub mod ipc;
pub mod processors;
pub mod retry;
pub mod salesforce;
pub mod sync;
pub mod validate;

pub use importer::{ImportConfig, ImportResult, Outcome, SalesforceImporter};
pub use salesforce::{CrmConfig, RestClient, SObject, SalesforceClient, SalesforceError};
