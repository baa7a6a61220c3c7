use std::cell::RefCell;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coerce::safe_string;

/// A loosely-typed CRM row: field name -> string/number/boolean/null.
/// All field access goes through the coercion helpers so missing fields
/// degrade uniformly instead of panicking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SObject(pub serde_json::Map<String, Value>);

impl SObject {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// The record's Salesforce ID ("" when absent).
    pub fn id(&self) -> String {
        safe_string(self.get("Id"))
    }

    pub fn from_value(v: Value) -> Option<SObject> {
        match v {
            Value::Object(mut map) => {
                // The REST API decorates every record with an "attributes"
                // envelope; it is not a data field.
                map.remove("attributes");
                Some(SObject(map))
            }
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SalesforceError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("query failed: {0}")]
    Query(String),
}

/// Connection settings sourced from the environment. The security token is
/// optional (orgs with trusted IP ranges don't issue one).
#[derive(Debug, Clone)]
pub struct CrmConfig {
    pub login_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub security_token: String,
    pub api_version: String,
    pub timeout: Duration,
}

impl CrmConfig {
    /// Reads VMS_SF_* variables. Returns the list of missing required
    /// variables on failure so callers can fail fast with a clear message.
    pub fn from_env() -> Result<CrmConfig, Vec<String>> {
        let mut missing: Vec<String> = Vec::new();
        let mut var = |name: &str| match std::env::var(name) {
            Ok(v) if !v.trim().is_empty() => v,
            _ => {
                missing.push(name.to_string());
                String::new()
            }
        };

        let client_id = var("VMS_SF_CLIENT_ID");
        let client_secret = var("VMS_SF_CLIENT_SECRET");
        let username = var("VMS_SF_USERNAME");
        let password = var("VMS_SF_PASSWORD");

        if !missing.is_empty() {
            return Err(missing);
        }

        Ok(CrmConfig {
            login_url: std::env::var("VMS_SF_LOGIN_URL")
                .unwrap_or_else(|_| "https://login.salesforce.com".to_string()),
            client_id,
            client_secret,
            username,
            password,
            security_token: std::env::var("VMS_SF_SECURITY_TOKEN").unwrap_or_default(),
            api_version: std::env::var("VMS_SF_API_VERSION")
                .unwrap_or_else(|_| "v59.0".to_string()),
            timeout: Duration::from_secs(
                std::env::var("VMS_SF_TIMEOUT_SECONDS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(120),
            ),
        })
    }
}

/// The seam the importer and sync workflows depend on. Pagination and auth
/// live behind this trait; callers only see whole result sets or pages.
pub trait SalesforceClient {
    /// Authenticate (or re-authenticate). Idempotent when already connected.
    fn connect(&self) -> Result<(), SalesforceError>;

    /// Run a SOQL query and return every matching record, following
    /// server-side pagination to completion.
    fn query_all(&self, soql: &str) -> Result<Vec<SObject>, SalesforceError>;

    /// Total record count for a `SELECT COUNT() FROM ...` query.
    fn query_count(&self, soql: &str) -> Result<usize, SalesforceError>;

    /// One offset/limit page of a query. Used by the chunked workflows for
    /// the 10^4..10^5-row entities.
    fn query_chunk(
        &self,
        soql: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SObject>, SalesforceError> {
        self.query_all(&format!("{soql} LIMIT {limit} OFFSET {offset}"))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(rename = "totalSize")]
    total_size: usize,
    done: bool,
    #[serde(default)]
    records: Vec<Value>,
    #[serde(rename = "nextRecordsUrl")]
    next_records_url: Option<String>,
}

#[derive(Debug, Clone)]
struct Session {
    access_token: String,
    instance_url: String,
}

/// REST client over the Salesforce query API (OAuth username-password flow).
pub struct RestClient {
    config: CrmConfig,
    http: reqwest::blocking::Client,
    session: RefCell<Option<Session>>,
}

impl RestClient {
    pub fn new(config: CrmConfig) -> anyhow::Result<RestClient> {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(RestClient {
            config,
            http,
            session: RefCell::new(None),
        })
    }

    fn login(&self) -> Result<Session, SalesforceError> {
        let url = format!("{}/services/oauth2/token", self.config.login_url);
        let password = format!("{}{}", self.config.password, self.config.security_token);
        let resp = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "password"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("username", self.config.username.as_str()),
                ("password", password.as_str()),
            ])
            .send()
            .map_err(map_transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(SalesforceError::Auth(format!("{status}: {body}")));
        }

        let token: TokenResponse = resp
            .json()
            .map_err(|e| SalesforceError::Auth(format!("bad token response: {e}")))?;
        Ok(Session {
            access_token: token.access_token,
            instance_url: token.instance_url,
        })
    }

    fn session(&self) -> Result<Session, SalesforceError> {
        if let Some(s) = self.session.borrow().as_ref() {
            return Ok(s.clone());
        }
        let s = self.login()?;
        *self.session.borrow_mut() = Some(s.clone());
        Ok(s)
    }

    fn get_json(&self, url: &str) -> Result<QueryResponse, SalesforceError> {
        let session = self.session()?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(&session.access_token)
            .send()
            .map_err(map_transport_error)?;

        let status = resp.status();
        if status.as_u16() == 401 {
            // Expired session. Drop it so the next attempt re-authenticates.
            *self.session.borrow_mut() = None;
            return Err(SalesforceError::Auth(format!("{status}")));
        }
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            if body.contains("REQUEST_LIMIT_EXCEEDED") {
                return Err(SalesforceError::RateLimit(body));
            }
            return Err(SalesforceError::Query(format!("{status}: {body}")));
        }

        resp.json()
            .map_err(|e| SalesforceError::Query(format!("bad query response: {e}")))
    }

    fn query_url(&self, instance_url: &str, soql: &str) -> String {
        format!(
            "{}/services/data/{}/query?q={}",
            instance_url,
            self.config.api_version,
            urlencode(soql)
        )
    }
}

impl SalesforceClient for RestClient {
    fn connect(&self) -> Result<(), SalesforceError> {
        self.session().map(|_| ())
    }

    fn query_all(&self, soql: &str) -> Result<Vec<SObject>, SalesforceError> {
        let session = self.session()?;
        let mut url = self.query_url(&session.instance_url, soql);
        let mut records: Vec<SObject> = Vec::new();

        loop {
            let page = self.get_json(&url)?;
            records.extend(page.records.into_iter().filter_map(SObject::from_value));
            if page.done {
                break;
            }
            let Some(next) = page.next_records_url else {
                break;
            };
            url = format!("{}{}", session.instance_url, next);
        }

        Ok(records)
    }

    fn query_count(&self, soql: &str) -> Result<usize, SalesforceError> {
        let session = self.session()?;
        let url = self.query_url(&session.instance_url, soql);
        Ok(self.get_json(&url)?.total_size)
    }
}

fn map_transport_error(e: reqwest::Error) -> SalesforceError {
    if e.is_timeout() {
        SalesforceError::Timeout(e.to_string())
    } else {
        SalesforceError::Network(e.to_string())
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
