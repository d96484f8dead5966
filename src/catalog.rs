use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::config::{CatalogSettings, Credentials};
use crate::domain::{Collection, CollectionId, first_string};
use crate::error::LabcasError;

pub const AUTH_PATH: &str = "/data-access-api/auth";
pub const COLLECTIONS_PATH: &str = "/data-access-api/collections/select";
pub const DATASETS_PATH: &str = "/data-access-api/datasets/select";
pub const FILES_PATH: &str = "/data-access-api/files/select";
pub const DOWNLOAD_PATH: &str = "/data-access-api/download";

/// One page of a Solr-style `select` response.
#[derive(Debug, Clone, PartialEq)]
pub struct SolrPage {
    pub docs: Vec<Value>,
    pub num_found: u64,
}

impl SolrPage {
    pub fn from_value(mut body: Value) -> Result<Self, LabcasError> {
        let response = body
            .get_mut("response")
            .ok_or_else(|| LabcasError::Decode("missing `response` object".to_string()))?;
        let docs = match response.get_mut("docs").map(Value::take) {
            Some(Value::Array(docs)) => docs,
            _ => return Err(LabcasError::Decode("missing `response.docs` array".to_string())),
        };
        let num_found = response
            .get("numFound")
            .and_then(Value::as_u64)
            .unwrap_or(docs.len() as u64);
        Ok(Self { docs, num_found })
    }
}

/// Authenticated access to the LabCAS data-access API.
///
/// Implementors provide the raw transport (`authenticate`, `fetch`,
/// `download`); the catalog listings are built on top of `fetch`.
pub trait CatalogClient: Send + Sync {
    fn authenticate(&self, credentials: &Credentials) -> Result<(), LabcasError>;
    fn fetch(&self, path: &str, params: &[(&str, String)]) -> Result<Value, LabcasError>;
    fn download(&self, url: &str, destination: &Path) -> Result<u64, LabcasError>;
    fn resource_url(&self, file_id: &str) -> String;

    fn page_size(&self) -> usize {
        1000
    }

    fn page_delay(&self) -> Duration {
        Duration::ZERO
    }

    fn list_collections(&self) -> Result<Vec<Value>, LabcasError> {
        select_all(self, COLLECTIONS_PATH, "*:*".to_string(), 100)
    }

    fn find_collection(&self, id: &CollectionId) -> Result<Collection, LabcasError> {
        self.list_collections()?
            .iter()
            .find(|doc| first_string(doc, &["id"]).as_deref() == Some(id.as_str()))
            .and_then(Collection::from_doc)
            .ok_or_else(|| LabcasError::CollectionNotFound(id.to_string()))
    }

    fn list_datasets(&self, collection_id: &CollectionId) -> Result<Vec<Value>, LabcasError> {
        let query = format!("CollectionId:{}", solr_quote(collection_id.as_str()));
        select_all(self, DATASETS_PATH, query, 10_000)
    }

    /// All file documents of one dataset.
    fn list_resources(&self, dataset_id: &str) -> Result<Vec<Value>, LabcasError> {
        let query = format!("DatasetId:{}", solr_quote(dataset_id));
        select_all(self, FILES_PATH, query, self.page_size())
    }
}

/// Pages through a `select` route until `numFound` is reached or a page
/// comes back empty; the server may return fewer rows than asked for.
fn select_all<C: CatalogClient + ?Sized>(
    client: &C,
    path: &str,
    query: String,
    rows: usize,
) -> Result<Vec<Value>, LabcasError> {
    let rows = rows.max(1);
    let mut docs = Vec::new();
    loop {
        let body = client.fetch(path, &select_params(query.clone(), rows, docs.len()))?;
        let page = SolrPage::from_value(body)?;
        if page.docs.is_empty() {
            break;
        }
        docs.extend(page.docs);
        tracing::debug!(route = path, query = %query, retrieved = docs.len(), total = page.num_found, "select page");
        if docs.len() as u64 >= page.num_found {
            break;
        }
        let delay = client.page_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
    Ok(docs)
}

fn select_params(query: String, rows: usize, start: usize) -> Vec<(&'static str, String)> {
    vec![
        ("q", query),
        ("wt", "json".to_string()),
        ("rows", rows.to_string()),
        ("start", start.to_string()),
    ]
}

pub fn solr_quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Maps a non-success HTTP status to the catalog error taxonomy.
pub fn status_error(status: u16, message: String, route: &str) -> LabcasError {
    match status {
        401 | 403 => LabcasError::Authentication(format!("{route} rejected the session ({status})")),
        404 => LabcasError::NotFound(route.to_string()),
        500..=599 => LabcasError::Server { status, message },
        _ => LabcasError::HttpStatus { status, message },
    }
}

#[derive(Default)]
struct Session {
    token: Option<String>,
    issued_at: Option<Instant>,
    credentials: Option<Credentials>,
}

pub struct LabcasHttpClient {
    client: Client,
    settings: CatalogSettings,
    session: Mutex<Session>,
}

impl LabcasHttpClient {
    pub fn new(settings: CatalogSettings) -> Result<Self, LabcasError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("labcas-croissant/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| LabcasError::InvalidConfig(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| LabcasError::TransientNetwork(err.to_string()))?;
        Ok(Self {
            client,
            settings,
            session: Mutex::new(Session::default()),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}{}",
            self.settings.base_url.as_str().trim_end_matches('/'),
            path
        )
    }

    fn session(&self) -> Result<MutexGuard<'_, Session>, LabcasError> {
        self.session
            .lock()
            .map_err(|_| LabcasError::Authentication("session state poisoned".to_string()))
    }

    fn request_token(&self, credentials: &Credentials) -> Result<String, LabcasError> {
        let url = self.endpoint(AUTH_PATH);
        let response = self
            .client
            .post(&url)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .send()
            .map_err(transport_error)?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LabcasError::Authentication(format!(
                "invalid credentials for user {}",
                credentials.username
            )));
        }
        let response = Self::handle_status(response, AUTH_PATH)?;
        let token = response
            .text()
            .map_err(transport_error)?
            .trim()
            .to_string();
        if token.is_empty() {
            return Err(LabcasError::Authentication(
                "auth endpoint returned an empty token".to_string(),
            ));
        }
        Ok(token)
    }

    fn store_token(&self, token: &str, credentials: Option<Credentials>) -> Result<(), LabcasError> {
        let mut session = self.session()?;
        session.token = Some(token.to_string());
        session.issued_at = Some(Instant::now());
        if credentials.is_some() {
            session.credentials = credentials;
        }
        Ok(())
    }

    fn refresh(&self) -> Result<String, LabcasError> {
        let credentials = self
            .session()?
            .credentials
            .clone()
            .ok_or_else(|| LabcasError::Authentication("no session established".to_string()))?;
        tracing::info!("refreshing catalog token");
        let token = self.request_token(&credentials)?;
        self.store_token(&token, None)?;
        Ok(token)
    }

    fn bearer(&self) -> Result<String, LabcasError> {
        let (token, expired) = {
            let session = self.session()?;
            let token = session
                .token
                .clone()
                .ok_or_else(|| LabcasError::Authentication("no session established".to_string()))?;
            let expired = session
                .issued_at
                .map(|issued| issued.elapsed() > self.settings.token_max_age)
                .unwrap_or(true);
            (token, expired)
        };
        if expired { self.refresh() } else { Ok(token) }
    }

    /// Sends with the current token; a 401 re-authenticates once and resends.
    fn send_authorized<F>(&self, make_req: F) -> Result<Response, LabcasError>
    where
        F: Fn(&str) -> reqwest::blocking::RequestBuilder,
    {
        let token = self.bearer()?;
        let response = make_req(&token).send().map_err(transport_error)?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        tracing::info!("catalog rejected token, re-authenticating");
        let token = self.refresh()?;
        make_req(&token).send().map_err(transport_error)
    }

    fn handle_status(response: Response, route: &str) -> Result<Response, LabcasError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "catalog request failed".to_string());
        Err(status_error(status, message, route))
    }
}

impl CatalogClient for LabcasHttpClient {
    fn authenticate(&self, credentials: &Credentials) -> Result<(), LabcasError> {
        let token = self.request_token(credentials).map_err(|err| match err {
            LabcasError::TransientNetwork(message) => {
                LabcasError::Authentication(format!("catalog unreachable: {message}"))
            }
            other => other,
        })?;
        self.store_token(&token, Some(credentials.clone()))?;
        tracing::info!(user = %credentials.username, "authenticated with catalog");
        Ok(())
    }

    fn fetch(&self, path: &str, params: &[(&str, String)]) -> Result<Value, LabcasError> {
        if !path.starts_with('/') {
            return Err(LabcasError::NotFound(format!("not a catalog route: {path}")));
        }
        let url = self.endpoint(path);
        let response = self.send_authorized(|token| {
            self.client.get(&url).bearer_auth(token).query(params)
        })?;
        let response = Self::handle_status(response, path)?;
        response.json::<Value>().map_err(|err| {
            if err.is_timeout() {
                LabcasError::TransientNetwork(err.to_string())
            } else {
                LabcasError::Decode(err.to_string())
            }
        })
    }

    fn download(&self, url: &str, destination: &Path) -> Result<u64, LabcasError> {
        let response = self.send_authorized(|token| self.client.get(url).bearer_auth(token))?;
        let mut response = Self::handle_status(response, url)?;
        let parent = destination
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|err| LabcasError::Filesystem(err.to_string()))?;
        let mut temp =
            NamedTempFile::new_in(parent).map_err(|err| LabcasError::Filesystem(err.to_string()))?;
        let written = io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| LabcasError::TransientNetwork(err.to_string()))?;
        temp.persist(destination)
            .map_err(|err| LabcasError::Filesystem(err.to_string()))?;
        Ok(written)
    }

    fn resource_url(&self, file_id: &str) -> String {
        let mut url = self.settings.base_url.clone();
        let path = format!("{}{DOWNLOAD_PATH}", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut().clear().append_pair("id", file_id);
        url.to_string()
    }

    fn page_size(&self) -> usize {
        self.settings.page_size
    }

    fn page_delay(&self) -> Duration {
        self.settings.page_delay
    }
}

fn transport_error(err: reqwest::Error) -> LabcasError {
    LabcasError::TransientNetwork(err.to_string())
}
