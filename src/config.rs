use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use directories::ProjectDirs;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::domain::CollectionId;
use crate::error::LabcasError;
use crate::naming::{LabelRules, NamingRules, default_case_patterns, default_control_patterns};

pub const CONFIG_FILE: &str = "labcas.json";
pub const USERNAME_VAR: &str = "LABCAS_USERNAME";
pub const PASSWORD_VAR: &str = "LABCAS_PASSWORD";

pub const DEFAULT_BASE_URL: &str = "https://edrn-labcas.jpl.nasa.gov";
pub const DEFAULT_COLLECTION: &str = "Automated_Quantitative_Measures_of_Breast_Density_Data";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub collection_id: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub token_max_age_secs: Option<u64>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub page_delay_ms: Option<u64>,
    #[serde(default)]
    pub paths: PathsEntry,
    #[serde(default)]
    pub mini_rows: Option<usize>,
    #[serde(default)]
    pub naming: NamingEntry,
    #[serde(default)]
    pub dataset: DatasetEntry,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PathsEntry {
    #[serde(default)]
    pub harvest_dir: Option<String>,
    #[serde(default)]
    pub manifest: Option<String>,
    #[serde(default)]
    pub mini_manifest: Option<String>,
    #[serde(default)]
    pub diagnostics: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mini_description: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct NamingEntry {
    #[serde(default)]
    pub proc_markers: Option<Vec<String>>,
    #[serde(default)]
    pub mask_markers: Option<Vec<String>>,
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
    #[serde(default)]
    pub case_patterns: Option<Vec<String>>,
    #[serde(default)]
    pub control_patterns: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DatasetEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cite_as: Option<String>,
    #[serde(default)]
    pub date_published: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub base_url: Url,
    pub timeout: Duration,
    pub token_max_age: Duration,
    pub page_size: usize,
    pub page_delay: Duration,
}

impl CatalogSettings {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: Duration::from_secs(60),
            token_max_age: Duration::from_secs(1800),
            page_size: 1000,
            page_delay: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelinePaths {
    pub harvest_dir: Utf8PathBuf,
    pub manifest: Utf8PathBuf,
    pub mini_manifest: Utf8PathBuf,
    pub diagnostics: Utf8PathBuf,
    pub description: Utf8PathBuf,
    pub mini_description: Utf8PathBuf,
}

/// Collection-level provenance written into the description document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetMetadata {
    pub name: String,
    pub description: String,
    pub cite_as: String,
    pub date_published: NaiveDate,
    pub license: String,
    pub url: String,
    pub version: String,
}

impl DatasetMetadata {
    /// Variant describing the mini manifest.
    pub fn mini(&self, rows: usize) -> Self {
        Self {
            name: format!("{}_Mini", self.name),
            description: format!(
                "Mini subset ({rows} pairs) of: {} Used for rapid prototyping and pipeline testing.",
                self.description
            ),
            version: format!("{}-mini", self.version),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub collection_id: CollectionId,
    pub catalog: CatalogSettings,
    pub paths: PipelinePaths,
    pub mini_rows: usize,
    pub naming: NamingRules,
    pub labels: LabelRules,
    pub dataset: DatasetMetadata,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit path, else `labcas.json` in the current directory, else the
    /// platform config directory, else built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, LabcasError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover(),
        };

        let config = match config_path {
            Some(config_path) => {
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| LabcasError::ConfigRead(config_path.clone()))?;
                serde_json::from_str(&content)
                    .map_err(|err| LabcasError::ConfigParse(err.to_string()))?
            }
            None => Config::default(),
        };

        Self::resolve_config(config)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("gov", "edrn", "labcas-croissant")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
            .filter(|path| path.exists())
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, LabcasError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(LabcasError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let collection_id: CollectionId = config
            .collection_id
            .as_deref()
            .unwrap_or(DEFAULT_COLLECTION)
            .parse()?;

        let raw_url = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(raw_url.trim_end_matches('/'))
            .map_err(|err| LabcasError::InvalidConfig(format!("base_url {raw_url}: {err}")))?;
        let defaults = CatalogSettings::new(base_url.clone());
        let page_size = config.page_size.unwrap_or(defaults.page_size);
        if page_size == 0 {
            return Err(LabcasError::InvalidConfig(
                "page_size must be positive".to_string(),
            ));
        }
        let catalog = CatalogSettings {
            base_url,
            timeout: config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            token_max_age: config
                .token_max_age_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.token_max_age),
            page_size,
            page_delay: config
                .page_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.page_delay),
        };

        let paths = config.paths;
        let path_or = |value: Option<String>, default: &str| {
            Utf8PathBuf::from(value.unwrap_or_else(|| default.to_string()))
        };
        let paths = PipelinePaths {
            harvest_dir: path_or(paths.harvest_dir, "harvested_metadata"),
            manifest: path_or(paths.manifest, "manifest.csv"),
            mini_manifest: path_or(paths.mini_manifest, "manifest_mini.csv"),
            diagnostics: path_or(paths.diagnostics, "manifest_diagnostics.json"),
            description: path_or(paths.description, "output/croissant.json"),
            mini_description: path_or(paths.mini_description, "output/croissant_mini.json"),
        };

        let naming = config.naming;
        let rules = NamingRules::new(
            naming.proc_markers.unwrap_or_else(|| vec!["PROC".to_string()]),
            naming.mask_markers.unwrap_or_else(|| vec!["MASK".to_string()]),
            naming.extensions.unwrap_or_else(|| vec!["dcm".to_string()]),
        )?;
        let labels = LabelRules::new(
            &naming.case_patterns.unwrap_or_else(default_case_patterns),
            &naming.control_patterns.unwrap_or_else(default_control_patterns),
        )?;

        let dataset = resolve_dataset(config.dataset, &collection_id, &catalog.base_url)?;

        Ok(ResolvedConfig {
            schema_version,
            collection_id,
            catalog,
            paths,
            mini_rows: config.mini_rows.unwrap_or(5),
            naming: rules,
            labels,
            dataset,
        })
    }
}

fn resolve_dataset(
    entry: DatasetEntry,
    collection_id: &CollectionId,
    base_url: &Url,
) -> Result<DatasetMetadata, LabcasError> {
    let date_raw = entry.date_published.unwrap_or_else(|| "2025-01-22".to_string());
    let date_published = NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d").map_err(|err| {
        LabcasError::InvalidConfig(format!("dataset.date_published {date_raw}: {err}"))
    })?;
    let url = entry.url.unwrap_or_else(|| {
        format!(
            "{}/collections/{}",
            base_url.as_str().trim_end_matches('/'),
            collection_id
        )
    });
    Url::parse(&url)
        .map_err(|err| LabcasError::InvalidConfig(format!("dataset.url {url}: {err}")))?;

    Ok(DatasetMetadata {
        name: entry
            .name
            .unwrap_or_else(|| "EDRN_Breast_Density_Collection_2".to_string()),
        description: entry.description.unwrap_or_else(|| {
            "Automated Quantitative Measures of Breast Density Data - processed mammograms and \
             segmentation masks streamed from LabCAS via authenticated URLs."
                .to_string()
        }),
        cite_as: entry
            .cite_as
            .unwrap_or_else(|| "EDRN LabCAS Breast Density Collection".to_string()),
        date_published,
        license: entry
            .license
            .unwrap_or_else(|| "https://creativecommons.org/licenses/by/4.0/".to_string()),
        url,
        version: entry.version.unwrap_or_else(|| "1.0.0".to_string()),
    })
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn from_env() -> Result<Self, LabcasError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, LabcasError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| LabcasError::MissingCredentials(key.to_string()))
        };
        Ok(Self {
            username: read(USERNAME_VAR)?,
            password: read(PASSWORD_VAR)?,
        })
    }
}
