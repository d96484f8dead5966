use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::catalog::CatalogClient;
use crate::config::{Credentials, ResolvedConfig};
use crate::describe::{DescriptionSummary, generate, summarize};
use crate::error::LabcasError;
use crate::harvest::{HarvestReport, Harvester};
use crate::loader::{Description, FetchReport, Record, fetch_pairs};
use crate::manifest::{ManifestDiagnostics, build_manifest, read_manifest, write_manifest};
use crate::store::{SnapshotStore, write_json_atomic};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Full,
    Mini,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestResult {
    pub manifest_path: String,
    pub mini_manifest_path: String,
    pub diagnostics_path: String,
    pub diagnostics: ManifestDiagnostics,
}

#[derive(Debug, Clone, Serialize)]
pub struct DescribeResult {
    pub description_path: String,
    pub manifest_path: String,
    pub summary: DescriptionSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectResult {
    pub description_path: String,
    pub name: String,
    pub record_sets: Vec<String>,
    pub records: usize,
    pub first_record: Option<Record>,
}

/// Pipeline stages over one resolved configuration and catalog client.
pub struct App<C: CatalogClient> {
    config: ResolvedConfig,
    client: C,
}

impl<C: CatalogClient> App<C> {
    pub fn new(config: ResolvedConfig, client: C) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Authenticates, then harvests. Nothing is written if authentication fails.
    pub fn harvest(
        &self,
        credentials: &Credentials,
        sink: &dyn ProgressSink,
    ) -> Result<HarvestReport, LabcasError> {
        sink.event(ProgressEvent {
            message: format!("phase=Auth; signing in as {}", credentials.username),
            elapsed: None,
        });
        self.client.authenticate(credentials)?;
        let store = SnapshotStore::new(self.config.paths.harvest_dir.clone());
        Harvester::new(&self.client, store).harvest(&self.config.collection_id, sink)
    }

    pub fn build_manifest(&self, sink: &dyn ProgressSink) -> Result<ManifestResult, LabcasError> {
        let paths = &self.config.paths;
        let store = SnapshotStore::new(paths.harvest_dir.clone());
        sink.event(ProgressEvent {
            message: format!("phase=Manifest; reading {}", store.resources_path()),
            elapsed: None,
        });
        let resources = store.read_resources()?;
        let build = build_manifest(&resources, &self.config.naming, &self.config.labels);

        write_manifest(&paths.manifest, &build.rows)?;
        write_manifest(&paths.mini_manifest, build.mini(self.config.mini_rows))?;
        let diagnostics = build.diagnostics(self.config.mini_rows);
        write_json_atomic(&paths.diagnostics, &diagnostics)?;
        tracing::info!(
            pairs = diagnostics.pairs,
            anomalies = diagnostics.anomalies.len(),
            unrecognized = diagnostics.unrecognized.len(),
            "manifest written"
        );

        Ok(ManifestResult {
            manifest_path: paths.manifest.to_string(),
            mini_manifest_path: paths.mini_manifest.to_string(),
            diagnostics_path: paths.diagnostics.to_string(),
            diagnostics,
        })
    }

    pub fn describe(
        &self,
        variant: Variant,
        sink: &dyn ProgressSink,
    ) -> Result<DescribeResult, LabcasError> {
        let (manifest_path, description_path) = self.variant_paths(variant);
        sink.event(ProgressEvent {
            message: format!("phase=Describe; reading {manifest_path}"),
            elapsed: None,
        });
        let metadata = match variant {
            Variant::Full => self.config.dataset.clone(),
            Variant::Mini => self.config.dataset.mini(read_manifest(manifest_path)?.len()),
        };
        let document = generate(manifest_path, description_path, &metadata)?;

        write_json_atomic(description_path, &document)?;

        Ok(DescribeResult {
            description_path: description_path.to_string(),
            manifest_path: manifest_path.to_string(),
            summary: summarize(&document),
        })
    }

    pub fn inspect(
        &self,
        variant: Variant,
        sink: &dyn ProgressSink,
    ) -> Result<InspectResult, LabcasError> {
        let (_, description_path) = self.variant_paths(variant);
        sink.event(ProgressEvent {
            message: format!("phase=Inspect; loading {description_path}"),
            elapsed: None,
        });
        let description = Description::load(description_path)?;
        let record_sets: Vec<String> = description
            .record_set_ids()
            .into_iter()
            .map(str::to_string)
            .collect();
        let records = match record_sets.first() {
            Some(id) => description.records(id)?,
            None => Vec::new(),
        };
        Ok(InspectResult {
            description_path: description_path.to_string(),
            name: description.name().to_string(),
            record_sets,
            records: records.len(),
            first_record: records.into_iter().next(),
        })
    }

    pub fn fetch(
        &self,
        credentials: &Credentials,
        variant: Variant,
        limit: Option<usize>,
        out_dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<FetchReport, LabcasError> {
        let (_, description_path) = self.variant_paths(variant);
        let description = Description::load(description_path)?;
        let rows = description.pairs()?;
        self.client.authenticate(credentials)?;
        Ok(fetch_pairs(&self.client, &rows, limit, out_dir, sink))
    }

    fn variant_paths(&self, variant: Variant) -> (&Utf8PathBuf, &Utf8PathBuf) {
        let paths = &self.config.paths;
        match variant {
            Variant::Full => (&paths.manifest, &paths.description),
            Variant::Mini => (&paths.mini_manifest, &paths.mini_description),
        }
    }
}
