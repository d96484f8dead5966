use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::catalog::CatalogClient;
use crate::domain::{CatalogTree, CollectionId, Dataset, DatasetResources, Resource, first_string};
use crate::error::LabcasError;
use crate::store::{ResourcesByDataset, SnapshotStore};

/// Leaf dataset names counted in the harvest summary.
const LEAF_KINDS: [&str; 4] = ["RAW", "PROC", "MASK", "Documentation"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetFailure {
    pub dataset_id: String,
    pub error: String,
    /// A rerun may succeed for this dataset.
    pub transient: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub collection_id: String,
    pub collection_name: Option<String>,
    pub harvested_at: String,
    pub total_datasets: usize,
    pub leaf_datasets: usize,
    pub harvested_datasets: usize,
    pub total_files: usize,
    pub leaf_kinds: BTreeMap<String, usize>,
    pub skipped_documents: usize,
    pub unreachable_datasets: Vec<String>,
    pub failures: Vec<DatasetFailure>,
    pub snapshot_dir: String,
}

impl HarvestReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Harvester<'a, C: CatalogClient> {
    client: &'a C,
    store: SnapshotStore,
}

impl<'a, C: CatalogClient> Harvester<'a, C> {
    pub fn new(client: &'a C, store: SnapshotStore) -> Self {
        Self { client, store }
    }

    /// Walks collection → datasets → leaves → files and overwrites the four
    /// snapshots. The collection and dataset listings are fetched before any
    /// file is touched; a failing leaf only lands in the report.
    pub fn harvest(
        &self,
        collection_id: &CollectionId,
        sink: &dyn ProgressSink,
    ) -> Result<HarvestReport, LabcasError> {
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Collection; resolving {collection_id}"),
            elapsed: None,
        });
        let collection = self.client.find_collection(collection_id)?;
        tracing::info!(collection = %collection.id, name = ?collection.name, "found collection");

        sink.event(ProgressEvent {
            message: "phase=Datasets; listing datasets".to_string(),
            elapsed: Some(started.elapsed()),
        });
        let docs = self.client.list_datasets(collection_id)?;
        let mut datasets = Vec::with_capacity(docs.len());
        let mut skipped_documents = 0usize;
        for doc in &docs {
            match Dataset::from_doc(doc) {
                Some(dataset) => datasets.push(dataset),
                None => {
                    skipped_documents += 1;
                    tracing::warn!("dataset document without id skipped");
                }
            }
        }

        let tree = CatalogTree::build(collection, datasets);
        let unreachable_datasets: Vec<String> = tree
            .unreachable()
            .iter()
            .map(|dataset| dataset.id.clone())
            .collect();
        for id in &unreachable_datasets {
            tracing::warn!(dataset = %id, "dataset unreachable from any root (parent cycle)");
        }
        let leaves = tree.leaves();
        tracing::info!(
            total = tree.datasets().len(),
            leaves = leaves.len(),
            "analyzed dataset hierarchy"
        );

        self.store.write_collection(tree.collection())?;
        self.store.write_datasets(tree.datasets())?;
        self.store.write_leaf_datasets(&leaves)?;

        let mut resources = ResourcesByDataset::new();
        let mut failures = Vec::new();
        for (idx, leaf) in leaves.iter().enumerate() {
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Files; [{}/{}] {}",
                    idx + 1,
                    leaves.len(),
                    leaf.id
                ),
                elapsed: Some(started.elapsed()),
            });
            match self.harvest_dataset(leaf) {
                Ok(entry) => {
                    tracing::info!(dataset = %leaf.id, files = entry.file_count, "harvested files");
                    resources.insert(leaf.id.clone(), entry);
                }
                Err(err) => {
                    tracing::warn!(dataset = %leaf.id, error = %err, "file harvest failed, continuing");
                    failures.push(DatasetFailure {
                        dataset_id: leaf.id.clone(),
                        error: err.to_string(),
                        transient: err.is_transient(),
                    });
                }
            }
        }
        self.store.write_resources(&resources)?;

        let mut leaf_kinds: BTreeMap<String, usize> =
            LEAF_KINDS.iter().map(|kind| (kind.to_string(), 0)).collect();
        for leaf in &leaves {
            if let Some(count) = leaf_kinds.get_mut(leaf.name.as_str()) {
                *count += 1;
            }
        }

        Ok(HarvestReport {
            collection_id: tree.collection().id.clone(),
            collection_name: tree.collection().name.clone(),
            harvested_at: chrono::Utc::now().to_rfc3339(),
            total_datasets: tree.datasets().len(),
            leaf_datasets: leaves.len(),
            harvested_datasets: resources.len(),
            total_files: resources.values().map(|entry| entry.file_count).sum(),
            leaf_kinds,
            skipped_documents,
            unreachable_datasets,
            failures,
            snapshot_dir: self.store.root().to_string(),
        })
    }

    fn harvest_dataset(&self, dataset: &Dataset) -> Result<DatasetResources, LabcasError> {
        let docs = self.client.list_resources(&dataset.id)?;
        let files: Vec<Resource> = docs
            .iter()
            .filter_map(|doc| {
                let file_id = first_string(doc, &["id"])?;
                Resource::from_doc(doc, &dataset.id, self.client.resource_url(&file_id))
            })
            .collect();
        if files.len() < docs.len() {
            tracing::warn!(
                dataset = %dataset.id,
                skipped = docs.len() - files.len(),
                "file documents without id skipped"
            );
        }
        Ok(DatasetResources {
            dataset: dataset.clone(),
            file_count: files.len(),
            files,
        })
    }
}
