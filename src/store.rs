use std::collections::BTreeMap;
use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::Builder;

use crate::domain::{Collection, Dataset, DatasetResources};
use crate::error::LabcasError;

pub const COLLECTION_FILE: &str = "collection.json";
pub const DATASETS_FILE: &str = "datasets.json";
pub const LEAF_DATASETS_FILE: &str = "leaf_datasets.json";
pub const RESOURCES_FILE: &str = "resources_by_dataset.json";

pub type ResourcesByDataset = BTreeMap<String, DatasetResources>;

/// Directory holding the four harvest snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: Utf8PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn collection_path(&self) -> Utf8PathBuf {
        self.root.join(COLLECTION_FILE)
    }

    pub fn datasets_path(&self) -> Utf8PathBuf {
        self.root.join(DATASETS_FILE)
    }

    pub fn leaf_datasets_path(&self) -> Utf8PathBuf {
        self.root.join(LEAF_DATASETS_FILE)
    }

    pub fn resources_path(&self) -> Utf8PathBuf {
        self.root.join(RESOURCES_FILE)
    }

    pub fn write_collection(&self, collection: &Collection) -> Result<(), LabcasError> {
        write_json_atomic(&self.collection_path(), collection)
    }

    pub fn write_datasets(&self, datasets: &[Dataset]) -> Result<(), LabcasError> {
        write_json_atomic(&self.datasets_path(), &datasets)
    }

    pub fn write_leaf_datasets(&self, leaves: &[&Dataset]) -> Result<(), LabcasError> {
        write_json_atomic(&self.leaf_datasets_path(), &leaves)
    }

    pub fn write_resources(&self, resources: &ResourcesByDataset) -> Result<(), LabcasError> {
        write_json_atomic(&self.resources_path(), resources)
    }

    pub fn read_collection(&self) -> Result<Collection, LabcasError> {
        read_json(&self.collection_path())
    }

    pub fn read_datasets(&self) -> Result<Vec<Dataset>, LabcasError> {
        read_json(&self.datasets_path())
    }

    pub fn read_leaf_datasets(&self) -> Result<Vec<Dataset>, LabcasError> {
        read_json(&self.leaf_datasets_path())
    }

    pub fn read_resources(&self) -> Result<ResourcesByDataset, LabcasError> {
        read_json(&self.resources_path())
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, LabcasError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| LabcasError::Filesystem(format!("read {path}: {err}")))?;
    serde_json::from_str(&content)
        .map_err(|err| LabcasError::Filesystem(format!("parse {path}: {err}")))
}

/// Pretty JSON with a trailing newline; map keys serialize sorted, so equal
/// values always produce equal bytes.
pub fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Utf8Path,
    value: &T,
) -> Result<(), LabcasError> {
    let mut content = serde_json::to_vec_pretty(value)
        .map_err(|err| LabcasError::Filesystem(err.to_string()))?;
    content.push(b'\n');
    write_bytes_atomic(path, &content)
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), LabcasError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| LabcasError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".labcas-write")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| LabcasError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| LabcasError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| LabcasError::Filesystem(format!("write {path}: {err}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("nested/value.json")).unwrap();
        write_json_atomic(&path, &vec![1, 2]).unwrap();
        write_json_atomic(&path, &vec![3]).unwrap();
        let back: Vec<u32> = read_json(&path).unwrap();
        assert_eq!(back, vec![3]);
        let leftovers = fs::read_dir(path.parent().unwrap().as_std_path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
