use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LabcasError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionId(String);

impl CollectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CollectionId {
    type Err = LabcasError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        // Identifiers are interpolated into quoted Solr queries.
        let is_valid = !normalized.is_empty()
            && !normalized
                .chars()
                .any(|ch| ch == '"' || ch == '\\' || ch.is_whitespace());
        if !is_valid {
            return Err(LabcasError::InvalidConfig(format!(
                "invalid collection id: {value}"
            )));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub metadata: Value,
}

impl Collection {
    pub fn from_doc(doc: &Value) -> Option<Self> {
        let id = first_string(doc, &["id", "CollectionId"])?;
        Some(Self {
            id,
            name: first_string(doc, &["CollectionName", "name"]),
            description: first_string(doc, &["CollectionDescription", "description"]),
            metadata: doc.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub parent_id: Option<String>,
    pub name: String,
    /// Filled in when the catalog tree is built.
    #[serde(default)]
    pub is_leaf: bool,
    /// Dataset names from the root dataset down to this one.
    #[serde(default)]
    pub path: Vec<String>,
    pub metadata: Value,
}

impl Dataset {
    pub fn from_doc(doc: &Value) -> Option<Self> {
        let id = first_string(doc, &["id", "DatasetId"])?;
        let parent_id = first_string(doc, &["ParentDatasetId", "DatasetParentId", "DatasetParent"]);
        let name = first_string(doc, &["DatasetName", "name", "labcasName"]).unwrap_or_else(|| {
            id.rsplit('/').next().unwrap_or(id.as_str()).to_string()
        });
        Some(Self {
            id,
            parent_id,
            name,
            is_leaf: false,
            path: Vec::new(),
            metadata: doc.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub file_id: String,
    pub name: String,
    pub dataset_id: String,
    pub file_type: Option<String>,
    pub size: Option<u64>,
    pub checksum: Option<String>,
    pub modified: Option<String>,
    pub download_url: String,
    pub metadata: Value,
}

impl Resource {
    pub fn from_doc(doc: &Value, dataset_id: &str, download_url: String) -> Option<Self> {
        let file_id = first_string(doc, &["id"])?;
        let name = first_string(doc, &["name", "FileName"])
            .map(|name| basename(&name).to_string())
            .unwrap_or_else(|| basename(&file_id).to_string());
        Some(Self {
            name,
            dataset_id: dataset_id.to_string(),
            file_type: first_string(doc, &["FileType"]),
            size: first_u64(doc, &["FileSize", "size"]),
            checksum: first_string(doc, &["FileChecksum", "checksum"]),
            modified: first_string(doc, &["FileLastModified", "DateModified"]),
            download_url,
            metadata: doc.clone(),
            file_id,
        })
    }
}

/// Files of one leaf dataset as persisted in the resources snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetResources {
    pub dataset: Dataset,
    pub files: Vec<Resource>,
    pub file_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceRole {
    Proc,
    Mask,
    Unrecognized,
}

impl fmt::Display for ResourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRole::Proc => write!(f, "PROC"),
            ResourceRole::Mask => write!(f, "MASK"),
            ResourceRole::Unrecognized => write!(f, "UNRECOGNIZED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CohortLabel {
    Case,
    Control,
    Unknown,
}

impl fmt::Display for CohortLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CohortLabel::Case => write!(f, "case"),
            CohortLabel::Control => write!(f, "control"),
            CohortLabel::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub dataset_id: String,
    pub group: CohortLabel,
    pub pair_key: String,
    pub proc_name: String,
    pub proc_url: String,
    pub mask_name: String,
    pub mask_url: String,
}

#[derive(Debug, Clone)]
pub struct DatasetNode {
    index: usize,
    children: Vec<DatasetNode>,
}

impl DatasetNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn children(&self) -> &[DatasetNode] {
        &self.children
    }
}

/// Collection → dataset hierarchy. Datasets keep catalog order; nodes index into them.
#[derive(Debug, Clone)]
pub struct CatalogTree {
    collection: Collection,
    datasets: Vec<Dataset>,
    roots: Vec<DatasetNode>,
    unreachable: Vec<usize>,
}

impl CatalogTree {
    pub fn build(collection: Collection, mut datasets: Vec<Dataset>) -> Self {
        let by_id: HashMap<String, usize> = datasets
            .iter()
            .enumerate()
            .map(|(idx, dataset)| (dataset.id.clone(), idx))
            .collect();

        let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut root_indices = Vec::new();
        for (idx, dataset) in datasets.iter().enumerate() {
            match dataset
                .parent_id
                .as_ref()
                .and_then(|parent| by_id.get(parent))
            {
                Some(&parent) if parent != idx => children.entry(parent).or_default().push(idx),
                _ => root_indices.push(idx),
            }
        }

        for (idx, dataset) in datasets.iter_mut().enumerate() {
            dataset.is_leaf = !children.contains_key(&idx);
        }

        let mut visited = HashSet::new();
        let mut roots = Vec::new();
        for idx in root_indices {
            roots.push(build_node(idx, &children, &mut datasets, Vec::new(), &mut visited));
        }
        let unreachable = (0..datasets.len())
            .filter(|idx| !visited.contains(idx))
            .collect();

        Self {
            collection,
            datasets,
            roots,
            unreachable,
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    pub fn roots(&self) -> &[DatasetNode] {
        &self.roots
    }

    pub fn dataset(&self, node: &DatasetNode) -> &Dataset {
        &self.datasets[node.index]
    }

    /// Leaf datasets in depth-first order; descent stops at each leaf.
    pub fn leaves(&self) -> Vec<&Dataset> {
        let mut leaves = Vec::new();
        let mut stack: Vec<&DatasetNode> = self.roots.iter().rev().collect();
        while let Some(node) = stack.pop() {
            if node.is_leaf() {
                leaves.push(&self.datasets[node.index]);
                continue;
            }
            stack.extend(node.children.iter().rev());
        }
        leaves
    }

    /// Datasets caught in parent cycles, never reached from a root.
    pub fn unreachable(&self) -> Vec<&Dataset> {
        self.unreachable
            .iter()
            .map(|&idx| &self.datasets[idx])
            .collect()
    }
}

fn build_node(
    idx: usize,
    children: &HashMap<usize, Vec<usize>>,
    datasets: &mut [Dataset],
    mut path: Vec<String>,
    visited: &mut HashSet<usize>,
) -> DatasetNode {
    visited.insert(idx);
    path.push(datasets[idx].name.clone());
    datasets[idx].path = path.clone();
    let child_nodes = children
        .get(&idx)
        .map(|kids| {
            kids.iter()
                .filter(|&&child| !visited.contains(&child))
                .copied()
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
        .into_iter()
        .map(|child| build_node(child, children, datasets, path.clone(), visited))
        .collect();
    DatasetNode {
        index: idx,
        children: child_nodes,
    }
}

/// Catalog fields are either scalars or single-element lists.
pub fn first_string(doc: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        let value = doc.get(*key)?;
        let scalar = match value {
            Value::Array(items) => items.first()?,
            other => other,
        };
        let text = match scalar {
            Value::String(text) => text.trim().to_string(),
            Value::Number(number) => number.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    })
}

pub fn first_u64(doc: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| {
        let value = doc.get(*key)?;
        let scalar = match value {
            Value::Array(items) => items.first()?,
            other => other,
        };
        match scalar {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    })
}

pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn dataset(id: &str, parent: Option<&str>) -> Dataset {
        let mut doc = json!({ "id": id, "DatasetName": [id.rsplit('/').next().unwrap()] });
        if let Some(parent) = parent {
            doc["DatasetParentId"] = json!([parent]);
        }
        Dataset::from_doc(&doc).unwrap()
    }

    fn collection() -> Collection {
        Collection::from_doc(&json!({ "id": "Breast", "CollectionName": ["Breast Density"] }))
            .unwrap()
    }

    #[test]
    fn parse_collection_id() {
        let id: CollectionId = " Breast_Density ".parse().unwrap();
        assert_eq!(id.as_str(), "Breast_Density");
        let err = "bad\"id".parse::<CollectionId>().unwrap_err();
        assert_matches!(err, LabcasError::InvalidConfig(_));
    }

    #[test]
    fn leaves_stop_at_childless_datasets() {
        let tree = CatalogTree::build(
            collection(),
            vec![
                dataset("Breast/C0250", None),
                dataset("Breast/C0250/PROC", Some("Breast/C0250")),
                dataset("Breast/C0250/MASK", Some("Breast/C0250")),
                dataset("Breast/Docs", None),
            ],
        );
        let leaves: Vec<_> = tree.leaves().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(
            leaves,
            vec!["Breast/C0250/PROC", "Breast/C0250/MASK", "Breast/Docs"]
        );
        assert!(!tree.datasets()[0].is_leaf);
        assert_eq!(tree.datasets()[1].path, vec!["C0250", "PROC"]);
        assert!(tree.unreachable().is_empty());

        let root = &tree.roots()[0];
        assert_eq!(tree.dataset(root).id, "Breast/C0250");
        assert_eq!(root.children().len(), 2);
        assert!(root.children().iter().all(DatasetNode::is_leaf));
    }

    #[test]
    fn parent_cycles_are_unreachable() {
        let tree = CatalogTree::build(
            collection(),
            vec![dataset("A", Some("B")), dataset("B", Some("A")), dataset("C", None)],
        );
        assert_eq!(tree.leaves().len(), 1);
        assert_eq!(tree.unreachable().len(), 2);
    }

    #[test]
    fn resource_fields_accept_lists_and_scalars() {
        let doc = json!({
            "id": "Breast/C0250/PROC/C0250_LCC_PROC.dcm",
            "name": ["C0250_LCC_PROC.dcm"],
            "FileSize": "2048",
            "FileType": ["DICOM"],
        });
        let resource = Resource::from_doc(&doc, "Breast/C0250/PROC", "url".to_string()).unwrap();
        assert_eq!(resource.name, "C0250_LCC_PROC.dcm");
        assert_eq!(resource.size, Some(2048));
        assert_eq!(resource.file_type.as_deref(), Some("DICOM"));
        assert_eq!(resource.checksum, None);
    }
}
