use std::collections::{BTreeMap, HashMap};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::Value;

use crate::app::{ProgressEvent, ProgressSink};
use crate::catalog::CatalogClient;
use crate::describe::validate;
use crate::domain::ManifestRow;
use crate::error::LabcasError;
use crate::manifest::read_manifest;
use crate::store::read_json;

/// One record: `"<record set>/<field>"` → extracted column value.
pub type Record = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct Description {
    path: Utf8PathBuf,
    document: Value,
}

impl Description {
    pub fn load(path: &Utf8Path) -> Result<Self, LabcasError> {
        let document: Value = read_json(path)?;
        validate(&document)?;
        Ok(Self {
            path: path.to_path_buf(),
            document,
        })
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn name(&self) -> &str {
        self.document["name"].as_str().unwrap_or_default()
    }

    pub fn record_set_ids(&self) -> Vec<&str> {
        self.document["recordSet"]
            .as_array()
            .map(|sets| sets.iter().filter_map(|set| set["@id"].as_str()).collect())
            .unwrap_or_default()
    }

    /// Local path of a file object, resolved against the description's directory.
    pub fn file_object_path(&self, id: &str) -> Result<Utf8PathBuf, LabcasError> {
        let entry = self.document["distribution"]
            .as_array()
            .and_then(|items| items.iter().find(|item| item["@id"] == id))
            .ok_or_else(|| LabcasError::SchemaValidation(format!("unknown file object {id}")))?;
        let url = entry["contentUrl"].as_str().unwrap_or_default();
        if url.contains("://") {
            return Err(LabcasError::Filesystem(format!(
                "file object {id} is remote ({url}); only local manifests can be read"
            )));
        }
        let base = self.path.parent().unwrap_or(Utf8Path::new(""));
        Ok(base.join(url))
    }

    /// The CSV file object the record sets extract from.
    pub fn manifest_path(&self) -> Result<Utf8PathBuf, LabcasError> {
        let id = self.document["distribution"]
            .as_array()
            .and_then(|items| items.iter().find(|item| item["encodingFormat"] == "text/csv"))
            .and_then(|item| item["@id"].as_str())
            .ok_or_else(|| LabcasError::SchemaValidation("no CSV file object".to_string()))?;
        self.file_object_path(id)
    }

    pub fn record_set(&self, id: &str) -> Option<&Value> {
        self.document["recordSet"]
            .as_array()
            .and_then(|sets| sets.iter().find(|set| set["@id"] == id))
    }

    pub fn records(&self, record_set: &str) -> Result<Vec<Record>, LabcasError> {
        let set = self.record_set(record_set).ok_or_else(|| {
            LabcasError::SchemaValidation(format!("unknown record set {record_set}"))
        })?;
        let fields = set["field"].as_array().map(Vec::as_slice).unwrap_or_default();

        let mut tables: HashMap<String, Table> = HashMap::new();
        let mut records: Vec<Record> = Vec::new();
        for field in fields {
            let name = field["name"].as_str().unwrap_or_default().to_string();
            let object = field["source"]["fileObject"]["@id"].as_str().unwrap_or_default();
            let column = field["source"]["extract"]["column"].as_str().unwrap_or_default();
            if !tables.contains_key(object) {
                let table = Table::read(&self.file_object_path(object)?)?;
                tables.insert(object.to_string(), table);
            }
            let table = &tables[object];
            let position = table.column(column).ok_or_else(|| {
                LabcasError::SchemaValidation(format!("{object} has no column {column}"))
            })?;
            if records.len() < table.rows.len() {
                records.resize_with(table.rows.len(), Record::new);
            }
            for (record, row) in records.iter_mut().zip(&table.rows) {
                record.insert(name.clone(), row.get(position).cloned().unwrap_or_default());
            }
        }
        Ok(records)
    }

    pub fn pairs(&self) -> Result<Vec<ManifestRow>, LabcasError> {
        read_manifest(&self.manifest_path()?)
    }
}

struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn read(path: &Utf8Path) -> Result<Self, LabcasError> {
        let mut reader = csv::Reader::from_path(path.as_std_path())
            .map_err(|err| LabcasError::Filesystem(format!("open {path}: {err}")))?;
        let headers = reader
            .headers()
            .map_err(|err| LabcasError::Manifest(err.to_string()))?
            .iter()
            .map(|header| header.trim().to_string())
            .collect();
        let rows = reader
            .records()
            .map(|record| {
                record
                    .map(|record| record.iter().map(str::to_string).collect())
                    .map_err(|err| LabcasError::Manifest(err.to_string()))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { headers, rows })
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    pub out_dir: String,
    pub pairs: usize,
    pub downloaded: usize,
    pub bytes: u64,
    pub skipped_existing: usize,
    pub failures: Vec<FetchFailure>,
}

/// Downloads PROC and MASK files of the first `limit` pairs into
/// `<out_dir>/<dataset id>/<file name>`. Existing files are kept; a failing
/// download is recorded and the rest continue.
pub fn fetch_pairs<C: CatalogClient>(
    client: &C,
    rows: &[ManifestRow],
    limit: Option<usize>,
    out_dir: &Utf8Path,
    sink: &dyn ProgressSink,
) -> FetchReport {
    let selected = &rows[..limit.unwrap_or(rows.len()).min(rows.len())];
    let mut report = FetchReport {
        out_dir: out_dir.to_string(),
        pairs: selected.len(),
        ..FetchReport::default()
    };

    for (idx, row) in selected.iter().enumerate() {
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; [{}/{}] {}", idx + 1, selected.len(), row.pair_key),
            elapsed: None,
        });
        for (name, url) in [(&row.proc_name, &row.proc_url), (&row.mask_name, &row.mask_url)] {
            let destination = match destination_path(out_dir, &row.dataset_id, name) {
                Ok(destination) => destination,
                Err(err) => {
                    tracing::warn!(dataset = %row.dataset_id, file = %name, "unsafe destination skipped");
                    report.failures.push(FetchFailure {
                        url: url.clone(),
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            if destination.as_std_path().exists() {
                report.skipped_existing += 1;
                continue;
            }
            match client.download(url, destination.as_std_path()) {
                Ok(bytes) => {
                    report.downloaded += 1;
                    report.bytes += bytes;
                }
                Err(err) => {
                    tracing::warn!(url = %url, error = %err, "download failed");
                    report.failures.push(FetchFailure {
                        url: url.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }
    }
    report
}

/// `<out_dir>/<dataset id>/<name>`, refusing anything that would resolve
/// outside `out_dir`: absolute parts, `..`, or a name with separators.
pub fn destination_path(
    out_dir: &Utf8Path,
    dataset_id: &str,
    name: &str,
) -> Result<Utf8PathBuf, LabcasError> {
    let unsafe_part = |part: &str| {
        LabcasError::Filesystem(format!(
            "refusing to write {dataset_id}/{name}: `{part}` leaves {out_dir}"
        ))
    };
    let only_normal = |path: &Utf8Path| {
        !path.as_str().is_empty()
            && path
                .components()
                .all(|component| matches!(component, Utf8Component::Normal(_)))
    };

    let dataset_dir = Utf8Path::new(dataset_id);
    if !only_normal(dataset_dir) || dataset_id.contains('\\') {
        return Err(unsafe_part(dataset_id));
    }
    let file = Utf8Path::new(name);
    if !only_normal(file) || file.components().count() != 1 || name.contains('\\') {
        return Err(unsafe_part(name));
    }

    let destination = out_dir.join(dataset_dir).join(file);
    if !destination.starts_with(out_dir) {
        return Err(unsafe_part(destination.as_str()));
    }
    Ok(destination)
}
