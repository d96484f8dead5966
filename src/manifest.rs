use std::collections::BTreeMap;

use camino::Utf8Path;
use serde::Serialize;

use crate::domain::{CohortLabel, ManifestRow, Resource, ResourceRole};
use crate::error::LabcasError;
use crate::naming::{LabelRules, NamingRules};
use crate::store::{ResourcesByDataset, write_bytes_atomic};

pub const MANIFEST_COLUMNS: [&str; 7] = [
    "dataset_id",
    "group",
    "pair_key",
    "proc_name",
    "proc_url",
    "mask_name",
    "mask_url",
];

/// A pairing key whose PROC/MASK multiplicity was not exactly one of each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairingAnomaly {
    pub dataset_id: String,
    pub pair_key: String,
    pub proc: Vec<String>,
    pub mask: Vec<String>,
}

impl PairingAnomaly {
    pub fn filenames(&self) -> Vec<&str> {
        self.proc
            .iter()
            .chain(&self.mask)
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnrecognizedFile {
    pub dataset_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct ManifestBuild {
    pub rows: Vec<ManifestRow>,
    pub anomalies: Vec<PairingAnomaly>,
    pub unrecognized: Vec<UnrecognizedFile>,
    pub datasets_scanned: usize,
    pub files_scanned: usize,
    pub datasets_without_pairs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestDiagnostics {
    pub datasets_scanned: usize,
    pub files_scanned: usize,
    pub pairs: usize,
    pub mini_pairs: usize,
    pub anomalies: Vec<PairingAnomaly>,
    pub unrecognized: Vec<UnrecognizedFile>,
    pub datasets_without_pairs: Vec<String>,
}

impl ManifestBuild {
    /// Leading `count` rows in manifest order.
    pub fn mini(&self, count: usize) -> &[ManifestRow] {
        &self.rows[..count.min(self.rows.len())]
    }

    pub fn diagnostics(&self, mini_rows: usize) -> ManifestDiagnostics {
        ManifestDiagnostics {
            datasets_scanned: self.datasets_scanned,
            files_scanned: self.files_scanned,
            pairs: self.rows.len(),
            mini_pairs: self.mini(mini_rows).len(),
            anomalies: self.anomalies.clone(),
            unrecognized: self.unrecognized.clone(),
            datasets_without_pairs: self.datasets_without_pairs.clone(),
        }
    }
}

#[derive(Default)]
struct PairGroup<'a> {
    proc: Vec<&'a Resource>,
    mask: Vec<&'a Resource>,
}

/// Matches PROC/MASK files within each leaf dataset. Rows come out sorted by
/// dataset id, then pairing key.
pub fn build_manifest(
    resources: &ResourcesByDataset,
    naming: &NamingRules,
    labels: &LabelRules,
) -> ManifestBuild {
    let mut build = ManifestBuild::default();

    for (dataset_id, entry) in resources {
        build.datasets_scanned += 1;
        let group = labels.label(&entry.dataset);
        let mut groups: BTreeMap<String, PairGroup<'_>> = BTreeMap::new();

        for file in &entry.files {
            build.files_scanned += 1;
            let classification = naming.classify(&file.name);
            match (classification.role, classification.pair_key) {
                (ResourceRole::Proc, Some(key)) => groups.entry(key).or_default().proc.push(file),
                (ResourceRole::Mask, Some(key)) => groups.entry(key).or_default().mask.push(file),
                _ => {
                    tracing::warn!(dataset = %dataset_id, file = %file.name, "unrecognized file dropped");
                    build.unrecognized.push(UnrecognizedFile {
                        dataset_id: dataset_id.clone(),
                        name: file.name.clone(),
                    });
                }
            }
        }

        let before = build.rows.len();
        for (pair_key, pair) in groups {
            match (pair.proc.as_slice(), pair.mask.as_slice()) {
                ([proc], [mask]) => build.rows.push(ManifestRow {
                    dataset_id: dataset_id.clone(),
                    group,
                    pair_key,
                    proc_name: proc.name.clone(),
                    proc_url: proc.download_url.clone(),
                    mask_name: mask.name.clone(),
                    mask_url: mask.download_url.clone(),
                }),
                _ => {
                    let anomaly = PairingAnomaly {
                        dataset_id: dataset_id.clone(),
                        pair_key,
                        proc: pair.proc.iter().map(|file| file.name.clone()).collect(),
                        mask: pair.mask.iter().map(|file| file.name.clone()).collect(),
                    };
                    tracing::warn!(
                        dataset = %anomaly.dataset_id,
                        key = %anomaly.pair_key,
                        files = ?anomaly.filenames(),
                        "pairing anomaly, group skipped"
                    );
                    build.anomalies.push(anomaly);
                }
            }
        }
        if build.rows.len() == before {
            build.datasets_without_pairs.push(dataset_id.clone());
        }
    }

    build
        .rows
        .sort_by(|a, b| (&a.dataset_id, &a.pair_key).cmp(&(&b.dataset_id, &b.pair_key)));
    build
}

pub fn manifest_bytes(rows: &[ManifestRow]) -> Result<Vec<u8>, LabcasError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer
        .write_record(MANIFEST_COLUMNS)
        .map_err(|err| LabcasError::Manifest(err.to_string()))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|err| LabcasError::Manifest(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| LabcasError::Manifest(err.to_string()))
}

pub fn write_manifest(path: &Utf8Path, rows: &[ManifestRow]) -> Result<(), LabcasError> {
    write_bytes_atomic(path, &manifest_bytes(rows)?)
}

pub fn read_manifest(path: &Utf8Path) -> Result<Vec<ManifestRow>, LabcasError> {
    let content = std::fs::read(path.as_std_path())
        .map_err(|err| LabcasError::Filesystem(format!("read {path}: {err}")))?;
    parse_manifest(&content)
}

/// Parses manifest CSV, requiring every column and non-empty file references.
pub fn parse_manifest(content: &[u8]) -> Result<Vec<ManifestRow>, LabcasError> {
    let mut reader = csv::Reader::from_reader(content);
    let headers = reader
        .headers()
        .map_err(|err| LabcasError::SchemaValidation(format!("unreadable manifest header: {err}")))?
        .clone();
    let mut positions = [0usize; MANIFEST_COLUMNS.len()];
    for (slot, column) in positions.iter_mut().zip(MANIFEST_COLUMNS) {
        *slot = headers
            .iter()
            .position(|header| header.trim() == column)
            .ok_or_else(|| {
                LabcasError::SchemaValidation(format!("manifest is missing column `{column}`"))
            })?;
    }

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|err| LabcasError::SchemaValidation(err.to_string()))?;
        let values: Vec<&str> = positions
            .iter()
            .map(|&pos| record.get(pos).map(str::trim).unwrap_or(""))
            .collect();
        let &[dataset_id, group, pair_key, proc_name, proc_url, mask_name, mask_url] =
            values.as_slice()
        else {
            return Err(LabcasError::SchemaValidation(format!(
                "manifest row {} is malformed",
                line + 1
            )));
        };
        for (column, value) in [
            ("proc_name", proc_name),
            ("proc_url", proc_url),
            ("mask_name", mask_name),
            ("mask_url", mask_url),
        ] {
            if value.is_empty() {
                return Err(LabcasError::SchemaValidation(format!(
                    "manifest row {} has an empty `{column}` reference",
                    line + 1
                )));
            }
        }
        let group = match group {
            "case" => CohortLabel::Case,
            "control" => CohortLabel::Control,
            "unknown" => CohortLabel::Unknown,
            other => {
                return Err(LabcasError::SchemaValidation(format!(
                    "manifest row {} has unknown group `{other}`",
                    line + 1
                )));
            }
        };
        rows.push(ManifestRow {
            dataset_id: dataset_id.to_string(),
            group,
            pair_key: pair_key.to_string(),
            proc_name: proc_name.to_string(),
            proc_url: proc_url.to_string(),
            mask_name: mask_name.to_string(),
            mask_url: mask_url.to_string(),
        });
    }
    Ok(rows)
}
