use assert_matches::assert_matches;
use serde_json::Value;

use labcas_croissant::config::{Config, ConfigLoader, DatasetMetadata};
use labcas_croissant::describe::{
    CONFORMS_TO, RECORD_SET, describe_manifest, sha256_hex, summarize, validate,
};
use labcas_croissant::domain::{CohortLabel, ManifestRow};
use labcas_croissant::error::LabcasError;
use labcas_croissant::manifest::manifest_bytes;

fn metadata() -> DatasetMetadata {
    ConfigLoader::resolve_config(Config::default()).unwrap().dataset
}

fn row(dataset: &str, key: &str, group: CohortLabel) -> ManifestRow {
    ManifestRow {
        dataset_id: dataset.to_string(),
        group,
        pair_key: key.to_string(),
        proc_name: format!("{key}_PROC.dcm"),
        proc_url: format!("https://labcas.test/download?id={dataset}/{key}_PROC.dcm"),
        mask_name: format!("{key}_MASK.dcm"),
        mask_url: format!("https://labcas.test/download?id={dataset}/{key}_MASK.dcm"),
    }
}

fn manifest() -> Vec<u8> {
    manifest_bytes(&[
        row("Coll/C0250/PROC", "C0250_LCC", CohortLabel::Case),
        row("Coll/N0500/PROC", "N0500_RCC", CohortLabel::Control),
    ])
    .unwrap()
}

fn describe(bytes: &[u8]) -> Value {
    describe_manifest(bytes, "manifest.csv", "../manifest.csv", &metadata()).unwrap()
}

#[test]
fn description_covers_manifest_and_pairs() {
    let bytes = manifest();
    let document = describe(&bytes);

    assert_eq!(document["conformsTo"], CONFORMS_TO);
    assert_eq!(document["@type"], "sc:Dataset");
    assert_eq!(document["name"], "EDRN_Breast_Density_Collection_2");
    assert_eq!(document["datePublished"], "2025-01-22");

    let distribution = document["distribution"].as_array().unwrap();
    assert_eq!(distribution.len(), 5);
    assert_eq!(distribution[0]["@id"], "manifest.csv");
    assert_eq!(distribution[0]["contentUrl"], "../manifest.csv");
    assert_eq!(distribution[0]["encodingFormat"], "text/csv");
    assert_eq!(distribution[0]["sha256"], sha256_hex(&bytes).as_str());
    assert_eq!(distribution[1]["@id"], "proc/Coll/C0250/PROC/C0250_LCC");
    assert_eq!(distribution[2]["encodingFormat"], "application/dicom");

    let record_set = &document["recordSet"][0];
    assert_eq!(record_set["@id"], RECORD_SET);
    let columns: Vec<&str> = record_set["field"]
        .as_array()
        .unwrap()
        .iter()
        .map(|field| field["source"]["extract"]["column"].as_str().unwrap())
        .collect();
    assert_eq!(
        columns,
        vec!["dataset_id", "group", "pair_key", "proc_name", "proc_url", "mask_name", "mask_url"]
    );

    let summary = summarize(&document);
    assert_eq!(summary.pairs, 2);
    assert_eq!(summary.file_objects, 5);
    assert_eq!(summary.manifest_sha256, sha256_hex(&bytes));
}

#[test]
fn description_is_deterministic() {
    let bytes = manifest();
    let first = serde_json::to_vec_pretty(&describe(&bytes)).unwrap();
    let second = serde_json::to_vec_pretty(&describe(&bytes)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn manifest_change_changes_digest() {
    let original = describe(&manifest());
    let other = manifest_bytes(&[row("Coll/C0250/PROC", "C0250_LCC", CohortLabel::Case)]).unwrap();
    let changed = describe(&other);
    assert_ne!(
        original["distribution"][0]["sha256"],
        changed["distribution"][0]["sha256"]
    );
}

#[test]
fn empty_manifest_still_describes() {
    let bytes = manifest_bytes(&[]).unwrap();
    let document = describe(&bytes);
    assert_eq!(document["distribution"].as_array().unwrap().len(), 1);
    assert_eq!(summarize(&document).pairs, 0);
}

#[test]
fn mini_metadata_is_distinguishable() {
    let full = metadata();
    let mini = full.mini(5);
    assert_eq!(mini.name, "EDRN_Breast_Density_Collection_2_Mini");
    assert_eq!(mini.version, "1.0.0-mini");
    assert!(mini.description.contains("5 pairs"));
    assert_eq!(mini.license, full.license);
}

#[test]
fn malformed_manifest_is_rejected() {
    let err = describe_manifest(b"dataset_id,group\n", "manifest.csv", "manifest.csv", &metadata())
        .unwrap_err();
    assert_matches!(err, LabcasError::SchemaValidation(_));
}

#[test]
fn validation_catches_broken_documents() {
    let document = describe(&manifest());

    let mut missing_license = document.clone();
    missing_license.as_object_mut().unwrap().remove("license");
    assert_matches!(validate(&missing_license), Err(LabcasError::SchemaValidation(_)));

    let mut duplicate = document.clone();
    let copy = duplicate["distribution"][1].clone();
    duplicate["distribution"].as_array_mut().unwrap().push(copy);
    assert_matches!(
        validate(&duplicate),
        Err(LabcasError::SchemaValidation(message)) if message.contains("duplicate")
    );

    let mut dangling = document.clone();
    dangling["recordSet"][0]["field"][0]["source"]["fileObject"]["@id"] = "missing.csv".into();
    assert_matches!(
        validate(&dangling),
        Err(LabcasError::SchemaValidation(message)) if message.contains("missing.csv")
    );

    let mut wrong_version = document;
    wrong_version["conformsTo"] = "http://mlcommons.org/croissant/0.8".into();
    assert_matches!(validate(&wrong_version), Err(LabcasError::SchemaValidation(_)));
}
