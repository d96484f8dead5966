use std::collections::HashMap;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::NaiveDate;

use labcas_croissant::config::{
    Config, ConfigLoader, Credentials, DEFAULT_COLLECTION, DatasetEntry, NamingEntry,
    PASSWORD_VAR, USERNAME_VAR,
};
use labcas_croissant::domain::{CohortLabel, Dataset, ResourceRole};
use labcas_croissant::error::LabcasError;

#[test]
fn defaults_resolve() {
    let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
    assert_eq!(resolved.schema_version, 1);
    assert_eq!(resolved.collection_id.as_str(), DEFAULT_COLLECTION);
    assert_eq!(
        resolved.catalog.base_url.as_str(),
        "https://edrn-labcas.jpl.nasa.gov/"
    );
    assert_eq!(resolved.catalog.token_max_age, Duration::from_secs(1800));
    assert_eq!(resolved.catalog.page_size, 1000);
    assert_eq!(resolved.catalog.page_delay, Duration::from_millis(300));
    assert_eq!(resolved.mini_rows, 5);
    assert_eq!(resolved.paths.manifest.as_str(), "manifest.csv");
    assert_eq!(resolved.paths.description.as_str(), "output/croissant.json");
    assert_eq!(
        resolved.dataset.date_published,
        NaiveDate::from_ymd_opt(2025, 1, 22).unwrap()
    );
    assert_eq!(
        resolved.dataset.url,
        format!("https://edrn-labcas.jpl.nasa.gov/collections/{DEFAULT_COLLECTION}")
    );
}

#[test]
fn parse_config_overrides() {
    let config: Config = serde_json::from_str(
        r#"{
            "schema_version": 1,
            "base_url": "https://labcas.test/",
            "collection_id": "Lung_Team",
            "page_size": 50,
            "page_delay_ms": 0,
            "mini_rows": 3,
            "paths": { "harvest_dir": "snapshots" },
            "naming": {
                "proc_markers": ["IMG"],
                "mask_markers": ["SEG"],
                "case_patterns": ["^T\\d+$"],
                "control_patterns": ["^H\\d+$"]
            },
            "dataset": { "name": "Lung", "version": "2.0.0" }
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.collection_id.as_str(), "Lung_Team");
    assert_eq!(resolved.catalog.page_size, 50);
    assert!(resolved.catalog.page_delay.is_zero());
    assert_eq!(resolved.mini_rows, 3);
    assert_eq!(resolved.paths.harvest_dir.as_str(), "snapshots");
    assert_eq!(resolved.paths.manifest.as_str(), "manifest.csv");
    assert_eq!(resolved.naming.classify("x_IMG.dcm").role, ResourceRole::Proc);
    assert_eq!(resolved.naming.classify("x_PROC.dcm").role, ResourceRole::Unrecognized);

    let dataset = Dataset::from_doc(&serde_json::json!({ "id": "Lung/H12/SEG" })).unwrap();
    assert_eq!(resolved.labels.label(&dataset), CohortLabel::Control);

    assert_eq!(resolved.dataset.name, "Lung");
    assert_eq!(resolved.dataset.version, "2.0.0");
    assert_eq!(resolved.dataset.url, "https://labcas.test/collections/Lung_Team");
}

#[test]
fn invalid_values_are_rejected() {
    let cases = [
        Config {
            schema_version: Some(2),
            ..Config::default()
        },
        Config {
            page_size: Some(0),
            ..Config::default()
        },
        Config {
            base_url: Some("not a url".to_string()),
            ..Config::default()
        },
        Config {
            collection_id: Some("two words".to_string()),
            ..Config::default()
        },
        Config {
            naming: NamingEntry {
                case_patterns: Some(vec!["[".to_string()]),
                ..NamingEntry::default()
            },
            ..Config::default()
        },
        Config {
            dataset: DatasetEntry {
                date_published: Some("22/01/2025".to_string()),
                ..DatasetEntry::default()
            },
            ..Config::default()
        },
    ];
    for config in cases {
        assert_matches!(
            ConfigLoader::resolve_config(config),
            Err(LabcasError::InvalidConfig(_))
        );
    }
}

#[test]
fn config_file_errors() {
    let temp = tempfile::tempdir().unwrap();
    let missing = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(missing.to_str()),
        Err(LabcasError::ConfigRead(_))
    );

    let broken = temp.path().join("labcas.json");
    std::fs::write(&broken, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(broken.to_str()),
        Err(LabcasError::ConfigParse(_))
    );

    std::fs::write(&broken, r#"{ "mini_rows": 2 }"#).unwrap();
    assert_eq!(ConfigLoader::resolve(broken.to_str()).unwrap().mini_rows, 2);
}

#[test]
fn credentials_come_from_lookup() {
    let env: HashMap<&str, &str> = HashMap::from([(USERNAME_VAR, "reader"), (PASSWORD_VAR, "s3cret")]);
    let credentials = Credentials::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();
    assert_eq!(credentials.username, "reader");
    assert!(!format!("{credentials:?}").contains("s3cret"));

    let err = Credentials::from_lookup(|key| (key == USERNAME_VAR).then(|| "reader".to_string()))
        .unwrap_err();
    assert_matches!(err, LabcasError::MissingCredentials(var) if var == PASSWORD_VAR);

    let err = Credentials::from_lookup(|_| Some("  ".to_string())).unwrap_err();
    assert_matches!(err, LabcasError::MissingCredentials(var) if var == USERNAME_VAR);
}
