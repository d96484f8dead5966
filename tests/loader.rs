use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::{Value, json};

use labcas_croissant::app::{App, Variant};
use labcas_croissant::catalog::CatalogClient;
use labcas_croissant::config::{Config, ConfigLoader, Credentials, PathsEntry, ResolvedConfig};
use labcas_croissant::domain::{CohortLabel, Dataset, DatasetResources, ManifestRow, Resource};
use labcas_croissant::error::LabcasError;
use labcas_croissant::loader::{Description, destination_path, fetch_pairs};
use labcas_croissant::output::JsonOutput;
use labcas_croissant::store::{ResourcesByDataset, SnapshotStore};

#[derive(Default)]
struct MockDownloads {
    broken: HashSet<String>,
    downloads: Mutex<Vec<String>>,
}

impl CatalogClient for MockDownloads {
    fn authenticate(&self, _credentials: &Credentials) -> Result<(), LabcasError> {
        Ok(())
    }

    fn fetch(&self, path: &str, _params: &[(&str, String)]) -> Result<Value, LabcasError> {
        Err(LabcasError::NotFound(path.to_string()))
    }

    fn download(&self, url: &str, destination: &Path) -> Result<u64, LabcasError> {
        self.downloads.lock().unwrap().push(url.to_string());
        if self.broken.contains(url) {
            return Err(LabcasError::Server {
                status: 500,
                message: "boom".to_string(),
            });
        }
        fs::create_dir_all(destination.parent().unwrap()).unwrap();
        fs::write(destination, b"DICM").unwrap();
        Ok(4)
    }

    fn resource_url(&self, file_id: &str) -> String {
        format!("https://labcas.test/download?id={file_id}")
    }
}

fn leaf(id: &str, files: &[&str]) -> (String, DatasetResources) {
    let mut dataset = Dataset::from_doc(&json!({ "id": id })).unwrap();
    dataset.is_leaf = true;
    let files: Vec<Resource> = files
        .iter()
        .map(|name| {
            let file_id = format!("{id}/{name}");
            let url = format!("https://labcas.test/download?id={file_id}");
            Resource::from_doc(&json!({ "id": file_id }), id, url).unwrap()
        })
        .collect();
    (
        id.to_string(),
        DatasetResources {
            dataset,
            file_count: files.len(),
            files,
        },
    )
}

fn workspace(mini_rows: usize) -> (tempfile::TempDir, ResolvedConfig) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let config = ConfigLoader::resolve_config(Config {
        mini_rows: Some(mini_rows),
        paths: PathsEntry {
            harvest_dir: Some(root.join("harvested_metadata").to_string()),
            manifest: Some(root.join("manifest.csv").to_string()),
            mini_manifest: Some(root.join("manifest_mini.csv").to_string()),
            diagnostics: Some(root.join("manifest_diagnostics.json").to_string()),
            description: Some(root.join("output/croissant.json").to_string()),
            mini_description: Some(root.join("output/croissant_mini.json").to_string()),
        },
        ..Config::default()
    })
    .unwrap();

    let resources: ResourcesByDataset = vec![
        leaf("Coll/C0250/PROC", &["C0250_LCC_PROC.dcm", "C0250_LCC_MASK.dcm"]),
        leaf("Coll/C0251/PROC", &["C0251_LCC_PROC.dcm", "C0251_LCC_MASK.dcm"]),
        leaf("Coll/N0500/PROC", &["N0500_RCC_PROC.dcm", "N0500_RCC_MASK.dcm"]),
    ]
    .into_iter()
    .collect();
    SnapshotStore::new(config.paths.harvest_dir.clone())
        .write_resources(&resources)
        .unwrap();
    (temp, config)
}

fn prepared_app(mini_rows: usize, client: MockDownloads) -> (tempfile::TempDir, App<MockDownloads>) {
    let (temp, config) = workspace(mini_rows);
    let app = App::new(config, client);
    app.build_manifest(&JsonOutput).unwrap();
    app.describe(Variant::Full, &JsonOutput).unwrap();
    app.describe(Variant::Mini, &JsonOutput).unwrap();
    (temp, app)
}

#[test]
fn inspect_reads_records_through_description() {
    let (_temp, app) = prepared_app(2, MockDownloads::default());

    let result = app.inspect(Variant::Full, &JsonOutput).unwrap();
    assert_eq!(result.records, 3);
    assert_eq!(result.record_sets, vec!["pairs".to_string()]);
    let first = result.first_record.unwrap();
    assert_eq!(first["pairs/dataset_id"], "Coll/C0250/PROC");
    assert_eq!(first["pairs/group"], "case");
    assert_eq!(first["pairs/proc_name"], "C0250_LCC_PROC.dcm");
    assert_eq!(
        first["pairs/mask_url"],
        "https://labcas.test/download?id=Coll/C0250/PROC/C0250_LCC_MASK.dcm"
    );

    let mini = app.inspect(Variant::Mini, &JsonOutput).unwrap();
    assert_eq!(mini.records, 2);
    assert_eq!(mini.name, "EDRN_Breast_Density_Collection_2_Mini");
}

#[test]
fn description_resolves_manifest_relative_to_itself() {
    let (_temp, app) = prepared_app(2, MockDownloads::default());
    let description = Description::load(&app.config().paths.description).unwrap();

    assert_eq!(
        description.document()["distribution"][0]["contentUrl"],
        "../manifest.csv"
    );
    assert_eq!(
        description.manifest_path().unwrap().file_name(),
        Some("manifest.csv")
    );
    assert_eq!(description.pairs().unwrap().len(), 3);
}

#[test]
fn remote_file_objects_are_not_read() {
    let (_temp, app) = prepared_app(2, MockDownloads::default());
    let description = Description::load(&app.config().paths.description).unwrap();
    let err = description
        .file_object_path("proc/Coll/C0250/PROC/C0250_LCC")
        .unwrap_err();
    assert_matches!(err, LabcasError::Filesystem(_));
}

#[test]
fn describing_without_manifest_fails() {
    let (_temp, config) = workspace(2);
    let app = App::new(config, MockDownloads::default());
    assert_matches!(
        app.describe(Variant::Full, &JsonOutput),
        Err(LabcasError::Filesystem(_))
    );
}

#[test]
fn fetch_downloads_limited_pairs() {
    let (temp, app) = prepared_app(2, MockDownloads::default());
    let out = Utf8PathBuf::from_path_buf(temp.path().join("data")).unwrap();
    let credentials = Credentials::new("user", "secret");

    let report = app
        .fetch(&credentials, Variant::Full, Some(2), &out, &JsonOutput)
        .unwrap();
    assert_eq!(report.pairs, 2);
    assert_eq!(report.downloaded, 4);
    assert_eq!(report.bytes, 16);
    assert!(
        out.join("Coll/C0251/PROC/C0251_LCC_MASK.dcm")
            .as_std_path()
            .exists()
    );

    let again = app
        .fetch(&credentials, Variant::Full, Some(2), &out, &JsonOutput)
        .unwrap();
    assert_eq!(again.downloaded, 0);
    assert_eq!(again.skipped_existing, 4);
    assert_eq!(app.client().downloads.lock().unwrap().len(), 4);
}

#[test]
fn fetch_records_failures_and_continues() {
    let broken = "https://labcas.test/download?id=Coll/C0250/PROC/C0250_LCC_PROC.dcm".to_string();
    let client = MockDownloads {
        broken: HashSet::from([broken.clone()]),
        ..MockDownloads::default()
    };
    let (temp, app) = prepared_app(2, client);
    let out = Utf8PathBuf::from_path_buf(temp.path().join("data")).unwrap();

    let report = app
        .fetch(&Credentials::new("user", "secret"), Variant::Mini, None, &out, &JsonOutput)
        .unwrap();
    assert_eq!(report.pairs, 2);
    assert_eq!(report.downloaded, 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].url, broken);
}

#[test]
fn fetch_refuses_paths_outside_out_dir() {
    let temp = tempfile::tempdir().unwrap();
    let out = Utf8PathBuf::from_path_buf(temp.path().join("data")).unwrap();
    let client = MockDownloads::default();
    let row = ManifestRow {
        dataset_id: "../../../tmp/escaped".to_string(),
        group: CohortLabel::Case,
        pair_key: "k".to_string(),
        proc_name: "k_PROC.dcm".to_string(),
        proc_url: "https://labcas.test/download?id=k_PROC.dcm".to_string(),
        mask_name: "/etc/k_MASK.dcm".to_string(),
        mask_url: "https://labcas.test/download?id=k_MASK.dcm".to_string(),
    };

    let report = fetch_pairs(&client, &[row], None, &out, &JsonOutput);

    assert_eq!(report.downloaded, 0);
    assert_eq!(report.failures.len(), 2);
    assert!(client.downloads.lock().unwrap().is_empty());
    assert!(!temp.path().join("tmp").exists());
}

#[test]
fn destination_must_be_plain_segments() {
    let out = Utf8PathBuf::from("/work/data");
    assert_eq!(
        destination_path(&out, "Coll/C0250/PROC", "a_PROC.dcm").unwrap(),
        Utf8PathBuf::from("/work/data/Coll/C0250/PROC/a_PROC.dcm")
    );
    for (dataset, name) in [
        ("Coll/../../x", "a.dcm"),
        ("/abs/Coll", "a.dcm"),
        ("", "a.dcm"),
        ("Coll", "../a.dcm"),
        ("Coll", "sub/a.dcm"),
        ("Coll", "/etc/a.dcm"),
        ("Coll", ".."),
    ] {
        assert_matches!(
            destination_path(&out, dataset, name),
            Err(LabcasError::Filesystem(_)),
            "{dataset} / {name}"
        );
    }
}
