use std::collections::HashSet;

use camino::{Utf8Component, Utf8Path};
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::config::DatasetMetadata;
use crate::domain::ManifestRow;
use crate::error::LabcasError;
use crate::manifest::parse_manifest;

pub const CONFORMS_TO: &str = "http://mlcommons.org/croissant/1.0";
pub const RECORD_SET: &str = "pairs";

const DICOM: &str = "application/dicom";

/// Manifest columns exposed as record-set fields: (column, dataType, description).
const FIELDS: [(&str, &str, &str); 7] = [
    ("dataset_id", "sc:Text", "Leaf dataset holding both files of the pair."),
    ("group", "sc:Text", "Case/control status: 'case', 'control' or 'unknown'."),
    ("pair_key", "sc:Text", "Filename stem shared by the PROC and MASK files."),
    ("proc_name", "sc:Text", "Filename of the processed image."),
    ("proc_url", "sc:URL", "Download URL for the processed image DICOM."),
    ("mask_name", "sc:Text", "Filename of the segmentation mask."),
    ("mask_url", "sc:URL", "Download URL for the segmentation mask DICOM."),
];

#[derive(Debug, Clone, Serialize)]
pub struct DescriptionSummary {
    pub name: String,
    pub manifest_sha256: String,
    pub pairs: usize,
    pub file_objects: usize,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Reads the manifest at `manifest_path` and describes it for a document that
/// will be written to `description_path`.
pub fn generate(
    manifest_path: &Utf8Path,
    description_path: &Utf8Path,
    metadata: &DatasetMetadata,
) -> Result<Value, LabcasError> {
    let manifest = std::fs::read(manifest_path.as_std_path()).map_err(|err| {
        LabcasError::Filesystem(format!(
            "read {manifest_path}: {err} (run the manifest stage first)"
        ))
    })?;
    let manifest_name = manifest_path.file_name().unwrap_or(manifest_path.as_str());
    let content_url = relative_content_url(description_path, manifest_path);
    describe_manifest(&manifest, manifest_name, &content_url, metadata)
}

/// Builds the Croissant description of a manifest. Pure in its inputs: the
/// same manifest bytes and metadata always give the same document.
pub fn describe_manifest(
    manifest: &[u8],
    manifest_name: &str,
    content_url: &str,
    metadata: &DatasetMetadata,
) -> Result<Value, LabcasError> {
    let rows = parse_manifest(manifest)?;

    let mut distribution = vec![json!({
        "@type": "cr:FileObject",
        "@id": manifest_name,
        "name": manifest_name,
        "description": "CSV manifest of matched PROC/MASK pairs with download URLs.",
        "contentUrl": content_url,
        "encodingFormat": "text/csv",
        "sha256": sha256_hex(manifest),
    })];
    for row in &rows {
        distribution.push(resource_object("proc", row, &row.proc_name, &row.proc_url));
        distribution.push(resource_object("mask", row, &row.mask_name, &row.mask_url));
    }

    let fields: Vec<Value> = FIELDS
        .iter()
        .map(|(column, data_type, description)| {
            json!({
                "@type": "cr:Field",
                "@id": format!("{RECORD_SET}/{column}"),
                "name": format!("{RECORD_SET}/{column}"),
                "description": description,
                "dataType": data_type,
                "source": {
                    "fileObject": { "@id": manifest_name },
                    "extract": { "column": column },
                },
            })
        })
        .collect();

    let document = json!({
        "@context": context(),
        "@type": "sc:Dataset",
        "name": metadata.name,
        "description": metadata.description,
        "conformsTo": CONFORMS_TO,
        "citeAs": metadata.cite_as,
        "datePublished": metadata.date_published.format("%Y-%m-%d").to_string(),
        "license": metadata.license,
        "url": metadata.url,
        "version": metadata.version,
        "distribution": distribution,
        "recordSet": [{
            "@type": "cr:RecordSet",
            "@id": RECORD_SET,
            "name": RECORD_SET,
            "description": "Each record is a matched PROC/MASK pair from one leaf dataset.",
            "field": fields,
        }],
    });

    validate(&document)?;
    Ok(document)
}

fn resource_object(role: &str, row: &ManifestRow, name: &str, url: &str) -> Value {
    json!({
        "@type": "cr:FileObject",
        "@id": format!("{role}/{}/{}", row.dataset_id, row.pair_key),
        "name": name,
        "contentUrl": url,
        "encodingFormat": DICOM,
    })
}

pub fn summarize(document: &Value) -> DescriptionSummary {
    let distribution = document["distribution"].as_array();
    let manifest_sha256 = distribution
        .and_then(|items| items.first())
        .and_then(|item| item["sha256"].as_str())
        .unwrap_or_default()
        .to_string();
    let file_objects = distribution.map(Vec::len).unwrap_or(0);
    DescriptionSummary {
        name: document["name"].as_str().unwrap_or_default().to_string(),
        manifest_sha256,
        pairs: file_objects.saturating_sub(1) / 2,
        file_objects,
    }
}

/// Structural checks mirroring the Croissant validator's hard errors.
pub fn validate(document: &Value) -> Result<(), LabcasError> {
    let fail = |message: String| Err(LabcasError::SchemaValidation(message));

    for key in ["@context", "name", "description", "conformsTo", "license", "url"] {
        if document.get(key).is_none() {
            return fail(format!("description is missing `{key}`"));
        }
    }
    if document["@type"] != "sc:Dataset" {
        return fail("description `@type` must be sc:Dataset".to_string());
    }
    if document["conformsTo"] != CONFORMS_TO {
        return fail(format!("description must conform to {CONFORMS_TO}"));
    }

    let mut ids = HashSet::new();
    let mut file_objects = HashSet::new();
    let Some(distribution) = document["distribution"].as_array() else {
        return fail("description has no `distribution` list".to_string());
    };
    for item in distribution {
        let id = item["@id"].as_str().unwrap_or_default();
        if id.is_empty() {
            return fail("distribution entry without `@id`".to_string());
        }
        if !ids.insert(id.to_string()) {
            return fail(format!("duplicate `@id` {id}"));
        }
        if !matches!(item["@type"].as_str(), Some("cr:FileObject" | "cr:FileSet")) {
            return fail(format!("distribution entry {id} has an unknown `@type`"));
        }
        if item["contentUrl"].as_str().unwrap_or_default().is_empty() {
            return fail(format!("file object {id} has an empty `contentUrl`"));
        }
        if item["encodingFormat"].as_str().is_none() {
            return fail(format!("file object {id} has no `encodingFormat`"));
        }
        file_objects.insert(id.to_string());
    }

    let record_sets = match document["recordSet"].as_array() {
        Some(sets) if !sets.is_empty() => sets,
        _ => return fail("description has no `recordSet`".to_string()),
    };
    for set in record_sets {
        let set_id = set["@id"].as_str().unwrap_or_default();
        if set_id.is_empty() || !ids.insert(set_id.to_string()) {
            return fail(format!("record set `@id` `{set_id}` is empty or duplicated"));
        }
        for field in set["field"].as_array().map(Vec::as_slice).unwrap_or_default() {
            let field_id = field["@id"].as_str().unwrap_or_default();
            if field_id.is_empty() || !ids.insert(field_id.to_string()) {
                return fail(format!("field `@id` `{field_id}` is empty or duplicated"));
            }
            if field["dataType"].as_str().is_none() {
                return fail(format!("field {field_id} has no `dataType`"));
            }
            let source = field["source"]["fileObject"]["@id"].as_str().unwrap_or_default();
            if !file_objects.contains(source) {
                return fail(format!(
                    "field {field_id} references unknown file object `{source}`"
                ));
            }
            if field["source"]["extract"]["column"].as_str().is_none() {
                return fail(format!("field {field_id} has no `extract.column`"));
            }
        }
    }
    Ok(())
}

/// `contentUrl` of `manifest` as seen from the directory of `description`.
pub fn relative_content_url(description: &Utf8Path, manifest: &Utf8Path) -> String {
    if description.is_absolute() != manifest.is_absolute() {
        return manifest.to_string();
    }
    let parts = |path: &Utf8Path| -> Vec<String> {
        path.components()
            .filter_map(|component| match component {
                Utf8Component::Prefix(prefix) => Some(prefix.as_str().to_string()),
                Utf8Component::Normal(part) => Some(part.to_string()),
                Utf8Component::ParentDir => Some("..".to_string()),
                Utf8Component::RootDir | Utf8Component::CurDir => None,
            })
            .collect()
    };
    let from = parts(description.parent().unwrap_or(Utf8Path::new("")));
    let to = parts(manifest);
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut url: Vec<&str> = vec![".."; from.len() - common];
    url.extend(to[common..].iter().map(String::as_str));
    url.join("/")
}

fn context() -> Value {
    json!({
        "@language": "en",
        "@vocab": "https://schema.org/",
        "citeAs": "cr:citeAs",
        "column": "cr:column",
        "conformsTo": "dct:conformsTo",
        "cr": "http://mlcommons.org/croissant/",
        "rai": "http://mlcommons.org/croissant/RAI/",
        "data": { "@id": "cr:data", "@type": "@json" },
        "dataType": { "@id": "cr:dataType", "@type": "@vocab" },
        "dct": "http://purl.org/dc/terms/",
        "examples": { "@id": "cr:examples", "@type": "@json" },
        "extract": "cr:extract",
        "field": "cr:field",
        "fileProperty": "cr:fileProperty",
        "fileObject": "cr:fileObject",
        "fileSet": "cr:fileSet",
        "format": "cr:format",
        "includes": "cr:includes",
        "isLiveDataset": "cr:isLiveDataset",
        "jsonPath": "cr:jsonPath",
        "key": "cr:key",
        "md5": "cr:md5",
        "parentField": "cr:parentField",
        "path": "cr:path",
        "recordSet": "cr:recordSet",
        "references": "cr:references",
        "regex": "cr:regex",
        "repeated": "cr:repeated",
        "replace": "cr:replace",
        "sc": "https://schema.org/",
        "separator": "cr:separator",
        "source": "cr:source",
        "subField": "cr:subField",
        "transform": "cr:transform",
    })
}
