use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    DescribeResult, InspectResult, ManifestResult, ProgressEvent, ProgressSink,
};
use crate::harvest::HarvestReport;
use crate::loader::FetchReport;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress to the tracing subscriber.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => tracing::info!("{}", event.message),
        }
    }
}

pub struct HumanOutput;

impl HumanOutput {
    pub fn harvest(report: &HarvestReport) {
        println!(
            "harvested collection {} ({})",
            report.collection_id,
            report.collection_name.as_deref().unwrap_or("unnamed")
        );
        println!("  datasets:        {}", report.total_datasets);
        println!("  leaf datasets:   {}", report.leaf_datasets);
        for (kind, count) in &report.leaf_kinds {
            println!("    {kind}: {count}");
        }
        println!("  with files:      {}", report.harvested_datasets);
        println!("  files:           {}", report.total_files);
        if report.skipped_documents > 0 {
            println!("  skipped docs:    {}", report.skipped_documents);
        }
        if !report.unreachable_datasets.is_empty() {
            println!("  unreachable:     {}", report.unreachable_datasets.len());
            for id in &report.unreachable_datasets {
                println!("    - {id}");
            }
        }
        println!("  failed datasets: {}", report.failures.len());
        for failure in &report.failures {
            let hint = if failure.transient { " (retry may help)" } else { "" };
            println!("    - {}: {}{hint}", failure.dataset_id, failure.error);
        }
        println!("  snapshots in {}", report.snapshot_dir);
    }

    pub fn manifest(result: &ManifestResult) {
        let diag = &result.diagnostics;
        println!(
            "manifest: {} pairs from {} files in {} datasets",
            diag.pairs, diag.files_scanned, diag.datasets_scanned
        );
        println!("  mini manifest:   {} pairs", diag.mini_pairs);
        println!("  anomalies:       {}", diag.anomalies.len());
        for anomaly in &diag.anomalies {
            println!(
                "    - {} / {}: {}",
                anomaly.dataset_id,
                anomaly.pair_key,
                anomaly.filenames().join(", ")
            );
        }
        println!("  unrecognized:    {}", diag.unrecognized.len());
        println!("  without pairs:   {}", diag.datasets_without_pairs.len());
        println!(
            "  wrote {}, {}, {}",
            result.manifest_path, result.mini_manifest_path, result.diagnostics_path
        );
    }

    pub fn describe(result: &DescribeResult) {
        println!(
            "description {}: {} pairs, {} file objects",
            result.summary.name, result.summary.pairs, result.summary.file_objects
        );
        println!("  {} sha256 {}", result.manifest_path, result.summary.manifest_sha256);
        println!("  wrote {}", result.description_path);
    }

    pub fn inspect(result: &InspectResult) {
        println!("description {} ({})", result.name, result.description_path);
        println!("  record sets: {}", result.record_sets.join(", "));
        println!("  records:     {}", result.records);
        if let Some(record) = &result.first_record {
            let keys: Vec<&str> = record.keys().map(String::as_str).collect();
            println!("  fields:      {}", keys.join(", "));
        }
    }

    pub fn fetch(report: &FetchReport) {
        println!(
            "fetched {} files ({} bytes) for {} pairs into {}",
            report.downloaded, report.bytes, report.pairs, report.out_dir
        );
        println!("  already present: {}", report.skipped_existing);
        println!("  failed:          {}", report.failures.len());
        for failure in &report.failures {
            println!("    - {}: {}", failure.url, failure.error);
        }
    }
}
