//! Run report export: JSON for the full report, CSV for the records.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use shipharvest_engine::report::RunReport;
use tracing::info;

/// Write `report` as pretty JSON plus a flat CSV of the records, one row
/// per order with the reconciled shipping content and its review flag.
/// Returns the two file paths.
pub fn write_report(report: &RunReport, export_dir: &Path) -> anyhow::Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(export_dir)
        .with_context(|| format!("creating export dir {}", export_dir.display()))?;

    let stamp = report.finished_at.format("%Y%m%d_%H%M%S");
    let json_path = export_dir.join(format!("run_{stamp}.json"));
    let csv_path = export_dir.join(format!("run_{stamp}.csv"));

    let file = File::create(&json_path)
        .with_context(|| format!("creating {}", json_path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.flush()?;

    write_csv(report, &csv_path)?;

    info!(
        json = %json_path.display(),
        csv = %csv_path.display(),
        records = report.records.len(),
        "run report exported"
    );
    Ok((json_path, csv_path))
}

fn write_csv(report: &RunReport, path: &Path) -> anyhow::Result<()> {
    let field_names: BTreeSet<&str> = report
        .records
        .iter()
        .flat_map(|record| record.fields.keys().map(String::as_str))
        .collect();

    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;

    let mut header = vec!["sequence_index".to_string(), "order_id".to_string()];
    header.extend(field_names.iter().map(|name| name.to_string()));
    header.push("shipping_content".to_string());
    header.push("needs_review".to_string());
    writer.write_record(&header)?;

    for record in &report.records {
        let mut row = vec![
            record.sequence_index.to_string(),
            record
                .order_id
                .as_ref()
                .map(|id| id.0.clone())
                .unwrap_or_default(),
        ];
        for name in &field_names {
            row.push(record.fields.get(*name).cloned().unwrap_or_default());
        }

        let association = record.order_id.as_ref().and_then(|id| {
            report
                .associations
                .iter()
                .find(|assoc| assoc.order_id == *id)
        });
        row.push(
            association
                .map(|assoc| assoc.content.clone())
                .unwrap_or_default(),
        );
        row.push(
            association
                .map(|assoc| assoc.needs_review.to_string())
                .unwrap_or_default(),
        );
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}
