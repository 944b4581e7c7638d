// 🧾 Flattening - nested API records to one-row-per-record CSV
//
// Rules:
// - nested objects become dot-joined column names ("metadata.name")
// - single-element lists are unwrapped (recursively)
// - longer lists are joined with "; " into one cell
// - null and empty lists become empty cells
// - "_score" keys are search noise and are dropped

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Column name → cell text
pub type FlatRecord = BTreeMap<String, String>;

pub fn flatten_record(record: &Value) -> FlatRecord {
    let mut flat = FlatRecord::new();
    flatten_into(record, "", &mut flat);
    flat
}

fn flatten_into(value: &Value, prefix: &str, out: &mut FlatRecord) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == "_score" {
                    continue;
                }
                let column = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(child, &column, out);
            }
        }
        Value::Array(items) => match items.len() {
            0 => {
                out.insert(prefix.to_string(), String::new());
            }
            1 => flatten_into(&items[0], prefix, out),
            _ => {
                let joined = items.iter().map(cell_text).collect::<Vec<_>>().join("; ");
                out.insert(prefix.to_string(), joined);
            }
        },
        other => {
            out.insert(prefix.to_string(), cell_text(other));
        }
    }
}

/// Strings verbatim, null empty, everything else as JSON text
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Write flattened records with the sorted union of their keys as header.
pub fn write_flat_csv(path: &Path, records: &[FlatRecord]) -> Result<()> {
    let columns: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.keys().map(String::as_str))
        .collect();

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record(&columns)?;
    for record in records {
        writer.write_record(
            columns
                .iter()
                .map(|c| record.get(*c).map(String::as_str).unwrap_or("")),
        )?;
    }
    writer.flush()?;

    Ok(())
}
