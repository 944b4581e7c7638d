// 📤 Exports - governance artifacts and users to flat CSV files
//
// Files land in `<dir>/<name>_<timestamp>.csv`, one per artifact type plus one
// for users. Empty result sets produce no file.

use crate::artifacts::{fetch_all, ArtifactType};
use crate::client::{ApiError, Transport};
use crate::flatten::{flatten_record, write_flat_csv, FlatRecord};
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const EXPORT_DIR: &str = "exports";

const USERS_ENDPOINT: &str = "/usermgmt/v1/usermgmt/users";
const USERS_PAGE_SIZE: usize = 100;

/// One written export file
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub name: String,
    pub path: PathBuf,
    pub records: usize,
}

fn write_export(dir: &Path, name: &str, stamp: &str, rows: &[Value]) -> Result<Option<ExportFile>> {
    if rows.is_empty() {
        println!("No {} records to export", name);
        return Ok(None);
    }

    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let path = dir.join(format!("{}_{}.csv", name, stamp));
    let records: Vec<FlatRecord> = rows.iter().map(flatten_record).collect();
    write_flat_csv(&path, &records)?;

    println!("✓ Exported {} {} records to {}", rows.len(), name, path.display());
    Ok(Some(ExportFile {
        name: name.to_string(),
        path,
        records: rows.len(),
    }))
}

// ============================================================================
// ARTIFACTS
// ============================================================================

/// Export every published artifact of each exportable type
pub fn export_artifacts(api: &dyn Transport, dir: &Path, stamp: &str) -> Result<Vec<ExportFile>> {
    let mut written = Vec::new();

    for artifact_type in ArtifactType::EXPORTABLE {
        println!("\nExporting {} artifacts...", artifact_type);

        let scan = fetch_all(api, artifact_type)?;
        if !scan.complete {
            warn!(%artifact_type, rows = scan.rows.len(), "export is partial");
        }
        println!("Found {} {} artifacts", scan.rows.len(), artifact_type);

        if let Some(file) = write_export(dir, artifact_type.as_str(), stamp, &scan.rows)? {
            written.push(file);
        }
    }

    Ok(written)
}

// ============================================================================
// USERS
// ============================================================================

/// Page through all users. A failed page ends the scan with what was read.
pub fn fetch_users(api: &dyn Transport) -> Result<Vec<Value>, ApiError> {
    let mut users = Vec::new();
    let mut offset = 0;

    loop {
        let query = [
            ("offset", offset.to_string()),
            ("limit", USERS_PAGE_SIZE.to_string()),
        ];

        let response = match api.get(USERS_ENDPOINT, &query) {
            Ok(response) => response,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(offset, error = %e, "user page failed");
                break;
            }
        };

        if response.status != 200 {
            println!("Error fetching users: {} {}", response.status, response.snippet(200));
            break;
        }

        let page = match response.json_value() {
            Ok(data) => users_in_page(data),
            Err(e) => {
                warn!(offset, error = %e, "unreadable user page");
                break;
            }
        };

        if page.is_empty() {
            break;
        }

        let page_len = page.len();
        users.extend(page);

        if page_len < USERS_PAGE_SIZE {
            break;
        }
        offset += USERS_PAGE_SIZE;
    }

    info!(count = users.len(), "fetched users");
    Ok(users)
}

/// A page is either a bare list or an object holding `users` or `resources`
fn users_in_page(data: Value) -> Vec<Value> {
    match data {
        Value::Array(users) => users,
        Value::Object(mut map) => ["users", "resources"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(users)) if !users.is_empty() => Some(users),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

pub fn export_users(api: &dyn Transport, dir: &Path, stamp: &str) -> Result<Option<ExportFile>> {
    println!("Exporting users and their roles to CSV file...");
    let users = fetch_users(api)?;
    println!("Found {} users", users.len());
    write_export(dir, "users", stamp, &users)
}
