// 🏭 Batch Jobs - CSV in, one API sequence per row, CSV out
//
// Every job follows the same shape:
//   read rows → per-row lookup / validate / mutate → write results → summary
//
// Row failures are folded into status columns. Only authentication failures
// and file errors stop a run.

pub mod columns;
pub mod export;
pub mod projects;
pub mod quality;
pub mod users;

use anyhow::{Context, Result};
use chrono::Local;
use csv::{ReaderBuilder, Trim, WriterBuilder};
use std::path::{Path, PathBuf};
use tracing::warn;

// ============================================================================
// JOB CATALOGUE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    AssignColumns,
    DqRules,
    Projects,
    Users,
    ExportArtifacts,
    ExportUsers,
}

impl JobKind {
    pub const ALL: [JobKind; 6] = [
        JobKind::AssignColumns,
        JobKind::DqRules,
        JobKind::Projects,
        JobKind::Users,
        JobKind::ExportArtifacts,
        JobKind::ExportUsers,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::AssignColumns => "assign-columns",
            JobKind::DqRules => "dq-rules",
            JobKind::Projects => "projects",
            JobKind::Users => "users",
            JobKind::ExportArtifacts => "export-artifacts",
            JobKind::ExportUsers => "export-users",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Input file used when none is given on the command line
    pub fn default_input(&self) -> Option<&'static str> {
        match self {
            JobKind::AssignColumns => Some("columns.csv"),
            JobKind::DqRules => Some("dq_rules.csv"),
            JobKind::Projects => Some("projects.csv"),
            JobKind::Users => Some("users.csv"),
            JobKind::ExportArtifacts | JobKind::ExportUsers => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            JobKind::AssignColumns => "assign descriptions, terms, classifications and data classes to columns",
            JobKind::DqRules => "create data quality definitions and rules",
            JobKind::Projects => "create projects and add collaborators",
            JobKind::Users => "create platform users",
            JobKind::ExportArtifacts => "export published governance artifacts to exports/",
            JobKind::ExportUsers => "export users and roles to exports/",
        }
    }
}

// ============================================================================
// FILE NAMING
// ============================================================================

/// Local timestamp used in output file names (`YYYYMMDD_HHMMSS`)
pub fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// `dir/input.csv` → `dir/input_out_<stamp>.csv`
pub fn output_path(input: &Path, stamp: &str) -> PathBuf {
    let file_name = input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("input.csv");
    let base = file_name.strip_suffix(".csv").unwrap_or(file_name);

    input.with_file_name(format!("{}_out_{}.csv", base, stamp))
}

// ============================================================================
// CSV INPUT / OUTPUT
// ============================================================================

/// One data row of an input file, numbered from 1 after any header
#[derive(Debug, Clone, PartialEq)]
pub struct InputRow {
    pub number: usize,
    pub fields: Vec<String>,
}

impl InputRow {
    pub fn field(&self, index: usize) -> &str {
        self.fields.get(index).map(String::as_str).unwrap_or("")
    }
}

/// Read position-based rows, skipping (with a warning) rows shorter than `min_fields`.
pub fn read_rows(path: &Path, has_header: bool, min_fields: usize) -> Result<Vec<InputRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(has_header)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open input file: {}", path.display()))?;

    let mut rows = Vec::new();

    for (index, result) in reader.records().enumerate() {
        let number = index + 1;
        let record = result
            .with_context(|| format!("Failed to parse CSV row {} in {}", number, path.display()))?;

        if record.len() < min_fields {
            warn!(row = number, fields = record.len(), "row has insufficient columns, skipping");
            continue;
        }

        rows.push(InputRow {
            number,
            fields: record.iter().map(str::to_string).collect(),
        });
    }

    Ok(rows)
}

/// Write a header and result rows; rows may be longer than the header.
pub fn write_rows(path: &Path, header: &[&str], rows: &[Vec<String>]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;

    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;

    Ok(())
}

/// Console section banner
pub fn banner(title: &str) {
    println!("\n{}", "=".repeat(60));
    println!("{}", title);
    println!("{}", "=".repeat(60));
}

// ============================================================================
// TEST HELPERS
// ============================================================================


#[cfg(test)]
mod tests {
    use super::test_files::{read_csv, Scratch};
    use super::*;

    #[test]
    fn test_job_names_round_trip() {
        for kind in JobKind::ALL {
            assert_eq!(JobKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(JobKind::from_name("nope"), None);
    }

    #[test]
    fn test_default_inputs() {
        assert_eq!(JobKind::Users.default_input(), Some("users.csv"));
        assert_eq!(JobKind::DqRules.default_input(), Some("dq_rules.csv"));
        assert_eq!(JobKind::ExportUsers.default_input(), None);
    }

    #[test]
    fn test_output_path_naming() {
        let out = output_path(Path::new("data/columns.csv"), "20240131_101500");
        assert_eq!(out, PathBuf::from("data/columns_out_20240131_101500.csv"));

        let no_ext = output_path(Path::new("projects"), "20240131_101500");
        assert_eq!(no_ext, PathBuf::from("projects_out_20240131_101500.csv"));
    }

    #[test]
    fn test_timestamp_format() {
        let stamp = timestamp();
        assert_eq!(stamp.len(), 15);
        assert_eq!(&stamp[8..9], "_");
        assert!(stamp.replace('_', "").chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_read_rows_skips_short_rows_and_trims() {
        let scratch = Scratch::new();
        let path = scratch.write(
            "in.csv",
            "Alice, alice@example.com\nshort\n Bob ,bob@example.com,extra\n",
        );

        let rows = read_rows(&path, false, 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].number, 1);
        assert_eq!(rows[0].fields, vec!["Alice", "alice@example.com"]);
        assert_eq!(rows[1].number, 3);
        assert_eq!(rows[1].field(0), "Bob");
        assert_eq!(rows[1].field(2), "extra");
        assert_eq!(rows[1].field(9), "");
    }

    #[test]
    fn test_read_rows_with_header() {
        let scratch = Scratch::new();
        let path = scratch.write("in.csv", "name,email\nAlice,alice@example.com\n");

        let rows = read_rows(&path, true, 2).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].number, 1);
        assert_eq!(rows[0].field(0), "Alice");
    }

    #[test]
    fn test_read_rows_missing_file_is_error() {
        let scratch = Scratch::new();
        let err = read_rows(&scratch.path("missing.csv"), false, 1).unwrap_err();
        assert!(err.to_string().contains("Failed to open input file"));
    }

    #[test]
    fn test_write_rows_allows_ragged_rows() {
        let scratch = Scratch::new();
        let path = scratch.path("out.csv");
        write_rows(
            &path,
            &["A", "B"],
            &[
                vec!["1".into(), "2".into()],
                vec!["1".into(), "2".into(), "3".into()],
            ],
        )
        .unwrap();

        let rows = read_csv(&path);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], vec!["1", "2", "3"]);
    }
}
