use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use catalog_bulk::jobs::export::{self, EXPORT_DIR};
use catalog_bulk::jobs::{banner, projects, users};
use catalog_bulk::{
    output_path, timestamp, ColumnAssignmentJob, Config, CpdClient, DataQualityJob, JobKind,
    VERSION,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();

    let Some(kind) = args.get(1).and_then(|name| JobKind::from_name(name)) else {
        print_usage();
        std::process::exit(1);
    };

    let input = args
        .get(2)
        .map(PathBuf::from)
        .or_else(|| kind.default_input().map(PathBuf::from));

    // Configuration problems stop the run before any network call
    let config = Config::from_env()?;
    let client = CpdClient::new(config).context("Failed to set up HTTP client")?;

    match (kind, input) {
        (JobKind::AssignColumns, Some(input)) => run_assign_columns(&client, &input),
        (JobKind::DqRules, Some(input)) => run_dq_rules(&client, &input),
        (JobKind::Projects, Some(input)) => run_projects(&client, &input),
        (JobKind::Users, Some(input)) => run_users(&client, &input),
        (JobKind::ExportArtifacts, _) => run_export_artifacts(&client),
        (JobKind::ExportUsers, _) => run_export_users(&client),
        (_, None) => {
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!("catalog-bulk {}", VERSION);
    eprintln!("Usage: catalog-bulk <job> [input.csv]");
    eprintln!();
    eprintln!("Jobs:");
    for kind in JobKind::ALL {
        let default = kind
            .default_input()
            .map(|f| format!(" (default input: {})", f))
            .unwrap_or_default();
        eprintln!("  {:<18} {}{}", kind.name(), kind.description(), default);
    }
}

fn finish(output: &Path) {
    banner("PROCESS COMPLETED");
    println!("Detailed results saved to: {}", output.display());
}

fn run_assign_columns(client: &CpdClient, input: &Path) -> Result<()> {
    let project_id = client.config().require_project_id()?;
    let output = output_path(input, &timestamp());

    let mut job = ColumnAssignmentJob::new(client, project_id);
    job.run(input, &output)?;

    finish(&output);
    Ok(())
}

fn run_dq_rules(client: &CpdClient, input: &Path) -> Result<()> {
    let project_id = client.config().require_project_id()?;
    let output = output_path(input, &timestamp());

    let mut job = DataQualityJob::new(client, project_id);
    job.run(input, &output)?;

    finish(&output);
    Ok(())
}

fn run_projects(client: &CpdClient, input: &Path) -> Result<()> {
    let output = output_path(input, &timestamp());
    projects::run(client, input, &output)?;
    finish(&output);
    Ok(())
}

fn run_users(client: &CpdClient, input: &Path) -> Result<()> {
    let output = output_path(input, &timestamp());
    users::run(client, input, &output)?;
    finish(&output);
    Ok(())
}

fn run_export_artifacts(client: &CpdClient) -> Result<()> {
    println!("Exporting published artifacts to CSV files...");
    let files = export::export_artifacts(client, Path::new(EXPORT_DIR), &timestamp())?;
    println!("\n✓ Export completed: {} file(s) written", files.len());
    Ok(())
}

fn run_export_users(client: &CpdClient) -> Result<()> {
    match export::export_users(client, Path::new(EXPORT_DIR), &timestamp())? {
        Some(file) => println!("\n✓ Export completed: {}", file.path.display()),
        None => println!("\n✓ Export completed: nothing to write"),
    }
    Ok(())
}
