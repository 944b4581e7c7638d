// Catalog Bulk - Core Library
// Bulk administration jobs for a metadata-governance platform.
// Exposes the client, resolution caches and jobs for the CLI and tests.

pub mod config;     // Environment + .env settings
pub mod client;     // Authenticated HTTP behind the Transport trait
pub mod artifacts;  // Published artifact cache (terms, classifications, data classes)
pub mod assets;     // Asset lookup and column validation
pub mod flatten;    // Nested JSON → flat CSV rows
pub mod jobs;       // The batch jobs

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::{AuthMode, Config, ConfigError, EnvType};
pub use client::{ApiError, ApiResponse, CpdClient, Transport};
pub use artifacts::{ArtifactCache, ArtifactRecord, ArtifactType, ResolveError};
pub use assets::{find_asset_id, Asset, AssetError, AssetMatch};
pub use flatten::{flatten_record, write_flat_csv, FlatRecord};
pub use jobs::{output_path, timestamp, JobKind};
pub use jobs::columns::{ColumnAssignmentJob, ColumnInfoState, PatchPlan};
pub use jobs::quality::DataQualityJob;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
