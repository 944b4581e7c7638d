// 🗂️ Artifact Cache - governed catalog artifacts resolved by name + category
//
// "Names are what humans type, ids are what the platform wants"
//
// The column assignment job writes term / classification / data class ids
// onto asset columns. Rows only carry human-readable names, so every
// published artifact of a type is fetched once and resolved in memory.

use crate::client::{ApiError, Transport};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

/// Rows requested per search page
pub const SEARCH_PAGE_SIZE: usize = 10_000;

// ============================================================================
// ARTIFACT TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactType {
    GlossaryTerm,
    Classification,
    DataClass,
    ReferenceData,
}

impl ArtifactType {
    /// Types the column assignment job resolves against
    pub const RESOLVABLE: [ArtifactType; 3] = [
        ArtifactType::GlossaryTerm,
        ArtifactType::Classification,
        ArtifactType::DataClass,
    ];

    /// Types written by the artifact export, in export order
    pub const EXPORTABLE: [ArtifactType; 4] = [
        ArtifactType::GlossaryTerm,
        ArtifactType::DataClass,
        ArtifactType::Classification,
        ArtifactType::ReferenceData,
    ];

    /// Value of `metadata.artifact_type` on the platform
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::GlossaryTerm => "glossary_term",
            ArtifactType::Classification => "classification",
            ArtifactType::DataClass => "data_class",
            ArtifactType::ReferenceData => "reference_data",
        }
    }

    /// Label used in row status messages
    pub fn label(&self) -> &'static str {
        match self {
            ArtifactType::GlossaryTerm => "Term",
            ArtifactType::Classification => "Classification",
            ArtifactType::DataClass => "Data class",
            ArtifactType::ReferenceData => "Reference data",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ARTIFACT RECORD
// ============================================================================

/// One published artifact as returned by the search API.
///
/// Identity within a cache is `(type, name, primary_category)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArtifactRecord {
    pub name: String,
    pub primary_category: String,
    pub global_id: String,
    pub artifact_id: String,
}

impl ArtifactRecord {
    pub fn new(name: &str, primary_category: &str, global_id: &str, artifact_id: &str) -> Self {
        ArtifactRecord {
            name: name.to_string(),
            primary_category: primary_category.to_string(),
            global_id: global_id.to_string(),
            artifact_id: artifact_id.to_string(),
        }
    }

    /// Extract the four identifying fields from a search row; absent fields are empty
    pub fn from_search_row(row: &Value) -> Self {
        let text = |pointer: &str| {
            row.pointer(pointer)
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string()
        };

        ArtifactRecord {
            name: text("/metadata/name"),
            primary_category: text("/categories/primary_category_name"),
            global_id: text("/entity/artifacts/global_id"),
            artifact_id: text("/artifact_id"),
        }
    }
}

// ============================================================================
// PAGED SEARCH
// ============================================================================

/// Search payload for one page of published artifacts of a type
pub fn search_payload(artifact_type: ArtifactType, from: usize, size: usize) -> Value {
    json!({
        "query": {
            "bool": {
                "must": [
                    {"term": {"metadata.artifact_type": artifact_type.as_str()}},
                    {"term": {"metadata.state": "PUBLISHED"}}
                ]
            }
        },
        "from": from,
        "size": size,
        "_source": [
            "metadata.name",
            "categories.primary_category_name",
            "entity.artifacts.global_id",
            "artifact_id"
        ],
    })
}

/// Raw rows of a full scan plus whether the scan reached the end
#[derive(Debug, Clone, Default)]
pub struct SearchScan {
    pub rows: Vec<Value>,
    pub complete: bool,
}

/// Page through every published artifact of a type.
///
/// Stops on an empty page or once `offset + rows >= size` (total hits).
/// A failed page ends the scan early and returns what was accumulated;
/// only authentication failures are returned as errors.
pub fn fetch_all(api: &dyn Transport, artifact_type: ArtifactType) -> Result<SearchScan, ApiError> {
    let mut scan = SearchScan::default();
    let mut offset = 0;

    loop {
        let payload = search_payload(artifact_type, offset, SEARCH_PAGE_SIZE);

        let response = match api.search(&payload) {
            Ok(response) => response,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(%artifact_type, error = %e, "search failed, keeping partial result");
                return Ok(scan);
            }
        };

        if response.status != 200 {
            warn!(%artifact_type, status = response.status, "search failed, keeping partial result");
            return Ok(scan);
        }

        let data = match response.json_value() {
            Ok(data) => data,
            Err(e) => {
                warn!(%artifact_type, error = %e, "unreadable search page, keeping partial result");
                return Ok(scan);
            }
        };

        let rows = data
            .get("rows")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let total_hits = data.get("size").and_then(Value::as_u64).unwrap_or(0) as usize;

        if rows.is_empty() {
            break;
        }

        let page_len = rows.len();
        scan.rows.extend(rows);

        if offset + page_len >= total_hits {
            break;
        }

        offset += SEARCH_PAGE_SIZE;
    }

    scan.complete = true;
    Ok(scan)
}

// ============================================================================
// RESOLUTION
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error("{kind} '{name}' with category '{category}' not found")]
    NotFound {
        kind: &'static str,
        name: String,
        category: String,
    },

    #[error("{kind} '{name}' with category '{category}' is ambiguous ({matches} matches)")]
    Ambiguous {
        kind: &'static str,
        name: String,
        category: String,
        matches: usize,
    },
}

// ============================================================================
// ARTIFACT CACHE
// ============================================================================

/// In-memory cache of published artifacts, keyed by type, in fetch order.
///
/// Owned by the job that uses it. A type is fetched at most once until
/// `invalidate` is called for it.
#[derive(Debug, Default)]
pub struct ArtifactCache {
    entries: HashMap<ArtifactType, Vec<ArtifactRecord>>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached records of a type
    pub fn insert(&mut self, artifact_type: ArtifactType, records: Vec<ArtifactRecord>) {
        self.entries.insert(artifact_type, records);
    }

    pub fn is_loaded(&self, artifact_type: ArtifactType) -> bool {
        self.entries.contains_key(&artifact_type)
    }

    /// Fetch a type unless it is already cached. Returns the cached count.
    pub fn load(&mut self, api: &dyn Transport, artifact_type: ArtifactType) -> Result<usize, ApiError> {
        if let Some(records) = self.entries.get(&artifact_type) {
            return Ok(records.len());
        }

        let scan = fetch_all(api, artifact_type)?;
        let records: Vec<ArtifactRecord> = scan.rows.iter().map(ArtifactRecord::from_search_row).collect();
        let count = records.len();

        if scan.complete {
            info!(%artifact_type, count, "loaded artifacts");
        } else {
            warn!(%artifact_type, count, "cached partial artifact list");
        }

        self.entries.insert(artifact_type, records);
        Ok(count)
    }

    /// Load every type the column assignment job resolves against
    pub fn preload(&mut self, api: &dyn Transport) -> Result<(), ApiError> {
        for artifact_type in ArtifactType::RESOLVABLE {
            self.load(api, artifact_type)?;
        }
        Ok(())
    }

    /// Forget a type so the next `load` fetches it again
    pub fn invalidate(&mut self, artifact_type: ArtifactType) {
        self.entries.remove(&artifact_type);
    }

    pub fn records(&self, artifact_type: ArtifactType) -> &[ArtifactRecord] {
        self.entries
            .get(&artifact_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First record whose name and primary category both match exactly
    pub fn lookup(&self, artifact_type: ArtifactType, name: &str, category: &str) -> Option<&ArtifactRecord> {
        self.records(artifact_type)
            .iter()
            .find(|r| r.name == name && r.primary_category == category)
    }

    /// Like `lookup`, but duplicate name + category pairs are reported instead of
    /// silently picking the first one
    pub fn resolve(
        &self,
        artifact_type: ArtifactType,
        name: &str,
        category: &str,
    ) -> Result<&ArtifactRecord, ResolveError> {
        let mut matches = self
            .records(artifact_type)
            .iter()
            .filter(|r| r.name == name && r.primary_category == category);

        let first = matches.next().ok_or_else(|| ResolveError::NotFound {
            kind: artifact_type.label(),
            name: name.to_string(),
            category: category.to_string(),
        })?;

        let extra = matches.count();
        if extra > 0 {
            return Err(ResolveError::Ambiguous {
                kind: artifact_type.label(),
                name: name.to_string(),
                category: category.to_string(),
                matches: extra + 1,
            });
        }

        Ok(first)
    }
}

// ============================================================================
// TESTS
// ============================================================================
