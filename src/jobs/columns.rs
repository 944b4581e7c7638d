// 🏷️ Column Assignment - descriptions, terms, classifications and data classes
//
// Input (no header, 9 columns):
//   asset, column, description, term, term category, classification,
//   classification category, data class, data class category
//
// Each row: resolve asset → validate column → resolve facets → one bulk patch.
// Nothing is patched unless the column exists on the asset.

use crate::artifacts::{ArtifactCache, ArtifactRecord, ArtifactType};
use crate::assets::{find_asset_id, Asset, AssetError, AssetMatch};
use crate::client::{ApiError, ApiResponse, Transport};
use crate::jobs::{banner, read_rows, write_rows, InputRow};
use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::{info, warn};

pub const MIN_FIELDS: usize = 9;

const BULK_PATCH_ENDPOINT: &str = "/v2/assets/bulk_patch";

pub const OUTPUT_HEADER: [&str; 14] = [
    "Asset Name",
    "Column Name",
    "Column Description",
    "Term Name",
    "Term Category",
    "Classification Name",
    "Classification Category",
    "Data Class Name",
    "Data Class Category",
    "Description Result",
    "Term Result",
    "Classification Result",
    "Data Class Result",
    "Asset Update Status",
];

// ============================================================================
// INPUT ROW
// ============================================================================

/// Name + category pair naming one governed artifact
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactRef {
    pub name: String,
    pub category: String,
}

impl ArtifactRef {
    fn new(name: &str, category: &str) -> Self {
        ArtifactRef {
            name: name.to_string(),
            category: category.to_string(),
        }
    }

    /// Both halves are needed to resolve anything
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.category.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRequest {
    pub asset_name: String,
    pub column_name: String,
    pub description: String,
    pub term: ArtifactRef,
    pub classification: ArtifactRef,
    pub data_class: ArtifactRef,
}

impl ColumnRequest {
    pub fn from_row(row: &InputRow) -> Self {
        ColumnRequest {
            asset_name: row.field(0).to_string(),
            column_name: row.field(1).to_string(),
            description: row.field(2).to_string(),
            term: ArtifactRef::new(row.field(3), row.field(4)),
            classification: ArtifactRef::new(row.field(5), row.field(6)),
            data_class: ArtifactRef::new(row.field(7), row.field(8)),
        }
    }
}

// ============================================================================
// COLUMN DATA
// ============================================================================

/// Attributes to write onto one column; only supplied facets are set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnData {
    pub description: Option<String>,
    pub terms: Option<Value>,
    pub classifications: Option<Value>,
    pub data_class: Option<Value>,
}

impl ColumnData {
    pub fn is_empty(&self) -> bool {
        self.attributes().is_empty()
    }

    /// `(attribute name, value)` pairs in write order
    pub fn attributes(&self) -> Vec<(&'static str, Value)> {
        let mut attrs = Vec::new();
        if let Some(description) = &self.description {
            attrs.push(("column_description", Value::String(description.clone())));
        }
        if let Some(terms) = &self.terms {
            attrs.push(("column_terms", terms.clone()));
        }
        if let Some(classifications) = &self.classifications {
            attrs.push(("column_classifications", classifications.clone()));
        }
        if let Some(data_class) = &self.data_class {
            attrs.push(("data_class", data_class.clone()));
        }
        attrs
    }

    pub fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .attributes()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Value::Object(map)
    }
}

// ============================================================================
// PATCH DECISION
// ============================================================================

/// What the asset already holds for the target column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnInfoState {
    /// No `entity.column_info` at all
    Absent,
    /// `column_info` exists but has no entry for the column
    MissingColumn,
    /// The column already has a `column_info` entry
    Present,
}

impl ColumnInfoState {
    pub fn of(asset: &Asset, column: &str) -> Self {
        match asset.column_info() {
            None => ColumnInfoState::Absent,
            Some(info) if info.contains_key(column) => ColumnInfoState::Present,
            Some(_) => ColumnInfoState::MissingColumn,
        }
    }
}

/// JSON Patch operation as accepted by the bulk patch endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchOp {
    pub op: &'static str,
    pub path: String,
    pub value: Value,
}

impl PatchOp {
    fn add(path: String, value: Value) -> Self {
        PatchOp { op: "add", path, value }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatchPlan {
    CreateContainer(PatchOp),
    CreateField(PatchOp),
    UpdateAttributes(Vec<PatchOp>),
}

impl PatchPlan {
    pub fn decide(state: ColumnInfoState, column: &str, data: &ColumnData) -> Self {
        let column_path = format!("/entity/column_info/{}", escape_pointer(column));

        match state {
            ColumnInfoState::Absent => {
                let mut container = Map::new();
                container.insert(column.to_string(), data.to_value());
                PatchPlan::CreateContainer(PatchOp::add(
                    "/entity/column_info".to_string(),
                    Value::Object(container),
                ))
            }
            ColumnInfoState::MissingColumn => {
                PatchPlan::CreateField(PatchOp::add(column_path, data.to_value()))
            }
            ColumnInfoState::Present => PatchPlan::UpdateAttributes(
                data.attributes()
                    .into_iter()
                    .map(|(attr, value)| PatchOp::add(format!("{}/{}", column_path, attr), value))
                    .collect(),
            ),
        }
    }

    pub fn operations(&self) -> Vec<&PatchOp> {
        match self {
            PatchPlan::CreateContainer(op) | PatchPlan::CreateField(op) => vec![op],
            PatchPlan::UpdateAttributes(ops) => ops.iter().collect(),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            PatchPlan::CreateContainer(_) => "creating column_info",
            PatchPlan::CreateField(_) => "creating column entry in existing column_info",
            PatchPlan::UpdateAttributes(_) => "updating existing column entry",
        }
    }
}

/// Escape a key for use as a JSON Pointer segment
fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Status string for a bulk patch response
pub fn patch_status(response: &ApiResponse) -> String {
    if response.status != 200 {
        return format!("ERROR: HTTP {}", response.status);
    }

    let data = match response.json_value() {
        Ok(data) => data,
        Err(e) => return format!("ERROR: Response parsing failed - {}", e),
    };

    let Some(resource) = data
        .get("resources")
        .and_then(Value::as_array)
        .and_then(|r| r.first())
    else {
        return "ERROR: No resources in response".to_string();
    };

    let status = resource.get("status").and_then(Value::as_u64).unwrap_or(500);
    if status == 200 {
        return "SUCCESS".to_string();
    }

    let messages: Vec<String> = resource
        .get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|e| {
                    format!(
                        "{}: {}",
                        e.get("code").and_then(Value::as_str).unwrap_or("unknown"),
                        e.get("message").and_then(Value::as_str).unwrap_or("unknown error")
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    let summary = if messages.is_empty() {
        "Unknown error".to_string()
    } else {
        messages.join("; ")
    };

    format!("ERROR: Status {} - {}", status, summary)
}

// ============================================================================
// ROW OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnOutcome {
    pub description: String,
    pub term: String,
    pub classification: String,
    pub data_class: String,
    pub update: String,
}

impl ColumnOutcome {
    /// Same message on every facet and on the update status
    fn failed(message: &str) -> Self {
        let status = format!("ERROR: {}", message);
        ColumnOutcome {
            description: status.clone(),
            term: status.clone(),
            classification: status.clone(),
            data_class: status.clone(),
            update: status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.update == "SUCCESS"
    }

    fn columns(&self) -> [String; 5] {
        [
            self.description.clone(),
            self.term.clone(),
            self.classification.clone(),
            self.data_class.clone(),
            self.update.clone(),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnSummary {
    pub total: usize,
    pub successful: usize,
}

impl ColumnSummary {
    pub fn failed(&self) -> usize {
        self.total - self.successful
    }
}

// ============================================================================
// JOB
// ============================================================================

pub struct ColumnAssignmentJob<'a> {
    api: &'a dyn Transport,
    project_id: String,
    cache: ArtifactCache,
}

impl<'a> ColumnAssignmentJob<'a> {
    pub fn new(api: &'a dyn Transport, project_id: &str) -> Self {
        ColumnAssignmentJob {
            api,
            project_id: project_id.to_string(),
            cache: ArtifactCache::new(),
        }
    }

    /// Fetch terms, classifications and data classes up front
    pub fn preload(&mut self) -> Result<(), ApiError> {
        banner("PRELOADING ALL ARTIFACTS INTO CACHE");
        self.cache.preload(self.api)?;
        for ty in ArtifactType::RESOLVABLE {
            println!("✓ Loaded {} {} artifacts", self.cache.records(ty).len(), ty);
        }
        Ok(())
    }

    pub fn run(&mut self, input: &Path, output: &Path) -> Result<ColumnSummary> {
        println!("Input file: {}", input.display());
        println!("Output file: {}", output.display());

        let rows = read_rows(input, false, MIN_FIELDS)?;

        self.preload()?;

        banner("PROCESSING CSV FILE");

        let mut summary = ColumnSummary::default();
        let mut results = Vec::with_capacity(rows.len());

        for row in &rows {
            let request = ColumnRequest::from_row(row);
            println!(
                "\nProcessing row {}: {}.{}",
                row.number, request.asset_name, request.column_name
            );

            let outcome = self.process(&request)?;

            summary.total += 1;
            if outcome.is_success() {
                summary.successful += 1;
            }

            let mut out = row.fields.clone();
            out.extend(outcome.columns());
            results.push(out);
        }

        println!("\nProcessed {} rows from CSV", summary.total);

        banner("WRITING RESULTS CSV");
        write_rows(output, &OUTPUT_HEADER, &results)?;
        println!("Results written to: {}", output.display());

        println!("\nSUMMARY:");
        println!("Total rows processed: {}", summary.total);
        println!("Successful updates: {}", summary.successful);
        println!("Failed/Warning updates: {}", summary.failed());

        Ok(summary)
    }

    /// Run the lookup / validate / patch sequence for one row.
    ///
    /// Only authentication failures are returned as errors.
    pub fn process(&mut self, request: &ColumnRequest) -> Result<ColumnOutcome, ApiError> {
        let asset = match self.fetch_asset(&request.asset_name) {
            Ok(asset) => asset,
            Err(AssetError::Api(e)) if e.is_fatal() => return Err(e),
            Err(e) => {
                let message = format!("Asset error: {}", e);
                println!("  ✗ {}", message);
                return Ok(ColumnOutcome::failed(&message));
            }
        };

        if !asset.has_column(&request.column_name) {
            let message = format!("Column '{}' not found in asset", request.column_name);
            println!("  ✗ {}", message);
            return Ok(ColumnOutcome::failed(&message));
        }

        let mut data = ColumnData::default();

        let description = request.description.trim();
        let description_result = if description.is_empty() {
            "SKIPPED: No description data".to_string()
        } else {
            data.description = Some(description.to_string());
            "SUCCESS".to_string()
        };

        let term_result = self.resolve_facet(ArtifactType::GlossaryTerm, &request.term, "term", |record| {
            data.terms = Some(json!([{
                "term_display_name": request.term.name,
                "term_id": record.global_id,
            }]));
        })?;

        let classification_result = self.resolve_facet(
            ArtifactType::Classification,
            &request.classification,
            "classification",
            |record| {
                data.classifications = Some(json!([{
                    "id": record.artifact_id,
                    "global_id": record.global_id,
                    "name": request.classification.name,
                }]));
            },
        )?;

        let data_class_result = self.resolve_facet(
            ArtifactType::DataClass,
            &request.data_class,
            "data class",
            |record| {
                data.data_class = Some(json!({
                    "selected_data_class": {
                        "id": record.global_id,
                        "name": request.data_class.name,
                        "setByUser": true,
                    }
                }));
            },
        )?;

        let update = if data.is_empty() {
            println!("  ! No valid assignments found for {}", request.column_name);
            "WARNING: No valid assignments found".to_string()
        } else {
            let state = ColumnInfoState::of(&asset, &request.column_name);
            let plan = PatchPlan::decide(state, &request.column_name, &data);
            println!("  → {} ({})", plan.describe(), request.column_name);
            self.apply(&asset.id, &plan)?
        };

        match update.as_str() {
            "SUCCESS" => println!("✓ Updated {}.{}", request.asset_name, request.column_name),
            other => println!("✗ {}.{}: {}", request.asset_name, request.column_name, other),
        }

        Ok(ColumnOutcome {
            description: description_result,
            term: term_result,
            classification: classification_result,
            data_class: data_class_result,
            update,
        })
    }

    fn fetch_asset(&self, name: &str) -> Result<Asset, AssetError> {
        let asset_id = find_asset_id(self.api, &self.project_id, name, AssetMatch::Unique)?;
        Asset::fetch(self.api, &self.project_id, &asset_id)
    }

    /// Resolve one optional facet, calling `assign` on success
    fn resolve_facet<F>(
        &mut self,
        artifact_type: ArtifactType,
        wanted: &ArtifactRef,
        what: &str,
        assign: F,
    ) -> Result<String, ApiError>
    where
        F: FnOnce(&ArtifactRecord),
    {
        if !wanted.is_complete() {
            return Ok(format!("SKIPPED: No {} data", what));
        }

        self.cache.load(self.api, artifact_type)?;

        match self.cache.resolve(artifact_type, &wanted.name, &wanted.category) {
            Ok(record) => {
                println!("  ✓ {}: {} (Category: {})", artifact_type.label(), wanted.name, wanted.category);
                assign(record);
                Ok("SUCCESS".to_string())
            }
            Err(e) => {
                println!("  ✗ {}", e);
                Ok(format!("ERROR: {}", e))
            }
        }
    }

    fn apply(&self, asset_id: &str, plan: &PatchPlan) -> Result<String, ApiError> {
        let payload = json!({
            "resources": [{
                "asset_id": asset_id,
                "operations": plan.operations(),
            }]
        });

        match self.api.post(
            BULK_PATCH_ENDPOINT,
            &[("project_id", self.project_id.clone())],
            &payload,
        ) {
            Ok(response) => {
                let status = patch_status(&response);
                if status != "SUCCESS" {
                    warn!(asset_id, http = response.status, "bulk patch rejected");
                } else {
                    info!(asset_id, "bulk patch applied");
                }
                Ok(status)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(format!("ERROR: {}", e)),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
