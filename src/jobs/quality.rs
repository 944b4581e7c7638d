// ✅ Data Quality Rules - get-or-create definitions, then bind rules to columns
//
// Input (header row skipped, 7 columns):
//   rule name, description, dimension, definition name,
//   definition expression, asset name, fields to bind
//
// Dimensions and definitions are cached for the whole run. Definitions
// created by this job are appended to the cache so later rows reuse them.

use crate::assets::{find_asset_id, Asset, AssetError, AssetMatch};
use crate::client::{ApiError, ApiResponse, Transport};
use crate::jobs::{banner, read_rows, write_rows, InputRow};
use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{info, warn};

pub const MIN_FIELDS: usize = 7;

const DIMENSIONS_ENDPOINT: &str = "/data_quality/v4/dimensions";
const PAGE_LIMIT: usize = 200;

// Fixed output sink for failing records
const OUTPUT_CONNECTION_ID: &str = "acb03b96-1d60-40bc-aae3-46ab56071832";
const OUTPUT_SCHEMA_NAME: &str = "BIDEMODATA";
const OUTPUT_TABLE_NAME: &str = "DQ_OUTPUT1";
const FAILED_RECORDS_COUNT: u32 = 5;

/// Output table column name → rule metric
const METRIC_COLUMNS: [(&str, &str); 16] = [
    ("Bound_to_Asset_ID", "definition_bound_asset_id"),
    ("Data_quality_definition_ID", "definition_id"),
    ("Bound_to_column", "definition_bound_column"),
    ("Data_quality_definition", "definition_name"),
    ("Failing_rules", "failing_rules"),
    ("Job_ID", "job_id"),
    ("Job_run_ID", "job_run_id"),
    ("Passing_rules", "passing_rules"),
    ("Percent_failing_rules", "percent_failing_rules"),
    ("Percent_passing_rules", "percent_passing_rules"),
    ("Project_ID", "project_id"),
    ("Record_ID", "record_id"),
    ("Rule_ID", "rule_id"),
    ("Rule_name", "rule_name"),
    ("System_date", "system_date"),
    ("System_time", "system_time"),
];

pub const OUTPUT_HEADER: [&str; 14] = [
    "Data Quality Rule",
    "Description",
    "Data Quality Dimension",
    "Data Quality Definitions",
    "Data Quality Definitions Rule Expression",
    "Asset Name",
    "Bound Expressions",
    "Definition Status",
    "Definition ID",
    "Rule Status",
    "Rule ID",
    "Is Valid",
    "Bound Expression",
    "Error Message",
];

// ============================================================================
// DIMENSIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Dimension {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct DimensionPage {
    #[serde(default)]
    dimensions: Vec<Dimension>,
}

/// Read-through cache of quality dimensions. A failed fetch is not cached.
#[derive(Debug, Default)]
pub struct DimensionCache {
    dimensions: Option<Vec<Dimension>>,
}

impl DimensionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.dimensions.is_some()
    }

    pub fn load(&mut self, api: &dyn Transport) -> Result<&[Dimension], ApiError> {
        if self.dimensions.is_none() {
            let response = api.get(DIMENSIONS_ENDPOINT, &[("limit", PAGE_LIMIT.to_string())])?;

            if response.status != 200 {
                warn!(status = response.status, "failed to load data quality dimensions");
                return Ok(&[]);
            }

            match response.json::<DimensionPage>() {
                Ok(page) => {
                    info!(count = page.dimensions.len(), "loaded data quality dimensions");
                    self.dimensions = Some(page.dimensions);
                }
                Err(e) => {
                    warn!(error = %e, "unreadable dimensions response");
                    return Ok(&[]);
                }
            }
        }

        Ok(self.dimensions.as_deref().unwrap_or(&[]))
    }

    /// Case-insensitive match on the dimension name
    pub fn find(&mut self, api: &dyn Transport, name: &str) -> Result<Option<Dimension>, ApiError> {
        let wanted = name.to_lowercase();
        Ok(self
            .load(api)?
            .iter()
            .find(|d| d.name.to_lowercase() == wanted)
            .cloned())
    }
}

// ============================================================================
// DEFINITIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Definition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub expression: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DefinitionPage {
    #[serde(default)]
    definitions: Vec<Definition>,
    #[serde(default)]
    next: Option<Value>,
}

impl DefinitionPage {
    /// Cursor for the next page, if the server reported one
    fn next_start(&self) -> Option<String> {
        match self.next.as_ref()?.get("start")? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Project definitions, fetched with cursor paging and kept for the run
#[derive(Debug, Default)]
pub struct DefinitionCache {
    definitions: Option<Vec<Definition>>,
}

impl DefinitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.definitions.is_some()
    }

    /// Load unless cached; `force_refresh` refetches. A failed page leaves the
    /// cache untouched and yields an empty list.
    pub fn load(
        &mut self,
        api: &dyn Transport,
        project_id: &str,
        force_refresh: bool,
    ) -> Result<&[Definition], ApiError> {
        if self.definitions.is_none() || force_refresh {
            match fetch_definitions(api, project_id)? {
                Some(definitions) => {
                    info!(count = definitions.len(), "loaded data quality definitions");
                    self.definitions = Some(definitions);
                }
                None => return Ok(&[]),
            }
        }

        Ok(self.definitions.as_deref().unwrap_or(&[]))
    }

    /// Exact, case-sensitive name match
    pub fn find(
        &mut self,
        api: &dyn Transport,
        project_id: &str,
        name: &str,
    ) -> Result<Option<Definition>, ApiError> {
        Ok(self
            .load(api, project_id, false)?
            .iter()
            .find(|d| d.name == name)
            .cloned())
    }

    /// Record a definition created during this run; no-op until loaded
    pub fn append(&mut self, definition: Definition) {
        if let Some(definitions) = self.definitions.as_mut() {
            definitions.push(definition);
        }
    }
}

fn definitions_endpoint(project_id: &str) -> String {
    format!("/data_quality/v3/projects/{}/definitions", project_id)
}

fn fetch_definitions(api: &dyn Transport, project_id: &str) -> Result<Option<Vec<Definition>>, ApiError> {
    let endpoint = definitions_endpoint(project_id);
    let mut all = Vec::new();
    let mut start: Option<String> = None;

    loop {
        let mut query = vec![("limit", PAGE_LIMIT.to_string())];
        if let Some(cursor) = &start {
            query.push(("start", cursor.clone()));
        }

        let response = api.get(&endpoint, &query)?;
        if response.status != 200 {
            warn!(status = response.status, "failed to load data quality definitions");
            return Ok(None);
        }

        let page = match response.json::<DefinitionPage>() {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "unreadable definitions page");
                return Ok(None);
            }
        };

        start = page.next_start();
        all.extend(page.definitions);

        if start.is_none() {
            break;
        }
    }

    Ok(Some(all))
}

// ============================================================================
// FIELD BINDING
// ============================================================================

/// `"colA+colB|colC;colD"` → `["colA", "colB", "colC", "colD"]`
pub fn parse_bound_fields(fields: &str) -> Vec<String> {
    fields
        .split(['+', '|', ';', ','])
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// `field1..fieldN` bound positionally to the asset's columns
pub fn column_bindings(asset_id: &str, columns: &[String]) -> Vec<Value> {
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            json!({
                "variable_name": format!("field{}", i + 1),
                "target": {
                    "type": "column",
                    "data_asset": {"id": asset_id},
                    "column_name": column,
                }
            })
        })
        .collect()
}

pub fn rule_payload(
    rule: &RuleRequest,
    dimension_id: &str,
    definition_id: &str,
    asset_id: &str,
    columns: &[String],
) -> Value {
    let metric_columns: Vec<Value> = METRIC_COLUMNS
        .iter()
        .map(|(name, metric)| json!({"name": name, "type": "metric", "metric": metric}))
        .collect();

    json!({
        "name": rule.rule_name,
        "description": rule.description,
        "dimension": {"id": dimension_id},
        "input": {
            "definitions": [{
                "definition": {"id": definition_id},
                "disambiguator": 0,
                "bindings": column_bindings(asset_id, columns),
            }]
        },
        "output": {
            "database": {
                "location": {
                    "connection": {"id": OUTPUT_CONNECTION_ID},
                    "schema_name": OUTPUT_SCHEMA_NAME,
                    "table_name": OUTPUT_TABLE_NAME,
                },
                "records_type": "failing_records",
                "update_type": "append",
            },
            "maximum_record_count": FAILED_RECORDS_COUNT,
            "columns": metric_columns,
            "inherit_project_level_output_setting": false,
            "create_table_only_when_issues_are_found": false,
            "import_table_in_project": true,
        },
        "apply_all_present_dimensions": false,
    })
}

/// `status - code: message` from the first error, else the (truncated) body
pub fn rule_error_message(response: &ApiResponse) -> String {
    let data = match response.json_value() {
        Ok(data) => data,
        Err(_) => return format!("{} - {}", response.status, response.snippet(200)),
    };

    let first = data
        .get("errors")
        .and_then(Value::as_array)
        .and_then(|e| e.first());

    match (error_field(first, "code"), error_field(first, "message")) {
        (code, message) if !code.is_empty() && !message.is_empty() => {
            format!("{} - {}: {}", response.status, code, message)
        }
        (_, message) if !message.is_empty() => format!("{} - {}", response.status, message),
        _ => response.status.to_string(),
    }
}

fn error_field<'a>(error: Option<&'a Value>, key: &str) -> &'a str {
    error
        .and_then(|e| e.get(key))
        .and_then(Value::as_str)
        .unwrap_or("")
}

// ============================================================================
// ROWS AND OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RuleRequest {
    pub rule_name: String,
    pub description: String,
    pub dimension: String,
    pub definition_name: String,
    pub expression: String,
    pub asset_name: String,
    pub fields: String,
}

impl RuleRequest {
    pub fn from_row(row: &InputRow) -> Self {
        RuleRequest {
            rule_name: row.field(0).to_string(),
            description: row.field(1).to_string(),
            dimension: row.field(2).to_string(),
            definition_name: row.field(3).to_string(),
            expression: row.field(4).to_string(),
            asset_name: row.field(5).to_string(),
            fields: row.field(6).to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleOutcome {
    pub definition_status: String,
    pub definition_id: String,
    pub rule_status: String,
    pub rule_id: String,
    pub is_valid: String,
    pub bound_expression: String,
    pub error_message: String,
}

impl RuleOutcome {
    fn failed(message: &str) -> Self {
        println!("  ✗ {}", message);
        RuleOutcome {
            definition_status: format!("ERROR: {}", message),
            rule_status: format!("ERROR: {}", message),
            error_message: message.to_string(),
            ..RuleOutcome::default()
        }
    }

    fn columns(&self) -> [String; 7] {
        [
            self.definition_status.clone(),
            self.definition_id.clone(),
            self.rule_status.clone(),
            self.rule_id.clone(),
            self.is_valid.clone(),
            self.bound_expression.clone(),
            self.error_message.clone(),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSummary {
    pub total: usize,
    pub definitions_ok: usize,
    pub definitions_existing: usize,
    pub definitions_created: usize,
    pub rules_ok: usize,
}

impl RuleSummary {
    fn record(&mut self, outcome: &RuleOutcome) {
        self.total += 1;
        if outcome.definition_status.starts_with("SUCCESS") {
            self.definitions_ok += 1;
        }
        if outcome.definition_status.contains("Found existing") {
            self.definitions_existing += 1;
        }
        if outcome.definition_status.contains("Created new") {
            self.definitions_created += 1;
        }
        if outcome.rule_status == "SUCCESS" {
            self.rules_ok += 1;
        }
    }
}

// ============================================================================
// JOB
// ============================================================================

pub struct DataQualityJob<'a> {
    api: &'a dyn Transport,
    project_id: String,
    dimensions: DimensionCache,
    definitions: DefinitionCache,
}

impl<'a> DataQualityJob<'a> {
    pub fn new(api: &'a dyn Transport, project_id: &str) -> Self {
        DataQualityJob {
            api,
            project_id: project_id.to_string(),
            dimensions: DimensionCache::new(),
            definitions: DefinitionCache::new(),
        }
    }

    pub fn preload(&mut self) -> Result<(), ApiError> {
        let dimensions = self.dimensions.load(self.api)?.len();
        println!("Loaded {} data quality dimensions", dimensions);

        let definitions = self.definitions.load(self.api, &self.project_id, false)?.len();
        println!("Loaded {} data quality definitions", definitions);
        Ok(())
    }

    pub fn run(&mut self, input: &Path, output: &Path) -> Result<RuleSummary> {
        banner("DATA QUALITY RULES PROCESSING");
        println!("Input file: {}", input.display());
        println!("Output file: {}", output.display());

        let rows = read_rows(input, true, MIN_FIELDS)?;
        self.preload()?;

        banner("PROCESSING DATA QUALITY RULES CSV");

        let mut summary = RuleSummary::default();
        let mut results = Vec::with_capacity(rows.len());

        for row in &rows {
            let request = RuleRequest::from_row(row);
            println!("\nProcessing row {}: {}", row.number, request.rule_name);

            let outcome = self.process(&request)?;
            summary.record(&outcome);

            let mut out = row.fields.clone();
            out.extend(outcome.columns());
            results.push(out);
        }

        write_rows(output, &OUTPUT_HEADER, &results)?;

        println!("\nSUMMARY:");
        println!("Total rows processed: {}", summary.total);
        println!("Successful definitions (found/created): {}", summary.definitions_ok);
        println!("  - Existing definitions found: {}", summary.definitions_existing);
        println!("  - New definitions created: {}", summary.definitions_created);
        println!("Successful rules: {}", summary.rules_ok);
        println!("Results saved to: {}", output.display());

        Ok(summary)
    }

    /// Validate, get-or-create the definition, then create the rule.
    ///
    /// Only authentication failures are returned as errors.
    pub fn process(&mut self, request: &RuleRequest) -> Result<RuleOutcome, ApiError> {
        let Some(dimension) = self.dimensions.find(self.api, &request.dimension)? else {
            return Ok(RuleOutcome::failed(&format!(
                "Dimension '{}' not found",
                request.dimension
            )));
        };

        let asset = match self.validated_asset(request)? {
            Ok(asset) => asset,
            Err(message) => return Ok(RuleOutcome::failed(&message)),
        };
        let columns = parse_bound_fields(&request.fields);

        println!("  → Getting or creating definition: {}", request.definition_name);
        let Some((definition_id, existed)) = self.get_or_create_definition(request, &dimension.id)? else {
            return Ok(RuleOutcome {
                definition_status: "ERROR: Failed to get/create definition".to_string(),
                rule_status: "SKIPPED: Definition get/create failed".to_string(),
                error_message: "Definition get/create failed".to_string(),
                ..RuleOutcome::default()
            });
        };

        let mut outcome = RuleOutcome {
            definition_status: if existed {
                "SUCCESS - Found existing".to_string()
            } else {
                "SUCCESS - Created new".to_string()
            },
            definition_id: definition_id.clone(),
            ..RuleOutcome::default()
        };

        println!("  → Creating rule: {}", request.rule_name);
        let payload = rule_payload(request, &dimension.id, &definition_id, &asset.id, &columns);
        let endpoint = format!("/data_quality/v3/projects/{}/rules", self.project_id);

        let response = match self.api.post(&endpoint, &[], &payload) {
            Ok(response) => response,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                outcome.rule_status = "ERROR".to_string();
                outcome.is_valid = "false".to_string();
                outcome.error_message = e.to_string();
                println!("  ✗ Error creating rule '{}': {}", request.rule_name, e);
                return Ok(outcome);
            }
        };

        if response.status == 201 {
            let data = response.json_value().unwrap_or(Value::Null);
            outcome.rule_status = "SUCCESS".to_string();
            outcome.rule_id = data.get("id").and_then(Value::as_str).unwrap_or("").to_string();
            outcome.is_valid = data
                .get("is_valid")
                .and_then(Value::as_bool)
                .unwrap_or(false)
                .to_string();
            outcome.bound_expression = data
                .pointer("/input/definitions/0/bound_expression")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();

            println!("  ✓ Created rule '{}' with ID: {}", request.rule_name, outcome.rule_id);
            println!("    • Is Valid: {}", outcome.is_valid);
            println!("    • Bound Expression: {}", outcome.bound_expression);
        } else {
            outcome.rule_status = "ERROR".to_string();
            outcome.is_valid = "false".to_string();
            outcome.error_message = rule_error_message(&response);
            println!(
                "  ✗ Error creating rule '{}': {}",
                request.rule_name, outcome.error_message
            );
        }

        Ok(outcome)
    }

    /// Find the asset and check every bound column exists on it.
    ///
    /// The inner `Err` is a row-level message.
    fn validated_asset(&self, request: &RuleRequest) -> Result<Result<Asset, String>, ApiError> {
        let lookup = find_asset_id(self.api, &self.project_id, &request.asset_name, AssetMatch::First);
        let asset_id = match lookup {
            Ok(id) => id,
            Err(AssetError::Api(e)) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(Err(format!("Asset error: {}", e))),
        };

        let columns = parse_bound_fields(&request.fields);
        if columns.is_empty() {
            return Ok(Err("No valid column names found in bound expressions".to_string()));
        }

        println!("  → Validating columns: {}", columns.join(", "));
        let asset = match Asset::fetch(self.api, &self.project_id, &asset_id) {
            Ok(asset) => asset,
            Err(AssetError::Api(e)) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(Err(format!("Asset error: {}", e))),
        };

        let missing = asset.missing_columns(&columns);
        if !missing.is_empty() {
            return Ok(Err(format!(
                "Column(s) not found in asset '{}': {}",
                request.asset_name,
                missing.join(", ")
            )));
        }

        println!("  ✓ All columns validated in asset '{}'", request.asset_name);
        Ok(Ok(asset))
    }

    /// Definition id and whether it already existed; `None` when creation failed
    fn get_or_create_definition(
        &mut self,
        request: &RuleRequest,
        dimension_id: &str,
    ) -> Result<Option<(String, bool)>, ApiError> {
        let name = &request.definition_name;

        if let Some(existing) = self.definitions.find(self.api, &self.project_id, name)? {
            println!("  ✓ Found existing definition '{}' with ID: {}", name, existing.id);
            return Ok(Some((existing.id, true)));
        }

        println!("  → Definition '{}' not found, creating new one...", name);
        let payload = json!({
            "name": name,
            "description": name,
            "expression": request.expression,
            "dimension": {"id": dimension_id},
        });

        let response = match self.api.post(&definitions_endpoint(&self.project_id), &[], &payload) {
            Ok(response) => response,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                println!("  ✗ Error creating definition '{}': {}", name, e);
                return Ok(None);
            }
        };

        if response.status != 201 {
            println!(
                "  ✗ Error creating definition '{}': {} - {}",
                name, response.status, response.body
            );
            return Ok(None);
        }

        let id = response
            .json_value()
            .ok()
            .and_then(|data| data.get("id").and_then(Value::as_str).map(str::to_string));
        let Some(id) = id else {
            println!("  ✗ Definition '{}' created but no id returned", name);
            return Ok(None);
        };

        println!("  ✓ Created definition '{}' with ID: {}", name, id);
        self.definitions.append(Definition {
            id: id.clone(),
            name: name.clone(),
            expression: Some(request.expression.clone()),
        });

        Ok(Some((id, false)))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_files::{read_csv, Scratch};
    use crate::testing::MockTransport;
    use reqwest::Method;

    const ASSET_SEARCH: &str = "/v2/asset_types/data_asset/search";
    const DEFINITIONS: &str = "/data_quality/v3/projects/p-1/definitions";
    const RULES: &str = "/data_quality/v3/projects/p-1/rules";

    fn request(definition: &str, fields: &str) -> RuleRequest {
        RuleRequest {
            rule_name: "Email not null".into(),
            description: "Emails must be present".into(),
            dimension: "completeness".into(),
            definition_name: definition.into(),
            expression: "field1 IS NOT NULL".into(),
            asset_name: "CUSTOMERS".into(),
            fields: fields.into(),
        }
    }

    /// Platform with dimension "Completeness", one definition and asset CUSTOMERS(EMAIL, ID)
    fn platform() -> MockTransport {
        let mock = MockTransport::new();
        mock.on(
            Method::GET,
            DIMENSIONS_ENDPOINT,
            200,
            json!({"dimensions": [{"id": "dim-1", "name": "Completeness"}]}),
        );
        mock.on(
            Method::GET,
            DEFINITIONS,
            200,
            json!({"definitions": [{"id": "def-1", "name": "Not null"}]}),
        );
        mock.on(
            Method::POST,
            ASSET_SEARCH,
            200,
            json!({"total_rows": 3, "results": [{"metadata": {"asset_id": "a-1"}}]}),
        );
        mock.on(
            Method::GET,
            "/v2/assets/a-1",
            200,
            json!({"entity": {"data_asset": {"columns": [{"name": "EMAIL"}, {"name": "ID"}]}}}),
        );
        mock.on(
            Method::POST,
            RULES,
            201,
            json!({"id": "rule-1", "is_valid": true, "input": {"definitions": [{"bound_expression": "EMAIL IS NOT NULL"}]}}),
        );
        mock
    }

    #[test]
    fn test_parse_bound_fields() {
        assert_eq!(
            parse_bound_fields("colA+colB|colC;colD"),
            vec!["colA", "colB", "colC", "colD"]
        );
        assert_eq!(parse_bound_fields(" EMAIL "), vec!["EMAIL"]);
        assert_eq!(parse_bound_fields("a + | b"), vec!["a", "b"]);
        assert!(parse_bound_fields("").is_empty());
        assert!(parse_bound_fields(" + ; ").is_empty());
    }

    #[test]
    fn test_column_bindings_are_positional() {
        let bindings = column_bindings("a-1", &["EMAIL".to_string(), "ID".to_string()]);
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0]["variable_name"], "field1");
        assert_eq!(bindings[1]["variable_name"], "field2");
        assert_eq!(bindings[1]["target"]["column_name"], "ID");
        assert_eq!(bindings[1]["target"]["data_asset"]["id"], "a-1");
        assert_eq!(bindings[0]["target"]["type"], "column");
    }

    #[test]
    fn test_rule_payload_output_sink() {
        let payload = rule_payload(&request("Not null", "EMAIL"), "dim-1", "def-1", "a-1", &["EMAIL".to_string()]);

        let location = &payload["output"]["database"]["location"];
        assert_eq!(location["connection"]["id"], OUTPUT_CONNECTION_ID);
        assert_eq!(location["schema_name"], "BIDEMODATA");
        assert_eq!(location["table_name"], "DQ_OUTPUT1");
        assert_eq!(payload["output"]["database"]["records_type"], "failing_records");
        assert_eq!(payload["output"]["maximum_record_count"], 5);
        assert_eq!(payload["output"]["columns"].as_array().unwrap().len(), 16);
        assert_eq!(payload["output"]["columns"][12]["metric"], "rule_id");
        assert_eq!(payload["input"]["definitions"][0]["disambiguator"], 0);
        assert_eq!(payload["apply_all_present_dimensions"], false);
    }

    #[test]
    fn test_dimension_lookup_is_case_insensitive_and_cached() {
        let mock = platform();
        let mut cache = DimensionCache::new();

        assert_eq!(cache.find(&mock, "COMPLETENESS").unwrap().unwrap().id, "dim-1");
        assert!(cache.find(&mock, "validity").unwrap().is_none());
        assert_eq!(mock.calls_to(Method::GET, DIMENSIONS_ENDPOINT).len(), 1);
        assert_eq!(
            mock.calls_to(Method::GET, DIMENSIONS_ENDPOINT)[0].query_value("limit"),
            Some("200")
        );
    }

    #[test]
    fn test_failed_dimension_fetch_is_retried() {
        let mock = MockTransport::new();
        mock.on_text(Method::GET, DIMENSIONS_ENDPOINT, 500, "down");
        mock.on(Method::GET, DIMENSIONS_ENDPOINT, 200, json!({"dimensions": [{"id": "d", "name": "Validity"}]}));

        let mut cache = DimensionCache::new();
        assert!(cache.load(&mock).unwrap().is_empty());
        assert!(!cache.is_loaded());
        assert_eq!(cache.load(&mock).unwrap().len(), 1);
    }

    #[test]
    fn test_definitions_follow_cursor() {
        let mock = MockTransport::new();
        mock.on(
            Method::GET,
            DEFINITIONS,
            200,
            json!({"definitions": [{"id": "d1", "name": "One"}], "next": {"start": "cursor-2"}}),
        );
        mock.on(
            Method::GET,
            DEFINITIONS,
            200,
            json!({"definitions": [{"id": "d2", "name": "Two"}]}),
        );

        let mut cache = DefinitionCache::new();
        let names: Vec<String> = cache
            .load(&mock, "p-1", false)
            .unwrap()
            .iter()
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(names, vec!["One", "Two"]);

        let calls = mock.calls_to(Method::GET, DEFINITIONS);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].query_value("start"), None);
        assert_eq!(calls[1].query_value("start"), Some("cursor-2"));
    }

    #[test]
    fn test_definition_lookup_is_exact_and_refreshable() {
        let mock = platform();
        let mut cache = DefinitionCache::new();

        assert!(cache.find(&mock, "p-1", "Not null").unwrap().is_some());
        assert!(cache.find(&mock, "p-1", "not null").unwrap().is_none());
        assert_eq!(mock.calls_to(Method::GET, DEFINITIONS).len(), 1);

        cache.load(&mock, "p-1", true).unwrap();
        assert_eq!(mock.calls_to(Method::GET, DEFINITIONS).len(), 2);
    }

    #[test]
    fn test_created_definition_is_reused_by_later_rows() {
        let mock = platform();
        mock.on(Method::POST, DEFINITIONS, 201, json!({"id": "def-new"}));
        let mut job = DataQualityJob::new(&mock, "p-1");

        let first = job.process(&request("Email present", "EMAIL")).unwrap();
        assert_eq!(first.definition_status, "SUCCESS - Created new");
        assert_eq!(first.definition_id, "def-new");

        let second = job.process(&request("Email present", "EMAIL")).unwrap();
        assert_eq!(second.definition_status, "SUCCESS - Found existing");
        assert_eq!(second.definition_id, "def-new");

        assert_eq!(mock.calls_to(Method::POST, DEFINITIONS).len(), 1);
        let body = mock.calls_to(Method::POST, DEFINITIONS)[0].body.clone().unwrap();
        assert_eq!(body["description"], "Email present");
        assert_eq!(body["dimension"]["id"], "dim-1");
    }

    #[test]
    fn test_successful_rule() {
        let mock = platform();
        let mut job = DataQualityJob::new(&mock, "p-1");

        let outcome = job.process(&request("Not null", "EMAIL+ID")).unwrap();
        assert_eq!(outcome.definition_status, "SUCCESS - Found existing");
        assert_eq!(outcome.rule_status, "SUCCESS");
        assert_eq!(outcome.rule_id, "rule-1");
        assert_eq!(outcome.is_valid, "true");
        assert_eq!(outcome.bound_expression, "EMAIL IS NOT NULL");
        assert_eq!(outcome.error_message, "");

        let rule = mock.calls_to(Method::POST, RULES)[0].body.clone().unwrap();
        let bindings = &rule["input"]["definitions"][0]["bindings"];
        assert_eq!(bindings[0]["target"]["column_name"], "EMAIL");
        assert_eq!(bindings[1]["variable_name"], "field2");
        assert_eq!(rule["input"]["definitions"][0]["definition"]["id"], "def-1");

        // First-hit asset lookup
        let search = &mock.calls_to(Method::POST, ASSET_SEARCH)[0];
        assert_eq!(search.body.as_ref().unwrap()["limit"], 1);
    }

    #[test]
    fn test_unknown_dimension_short_circuits() {
        let mock = platform();
        let mut job = DataQualityJob::new(&mock, "p-1");

        let mut req = request("Not null", "EMAIL");
        req.dimension = "Timeliness".into();
        let outcome = job.process(&req).unwrap();

        assert_eq!(outcome.definition_status, "ERROR: Dimension 'Timeliness' not found");
        assert_eq!(outcome.rule_status, "ERROR: Dimension 'Timeliness' not found");
        assert_eq!(outcome.error_message, "Dimension 'Timeliness' not found");
        assert!(mock.calls_to(Method::POST, ASSET_SEARCH).is_empty());
    }

    #[test]
    fn test_missing_columns_rejected_before_any_mutation() {
        let mock = platform();
        let mut job = DataQualityJob::new(&mock, "p-1");

        let outcome = job.process(&request("Brand new", "EMAIL|PHONE;FAX")).unwrap();
        assert_eq!(
            outcome.error_message,
            "Column(s) not found in asset 'CUSTOMERS': PHONE, FAX"
        );
        assert!(mock.calls_to(Method::POST, DEFINITIONS).is_empty());
        assert!(mock.calls_to(Method::POST, RULES).is_empty());
    }

    #[test]
    fn test_empty_fields_rejected() {
        let mock = platform();
        let mut job = DataQualityJob::new(&mock, "p-1");

        let outcome = job.process(&request("Not null", " ; ")).unwrap();
        assert_eq!(outcome.error_message, "No valid column names found in bound expressions");
        assert!(mock.calls_to(Method::POST, RULES).is_empty());
    }

    #[test]
    fn test_asset_not_found() {
        let mock = platform();
        mock.on(Method::POST, ASSET_SEARCH, 200, json!({"total_rows": 0, "results": []}));
        let mut job = DataQualityJob::new(&mock, "p-1");

        // First queued hit is consumed by this row, the empty result by the next
        job.process(&request("Not null", "EMAIL")).unwrap();
        let outcome = job.process(&request("Not null", "EMAIL")).unwrap();
        assert_eq!(outcome.error_message, "Asset error: Asset CUSTOMERS is not found");
    }

    #[test]
    fn test_failed_definition_skips_rule() {
        let mock = platform();
        mock.on_text(Method::POST, DEFINITIONS, 400, "bad expression");
        let mut job = DataQualityJob::new(&mock, "p-1");

        let outcome = job.process(&request("Broken", "EMAIL")).unwrap();
        assert_eq!(outcome.definition_status, "ERROR: Failed to get/create definition");
        assert_eq!(outcome.rule_status, "SKIPPED: Definition get/create failed");
        assert_eq!(outcome.error_message, "Definition get/create failed");
        assert!(mock.calls_to(Method::POST, RULES).is_empty());
    }

    #[test]
    fn test_rule_error_messages() {
        let coded = ApiResponse::new(
            400,
            json!({"errors": [{"code": "invalid_binding", "message": "field2 unbound"}]}).to_string(),
        );
        assert_eq!(rule_error_message(&coded), "400 - invalid_binding: field2 unbound");

        let message_only = ApiResponse::new(409, json!({"errors": [{"message": "duplicate"}]}).to_string());
        assert_eq!(rule_error_message(&message_only), "409 - duplicate");

        let no_errors = ApiResponse::new(500, json!({}).to_string());
        assert_eq!(rule_error_message(&no_errors), "500");

        let text = ApiResponse::new(502, "x".repeat(300));
        let message = rule_error_message(&text);
        assert!(message.starts_with("502 - xxx"));
        assert!(message.ends_with("..."));
        assert_eq!(message.len(), "502 - ".len() + 203);
    }

    #[test]
    fn test_rule_rejection_is_reported() {
        let mock = platform();
        mock.on(
            Method::POST,
            RULES,
            400,
            json!({"errors": [{"code": "invalid", "message": "bad binding"}]}),
        );
        let mut job = DataQualityJob::new(&mock, "p-1");

        // The 201 queued by platform() answers the first call
        job.process(&request("Not null", "EMAIL")).unwrap();
        let outcome = job.process(&request("Not null", "EMAIL")).unwrap();
        assert_eq!(outcome.definition_status, "SUCCESS - Found existing");
        assert_eq!(outcome.rule_status, "ERROR");
        assert_eq!(outcome.is_valid, "false");
        assert_eq!(outcome.error_message, "400 - invalid: bad binding");
    }

    #[test]
    fn test_run_skips_header_and_writes_results() {
        let scratch = Scratch::new();
        let input = scratch.write(
            "dq_rules.csv",
            "Rule,Description,Dimension,Definition,Expression,Asset,Fields\n\
             Email not null,Emails present,Completeness,Not null,field1 IS NOT NULL,CUSTOMERS,EMAIL\n",
        );
        let output = scratch.path("dq_rules_out.csv");

        let mock = platform();
        let mut job = DataQualityJob::new(&mock, "p-1");
        let summary = job.run(&input, &output).unwrap();

        assert_eq!(summary.total, 1);
        assert_eq!(summary.definitions_existing, 1);
        assert_eq!(summary.rules_ok, 1);

        let rows = read_csv(&output);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], OUTPUT_HEADER.to_vec());
        assert_eq!(rows[1][7], "SUCCESS - Found existing");
        assert_eq!(rows[1][10], "rule-1");
    }
}
