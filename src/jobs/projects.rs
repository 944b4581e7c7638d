// 📁 Projects - find-or-create projects and add collaborators in one batch
//
// Input (no header, 3 columns): project name, description, collaborators
// Collaborators are emails or usernames separated by "|" or ";".

use crate::client::{ApiError, ApiResponse, Transport};
use crate::jobs::{banner, read_rows, write_rows, InputRow};
use anyhow::Result;
use serde_json::{json, Value};
use std::path::Path;
use tracing::warn;

pub const MIN_FIELDS: usize = 3;

const PROJECTS_ENDPOINT: &str = "/v2/projects";
const CREATE_PROJECT_ENDPOINT: &str = "/transactional/v2/projects";
const DEFAULT_DESCRIPTION: &str = "A project description.";
const MEMBER_ROLE: &str = "editor";

pub const OUTPUT_HEADER: [&str; 7] = [
    "Project Name",
    "Project Description",
    "Collaborators",
    "Project ID",
    "Project Status",
    "Collaborator Details",
    "Overall Status",
];

// ============================================================================
// PARSING
// ============================================================================

/// Split on "|" if present, else on ";", else treat as a single entry
pub fn parse_collaborators(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    let parts: Vec<&str> = if raw.contains('|') {
        raw.split('|').collect()
    } else if raw.contains(';') {
        raw.split(';').collect()
    } else {
        vec![raw]
    };

    parts
        .into_iter()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Local part of an email, or the input unchanged
pub fn username_from_email(value: &str) -> &str {
    value.split('@').next().unwrap_or(value)
}

/// Text of a platform error body: `reason`, then `message`, then the raw body.
/// `None` when the body is not JSON.
fn error_reason(response: &ApiResponse) -> Option<String> {
    let data = response.json_value().ok()?;
    let text = ["reason", "message"]
        .iter()
        .find_map(|key| data.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| response.body.clone());
    Some(text)
}

// ============================================================================
// PLATFORM CALLS
// ============================================================================

/// A project found by exact name, with its active user members
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRecord {
    pub id: String,
    pub members: Vec<String>,
}

/// Exact-name project lookup. Lookup failures count as "not found".
pub fn find_project(api: &dyn Transport, name: &str) -> Result<Option<ProjectRecord>, ApiError> {
    let query = [
        ("name", name.to_string()),
        ("match", "exact".to_string()),
        ("include", "members".to_string()),
    ];

    let response = match api.get(PROJECTS_ENDPOINT, &query) {
        Ok(response) => response,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            warn!(project = name, error = %e, "project lookup failed");
            return Ok(None);
        }
    };

    if response.status != 200 {
        println!("    ✗ Error checking project: {} - {}", response.status, response.body);
        return Ok(None);
    }

    let data = match response.json_value() {
        Ok(data) => data,
        Err(e) => {
            warn!(project = name, error = %e, "unreadable project lookup");
            return Ok(None);
        }
    };

    let Some(resource) = data.pointer("/resources/0") else {
        return Ok(None);
    };
    let Some(id) = resource.pointer("/metadata/guid").and_then(Value::as_str) else {
        return Ok(None);
    };

    let members = resource
        .pointer("/entity/members")
        .and_then(Value::as_array)
        .map(|members| {
            members
                .iter()
                .filter(|m| {
                    m.get("type").and_then(Value::as_str) == Some("user")
                        && m.get("state").and_then(Value::as_str) == Some("ACTIVE")
                })
                .filter_map(|m| m.get("user_name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(Some(ProjectRecord {
        id: id.to_string(),
        members,
    }))
}

/// Create a project; the inner `Err` is the row-level reason
pub fn create_project(
    api: &dyn Transport,
    name: &str,
    description: &str,
) -> Result<Result<String, String>, ApiError> {
    let description = if description.is_empty() {
        DEFAULT_DESCRIPTION
    } else {
        description
    };
    let payload = json!({
        "name": name,
        "description": description,
        "generator": "DAP-Projects",
        "public": false,
        "enforce_members": false,
        "storage": {"type": "assetfiles"},
    });

    let response = match api.post(CREATE_PROJECT_ENDPOINT, &[], &payload) {
        Ok(response) => response,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => return Ok(Err(format!("Request failed: {}", e))),
    };

    if response.status == 201 {
        // location looks like "/v2/projects/<guid>"
        let location = response
            .json_value()
            .ok()
            .and_then(|d| d.get("location").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();

        return Ok(match location.rsplit('/').next() {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err("Project created but no ID returned".to_string()),
        });
    }

    Ok(Err(match error_reason(&response) {
        Some(reason) if response.status == 400 && reason.contains("already used") => {
            format!("Project already exists: {}", reason)
        }
        Some(reason) => format!("HTTP {}: {}", response.status, reason),
        None => format!("HTTP {}: {}", response.status, response.body),
    }))
}

/// Platform uid of a user, `None` if the user does not exist or has no uid
pub fn find_user_uid(api: &dyn Transport, username: &str) -> Result<Option<String>, ApiError> {
    let endpoint = format!("/usermgmt/v1/user/{}", username);
    let response = match api.get(&endpoint, &[]) {
        Ok(response) => response,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            warn!(username, error = %e, "user lookup failed");
            return Ok(None);
        }
    };

    match response.status {
        200 => {
            let uid = response.json_value().ok().and_then(|d| match d.get("uid") {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            });
            println!("      ✓ User found: {} (UID: {})", username, uid.as_deref().unwrap_or("?"));
            Ok(uid)
        }
        404 => {
            println!("      ✗ User '{}' not found", username);
            Ok(None)
        }
        status => {
            println!("      ✗ Error checking user '{}': HTTP {}", username, status);
            Ok(None)
        }
    }
}

/// Add every new member in one call
pub fn add_members(api: &dyn Transport, project_id: &str, members: &[Collaborator]) -> Result<String, ApiError> {
    let entries: Vec<Value> = members
        .iter()
        .map(|m| json!({"user_name": m.username, "id": m.uid, "role": MEMBER_ROLE}))
        .collect();
    let payload = json!({ "members": entries });

    let endpoint = format!("/v2/projects/{}/members", project_id);
    let response = match api.post(&endpoint, &[], &payload) {
        Ok(response) => response,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => return Ok(format!("ERROR: Request failed: {}", e)),
    };

    if response.status == 200 {
        return Ok("SUCCESS".to_string());
    }

    Ok(match error_reason(&response) {
        Some(reason) if reason.contains("already exists in the project") => {
            format!("PARTIAL_ERROR: {}", reason)
        }
        Some(reason) => format!("ERROR: HTTP {} - {}", response.status, reason),
        None => format!("ERROR: HTTP {}: {}", response.status, response.body),
    })
}

// ============================================================================
// ROW PROCESSING
// ============================================================================

/// A collaborator that resolved to a platform user
#[derive(Debug, Clone, PartialEq)]
pub struct Collaborator {
    pub input: String,
    pub username: String,
    pub uid: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollaboratorResult {
    pub input: String,
    pub username: String,
    pub action: &'static str,
    pub status: String,
}

impl CollaboratorResult {
    fn render(&self) -> String {
        format!("{}({}):{}:{}", self.input, self.username, self.action, self.status)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectOutcome {
    pub project_id: String,
    pub project_status: String,
    pub collaborators: Vec<CollaboratorResult>,
    pub overall: String,
}

impl ProjectOutcome {
    pub fn project_ok(&self) -> bool {
        self.project_status == "EXISTS" || self.project_status == "CREATED"
    }

    pub fn details(&self) -> String {
        if self.collaborators.is_empty() {
            return "None".to_string();
        }
        self.collaborators
            .iter()
            .map(CollaboratorResult::render)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRequest {
    pub name: String,
    pub description: String,
    pub collaborators: String,
}

impl ProjectRequest {
    pub fn from_row(row: &InputRow) -> Self {
        ProjectRequest {
            name: row.field(0).to_string(),
            description: row.field(1).to_string(),
            collaborators: row.field(2).to_string(),
        }
    }
}

pub fn process_project(api: &dyn Transport, request: &ProjectRequest) -> Result<ProjectOutcome, ApiError> {
    let mut outcome = ProjectOutcome::default();

    println!("  → Checking if project '{}' exists...", request.name);
    let mut members = match find_project(api, &request.name)? {
        Some(project) => {
            println!("  ✓ Project exists with ID: {}", project.id);
            outcome.project_status = "EXISTS".to_string();
            outcome.project_id = project.id;
            Some(project.members)
        }
        None => {
            println!("  → Creating project '{}'...", request.name);
            match create_project(api, &request.name, &request.description)? {
                Ok(id) => {
                    println!("  ✓ Project created with ID: {}", id);
                    outcome.project_status = "CREATED".to_string();
                    outcome.project_id = id;
                    None
                }
                Err(reason) => {
                    println!("  ✗ Failed to create project: {}", reason);
                    outcome.project_status = format!("ERROR: {}", reason);
                    outcome.overall = "ERROR: Project creation failed".to_string();
                    return Ok(outcome);
                }
            }
        }
    };

    let mut valid = Vec::new();
    let mut invalid = Vec::new();

    for input in parse_collaborators(&request.collaborators) {
        let username = username_from_email(&input).to_string();
        println!("    → Processing collaborator: {} (username: {})", input, username);

        match find_user_uid(api, &username)? {
            Some(uid) => valid.push(Collaborator { input, username, uid }),
            None => invalid.push(format!("{} (username: {})", input, username)),
        }
    }

    if !invalid.is_empty() {
        println!("  ⚠ Invalid collaborators: {}", invalid.join(", "));
        warn!(project = %request.name, invalid = invalid.len(), "skipping unknown collaborators");
    }

    if valid.is_empty() {
        outcome.overall = format!("Project: {}, No valid collaborators", outcome.project_status);
        return Ok(outcome);
    }

    // A freshly created project has to be looked up again for its members
    let current = match members.take() {
        Some(members) => members,
        None => find_project(api, &request.name)?
            .map(|p| p.members)
            .unwrap_or_default(),
    };

    let (existing, new): (Vec<Collaborator>, Vec<Collaborator>) =
        valid.into_iter().partition(|c| current.contains(&c.username));

    if !existing.is_empty() {
        let names: Vec<&str> = existing.iter().map(|c| c.username.as_str()).collect();
        println!("    • Already members: {}", names.join(", "));
    }

    for collaborator in existing {
        outcome.collaborators.push(CollaboratorResult {
            input: collaborator.input,
            username: collaborator.username,
            action: "SKIPPED",
            status: "Already a member".to_string(),
        });
    }

    if !new.is_empty() {
        let names: Vec<&str> = new.iter().map(|c| c.username.as_str()).collect();
        println!("    • Assigning {} users as {}: {}", new.len(), MEMBER_ROLE, names.join(", "));

        let status = add_members(api, &outcome.project_id, &new)?;
        match status.as_str() {
            "SUCCESS" => println!("      ✓ Successfully assigned {} users", new.len()),
            other => println!("      ✗ {}", other),
        }

        for collaborator in new {
            outcome.collaborators.push(CollaboratorResult {
                input: collaborator.input,
                username: collaborator.username,
                action: "ASSIGNED",
                status: status.clone(),
            });
        }
    }

    let succeeded = outcome
        .collaborators
        .iter()
        .filter(|c| c.status == "SUCCESS")
        .count();
    outcome.overall = format!(
        "Project: {}, Collaborators: {}/{} processed",
        outcome.project_status,
        succeeded,
        outcome.collaborators.len()
    );

    Ok(outcome)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectSummary {
    pub total: usize,
    pub successful: usize,
}

pub fn run(api: &dyn Transport, input: &Path, output: &Path) -> Result<ProjectSummary> {
    println!("Input file: {}", input.display());
    println!("Output file: {}", output.display());

    let rows = read_rows(input, false, MIN_FIELDS)?;

    banner("PROCESSING PROJECT AND COLLABORATOR ASSIGNMENTS");

    let mut summary = ProjectSummary::default();
    let mut results = Vec::with_capacity(rows.len());

    for row in &rows {
        let request = ProjectRequest::from_row(row);
        println!("\nProcessing row {}: Project '{}'", row.number, request.name);

        let outcome = process_project(api, &request)?;

        summary.total += 1;
        if outcome.project_ok() {
            summary.successful += 1;
        }

        results.push(vec![
            request.name,
            request.description,
            request.collaborators,
            outcome.project_id.clone(),
            outcome.project_status.clone(),
            outcome.details(),
            outcome.overall.clone(),
        ]);
    }

    println!("\nProcessed {} rows from CSV", summary.total);

    banner("WRITING RESULTS CSV");
    write_rows(output, &OUTPUT_HEADER, &results)?;
    println!("Results written to: {}", output.display());

    println!("\nSUMMARY:");
    println!("Total rows processed: {}", summary.total);
    println!("Successful project operations: {}", summary.successful);
    println!("Failed project operations: {}", summary.total - summary.successful);

    Ok(summary)
}

// ============================================================================
// TESTS
// ============================================================================
