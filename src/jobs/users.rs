// 👤 Users - bulk creation of platform users
//
// Input (no header, 2 columns): display name, email
// The username is the local part of the email.

use crate::client::{ApiError, Transport};
use crate::jobs::projects::username_from_email;
use crate::jobs::{banner, read_rows, write_rows, InputRow};
use anyhow::Result;
use serde_json::{json, Value};
use std::path::Path;

pub const MIN_FIELDS: usize = 2;

const USERS_ENDPOINT: &str = "/usermgmt/v1/user";

pub const OUTPUT_HEADER: [&str; 5] = ["Display Name", "Email", "Username", "UID", "Creation Status"];

/// Account template shared by every created user
pub fn user_payload(username: &str, display_name: &str, email: &str) -> Value {
    json!({
        "username": username,
        "displayName": display_name,
        "email": email,
        "approval_status": "approved",
        "permissions": ["create_space", "sign_in_only", "create_project"],
        "user_roles": [],
        "current_account_status": "enabled",
        "internal_user": false,
        "deletable": true,
        "authenticator": "external",
        "role": "User",
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRequest {
    pub display_name: String,
    pub email: String,
    pub username: String,
}

impl UserRequest {
    pub fn new(display_name: &str, email: &str) -> Self {
        UserRequest {
            display_name: display_name.to_string(),
            email: email.to_string(),
            username: username_from_email(email).to_string(),
        }
    }

    pub fn from_row(row: &InputRow) -> Self {
        Self::new(row.field(0), row.field(1))
    }

    /// Email is checked before the display name
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.email.trim().is_empty() || !self.email.contains('@') {
            return Err("Invalid email format");
        }
        if self.display_name.trim().is_empty() {
            return Err("Display name cannot be empty");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserOutcome {
    pub uid: String,
    pub status: String,
}

fn text_field(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Validate, then POST the account. Only authentication failures are errors.
pub fn create_user(api: &dyn Transport, request: &UserRequest) -> Result<UserOutcome, ApiError> {
    if let Err(reason) = request.validate() {
        println!("  ✗ {}", reason);
        return Ok(UserOutcome {
            uid: String::new(),
            status: format!("ERROR: {}", reason),
        });
    }

    let payload = user_payload(&request.username, &request.display_name, &request.email);

    let response = match api.post(USERS_ENDPOINT, &[], &payload) {
        Ok(response) => response,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            println!("✗ Error creating user {}: {}", request.username, e);
            return Ok(UserOutcome {
                uid: String::new(),
                status: format!("ERROR: Request failed: {}", e),
            });
        }
    };

    let data = response.json_value();

    if response.status == 201 {
        let Ok(data) = data else {
            println!("✓ Created user: {} ({}) - UID: Unknown", request.username, request.display_name);
            return Ok(UserOutcome {
                uid: String::new(),
                status: "SUCCESS: response parsing failed".to_string(),
            });
        };

        let uid = text_field(&data, "uid").unwrap_or_else(|| "N/A".to_string());
        let code = text_field(&data, "_messageCode_").unwrap_or_else(|| "success".to_string());
        println!(
            "✓ Created user: {} ({}) - UID: {}",
            request.username, request.display_name, uid
        );
        return Ok(UserOutcome {
            uid,
            status: format!("SUCCESS: {}", code),
        });
    }

    let status = match data {
        Ok(data) => {
            let code = text_field(&data, "_messageCode_").unwrap_or_else(|| "unknown_error".to_string());
            let message = text_field(&data, "message").unwrap_or_else(|| response.body.clone());

            if code == "email_exist" {
                println!("⚠ Email already exists: {} ({})", request.username, request.display_name);
                format!("EXISTS: {}", message)
            } else {
                format!("ERROR: HTTP {} - {}: {}", response.status, code, message)
            }
        }
        Err(_) => format!("ERROR: HTTP {} - {}", response.status, response.body),
    };

    if status.starts_with("ERROR") {
        println!("✗ Failed to create user {}: {}", request.username, status);
    }

    Ok(UserOutcome {
        uid: String::new(),
        status,
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserSummary {
    pub total: usize,
    pub created: usize,
    pub existing: usize,
    pub failed: usize,
}

impl UserSummary {
    fn record(&mut self, outcome: &UserOutcome) {
        self.total += 1;
        if outcome.status.starts_with("SUCCESS") {
            self.created += 1;
        } else if outcome.status.starts_with("EXISTS") {
            self.existing += 1;
        } else if outcome.status.starts_with("ERROR") {
            self.failed += 1;
        }
    }
}

pub fn run(api: &dyn Transport, input: &Path, output: &Path) -> Result<UserSummary> {
    println!("Input file: {}", input.display());
    println!("Output file: {}", output.display());

    let rows = read_rows(input, false, MIN_FIELDS)?;

    banner("PROCESSING BULK USER CREATION");

    let mut summary = UserSummary::default();
    let mut results = Vec::with_capacity(rows.len());

    for row in &rows {
        let request = UserRequest::from_row(row);
        println!(
            "\nProcessing row {}: {} ({})",
            row.number, request.username, request.display_name
        );

        let outcome = create_user(api, &request)?;
        summary.record(&outcome);

        results.push(vec![
            request.display_name,
            request.email,
            request.username,
            outcome.uid,
            outcome.status,
        ]);
    }

    println!("\nProcessed {} rows from CSV", summary.total);

    banner("WRITING RESULTS CSV");
    write_rows(output, &OUTPUT_HEADER, &results)?;
    println!("Results written to: {}", output.display());

    println!("\nSUMMARY:");
    println!("Total rows processed: {}", summary.total);
    println!("Successfully created: {}", summary.created);
    println!("Already existing: {}", summary.existing);
    println!("Failed creations: {}", summary.failed);

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_files::{read_csv, Scratch};
    use crate::testing::MockTransport;
    use reqwest::Method;

    #[test]
    fn test_validation_order() {
        // Both invalid: the email error wins
        assert_eq!(UserRequest::new("", "not-an-email").validate(), Err("Invalid email format"));
        assert_eq!(UserRequest::new("", "a@x.com").validate(), Err("Display name cannot be empty"));
        assert_eq!(UserRequest::new("  ", "a@x.com").validate(), Err("Display name cannot be empty"));
        assert_eq!(UserRequest::new("Ann", "a@x.com").validate(), Ok(()));
    }

    #[test]
    fn test_username_is_email_local_part() {
        assert_eq!(UserRequest::new("Ann", "ann.lee@example.com").username, "ann.lee");
    }

    #[test]
    fn test_payload_template() {
        let payload = user_payload("ann", "Ann", "ann@x.com");
        assert_eq!(payload["displayName"], "Ann");
        assert_eq!(payload["approval_status"], "approved");
        assert_eq!(
            payload["permissions"],
            json!(["create_space", "sign_in_only", "create_project"])
        );
        assert_eq!(payload["user_roles"], json!([]));
        assert_eq!(payload["authenticator"], "external");
        assert_eq!(payload["role"], "User");
        assert_eq!(payload["internal_user"], false);
        assert_eq!(payload["deletable"], true);
    }

    #[test]
    fn test_create_outcomes() {
        let mock = MockTransport::new();
        mock.on(Method::POST, USERS_ENDPOINT, 201, json!({"uid": 1001, "_messageCode_": "success"}));
        mock.on(
            Method::POST,
            USERS_ENDPOINT,
            400,
            json!({"_messageCode_": "email_exist", "message": "Email already registered"}),
        );
        mock.on(
            Method::POST,
            USERS_ENDPOINT,
            400,
            json!({"_messageCode_": "invalid_username", "message": "bad name"}),
        );
        mock.on_text(Method::POST, USERS_ENDPOINT, 500, "internal");

        let ann = UserRequest::new("Ann", "ann@x.com");

        let created = create_user(&mock, &ann).unwrap();
        assert_eq!(created, UserOutcome { uid: "1001".into(), status: "SUCCESS: success".into() });

        let exists = create_user(&mock, &ann).unwrap();
        assert_eq!(exists.status, "EXISTS: Email already registered");
        assert_eq!(exists.uid, "");

        let rejected = create_user(&mock, &ann).unwrap();
        assert_eq!(rejected.status, "ERROR: HTTP 400 - invalid_username: bad name");

        let broken = create_user(&mock, &ann).unwrap();
        assert_eq!(broken.status, "ERROR: HTTP 500 - internal");
    }

    #[test]
    fn test_invalid_rows_make_no_calls() {
        let mock = MockTransport::new();
        let outcome = create_user(&mock, &UserRequest::new("Ann", "ann.example.com")).unwrap();
        assert_eq!(outcome.status, "ERROR: Invalid email format");
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_run_counts_by_status_prefix() {
        let scratch = Scratch::new();
        let input = scratch.write(
            "users.csv",
            "Ann Lee, ann@x.com\nBob,bob@x.com\n,carol@x.com\nlonely\n",
        );
        let output = scratch.path("users_out.csv");

        let mock = MockTransport::new();
        mock.on(Method::POST, USERS_ENDPOINT, 201, json!({"uid": "u-1", "_messageCode_": "success"}));
        mock.on(Method::POST, USERS_ENDPOINT, 400, json!({"_messageCode_": "email_exist", "message": "exists"}));

        let summary = run(&mock, &input, &output).unwrap();
        assert_eq!(
            summary,
            UserSummary { total: 3, created: 1, existing: 1, failed: 1 }
        );

        let rows = read_csv(&output);
        assert_eq!(rows[0], OUTPUT_HEADER.to_vec());
        assert_eq!(rows[1], vec!["Ann Lee", "ann@x.com", "ann", "u-1", "SUCCESS: success"]);
        assert_eq!(rows[2][4], "EXISTS: exists");
        assert_eq!(rows[3][4], "ERROR: Display name cannot be empty");
    }
}
