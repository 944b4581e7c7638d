// 📦 Assets - data asset lookup and column validation inside a project

use crate::client::{ApiError, Transport};
use serde_json::{json, Map, Value};
use thiserror::Error;

const ASSET_SEARCH_ENDPOINT: &str = "/v2/asset_types/data_asset/search";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AssetError {
    #[error("Asset {0} is either not found or duplicated")]
    NotUnique(String),

    #[error("Asset {0} is not found")]
    NotFound(String),

    #[error("Error scanning project: {0}")]
    Search(String),

    #[error("Error getting asset details: {0}")]
    Fetch(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl AssetError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, AssetError::Api(e) if e.is_fatal())
    }
}

/// How many search hits an asset name may have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetMatch {
    /// Exactly one hit, anything else is an error
    Unique,
    /// Take the first hit
    First,
}

fn project_query(project_id: &str) -> [(&'static str, String); 2] {
    [
        ("project_id", project_id.to_string()),
        ("allow_metadata_on_dpr_deny", "true".to_string()),
    ]
}

/// Resolve a data asset id from its name
pub fn find_asset_id(
    api: &dyn Transport,
    project_id: &str,
    name: &str,
    mode: AssetMatch,
) -> Result<String, AssetError> {
    let limit = match mode {
        AssetMatch::Unique => 20,
        AssetMatch::First => 1,
    };
    let payload = json!({
        "query": format!("asset.name:{}", name),
        "limit": limit,
    });

    let response = api.post(ASSET_SEARCH_ENDPOINT, &project_query(project_id), &payload)?;
    if response.status != 200 {
        return Err(AssetError::Search(response.body));
    }

    let data = response.json_value()?;
    let total = data.get("total_rows").and_then(Value::as_u64).unwrap_or(0);

    match mode {
        AssetMatch::Unique if total != 1 => return Err(AssetError::NotUnique(name.to_string())),
        AssetMatch::First if total < 1 => return Err(AssetError::NotFound(name.to_string())),
        _ => {}
    }

    data.pointer("/results/0/metadata/asset_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AssetError::Fetch(format!("search result for {} has no asset_id", name)))
}

/// Asset document as returned by `GET /v2/assets/{id}`
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub id: String,
    document: Value,
}

impl Asset {
    pub fn fetch(api: &dyn Transport, project_id: &str, asset_id: &str) -> Result<Self, AssetError> {
        let endpoint = format!("/v2/assets/{}", asset_id);
        let response = api.get(&endpoint, &project_query(project_id))?;
        if response.status != 200 {
            return Err(AssetError::Fetch(response.body));
        }

        Ok(Asset::from_document(asset_id, response.json_value()?))
    }

    pub fn from_document(asset_id: &str, document: Value) -> Self {
        Asset {
            id: asset_id.to_string(),
            document,
        }
    }

    /// Names listed under `entity.data_asset.columns`
    pub fn column_names(&self) -> Vec<&str> {
        self.document
            .pointer("/entity/data_asset/columns")
            .and_then(Value::as_array)
            .map(|cols| {
                cols.iter()
                    .filter_map(|c| c.get("name").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_names().contains(&name)
    }

    /// Requested columns the asset does not have, in request order
    pub fn missing_columns<'a>(&self, names: &'a [String]) -> Vec<&'a str> {
        let known = self.column_names();
        names
            .iter()
            .map(String::as_str)
            .filter(|n| !known.contains(n))
            .collect()
    }

    /// Column metadata container `entity.column_info`, if the asset has one
    pub fn column_info(&self) -> Option<&Map<String, Value>> {
        self.document
            .pointer("/entity/column_info")
            .and_then(Value::as_object)
    }
}

// ============================================================================
// TESTS
// ============================================================================
