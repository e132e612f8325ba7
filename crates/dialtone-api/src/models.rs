//! Shared HTTP DTOs for the dialtone public API.
//!
//! Request bodies are flat JSON objects for compatibility with existing
//! provisioning clients. Key order in the document is the order variables
//! are persisted in (and therefore the order Asterisk sees them), so the
//! conversions below never re-sort fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use dialtone_data::{DeviceSummaryRow, DeviceVariableRow};

/// Field naming the device category in write requests.
pub const CATEGORY_FIELD: &str = "category";

/// Fields a creation request must carry.
pub const CREATE_REQUIRED_FIELDS: &[&str] = &["context", "host", "type", CATEGORY_FIELD];

/// RFC9457-compatible problem document surfaced on validation/runtime errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// Problem type URI.
    #[serde(rename = "type")]
    pub kind: String,
    /// Short human-readable summary.
    pub title: String,
    /// HTTP status code.
    pub status: u16,
    /// Optional occurrence-specific detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Optional pointers to offending request fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_params: Option<Vec<ProblemInvalidParam>>,
}

/// Invalid parameter pointer surfaced alongside a [`ProblemDetails`] payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemInvalidParam {
    /// JSON pointer to the offending field.
    pub pointer: String,
    /// Human-readable explanation.
    pub message: String,
}

/// One category in the device listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSummary {
    /// Device/category name.
    pub category: String,
    /// Grouping metric shared by the category's rows.
    pub cat_metric: i32,
}

impl From<DeviceSummaryRow> for DeviceSummary {
    fn from(row: DeviceSummaryRow) -> Self {
        Self {
            category: row.category,
            cat_metric: row.cat_metric,
        }
    }
}

/// One variable row in the metric lookup response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceVariableView {
    /// Primary key of the row.
    pub id: i64,
    /// Configuration key.
    pub var_name: String,
    /// Configuration value.
    pub var_val: String,
}

impl From<DeviceVariableRow> for DeviceVariableView {
    fn from(row: DeviceVariableRow) -> Self {
        Self {
            id: row.id,
            var_name: row.var_name,
            var_val: row.var_val,
        }
    }
}

/// Outcome discriminant reported by the mutating device routes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceActionStatus {
    /// The category was created.
    Created,
    /// A category with this name already exists; nothing changed.
    AlreadyExists,
    /// The merge committed.
    Merged,
    /// The named category does not exist; nothing changed.
    NotFound,
    /// The category and all its rows were removed.
    Deleted,
}

/// Body returned by the mutating device routes.
///
/// Soft outcomes (`already_exists`, `not_found`) are reported here with a
/// 200 status rather than as problem documents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceActionResponse {
    /// What happened.
    pub status: DeviceActionStatus,
    /// Category the request named.
    pub category: String,
    /// Grouping metric involved, when one was allocated or resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cat_metric: Option<i32>,
}

/// Body accepted by `DELETE /api/devices`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSelector {
    /// Category to delete.
    pub category: String,
}

/// Flat JSON object accepted by the POST and PUT device routes.
///
/// Key order is significant: it becomes the `var_metric` order of inserted
/// rows. A duplicate key collapses at parse time to its last value while
/// keeping the first occurrence's position.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct DeviceWriteRequest {
    /// Raw fields in document order.
    pub fields: Map<String, Value>,
}

/// Validated write request: the category plus its ordered variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    /// Category the request names.
    pub category: String,
    /// Every field except `category`, in document order.
    pub variables: Vec<(String, String)>,
}

impl DeviceWriteRequest {
    /// Validate a creation body: all of [`CREATE_REQUIRED_FIELDS`] must be
    /// present as JSON strings.
    ///
    /// # Errors
    ///
    /// Returns the full list of offending fields when validation fails.
    pub fn into_create(self) -> Result<DeviceCommand, Vec<ProblemInvalidParam>> {
        self.into_command(CREATE_REQUIRED_FIELDS)
    }

    /// Validate a merge body: only `category` is required.
    ///
    /// # Errors
    ///
    /// Returns the full list of offending fields when validation fails.
    pub fn into_merge(self) -> Result<DeviceCommand, Vec<ProblemInvalidParam>> {
        self.into_command(&[CATEGORY_FIELD])
    }

    fn into_command(self, required: &[&str]) -> Result<DeviceCommand, Vec<ProblemInvalidParam>> {
        let mut invalid = Vec::new();
        for field in required {
            if !self.fields.contains_key(*field) {
                invalid.push(ProblemInvalidParam {
                    pointer: pointer_for(field),
                    message: "required field is missing".to_string(),
                });
            }
        }

        let mut category = None;
        let mut variables = Vec::with_capacity(self.fields.len());
        for (name, value) in &self.fields {
            let Some(text) = value.as_str() else {
                invalid.push(ProblemInvalidParam {
                    pointer: pointer_for(name),
                    message: "value must be a JSON string".to_string(),
                });
                continue;
            };
            if name == CATEGORY_FIELD {
                category = Some(text.to_owned());
            } else {
                variables.push((name.clone(), text.to_owned()));
            }
        }

        if !invalid.is_empty() {
            return Err(invalid);
        }
        let Some(category) = category else {
            return Err(vec![ProblemInvalidParam {
                pointer: pointer_for(CATEGORY_FIELD),
                message: "required field is missing".to_string(),
            }]);
        };
        Ok(DeviceCommand {
            category,
            variables,
        })
    }
}

pub(crate) fn pointer_for(field: &str) -> String {
    format!("/{field}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(body: &str) -> DeviceWriteRequest {
        serde_json::from_str(body).expect("request body parses")
    }

    #[test]
    fn create_extraction_preserves_document_order() {
        let command = request(
            r#"{"category":"600","type":"friend","context":"ltiit","host":"dynamic"}"#,
        )
        .into_create()
        .expect("valid create body");

        assert_eq!(command.category, "600");
        let names: Vec<&str> = command
            .variables
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(names, ["type", "context", "host"]);
    }

    #[test]
    fn create_collects_every_missing_required_field() {
        let err = request(r#"{"category":"600"}"#)
            .into_create()
            .expect_err("missing fields");
        let pointers: Vec<&str> = err.iter().map(|param| param.pointer.as_str()).collect();
        assert_eq!(pointers, ["/context", "/host", "/type"]);
    }

    #[test]
    fn duplicate_keys_collapse_to_last_value_at_first_position() {
        let command = request(
            r#"{"category":"600","context":"a","host":"dynamic","type":"friend","host":"static"}"#,
        )
        .into_create()
        .expect("valid create body");
        assert_eq!(
            command.variables,
            vec![
                ("context".to_string(), "a".to_string()),
                ("host".to_string(), "static".to_string()),
                ("type".to_string(), "friend".to_string()),
            ]
        );
    }

    #[test]
    fn non_string_values_are_rejected_with_a_pointer() {
        let err = request(r#"{"category":"600","context":"a","host":"b","type":"c","port":5060}"#)
            .into_create()
            .expect_err("non-string value");
        assert_eq!(err.len(), 1);
        assert_eq!(err[0].pointer, "/port");
        assert_eq!(err[0].message, "value must be a JSON string");
    }

    #[test]
    fn merge_requires_only_the_category() {
        let command = request(r#"{"category":"600","secret":"abc"}"#)
            .into_merge()
            .expect("valid merge body");
        assert_eq!(command.variables, vec![("secret".to_string(), "abc".to_string())]);

        let err = request(r#"{"secret":"abc"}"#)
            .into_merge()
            .expect_err("missing category");
        assert_eq!(err[0].pointer, "/category");
    }

    #[test]
    fn action_response_omits_absent_metric() {
        let body = serde_json::to_value(DeviceActionResponse {
            status: DeviceActionStatus::NotFound,
            category: "600".to_string(),
            cat_metric: None,
        })
        .expect("serializes");
        assert_eq!(body, serde_json::json!({"status": "not_found", "category": "600"}));
    }
}
