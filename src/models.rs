use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSubmission {
    pub id: i64,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub employee_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub employee_email: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub evaluator: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub evaluator_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<String>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, deserialize_with = "lenient_data", skip_serializing_if = "Option::is_none")]
    pub evaluation_data: Option<EvaluationData>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub approval_status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub employee_signature: Option<String>,
    /// Evaluator's name as typed. Not proof of signing.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub evaluator_signature: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub evaluator_signature_image: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub employee_approved_at: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub evaluator_approved_at: Option<String>,
}

impl EvaluationSubmission {
    pub fn evaluator_label(&self) -> &str {
        self.evaluator_name
            .as_deref()
            .or(self.evaluator.as_deref())
            .unwrap_or("unknown evaluator")
    }

    pub fn employee_label(&self) -> &str {
        self.employee_name.as_deref().unwrap_or("unknown employee")
    }
}

/// Nested evaluation form. Category scores stay as raw JSON so the scorer
/// can apply its own coercion rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationData {
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub employee_signature: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub evaluator_signature_image: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub evaluator_signature: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub supervisor: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub overall_comments: Option<String>,
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
}

impl EvaluationData {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    EmployeeApproved,
    EvaluatorApproved,
    FullyApproved,
    Rejected,
}

impl ApprovalStatus {
    pub const ALL: [ApprovalStatus; 5] = [
        ApprovalStatus::Pending,
        ApprovalStatus::EmployeeApproved,
        ApprovalStatus::EvaluatorApproved,
        ApprovalStatus::FullyApproved,
        ApprovalStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::EmployeeApproved => "employee_approved",
            ApprovalStatus::EvaluatorApproved => "evaluator_approved",
            ApprovalStatus::FullyApproved => "fully_approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ApprovalStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| format!("unknown approval status: {value}"))
    }
}

/// Employee signature record as persisted under `approvalData_<email>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeApprovalRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub employee_signature: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub approved_at: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub employee_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub employee_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionSummary {
    pub id: i64,
    pub employee_name: String,
    pub evaluator: String,
    pub department: String,
    pub submitted_at: String,
    pub overall_rating: f64,
    pub overview_percentage: Option<i64>,
    pub status: ApprovalStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryScore {
    pub category: &'static str,
    pub mean: f64,
    pub weight: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepartmentAverage {
    pub department: String,
    pub submissions: usize,
    pub avg_rating: f64,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(value) => Some(value),
        _ => None,
    })
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(value) => value.as_f64(),
        Value::String(value) => value.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    })
}

fn lenient_data<'de, D>(deserializer: D) -> Result<Option<EvaluationData>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if !value.is_object() {
        return Ok(None);
    }
    Ok(serde_json::from_value(value).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wrong_field_types_degrade_to_absent() {
        let submission: EvaluationSubmission = serde_json::from_value(json!({
            "id": 7,
            "employeeName": 42,
            "rating": "4.5",
            "employeeSignature": null,
            "evaluationData": "not an object"
        }))
        .unwrap();

        assert_eq!(submission.employee_name, None);
        assert_eq!(submission.rating, Some(4.5));
        assert_eq!(submission.employee_signature, None);
        assert!(submission.evaluation_data.is_none());
    }

    #[test]
    fn nested_scores_land_in_fields() {
        let data: EvaluationData = serde_json::from_value(json!({
            "department": "Sales",
            "jobKnowledgeScore1": "4",
            "teamworkScore2": 3
        }))
        .unwrap();

        assert_eq!(data.department.as_deref(), Some("Sales"));
        assert_eq!(data.field("jobKnowledgeScore1"), Some(&json!("4")));
        assert_eq!(data.field("teamworkScore2"), Some(&json!(3)));
        assert!(data.field("department").is_none());
    }

    #[test]
    fn status_parses_from_wire_names() {
        assert_eq!(
            "evaluator_approved".parse::<ApprovalStatus>(),
            Ok(ApprovalStatus::EvaluatorApproved)
        );
        assert!("archived".parse::<ApprovalStatus>().is_err());
        assert_eq!(ApprovalStatus::FullyApproved.to_string(), "fully_approved");
    }
}
