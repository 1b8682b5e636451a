use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{ApprovalStatus, EmployeeApprovalRecord, EvaluationSubmission};

pub const APPROVAL_KEY_PREFIX: &str = "approvalData_";
const SIGNATURE_PREFIX: &str = "data:image";

#[derive(Error, Debug, PartialEq)]
pub enum ApprovalError {
    #[error("signature for submission {id} is not an embedded image")]
    InvalidSignature { id: i64 },

    #[error("submission {id} is already {status}")]
    Finalized { id: i64, status: ApprovalStatus },

    #[error("submission {id} carries an employee signature and cannot be rejected")]
    AlreadySigned { id: i64 },
}

#[derive(Debug, Clone)]
pub enum ApprovalAction {
    EmployeeSign(String),
    EvaluatorSign(String),
    Reject,
}

/// Only embedded image data URLs count; a typed name does not.
pub fn is_valid_signature(value: Option<&str>) -> bool {
    value.is_some_and(|sig| !sig.is_empty() && sig.starts_with(SIGNATURE_PREFIX))
}

pub fn has_employee_signature(submission: &EvaluationSubmission) -> bool {
    is_valid_signature(submission.employee_signature.as_deref())
        || submission
            .evaluation_data
            .as_ref()
            .is_some_and(|data| is_valid_signature(data.employee_signature.as_deref()))
}

pub fn has_evaluator_signature(submission: &EvaluationSubmission) -> bool {
    is_valid_signature(submission.evaluator_signature_image.as_deref())
        || submission
            .evaluation_data
            .as_ref()
            .is_some_and(|data| is_valid_signature(data.evaluator_signature_image.as_deref()))
}

/// Signatures win over the stored status; the stored value only surfaces
/// for states signatures cannot express.
pub fn correct_approval_status(submission: &EvaluationSubmission) -> ApprovalStatus {
    let employee = has_employee_signature(submission);

    if employee && has_evaluator_signature(submission) {
        return ApprovalStatus::FullyApproved;
    }
    if employee {
        return ApprovalStatus::EmployeeApproved;
    }

    match submission.approval_status.as_deref() {
        Some(stored) => match stored.parse::<ApprovalStatus>() {
            Ok(status) => status,
            Err(_) => {
                warn!(id = submission.id, stored, "unrecognised approval status, showing pending");
                ApprovalStatus::Pending
            }
        },
        None => ApprovalStatus::Pending,
    }
}

/// Write path for approvals: the signature lands on the submission itself
/// and the stored status is re-derived.
pub fn apply_action(
    submission: &mut EvaluationSubmission,
    action: ApprovalAction,
    at: DateTime<Utc>,
) -> Result<ApprovalStatus, ApprovalError> {
    let current = correct_approval_status(submission);
    if matches!(current, ApprovalStatus::Rejected | ApprovalStatus::FullyApproved) {
        return Err(ApprovalError::Finalized {
            id: submission.id,
            status: current,
        });
    }

    let stamp = at.to_rfc3339();
    match action {
        ApprovalAction::EmployeeSign(signature) => {
            if !is_valid_signature(Some(&signature)) {
                return Err(ApprovalError::InvalidSignature { id: submission.id });
            }
            submission.employee_signature = Some(signature);
            submission.employee_approved_at = Some(stamp);
        }
        ApprovalAction::EvaluatorSign(signature) => {
            if !is_valid_signature(Some(&signature)) {
                return Err(ApprovalError::InvalidSignature { id: submission.id });
            }
            submission.evaluator_signature_image = Some(signature);
            submission.evaluator_approved_at = Some(stamp);
            if !has_employee_signature(submission) {
                submission.approval_status =
                    Some(ApprovalStatus::EvaluatorApproved.as_str().to_string());
            }
        }
        ApprovalAction::Reject => {
            if has_employee_signature(submission) {
                return Err(ApprovalError::AlreadySigned { id: submission.id });
            }
            submission.approval_status = Some(ApprovalStatus::Rejected.as_str().to_string());
            return Ok(ApprovalStatus::Rejected);
        }
    }

    let status = correct_approval_status(submission);
    submission.approval_status = Some(status.as_str().to_string());
    Ok(status)
}

/// Key-value capability holding employee signature records, keyed
/// `approvalData_<email>`, each value a JSON map from submission id to record.
pub trait ApprovalStore {
    fn keys(&self) -> Vec<String>;
    fn get(&self, key: &str) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryApprovalStore {
    entries: BTreeMap<String, String>,
}

impl MemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &String)> {
        self.entries.iter()
    }

    /// Loads a JSON object of `storage key -> value`. Values may be JSON
    /// strings (as browser storage holds them) or inline objects.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let parsed: BTreeMap<String, serde_json::Value> = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a JSON object", path.display()))?;

        let mut store = Self::new();
        for (key, value) in parsed {
            let value = match value {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            };
            store.insert(key, value);
        }
        Ok(store)
    }
}

impl ApprovalStore for MemoryApprovalStore {
    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }
}

pub fn storage_key(email: &str) -> String {
    format!("{APPROVAL_KEY_PREFIX}{email}")
}

fn lookup_in_key(
    store: &dyn ApprovalStore,
    key: &str,
    submission_id: &str,
) -> Option<EmployeeApprovalRecord> {
    let raw = store.get(key)?;
    let mut records: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&raw) {
        Ok(records) => records,
        Err(err) => {
            warn!(key, error = %err, "skipping unreadable approval data");
            return None;
        }
    };
    let record = records.remove(submission_id)?;
    match serde_json::from_value(record) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(key, submission_id, error = %err, "skipping malformed approval record");
            None
        }
    }
}

pub fn find_employee_approval(
    store: &dyn ApprovalStore,
    submission: &EvaluationSubmission,
) -> Option<EmployeeApprovalRecord> {
    let submission_id = submission.id.to_string();
    let direct_key = submission.employee_email.as_deref().map(storage_key);

    if let Some(key) = direct_key.as_deref() {
        if let Some(record) = lookup_in_key(store, key, &submission_id) {
            return Some(record);
        }
    }

    let mut keys: Vec<String> = store
        .keys()
        .into_iter()
        .filter(|key| key.starts_with(APPROVAL_KEY_PREFIX))
        .filter(|key| Some(key.as_str()) != direct_key.as_deref())
        .collect();
    keys.sort();

    keys.iter()
        .find_map(|key| lookup_in_key(store, key, &submission_id))
}

/// Overlays a stored employee approval onto one submission. Stored values
/// win; fields the record lacks are left alone.
pub fn merge_employee_approval(submission: &mut EvaluationSubmission, store: &dyn ApprovalStore) {
    let Some(record) = find_employee_approval(store, submission) else {
        return;
    };
    debug!(id = submission.id, "merging stored employee approval");
    if record.employee_signature.is_some() {
        submission.employee_signature = record.employee_signature;
    }
    if record.approved_at.is_some() {
        submission.employee_approved_at = record.approved_at;
    }
    if record.employee_name.is_some() {
        submission.employee_name = record.employee_name;
    }
    if record.employee_email.is_some() {
        submission.employee_email = record.employee_email;
    }
}

pub fn merge_employee_approval_data(
    submissions: Vec<EvaluationSubmission>,
    store: &dyn ApprovalStore,
) -> Vec<EvaluationSubmission> {
    submissions
        .into_iter()
        .map(|mut submission| {
            merge_employee_approval(&mut submission, store);
            submission
        })
        .collect()
}

/// `apply_action` over the merged view, so the guards see the same
/// signatures readers do. Merged signatures are written back with the action.
pub fn apply_action_with_store(
    submission: &mut EvaluationSubmission,
    store: &dyn ApprovalStore,
    action: ApprovalAction,
    at: DateTime<Utc>,
) -> Result<ApprovalStatus, ApprovalError> {
    merge_employee_approval(submission, store);
    apply_action(submission, action, at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EvaluationData;
    use serde_json::json;

    const EMPLOYEE_SIG: &str = "data:image/png;base64,AAA";
    const EVALUATOR_SIG: &str = "data:image/png;base64,BBB";

    fn submission(id: i64) -> EvaluationSubmission {
        EvaluationSubmission {
            id,
            employee_name: Some("Maria Santos".to_string()),
            employee_email: Some("maria@example.com".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn both_signatures_mean_fully_approved() {
        let mut sub = submission(1);
        sub.employee_signature = Some(EMPLOYEE_SIG.to_string());
        sub.evaluator_signature_image = Some(EVALUATOR_SIG.to_string());
        sub.approval_status = Some("pending".to_string());
        assert_eq!(correct_approval_status(&sub), ApprovalStatus::FullyApproved);
    }

    #[test]
    fn nested_signatures_count() {
        let mut sub = submission(2);
        sub.evaluation_data = Some(EvaluationData {
            employee_signature: Some(EMPLOYEE_SIG.to_string()),
            evaluator_signature_image: Some(EVALUATOR_SIG.to_string()),
            ..Default::default()
        });
        assert_eq!(correct_approval_status(&sub), ApprovalStatus::FullyApproved);
    }

    #[test]
    fn evaluator_name_is_not_a_signature() {
        let mut sub = submission(3);
        sub.employee_signature = Some(EMPLOYEE_SIG.to_string());
        sub.evaluator_signature = Some("John Doe".to_string());
        assert_eq!(correct_approval_status(&sub), ApprovalStatus::EmployeeApproved);
    }

    #[test]
    fn plain_employee_name_is_not_a_signature() {
        let mut sub = submission(4);
        sub.employee_signature = Some("Maria Santos".to_string());
        assert_eq!(correct_approval_status(&sub), ApprovalStatus::Pending);
    }

    #[test]
    fn stored_status_passes_through_without_signatures() {
        let mut sub = submission(5);
        sub.approval_status = Some("rejected".to_string());
        assert_eq!(correct_approval_status(&sub), ApprovalStatus::Rejected);

        sub.approval_status = Some("evaluator_approved".to_string());
        assert_eq!(correct_approval_status(&sub), ApprovalStatus::EvaluatorApproved);
    }

    #[test]
    fn signatures_override_stale_stored_status() {
        let mut sub = submission(6);
        sub.employee_signature = Some(EMPLOYEE_SIG.to_string());
        sub.approval_status = Some("rejected".to_string());
        assert_eq!(correct_approval_status(&sub), ApprovalStatus::EmployeeApproved);
    }

    #[test]
    fn defaults_to_pending() {
        let mut sub = submission(7);
        assert_eq!(correct_approval_status(&sub), ApprovalStatus::Pending);
        sub.approval_status = Some("archived".to_string());
        assert_eq!(correct_approval_status(&sub), ApprovalStatus::Pending);
    }

    #[test]
    fn classification_is_idempotent() {
        let mut sub = submission(8);
        sub.employee_signature = Some(EMPLOYEE_SIG.to_string());
        let first = correct_approval_status(&sub);
        let second = correct_approval_status(&sub);
        assert_eq!(first, second);
    }

    #[test]
    fn merge_overlays_stored_signature() {
        let mut store = MemoryApprovalStore::new();
        store.insert(
            storage_key("maria@example.com"),
            json!({
                "10": {
                    "employeeSignature": EMPLOYEE_SIG,
                    "approvedAt": "2025-02-01T10:00:00Z",
                    "employeeName": "Maria L. Santos",
                    "employeeEmail": "maria@example.com"
                }
            })
            .to_string(),
        );

        let mut original = submission(10);
        original.employee_signature = Some("stale".to_string());
        let merged = merge_employee_approval_data(vec![original, submission(11)], &store);

        assert_eq!(merged[0].employee_signature.as_deref(), Some(EMPLOYEE_SIG));
        assert_eq!(merged[0].employee_approved_at.as_deref(), Some("2025-02-01T10:00:00Z"));
        assert_eq!(merged[0].employee_name.as_deref(), Some("Maria L. Santos"));
        assert_eq!(correct_approval_status(&merged[0]), ApprovalStatus::EmployeeApproved);
        assert_eq!(merged[1].employee_signature, None);
    }

    #[test]
    fn merge_scans_other_keys_when_email_missing() {
        let mut store = MemoryApprovalStore::new();
        store.insert("unrelated", "{\"12\": {}}");
        store.insert(
            storage_key("other@example.com"),
            json!({ "12": { "employeeSignature": EMPLOYEE_SIG } }).to_string(),
        );

        let mut sub = submission(12);
        sub.employee_email = None;
        let merged = merge_employee_approval_data(vec![sub], &store);
        assert_eq!(merged[0].employee_signature.as_deref(), Some(EMPLOYEE_SIG));
        assert_eq!(merged[0].employee_name.as_deref(), Some("Maria Santos"));
    }

    #[test]
    fn own_email_key_wins_over_other_keys() {
        let mut store = MemoryApprovalStore::new();
        store.insert(
            storage_key("aaa@example.com"),
            json!({ "14": { "employeeSignature": "data:image/png;base64,OTHER" } }).to_string(),
        );
        store.insert(
            storage_key("maria@example.com"),
            json!({ "14": { "employeeSignature": EMPLOYEE_SIG } }).to_string(),
        );

        let merged = merge_employee_approval_data(vec![submission(14)], &store);
        assert_eq!(merged[0].employee_signature.as_deref(), Some(EMPLOYEE_SIG));
    }

    #[test]
    fn merge_skips_unreadable_values() {
        let mut store = MemoryApprovalStore::new();
        store.insert(storage_key("maria@example.com"), "{not json");
        let merged = merge_employee_approval_data(vec![submission(13)], &store);
        assert_eq!(merged[0].employee_signature, None);
    }

    #[test]
    fn employee_then_evaluator_signing_completes_approval() {
        let at = Utc::now();
        let mut sub = submission(20);
        sub.approval_status = Some("pending".to_string());

        let status = apply_action(&mut sub, ApprovalAction::EmployeeSign(EMPLOYEE_SIG.into()), at);
        assert_eq!(status, Ok(ApprovalStatus::EmployeeApproved));
        assert_eq!(sub.approval_status.as_deref(), Some("employee_approved"));
        assert!(sub.employee_approved_at.is_some());

        let status = apply_action(&mut sub, ApprovalAction::EvaluatorSign(EVALUATOR_SIG.into()), at);
        assert_eq!(status, Ok(ApprovalStatus::FullyApproved));
        assert_eq!(sub.approval_status.as_deref(), Some("fully_approved"));

        let again = apply_action(&mut sub, ApprovalAction::Reject, at);
        assert_eq!(
            again,
            Err(ApprovalError::Finalized {
                id: 20,
                status: ApprovalStatus::FullyApproved
            })
        );
    }

    #[test]
    fn evaluator_first_is_recorded_as_evaluator_approved() {
        let mut sub = submission(21);
        let status = apply_action(
            &mut sub,
            ApprovalAction::EvaluatorSign(EVALUATOR_SIG.into()),
            Utc::now(),
        );
        assert_eq!(status, Ok(ApprovalStatus::EvaluatorApproved));
        assert_eq!(correct_approval_status(&sub), ApprovalStatus::EvaluatorApproved);
    }

    #[test]
    fn name_signatures_are_refused() {
        let mut sub = submission(22);
        let result = apply_action(
            &mut sub,
            ApprovalAction::EmployeeSign("Maria Santos".into()),
            Utc::now(),
        );
        assert_eq!(result, Err(ApprovalError::InvalidSignature { id: 22 }));
        assert_eq!(sub.employee_signature, None);
    }

    #[test]
    fn rejected_submissions_cannot_be_signed() {
        let mut sub = submission(23);
        assert_eq!(
            apply_action(&mut sub, ApprovalAction::Reject, Utc::now()),
            Ok(ApprovalStatus::Rejected)
        );
        let result = apply_action(
            &mut sub,
            ApprovalAction::EmployeeSign(EMPLOYEE_SIG.into()),
            Utc::now(),
        );
        assert!(matches!(result, Err(ApprovalError::Finalized { .. })));
    }

    #[test]
    fn signed_submissions_cannot_be_rejected() {
        let mut sub = submission(24);
        sub.employee_signature = Some(EMPLOYEE_SIG.to_string());
        let result = apply_action(&mut sub, ApprovalAction::Reject, Utc::now());
        assert_eq!(result, Err(ApprovalError::AlreadySigned { id: 24 }));
        assert_eq!(correct_approval_status(&sub), ApprovalStatus::EmployeeApproved);
    }

    fn store_with_employee_signature(id: i64) -> MemoryApprovalStore {
        let mut store = MemoryApprovalStore::new();
        store.insert(
            storage_key("maria@example.com"),
            json!({ (id.to_string()): { "employeeSignature": EMPLOYEE_SIG } }).to_string(),
        );
        store
    }

    #[test]
    fn stored_employee_signature_blocks_rejection() {
        let store = store_with_employee_signature(25);
        let mut sub = submission(25);

        let result = apply_action_with_store(&mut sub, &store, ApprovalAction::Reject, Utc::now());
        assert_eq!(result, Err(ApprovalError::AlreadySigned { id: 25 }));

        let reread = merge_employee_approval_data(vec![sub], &store);
        assert_eq!(correct_approval_status(&reread[0]), ApprovalStatus::EmployeeApproved);
    }

    #[test]
    fn evaluator_signing_over_stored_employee_signature_is_full_approval() {
        let store = store_with_employee_signature(26);
        let mut sub = submission(26);

        let status = apply_action_with_store(
            &mut sub,
            &store,
            ApprovalAction::EvaluatorSign(EVALUATOR_SIG.into()),
            Utc::now(),
        );
        assert_eq!(status, Ok(ApprovalStatus::FullyApproved));
        assert_eq!(sub.approval_status.as_deref(), Some("fully_approved"));
        assert_eq!(sub.employee_signature.as_deref(), Some(EMPLOYEE_SIG));
    }
}
