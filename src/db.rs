use anyhow::Context;
use serde_json::json;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use crate::approval::{self, MemoryApprovalStore};
use crate::models::EvaluationSubmission;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let submissions = vec![
        json!({
            "id": 1738400000001i64,
            "employeeName": "Maria Santos",
            "employeeEmail": "maria.santos@example.com",
            "evaluatorName": "Dana Cruz",
            "submittedAt": "2026-09-18T09:30:00Z",
            "approvalStatus": "pending",
            "evaluationData": {
                "department": "Sales",
                "position": "Account Executive",
                "supervisor": "Dana Cruz",
                "jobKnowledgeScore1": 5, "jobKnowledgeScore2": 5, "jobKnowledgeScore3": 5,
                "qualityOfWorkScore1": 4, "qualityOfWorkScore2": 4, "qualityOfWorkScore3": 4,
                "qualityOfWorkScore4": 4, "qualityOfWorkScore5": 4,
                "adaptabilityScore1": 3, "adaptabilityScore2": 3, "adaptabilityScore3": 3,
                "teamworkScore1": 3, "teamworkScore2": 3, "teamworkScore3": 3,
                "reliabilityScore1": 5, "reliabilityScore2": 5, "reliabilityScore3": 5,
                "reliabilityScore4": 5,
                "ethicalScore1": 5, "ethicalScore2": 5, "ethicalScore3": 5, "ethicalScore4": 5,
                "customerServiceScore1": 5, "customerServiceScore2": 5,
                "customerServiceScore3": 5, "customerServiceScore4": 5,
                "customerServiceScore5": 5,
                "overallComments": "Strong client retention this quarter.",
                "evaluatorSignature": "Dana Cruz"
            }
        }),
        json!({
            "id": 1738400000002i64,
            "employeeName": "Jules Moreno",
            "employeeEmail": "jules.moreno@example.com",
            "evaluator": "Priya Nair",
            "submittedAt": "2026-09-25T14:05:00Z",
            "rating": 3.8,
            "approvalStatus": "rejected"
        }),
        json!({
            "id": 1738400000003i64,
            "employeeName": "Kiara Patel",
            "employeeEmail": "kiara.patel@example.com",
            "evaluatorName": "Priya Nair",
            "submittedAt": "2026-10-02T11:45:00Z",
            "evaluatorSignatureImage": "data:image/png;base64,iVBORw0KGgo=",
            "evaluationData": {
                "department": "Operations",
                "jobKnowledgeScore1": "4", "jobKnowledgeScore2": "3", "jobKnowledgeScore3": "",
                "qualityOfWorkScore1": 4, "qualityOfWorkScore2": 5,
                "teamworkScore1": 5, "teamworkScore2": 4, "teamworkScore3": 4,
                "customerServiceScore1": 4, "customerServiceScore2": 4,
                "customerServiceScore3": 3
            }
        }),
    ];

    for payload in submissions {
        let submission: EvaluationSubmission =
            serde_json::from_value(payload.clone()).context("invalid seed submission")?;
        insert_submission(pool, &submission, &payload).await?;
    }

    let approval = json!({
        "1738400000003": {
            "employeeSignature": "data:image/png;base64,R0lGODlhAQABAAAAACw=",
            "approvedAt": "2026-10-03T08:12:00Z",
            "employeeName": "Kiara Patel",
            "employeeEmail": "kiara.patel@example.com"
        }
    });
    upsert_approval_data(
        pool,
        &approval::storage_key("kiara.patel@example.com"),
        &approval.to_string(),
    )
    .await?;

    Ok(())
}

async fn insert_submission(
    pool: &PgPool,
    submission: &EvaluationSubmission,
    payload: &serde_json::Value,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO hr_evaluations.submissions (id, payload, submitted_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(submission.id)
    .bind(Json(payload))
    .bind(submission.submitted_at.as_deref())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn upsert_approval_data(pool: &PgPool, key: &str, payload: &str) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO hr_evaluations.approval_data (storage_key, payload)
        VALUES ($1, $2)
        ON CONFLICT (storage_key) DO UPDATE
        SET payload = EXCLUDED.payload, updated_at = NOW()
        "#,
    )
    .bind(key)
    .bind(payload)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_submissions(pool: &PgPool) -> anyhow::Result<Vec<EvaluationSubmission>> {
    let rows = sqlx::query("SELECT id, payload FROM hr_evaluations.submissions ORDER BY id")
        .fetch_all(pool)
        .await?;

    let mut submissions = Vec::new();
    for row in rows {
        let id: i64 = row.get("id");
        let Json(payload): Json<serde_json::Value> = row.get("payload");
        match serde_json::from_value::<EvaluationSubmission>(payload) {
            Ok(submission) => submissions.push(submission),
            Err(err) => warn!(id, error = %err, "skipping unreadable submission"),
        }
    }

    Ok(submissions)
}

pub async fn fetch_submission(pool: &PgPool, id: i64) -> anyhow::Result<EvaluationSubmission> {
    let row = sqlx::query("SELECT payload FROM hr_evaluations.submissions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("submission {id} not found"))?;

    let Json(payload): Json<serde_json::Value> = row.get("payload");
    serde_json::from_value(payload).with_context(|| format!("submission {id} is unreadable"))
}

/// Top-level approval keys written back by the approval path. Everything
/// else in the stored payload is left as imported.
pub fn approval_patch(submission: &EvaluationSubmission) -> serde_json::Value {
    let fields = [
        ("employeeSignature", &submission.employee_signature),
        ("employeeApprovedAt", &submission.employee_approved_at),
        ("evaluatorSignatureImage", &submission.evaluator_signature_image),
        ("evaluatorApprovedAt", &submission.evaluator_approved_at),
        ("approvalStatus", &submission.approval_status),
    ];

    let patch: serde_json::Map<String, serde_json::Value> = fields
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .as_ref()
                .map(|value| (key.to_string(), serde_json::Value::String(value.clone())))
        })
        .collect();
    serde_json::Value::Object(patch)
}

pub async fn update_submission(pool: &PgPool, submission: &EvaluationSubmission) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE hr_evaluations.submissions
        SET payload = payload || $2, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(submission.id)
    .bind(Json(approval_patch(submission)))
    .execute(pool)
    .await?;
    Ok(())
}

/// Snapshot of the approval table, queried synchronously by the merge step.
pub async fn load_approval_store(pool: &PgPool) -> anyhow::Result<MemoryApprovalStore> {
    let rows = sqlx::query(
        "SELECT storage_key, payload FROM hr_evaluations.approval_data WHERE storage_key LIKE $1",
    )
    .bind(format!("{}%", approval::APPROVAL_KEY_PREFIX.replace('_', "\\_")))
    .fetch_all(pool)
    .await?;

    let mut store = MemoryApprovalStore::new();
    for row in rows {
        store.insert(row.get::<String, _>("storage_key"), row.get::<String, _>("payload"));
    }
    Ok(store)
}

pub async fn import_json(pool: &PgPool, json_path: &std::path::Path) -> anyhow::Result<usize> {
    let raw = std::fs::read_to_string(json_path)
        .with_context(|| format!("failed to read {}", json_path.display()))?;
    let payloads: Vec<serde_json::Value> = serde_json::from_str(&raw)
        .with_context(|| format!("{} must hold a JSON array", json_path.display()))?;

    let mut inserted = 0usize;
    for (index, payload) in payloads.into_iter().enumerate() {
        let submission: EvaluationSubmission = serde_json::from_value(payload.clone())
            .with_context(|| format!("record {index} is not a submission"))?;

        if insert_submission(pool, &submission, &payload).await? {
            inserted += 1;
        }
    }

    info!(inserted, path = %json_path.display(), "imported submissions");
    Ok(inserted)
}

pub async fn import_approvals(pool: &PgPool, store: &MemoryApprovalStore) -> anyhow::Result<usize> {
    let mut written = 0usize;
    for (key, payload) in store.entries() {
        if !key.starts_with(approval::APPROVAL_KEY_PREFIX) {
            warn!(key = %key, "skipping key outside the approval namespace");
            continue;
        }
        upsert_approval_data(pool, key, payload).await?;
        written += 1;
    }
    Ok(written)
}
