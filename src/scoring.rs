use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::Value;

use crate::approval;
use crate::models::{
    ApprovalStatus, CategoryScore, EvaluationData, EvaluationSubmission, SubmissionSummary,
};

pub struct Category {
    pub name: &'static str,
    pub field_prefix: &'static str,
    pub field_count: usize,
    pub weight: f64,
}

pub const CATEGORIES: [Category; 7] = [
    Category {
        name: "Job Knowledge",
        field_prefix: "jobKnowledgeScore",
        field_count: 3,
        weight: 0.20,
    },
    Category {
        name: "Quality of Work",
        field_prefix: "qualityOfWorkScore",
        field_count: 5,
        weight: 0.20,
    },
    Category {
        name: "Adaptability",
        field_prefix: "adaptabilityScore",
        field_count: 3,
        weight: 0.10,
    },
    Category {
        name: "Teamwork",
        field_prefix: "teamworkScore",
        field_count: 3,
        weight: 0.10,
    },
    Category {
        name: "Reliability",
        field_prefix: "reliabilityScore",
        field_count: 4,
        weight: 0.05,
    },
    Category {
        name: "Ethical Conduct",
        field_prefix: "ethicalScore",
        field_count: 4,
        weight: 0.05,
    },
    Category {
        name: "Customer Service",
        field_prefix: "customerServiceScore",
        field_count: 5,
        weight: 0.30,
    },
];

impl Category {
    /// Field names in form order, e.g. `jobKnowledgeScore1..3`.
    pub fn field_names(&self) -> impl Iterator<Item = String> + '_ {
        (1..=self.field_count).map(move |index| format!("{}{}", self.field_prefix, index))
    }

    pub fn mean(&self, data: &EvaluationData) -> f64 {
        let names: Vec<String> = self.field_names().collect();
        calculate_score(names.iter().map(|name| data.field(name)))
    }
}

/// Mean of the usable raw scores, or 0 when none are usable.
pub fn calculate_score<'a, I>(scores: I) -> f64
where
    I: IntoIterator<Item = Option<&'a Value>>,
{
    let (total, count) = scores
        .into_iter()
        .filter_map(|score| score.and_then(numeric_score))
        .fold((0.0, 0usize), |(total, count), value| (total + value, count + 1));

    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

fn numeric_score(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Some(0.0);
            }
            radix_literal(trimmed)
                .or_else(|| trimmed.parse::<f64>().ok())
                .filter(|v| v.is_finite())
        }
        _ => None,
    }
}

/// Unsigned `0x`, `0o` and `0b` literals, as numeric form fields accept them.
fn radix_literal(text: &str) -> Option<f64> {
    let radix = match text.get(..2)? {
        "0x" | "0X" => 16,
        "0o" | "0O" => 8,
        "0b" | "0B" => 2,
        _ => return None,
    };
    let digits = &text[2..];
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u64::from_str_radix(digits, radix).ok().map(|value| value as f64)
}

/// Weighted overall rating on the 0-5 scale, rounded once to 0.1.
/// `None` when there is no evaluation form; see `display_rating`.
pub fn calculate_overall_rating(data: Option<&EvaluationData>) -> Option<f64> {
    let data = data?;
    let sum: f64 = CATEGORIES
        .iter()
        .map(|category| category.mean(data) * category.weight)
        .sum();
    Some(round_one_decimal(sum))
}

pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Rating shown in tables: weighted when the form is present, else the flat
/// `rating` field, else 0.
pub fn display_rating(submission: &EvaluationSubmission) -> f64 {
    calculate_overall_rating(submission.evaluation_data.as_ref())
        .or(submission.rating)
        .unwrap_or(0.0)
}

/// Admin overview percentage, `round(rating / 5 * 100)` over the flat
/// rating only. Not the same quantity as `display_rating`.
pub fn overview_percentage(rating: Option<f64>) -> Option<i64> {
    rating.map(|value| (value / 5.0 * 100.0).round() as i64)
}

pub fn category_breakdown(data: &EvaluationData) -> Vec<CategoryScore> {
    CATEGORIES
        .iter()
        .map(|category| {
            let mean = category.mean(data);
            CategoryScore {
                category: category.name,
                mean,
                weight: category.weight,
                contribution: mean * category.weight,
            }
        })
        .collect()
}

pub fn summarize(submission: &EvaluationSubmission) -> SubmissionSummary {
    let department = submission
        .evaluation_data
        .as_ref()
        .and_then(|data| data.department.clone())
        .unwrap_or_else(|| "Unassigned".to_string());

    SubmissionSummary {
        id: submission.id,
        employee_name: submission.employee_label().to_string(),
        evaluator: submission.evaluator_label().to_string(),
        department,
        submitted_at: submission.submitted_at.clone().unwrap_or_default(),
        overall_rating: display_rating(submission),
        overview_percentage: overview_percentage(submission.rating),
        status: approval::correct_approval_status(submission),
    }
}

pub fn rank_summaries(submissions: &[EvaluationSubmission]) -> Vec<SubmissionSummary> {
    let mut values: Vec<SubmissionSummary> = submissions.iter().map(summarize).collect();
    values.sort_by(|a, b| {
        b.overall_rating
            .partial_cmp(&a.overall_rating)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    values
}

pub fn filter_by_status(
    summaries: Vec<SubmissionSummary>,
    status: Option<ApprovalStatus>,
) -> Vec<SubmissionSummary> {
    match status {
        Some(wanted) => summaries
            .into_iter()
            .filter(|summary| summary.status == wanted)
            .collect(),
        None => summaries,
    }
}

pub fn cutoff_date(since_days: i64) -> NaiveDate {
    Utc::now().date_naive() - Duration::days(since_days.max(1))
}

pub fn submitted_on(submission: &EvaluationSubmission) -> Option<NaiveDate> {
    let raw = submission.submitted_at.as_deref()?;
    if let Ok(value) = DateTime::parse_from_rfc3339(raw) {
        return Some(value.with_timezone(&Utc).date_naive());
    }
    NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()
}

/// Submissions with an unreadable timestamp are kept.
pub fn within_window(submission: &EvaluationSubmission, cutoff: NaiveDate) -> bool {
    submitted_on(submission).map_or(true, |date| date >= cutoff)
}
