use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{ApprovalStatus, DepartmentAverage, EvaluationSubmission, SubmissionSummary};
use crate::scoring;

pub fn status_breakdown(summaries: &[SubmissionSummary]) -> Vec<(ApprovalStatus, usize)> {
    let mut counts: BTreeMap<ApprovalStatus, usize> = BTreeMap::new();
    for summary in summaries {
        *counts.entry(summary.status).or_insert(0) += 1;
    }
    counts.into_iter().collect()
}

pub fn department_averages(summaries: &[SubmissionSummary]) -> Vec<DepartmentAverage> {
    let mut map: BTreeMap<String, (usize, f64)> = BTreeMap::new();

    for summary in summaries {
        let entry = map.entry(summary.department.clone()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += summary.overall_rating;
    }

    let mut averages: Vec<DepartmentAverage> = map
        .into_iter()
        .map(|(department, (submissions, total))| DepartmentAverage {
            department,
            submissions,
            avg_rating: if submissions == 0 {
                0.0
            } else {
                total / submissions as f64
            },
        })
        .collect();

    averages.sort_by(|a, b| b.submissions.cmp(&a.submissions));
    averages
}

pub fn build_report(
    since_days: i64,
    cutoff: NaiveDate,
    submissions: &[EvaluationSubmission],
) -> String {
    let summaries = scoring::rank_summaries(submissions);
    let statuses = status_breakdown(&summaries);
    let departments = department_averages(&summaries);

    let mut output = String::new();

    let _ = writeln!(output, "# Performance Evaluation Report");
    let _ = writeln!(
        output,
        "Generated for the last {} days (submissions since {})",
        since_days.max(1),
        cutoff
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Approval Status");

    if statuses.is_empty() {
        let _ = writeln!(output, "No submissions recorded for this window.");
    } else {
        for (status, count) in statuses.iter() {
            let _ = writeln!(output, "- {}: {} submissions", status, count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Department Averages");

    if departments.is_empty() {
        let _ = writeln!(output, "No departments with submissions in this window.");
    } else {
        for department in departments.iter() {
            let _ = writeln!(
                output,
                "- {}: {} submissions (avg rating {:.1})",
                department.department, department.submissions, department.avg_rating
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Rated Employees");

    if summaries.is_empty() {
        let _ = writeln!(output, "No employees evaluated in this window.");
    } else {
        for summary in summaries.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}, reviewed by {}) rated {:.1} [{}]",
                summary.employee_name,
                summary.department,
                summary.evaluator,
                summary.overall_rating,
                summary.status
            );
        }
    }

    let awaiting: Vec<&SubmissionSummary> = summaries
        .iter()
        .filter(|summary| {
            matches!(
                summary.status,
                ApprovalStatus::Pending
                    | ApprovalStatus::EmployeeApproved
                    | ApprovalStatus::EvaluatorApproved
            )
        })
        .collect();

    let _ = writeln!(output);
    let _ = writeln!(output, "## Awaiting Signatures");

    if awaiting.is_empty() {
        let _ = writeln!(output, "Every submission is fully approved or rejected.");
    } else {
        for summary in awaiting.iter() {
            let _ = writeln!(
                output,
                "- #{} {} ({})",
                summary.id, summary.employee_name, summary.status
            );
        }
    }

    let mut recent: Vec<&EvaluationSubmission> = submissions.iter().collect();
    recent.sort_by(|a, b| scoring::submitted_on(b).cmp(&scoring::submitted_on(a)));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Submissions");

    if recent.is_empty() {
        let _ = writeln!(output, "No submissions recorded for this window.");
    } else {
        for submission in recent.iter().take(5) {
            let submitted = scoring::submitted_on(submission)
                .map(|date| date.to_string())
                .unwrap_or_else(|| "unknown date".to_string());
            let _ = writeln!(
                output,
                "- {} on {}: {:.1}",
                submission.employee_label(),
                submitted,
                scoring::display_rating(submission)
            );

            if let Some(data) = submission.evaluation_data.as_ref() {
                for category in scoring::category_breakdown(data) {
                    let _ = writeln!(
                        output,
                        "  - {}: {:.2} x {:.2} = {:.2}",
                        category.category, category.mean, category.weight, category.contribution
                    );
                }
                if let Some(comments) = data.overall_comments.as_deref() {
                    let _ = writeln!(output, "  - Comments: {}", comments);
                }
            }
        }
    }

    output
}
