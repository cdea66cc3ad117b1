use std::fmt::Write;

use chrono::{DateTime, Utc};
use cohort_dropout_risk::{CohortRun, RiskLevel, ScoredStudent, StudentProfile};

/// Highest-risk first, then by confidence, then by name.
pub fn rank_students(run: &CohortRun<StudentProfile>) -> Vec<&ScoredStudent<StudentProfile>> {
    let mut ranked: Vec<&ScoredStudent<StudentProfile>> = run.scored.iter().collect();
    ranked.sort_by(|a, b| {
        b.assessment
            .risk_level
            .cmp(&a.assessment.risk_level)
            .then_with(|| {
                b.assessment
                    .confidence
                    .partial_cmp(&a.assessment.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.id.name.cmp(&b.id.name))
    });
    ranked
}

pub fn describe_student(student: &ScoredStudent<StudentProfile>) -> String {
    let driver = match student.attribution.dominant() {
        Some((feature, weight)) => {
            format!("top driver {} ({:.0}%)", feature.label(), weight * 100.0)
        }
        None => "no dominant driver".to_string(),
    };
    format!(
        "{} ({}, {}) {} risk, confidence {:.2}, {}",
        student.id.name,
        student.id.email,
        student.id.course,
        student.assessment.risk_level,
        student.assessment.confidence,
        driver
    )
}

pub fn build_report(
    scope: Option<&str>,
    generated_at: DateTime<Utc>,
    run: &CohortRun<StudentProfile>,
) -> String {
    let summary = &run.summary;
    let mut output = String::new();
    let scope_label = scope.unwrap_or("all courses");

    let _ = writeln!(output, "# Cohort Dropout Risk Report");
    let _ = writeln!(
        output,
        "Generated for {} at {}",
        scope_label,
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Distribution");

    if summary.total() == 0 {
        let _ = writeln!(output, "No students assessed.");
    } else {
        for level in RiskLevel::ALL.iter().rev() {
            let _ = writeln!(output, "- {}: {}", level, summary.risk_counts.get(*level));
        }
        let _ = writeln!(
            output,
            "- Total: {} (average confidence {:.2})",
            summary.total(),
            summary.average_confidence
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Root Causes (High risk)");

    if summary.root_causes.is_empty() {
        let _ = writeln!(output, "No High-risk students in this cohort.");
    } else {
        for cause in summary.root_causes.iter() {
            let _ = writeln!(
                output,
                "{}. {}: {:.1}% ({})",
                cause.rank,
                cause.feature.label(),
                cause.percentage,
                cause.feature.color()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Risk Students");

    let ranked = rank_students(run);
    if ranked.is_empty() {
        let _ = writeln!(output, "No students assessed.");
    } else {
        for student in ranked.iter().take(10) {
            let _ = writeln!(output, "- {}", describe_student(student));
        }
    }

    if !run.skipped.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Skipped Records");
        for skipped in run.skipped.iter() {
            let _ = writeln!(
                output,
                "- {} ({}): {}",
                skipped.id.name, skipped.id.email, skipped.error
            );
        }
    }

    output
}
