use crate::models::{Component, ComponentScores, Course, EnrolledStudentRecord};

fn subtotal(scores: &ComponentScores, parts: &[Component]) -> f64 {
    parts
        .iter()
        .map(|component| scores.get(*component).unwrap_or(0.0))
        .sum()
}

/// Credit-weighted score used for grading.
///
/// Blends the theory and lab subtotals by the course's credit split. A course
/// with no credits at all has no defined weighting and scores 0.
pub fn weighted_score(record: &EnrolledStudentRecord, course: &Course) -> f64 {
    let theory = subtotal(
        &record.scores,
        &[Component::TheoryIse, Component::TheoryMse, Component::TheoryEse],
    );
    let lab = subtotal(
        &record.scores,
        &[Component::LabIse, Component::LabMse, Component::LabEse],
    );
    let credits = course.total_credits();
    if credits == 0.0 {
        return 0.0;
    }
    (theory * course.credits_theory + lab * course.credits_lab) / credits
}

/// Unweighted sum of all six components. Feeds course statistics only.
pub fn raw_total(record: &EnrolledStudentRecord) -> f64 {
    subtotal(&record.scores, &Component::ALL)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
