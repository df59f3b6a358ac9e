use crate::models::{Component, CourseStatistics, EnrolledStudentRecord};
use crate::score::raw_total;

/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Element at index `n / 2` after an ascending sort, so even-sized inputs
/// yield the upper of the two middle values. Returns 0.0 for empty input.
pub fn upper_median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    values[values.len() / 2]
}

fn component_mean(records: &[EnrolledStudentRecord], component: Component) -> f64 {
    let values: Vec<f64> = records
        .iter()
        .map(|record| record.scores.get(component).unwrap_or(0.0))
        .collect();
    mean(&values)
}

/// Descriptive statistics over a course's enrolled cohort.
///
/// Totals are the raw, unweighted six-component sums, not the credit-weighted
/// score used for grading.
pub fn compute_statistics(records: &[EnrolledStudentRecord]) -> CourseStatistics {
    let totals: Vec<f64> = records.iter().map(raw_total).collect();

    CourseStatistics {
        student_count: records.len(),
        mean_theory_ise: component_mean(records, Component::TheoryIse),
        mean_theory_mse: component_mean(records, Component::TheoryMse),
        mean_theory_ese: component_mean(records, Component::TheoryEse),
        mean_lab_ise: component_mean(records, Component::LabIse),
        mean_lab_mse: component_mean(records, Component::LabMse),
        mean_lab_ese: component_mean(records, Component::LabEse),
        mean_total: mean(&totals),
        median_total: upper_median(totals),
    }
}
