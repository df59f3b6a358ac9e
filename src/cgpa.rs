//! Cumulative grade averages across every result of a cohort.

use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use crate::grading::points_for;
use crate::models::{Course, ExamResult};
use crate::score::round2;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Accumulator {
    earned: f64,
    credits: f64,
}

/// Outcome of a sweep: the new CGPA per uid and the cohort's results with
/// those values written in. Persist both together or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct CgpaSweep {
    pub cgpas: BTreeMap<String, f64>,
    pub results: Vec<ExamResult>,
}

/// CGPA for every uid present in any of `results`.
///
/// Courses a result references but that no longer exist in `courses` are
/// skipped. A student with no credited course gets 0.
pub fn compute_cgpas(
    results: &[ExamResult],
    courses: &HashMap<Uuid, Course>,
) -> BTreeMap<String, f64> {
    let mut totals: BTreeMap<&str, Accumulator> = BTreeMap::new();

    for result in results {
        let referenced: Vec<&Course> = result
            .courses
            .iter()
            .filter_map(|id| courses.get(id))
            .collect();

        for entry in &result.result_data {
            let total = totals.entry(entry.uid.as_str()).or_default();
            for course in &referenced {
                let Some(record) = course.record(&entry.uid) else {
                    continue;
                };
                let credits = course.total_credits();
                total.earned += credits * f64::from(points_for(record.grade));
                total.credits += credits;
            }
        }
    }

    totals
        .into_iter()
        .map(|(uid, total)| {
            let denominator = if total.credits == 0.0 { 1.0 } else { total.credits };
            (uid.to_string(), round2(total.earned / denominator))
        })
        .collect()
}

pub fn apply_cgpas(results: &mut [ExamResult], cgpas: &BTreeMap<String, f64>) {
    for result in results.iter_mut() {
        for entry in &mut result.result_data {
            if let Some(cgpa) = cgpas.get(&entry.uid) {
                entry.cgpa = *cgpa;
            }
        }
    }
}

pub fn sweep(mut results: Vec<ExamResult>, courses: &[Course]) -> CgpaSweep {
    let by_id: HashMap<Uuid, Course> = courses
        .iter()
        .map(|course| (course.id, course.clone()))
        .collect();
    let cgpas = compute_cgpas(&results, &by_id);
    apply_cgpas(&mut results, &cgpas);
    CgpaSweep { cgpas, results }
}
