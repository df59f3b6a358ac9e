//! Per-student semester results built from finalized course grades.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::grading::points_for;
use crate::models::{
    Cohort, Course, CourseOutcome, CoursePreview, ExamResult, ResultPreview, ResultStatus,
    Semester, Student, StudentResult,
};
use crate::score::{round2, weighted_score};

/// Slot a course occupies in a student's result. HSS and Seva Satva courses
/// share one slot per type, so a second course of the same type overwrites
/// the first.
pub fn course_label(course: &Course) -> String {
    if course.course_type.is_absolute() {
        course.course_type.as_str().to_string()
    } else {
        course.key.code.clone()
    }
}

/// Returns `None` when the student is not enrolled in the course.
pub fn course_outcome(course: &Course, uid: &str) -> Option<CourseOutcome> {
    let record = course.record(uid)?;
    let grade_points = points_for(record.grade);
    Some(CourseOutcome {
        course_id: course.id,
        course_code: course.key.code.clone(),
        course_name: course.name.clone(),
        course_type: course.course_type,
        course_label: course_label(course),
        score: weighted_score(record, course),
        grade: record.grade,
        grade_points,
        credits: course.total_credits() * f64::from(grade_points),
    })
}

pub fn student_result(student: &Student, courses: &[Course]) -> StudentResult {
    let mut outcomes = BTreeMap::new();
    let mut enrolled_codes = HashSet::new();
    let mut failed = false;

    for course in courses {
        let Some(outcome) = course_outcome(course, &student.uid) else {
            continue;
        };
        if outcome.grade_points == 0 {
            failed = true;
        }
        enrolled_codes.insert(course.key.code.as_str());
        outcomes.insert(outcome.course_label.clone(), outcome);
    }

    let denominator: f64 = courses
        .iter()
        .filter(|course| enrolled_codes.contains(course.key.code.as_str()))
        .map(Course::total_credits)
        .sum();
    let sgpa = if failed || denominator == 0.0 {
        0.0
    } else {
        let earned: f64 = outcomes.values().map(|outcome| outcome.credits).sum();
        round2(earned / denominator)
    };

    StudentResult {
        uid: student.uid.clone(),
        name: student.name.clone(),
        failed,
        sgpa,
        cgpa: 0.0,
        courses: outcomes,
    }
}

/// Build `result_data` for a roster, ordered by uid.
pub fn build_result_data(students: &[Student], courses: &[Course]) -> Vec<StudentResult> {
    let mut data: Vec<StudentResult> = students
        .iter()
        .map(|student| student_result(student, courses))
        .collect();
    data.sort_by(|a, b| a.uid.cmp(&b.uid));
    data
}

/// Regenerate a result in place. The caller persists it and then runs the
/// CGPA sweep for the result's cohort.
pub fn generate(
    result: &mut ExamResult,
    students: &[Student],
    courses: &[Course],
    at: DateTime<Utc>,
) -> EngineResult<()> {
    if result.status == ResultStatus::Declared {
        return Err(EngineError::StateConflict(format!(
            "result {} has been declared and can no longer be regenerated",
            result.id
        )));
    }
    let previous: BTreeMap<&str, f64> = result
        .result_data
        .iter()
        .map(|entry| (entry.uid.as_str(), entry.cgpa))
        .collect();
    let mut data = build_result_data(students, courses);
    for entry in &mut data {
        if let Some(cgpa) = previous.get(entry.uid.as_str()) {
            entry.cgpa = *cgpa;
        }
    }
    result.result_data = data;
    result.generated_at = Some(at);
    Ok(())
}

pub fn validate_semester_number(semester_number: u8) -> EngineResult<()> {
    if !(1..=8).contains(&semester_number) {
        return Err(EngineError::Validation(format!(
            "semester number {semester_number} must be between 1 and 8"
        )));
    }
    Ok(())
}

/// Every requested code must resolve to exactly one course in the term.
pub fn resolve_course_set(codes: &[String], courses: &[Course]) -> EngineResult<Vec<Uuid>> {
    let mut ids = Vec::with_capacity(codes.len());
    let mut unknown = Vec::new();
    for code in codes {
        match courses.iter().find(|course| &course.key.code == code) {
            Some(course) if !ids.contains(&course.id) => ids.push(course.id),
            Some(_) => {}
            None => unknown.push(code.as_str()),
        }
    }
    if !unknown.is_empty() {
        return Err(EngineError::Validation(format!(
            "invalid course codes: {}",
            unknown.join(",")
        )));
    }
    if ids.is_empty() {
        return Err(EngineError::Validation(
            "a result needs at least one course".to_string(),
        ));
    }
    Ok(ids)
}

pub fn preview(
    year: i32,
    semester: Semester,
    cohort: &Cohort,
    students: &[Student],
    courses: &[Course],
) -> ResultPreview {
    let uids: HashSet<&str> = students.iter().map(|student| student.uid.as_str()).collect();
    let courses = courses
        .iter()
        .filter_map(|course| {
            let enrolled = course
                .enrolled_students
                .iter()
                .filter(|record| uids.contains(record.uid.as_str()))
                .count();
            (enrolled > 0).then(|| CoursePreview {
                course_code: course.key.code.clone(),
                course_name: course.name.clone(),
                enrolled,
            })
        })
        .collect();

    ResultPreview {
        year,
        semester,
        cohort: cohort.clone(),
        student_count: students.len(),
        courses,
    }
}
