//! Mutations on a single course aggregate.
//!
//! Every mutating function here follows recompute-on-write: once the change
//! is applied it refreshes the course statistics and regrades the cohort via
//! [`recompute_course`] before returning, so the returned aggregate is ready
//! to persist as one unit. Nothing is applied if validation fails.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::grading::{grade_course, GradingOutcome};
use crate::lock::{ensure_grading_inputs_mutable, ensure_scores_mutable};
use crate::models::{Actor, Component, ComponentScores, Course, EnrolledStudentRecord, Student};
use crate::stats::compute_statistics;

/// Partial update for one enrolled student. Empty fields keep their
/// current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreUpdate {
    pub uid: String,
    pub scores: ComponentScores,
    pub flag_not_present: Option<bool>,
    pub flag_defaulter: Option<bool>,
}

impl ScoreUpdate {
    pub fn new(uid: impl Into<String>, scores: ComponentScores) -> Self {
        Self {
            uid: uid.into(),
            scores,
            ..Default::default()
        }
    }
}

/// Refresh derived state: statistics always, grades when there is a cohort.
pub fn recompute_course(course: &mut Course) -> EngineResult<Option<GradingOutcome>> {
    course.statistics = compute_statistics(&course.enrolled_students);
    debug!(
        course = %course.key,
        students = course.statistics.student_count,
        mean_total = course.statistics.mean_total,
        median_total = course.statistics.median_total,
        "statistics recomputed"
    );
    if course.enrolled_students.is_empty() {
        return Ok(None);
    }
    grade_course(course).map(Some)
}

pub fn validate_scores(course: &Course, uid: &str, scores: &ComponentScores) -> EngineResult<()> {
    for component in Component::ALL {
        let Some(score) = scores.get(component) else {
            continue;
        };
        let max = course.weightages.get(component);
        if !score.is_finite() || score < 0.0 || score > max {
            return Err(EngineError::ScoreOutOfBounds {
                uid: uid.to_string(),
                component,
                score,
                max,
            });
        }
    }
    Ok(())
}

/// Enroll students, rejecting the whole batch if any is already enrolled.
pub fn enroll_students(
    course: &mut Course,
    students: &[Student],
) -> EngineResult<Option<GradingOutcome>> {
    ensure_scores_mutable(course)?;

    let mut seen = HashSet::new();
    let duplicates: Vec<&str> = students
        .iter()
        .filter(|student| course.is_enrolled(&student.uid) || !seen.insert(student.uid.as_str()))
        .map(|student| student.uid.as_str())
        .collect();
    if !duplicates.is_empty() {
        return Err(EngineError::StateConflict(format!(
            "students {} are already enrolled in {}",
            duplicates.join(","),
            course.key
        )));
    }

    course
        .enrolled_students
        .extend(students.iter().map(EnrolledStudentRecord::for_student));
    recompute_course(course)
}

/// Apply partial score and flag updates, all or nothing.
pub fn apply_score_updates(
    course: &mut Course,
    updates: &[ScoreUpdate],
) -> EngineResult<Option<GradingOutcome>> {
    ensure_scores_mutable(course)?;

    let missing: Vec<&str> = updates
        .iter()
        .filter(|update| !course.is_enrolled(&update.uid))
        .map(|update| update.uid.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(EngineError::Validation(format!(
            "students {} are not enrolled in {}",
            missing.join(","),
            course.key
        )));
    }

    let mut staged = course.enrolled_students.clone();
    for update in updates {
        let Some(record) = staged.iter_mut().find(|record| record.uid == update.uid) else {
            continue;
        };
        let merged = record.scores.merged(&update.scores);
        validate_scores(course, &record.uid, &merged)?;
        record.scores = merged;
        if let Some(flag) = update.flag_not_present {
            record.flag_not_present = flag;
        }
        if let Some(flag) = update.flag_defaulter {
            record.flag_defaulter = flag;
        }
    }

    course.enrolled_students = staged;
    recompute_course(course)
}

pub fn set_sa_score(course: &mut Course, sa_score: f64) -> EngineResult<Option<GradingOutcome>> {
    ensure_grading_inputs_mutable(course)?;
    if !sa_score.is_finite() || sa_score < 0.0 {
        return Err(EngineError::Validation(format!(
            "SA score {sa_score} must be a non-negative number"
        )));
    }
    course.sa_score = Some(sa_score);
    recompute_course(course)
}

pub fn add_faculty(course: &mut Course, faculty: Actor) -> EngineResult<()> {
    if course.faculty.iter().any(|member| member.email == faculty.email) {
        return Err(EngineError::StateConflict(format!(
            "faculty {} is already assigned to {}",
            faculty.email, course.key
        )));
    }
    course.faculty.push(faculty);
    Ok(())
}

pub fn remove_faculty(course: &mut Course, email: &str) -> EngineResult<Actor> {
    let position = course
        .faculty
        .iter()
        .position(|member| member.email == email)
        .ok_or_else(|| EngineError::not_found(format!("faculty {email} on {}", course.key)))?;
    Ok(course.faculty.remove(position))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CourseType, Grade};
    use crate::score::tests::course;

    fn student(uid: &str) -> Student {
        Student {
            uid: uid.to_string(),
            name: format!("Student {uid}"),
            email: format!("{uid}@college.edu"),
            batch: 2022,
            branch: "CE".to_string(),
            cgpa: None,
        }
    }

    fn theory(ise: f64, mse: f64, ese: f64) -> ComponentScores {
        ComponentScores {
            theory_ise: Some(ise),
            theory_mse: Some(mse),
            theory_ese: Some(ese),
            ..Default::default()
        }
    }

    #[test]
    fn enrollment_refreshes_statistics() {
        let mut course = course(CourseType::Hss, 2.0, 0.0);
        enroll_students(&mut course, &[student("a"), student("b")]).unwrap();
        assert_eq!(course.statistics.student_count, 2);
        assert_eq!(course.enrolled_students[0].batch, 2022);
        // absolute course with zero scores grades immediately
        assert_eq!(course.enrolled_students[0].grade, Some(Grade::Ng));
    }

    #[test]
    fn duplicate_enrollment_rejects_whole_batch() {
        let mut course = course(CourseType::Core, 3.0, 0.0);
        enroll_students(&mut course, &[student("a")]).unwrap();
        let err = enroll_students(&mut course, &[student("b"), student("a")]).unwrap_err();
        assert!(matches!(err, EngineError::StateConflict(_)));
        assert_eq!(course.enrolled_students.len(), 1);

        let err = enroll_students(&mut course, &[student("c"), student("c")]).unwrap_err();
        assert!(matches!(err, EngineError::StateConflict(_)));
    }

    #[test]
    fn partial_update_keeps_existing_components() {
        let mut course = course(CourseType::Hss, 1.0, 0.0);
        enroll_students(&mut course, &[student("a")]).unwrap();
        apply_score_updates(&mut course, &[ScoreUpdate::new("a", theory(10.0, 20.0, 30.0))])
            .unwrap();
        let patch = ComponentScores {
            theory_ese: Some(45.0),
            ..Default::default()
        };
        apply_score_updates(&mut course, &[ScoreUpdate::new("a", patch)]).unwrap();

        let record = course.record("a").unwrap();
        assert_eq!(record.scores.theory_ise, Some(10.0));
        assert_eq!(record.scores.theory_ese, Some(45.0));
        assert_eq!(course.statistics.mean_total, 75.0);
        assert_eq!(record.grade, Some(Grade::Ab));
    }

    #[test]
    fn out_of_bounds_score_names_component_and_applies_nothing() {
        let mut course = course(CourseType::Hss, 1.0, 0.0);
        enroll_students(&mut course, &[student("a"), student("b")]).unwrap();
        let updates = vec![
            ScoreUpdate::new("a", theory(10.0, 10.0, 10.0)),
            ScoreUpdate::new("b", theory(10.0, 31.0, 10.0)),
        ];
        let err = apply_score_updates(&mut course, &updates).unwrap_err();
        match err {
            EngineError::ScoreOutOfBounds { component, max, .. } => {
                assert_eq!(component, Component::TheoryMse);
                assert_eq!(max, 30.0);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(course.record("a").unwrap().scores.theory_ise, None);
    }

    #[test]
    fn updates_for_unknown_students_are_rejected() {
        let mut course = course(CourseType::Core, 3.0, 0.0);
        enroll_students(&mut course, &[student("a")]).unwrap();
        let err = apply_score_updates(&mut course, &[ScoreUpdate::new("zz", theory(1.0, 1.0, 1.0))])
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn flags_force_grades() {
        let mut course = course(CourseType::SevaSatva, 1.0, 0.0);
        enroll_students(&mut course, &[student("a"), student("b")]).unwrap();
        let updates = vec![
            ScoreUpdate {
                flag_defaulter: Some(true),
                ..ScoreUpdate::new("a", theory(20.0, 30.0, 50.0))
            },
            ScoreUpdate {
                flag_not_present: Some(true),
                flag_defaulter: Some(true),
                ..ScoreUpdate::new("b", theory(20.0, 30.0, 50.0))
            },
        ];
        apply_score_updates(&mut course, &updates).unwrap();
        assert_eq!(course.record("a").unwrap().grade, Some(Grade::X));
        assert_eq!(course.record("b").unwrap().grade, Some(Grade::Np));
    }

    #[test]
    fn sa_score_triggers_moderated_grading() {
        let mut course = course(CourseType::Core, 1.0, 0.0);
        enroll_students(&mut course, &[student("a")]).unwrap();
        assert_eq!(course.record("a").unwrap().grade, None);

        set_sa_score(&mut course, 80.0).unwrap();
        assert_eq!(course.sa_score, Some(80.0));
        assert!(course.record("a").unwrap().grade.is_some());

        assert!(set_sa_score(&mut course, -1.0).unwrap_err().is_validation());
    }

    #[test]
    fn score_lock_blocks_mutations() {
        let mut course = course(CourseType::Core, 1.0, 0.0);
        course.scores_locked = true;
        assert!(enroll_students(&mut course, &[student("a")]).is_err());
        assert!(apply_score_updates(&mut course, &[]).is_err());
        course.grades_locked = true;
        assert!(set_sa_score(&mut course, 70.0).is_err());
    }

    #[test]
    fn faculty_assignment() {
        let mut course = course(CourseType::Core, 1.0, 0.0);
        add_faculty(&mut course, Actor::new("A", "a@college.edu")).unwrap();
        assert!(add_faculty(&mut course, Actor::new("A", "a@college.edu")).is_err());
        let removed = remove_faculty(&mut course, "a@college.edu").unwrap();
        assert_eq!(removed.name, "A");
        assert!(matches!(
            remove_faculty(&mut course, "a@college.edu"),
            Err(EngineError::NotFound(_))
        ));
    }
}
