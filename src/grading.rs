//! Letter grading for a course cohort.
//!
//! Absolute courses (HSS, Seva Satva) use fixed thresholds on the weighted
//! score. Every other course is moderated: bands are spread between half
//! the cohort median and the course's SA score.

use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::models::{Course, EnrolledStudentRecord, Grade};
use crate::score::weighted_score;
use crate::stats::upper_median;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GradingMode {
    Absolute,
    Moderated { median: f64, sa_score: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingSaScore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GradingOutcome {
    Graded { students: usize },
    Skipped(SkipReason),
}

pub fn grade_points(grade: Grade) -> u8 {
    match grade {
        Grade::Aa => 10,
        Grade::Ab => 9,
        Grade::Bb => 8,
        Grade::Bc => 7,
        Grade::Cc => 6,
        Grade::Cd => 5,
        Grade::Dd => 4,
        Grade::Ff | Grade::Ng | Grade::Np | Grade::X => 0,
    }
}

/// Points for a cached grade; an ungraded record earns nothing.
pub fn points_for(grade: Option<Grade>) -> u8 {
    grade.map(grade_points).unwrap_or(0)
}

pub fn absolute_grade(score: f64) -> Grade {
    match score {
        s if s > 85.0 => Grade::Aa,
        s if s > 70.0 => Grade::Ab,
        s if s > 60.0 => Grade::Bb,
        s if s > 55.0 => Grade::Bc,
        s if s > 50.0 => Grade::Cc,
        s if s > 45.0 => Grade::Cd,
        s if s > 40.0 => Grade::Dd,
        _ => Grade::Ng,
    }
}

/// When `sa_score == median / 2` the interval is zero and the AB..DD bands
/// all share the lower boundary; that collapse is kept as-is.
pub fn moderated_grade(score: f64, median: f64, sa_score: f64) -> Grade {
    let mb2 = median / 2.0;
    let interval = (sa_score - mb2) / 6.0;

    if score > sa_score {
        Grade::Aa
    } else if score >= mb2 + 5.0 * interval {
        Grade::Ab
    } else if score >= mb2 + 4.0 * interval {
        Grade::Bb
    } else if score >= mb2 + 3.0 * interval {
        Grade::Bc
    } else if score >= mb2 + 2.0 * interval {
        Grade::Cc
    } else if score >= mb2 + interval {
        Grade::Cd
    } else if score >= mb2 {
        Grade::Dd
    } else {
        Grade::Ff
    }
}

pub fn apply_flags(grade: Grade, record: &EnrolledStudentRecord) -> Grade {
    if record.flag_not_present {
        Grade::Np
    } else if record.flag_defaulter {
        Grade::X
    } else {
        grade
    }
}

/// Resolve how a course would be graded right now. `None` means the course
/// is moderated but has no SA score yet.
pub fn grading_mode(course: &Course) -> Option<GradingMode> {
    if course.course_type.is_absolute() {
        return Some(GradingMode::Absolute);
    }
    let sa_score = course.sa_score?;
    let scores: Vec<f64> = course
        .enrolled_students
        .iter()
        .map(|record| weighted_score(record, course))
        .collect();
    Some(GradingMode::Moderated {
        median: upper_median(scores),
        sa_score,
    })
}

pub fn grade_record(record: &EnrolledStudentRecord, course: &Course, mode: GradingMode) -> Grade {
    let score = weighted_score(record, course);
    let grade = match mode {
        GradingMode::Absolute => absolute_grade(score),
        GradingMode::Moderated { median, sa_score } => moderated_grade(score, median, sa_score),
    };
    apply_flags(grade, record)
}

/// Regrade every enrolled student of `course` in place.
///
/// This is the only writer of `EnrolledStudentRecord::grade`. Call it after
/// any change to scores, flags, enrollment or the SA score.
pub fn grade_course(course: &mut Course) -> EngineResult<GradingOutcome> {
    if course.enrolled_students.is_empty() {
        return Err(EngineError::StateConflict(format!(
            "course {} has no enrolled students to grade",
            course.key
        )));
    }

    let Some(mode) = grading_mode(course) else {
        warn!(course = %course.key, "SA score not set, grading skipped");
        return Ok(GradingOutcome::Skipped(SkipReason::MissingSaScore));
    };
    debug!(course = %course.key, ?mode, "grading cohort");

    let grades: Vec<Grade> = course
        .enrolled_students
        .iter()
        .map(|record| grade_record(record, course, mode))
        .collect();
    for (record, grade) in course.enrolled_students.iter_mut().zip(grades) {
        record.grade = Some(grade);
    }

    Ok(GradingOutcome::Graded {
        students: course.enrolled_students.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComponentScores, CourseType};
    use crate::score::tests::{course, record};

    fn theory_only(uid: &str, total: f64) -> EnrolledStudentRecord {
        record(
            uid,
            ComponentScores {
                theory_ese: Some(total),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_absolute_boundaries() {
        assert_eq!(absolute_grade(85.01), Grade::Aa);
        assert_eq!(absolute_grade(85.0), Grade::Ab);
        assert_eq!(absolute_grade(70.0), Grade::Bb);
        assert_eq!(absolute_grade(60.5), Grade::Bb);
        assert_eq!(absolute_grade(60.0), Grade::Bc);
        assert_eq!(absolute_grade(55.0), Grade::Cc);
        assert_eq!(absolute_grade(50.0), Grade::Cd);
        assert_eq!(absolute_grade(45.0), Grade::Dd);
        assert_eq!(absolute_grade(40.0), Grade::Ng);
        assert_eq!(absolute_grade(0.0), Grade::Ng);
    }

    #[test]
    fn test_moderated_bands() {
        // median 60 -> mb2 30, sa 90 -> interval 10
        assert_eq!(moderated_grade(95.0, 60.0, 90.0), Grade::Aa);
        assert_eq!(moderated_grade(90.0, 60.0, 90.0), Grade::Ab);
        assert_eq!(moderated_grade(80.0, 60.0, 90.0), Grade::Ab);
        assert_eq!(moderated_grade(79.9, 60.0, 90.0), Grade::Bb);
        assert_eq!(moderated_grade(60.0, 60.0, 90.0), Grade::Bc);
        assert_eq!(moderated_grade(50.0, 60.0, 90.0), Grade::Cc);
        assert_eq!(moderated_grade(40.0, 60.0, 90.0), Grade::Cd);
        assert_eq!(moderated_grade(30.0, 60.0, 90.0), Grade::Dd);
        assert_eq!(moderated_grade(29.0, 60.0, 90.0), Grade::Ff);
    }

    #[test]
    fn test_degenerate_interval_collapses_bands() {
        // sa == mb2: every band below AA starts at 30
        assert_eq!(moderated_grade(31.0, 60.0, 30.0), Grade::Aa);
        assert_eq!(moderated_grade(30.0, 60.0, 30.0), Grade::Ab);
        assert_eq!(moderated_grade(29.9, 60.0, 30.0), Grade::Ff);
    }

    #[test]
    fn test_flags_override_score() {
        let mut student = theory_only("1", 99.0);
        student.flag_defaulter = true;
        assert_eq!(apply_flags(Grade::Aa, &student), Grade::X);
        student.flag_not_present = true;
        assert_eq!(apply_flags(Grade::Aa, &student), Grade::Np);
        student.flag_defaulter = false;
        assert_eq!(apply_flags(Grade::Ff, &student), Grade::Np);
    }

    #[test]
    fn test_grade_points_table() {
        assert_eq!(grade_points(Grade::Aa), 10);
        assert_eq!(grade_points(Grade::Ab), 9);
        assert_eq!(grade_points(Grade::Bb), 8);
        assert_eq!(grade_points(Grade::Bc), 7);
        assert_eq!(grade_points(Grade::Cc), 6);
        assert_eq!(grade_points(Grade::Cd), 5);
        assert_eq!(grade_points(Grade::Dd), 4);
        for grade in [Grade::Ff, Grade::Ng, Grade::Np, Grade::X] {
            assert_eq!(grade_points(grade), 0);
        }
        assert_eq!(points_for(None), 0);
    }

    #[test]
    fn test_grade_course_moderated_cohort() {
        let mut course = course(CourseType::Core, 1.0, 0.0);
        course.sa_score = Some(90.0);
        course.enrolled_students = vec![
            theory_only("a", 40.0),
            theory_only("b", 60.0),
            theory_only("c", 80.0),
        ];
        let outcome = grade_course(&mut course).unwrap();
        assert_eq!(outcome, GradingOutcome::Graded { students: 3 });

        let grades: Vec<_> = course.enrolled_students.iter().map(|r| r.grade).collect();
        assert_eq!(
            grades,
            vec![Some(Grade::Cd), Some(Grade::Bc), Some(Grade::Ab)]
        );
    }

    #[test]
    fn test_grade_course_without_sa_is_noop() {
        let mut course = course(CourseType::ProgramElective, 1.0, 0.0);
        course.enrolled_students = vec![theory_only("a", 70.0)];
        let outcome = grade_course(&mut course).unwrap();
        assert_eq!(outcome, GradingOutcome::Skipped(SkipReason::MissingSaScore));
        assert_eq!(course.enrolled_students[0].grade, None);
    }

    #[test]
    fn test_absolute_course_needs_no_sa() {
        let mut course = course(CourseType::Hss, 2.0, 0.0);
        course.enrolled_students = vec![theory_only("a", 86.0), theory_only("b", 12.0)];
        grade_course(&mut course).unwrap();
        assert_eq!(course.enrolled_students[0].grade, Some(Grade::Aa));
        assert_eq!(course.enrolled_students[1].grade, Some(Grade::Ng));
    }

    #[test]
    fn test_empty_cohort_is_conflict() {
        let mut course = course(CourseType::Hss, 2.0, 0.0);
        let err = grade_course(&mut course).unwrap_err();
        assert!(matches!(err, EngineError::StateConflict(_)));
    }

    #[test]
    fn test_grades_are_reproducible() {
        let mut course = course(CourseType::Core, 3.0, 1.0);
        course.sa_score = Some(75.0);
        course.enrolled_students = vec![
            theory_only("a", 20.0),
            theory_only("b", 55.0),
            theory_only("c", 90.0),
            theory_only("d", 64.0),
        ];
        grade_course(&mut course).unwrap();
        let first: Vec<_> = course.enrolled_students.iter().map(|r| r.grade).collect();
        grade_course(&mut course).unwrap();
        let second: Vec<_> = course.enrolled_students.iter().map(|r| r.grade).collect();
        assert_eq!(first, second);
    }
}
