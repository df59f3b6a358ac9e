//! Two-stage lock on a course: scores first, then grades.

use chrono::{DateTime, Utc};

use crate::error::{EngineError, EngineResult};
use crate::models::{Actor, Course, LockRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    ScoresLocked,
    GradesLocked,
}

pub fn lock_state(course: &Course) -> LockState {
    match (course.scores_locked, course.grades_locked) {
        (_, true) => LockState::GradesLocked,
        (true, false) => LockState::ScoresLocked,
        (false, false) => LockState::Unlocked,
    }
}

pub fn set_scores_lock(
    course: &mut Course,
    locked: bool,
    actor: &Actor,
    at: DateTime<Utc>,
) -> EngineResult<()> {
    if course.scores_locked == locked {
        let state = if locked { "locked" } else { "unlocked" };
        return Err(EngineError::StateConflict(format!(
            "scores for {} are already {state}",
            course.key
        )));
    }
    if !locked && course.grades_locked {
        return Err(EngineError::StateConflict(format!(
            "grades for {} are locked; scores can no longer be unlocked",
            course.key
        )));
    }

    course.scores_locked = locked;
    course.scores_lock = locked.then(|| LockRecord {
        actor: actor.clone(),
        at,
    });
    Ok(())
}

/// Irreversible once it succeeds.
pub fn set_grades_lock(course: &mut Course, actor: &Actor, at: DateTime<Utc>) -> EngineResult<()> {
    if course.grades_locked {
        return Err(EngineError::StateConflict(format!(
            "grades for {} are already locked",
            course.key
        )));
    }
    if !course.scores_locked {
        return Err(EngineError::Precondition(format!(
            "scores for {} must be locked before grades",
            course.key
        )));
    }

    course.grades_locked = true;
    course.grades_lock = Some(LockRecord {
        actor: actor.clone(),
        at,
    });
    Ok(())
}

/// Guard for enrollment, score and flag changes.
pub fn ensure_scores_mutable(course: &Course) -> EngineResult<()> {
    if course.scores_locked {
        return Err(EngineError::StateConflict(format!(
            "scores have already been locked for {}",
            course.key
        )));
    }
    Ok(())
}

/// Guard for grading inputs such as the SA score.
pub fn ensure_grading_inputs_mutable(course: &Course) -> EngineResult<()> {
    if course.grades_locked {
        return Err(EngineError::StateConflict(format!(
            "grades have already been locked for {}",
            course.key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CourseType;
    use crate::score::tests::course;

    fn actor() -> Actor {
        Actor::new("R. Iyer", "r.iyer@college.edu")
    }

    #[test]
    fn grade_lock_requires_score_lock() {
        let mut course = course(CourseType::Core, 3.0, 1.0);
        let err = set_grades_lock(&mut course, &actor(), Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::Precondition(_)));
        assert_eq!(lock_state(&course), LockState::Unlocked);
    }

    #[test]
    fn grade_lock_succeeds_exactly_once() {
        let mut course = course(CourseType::Core, 3.0, 1.0);
        set_scores_lock(&mut course, true, &actor(), Utc::now()).unwrap();
        assert_eq!(lock_state(&course), LockState::ScoresLocked);

        set_grades_lock(&mut course, &actor(), Utc::now()).unwrap();
        assert_eq!(lock_state(&course), LockState::GradesLocked);
        assert_eq!(course.grades_lock.as_ref().unwrap().actor, actor());

        let err = set_grades_lock(&mut course, &actor(), Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::StateConflict(_)));
    }

    #[test]
    fn redundant_score_toggle_is_rejected() {
        let mut course = course(CourseType::Core, 3.0, 1.0);
        let err = set_scores_lock(&mut course, false, &actor(), Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::StateConflict(_)));

        set_scores_lock(&mut course, true, &actor(), Utc::now()).unwrap();
        let err = set_scores_lock(&mut course, true, &actor(), Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::StateConflict(_)));
    }

    #[test]
    fn scores_can_be_unlocked_until_grades_lock() {
        let mut course = course(CourseType::Core, 3.0, 1.0);
        set_scores_lock(&mut course, true, &actor(), Utc::now()).unwrap();
        set_scores_lock(&mut course, false, &actor(), Utc::now()).unwrap();
        assert!(course.scores_lock.is_none());
        assert!(ensure_scores_mutable(&course).is_ok());

        set_scores_lock(&mut course, true, &actor(), Utc::now()).unwrap();
        set_grades_lock(&mut course, &actor(), Utc::now()).unwrap();
        let err = set_scores_lock(&mut course, false, &actor(), Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::StateConflict(_)));
    }

    #[test]
    fn guards_follow_lock_flags() {
        let mut course = course(CourseType::Core, 3.0, 1.0);
        assert!(ensure_scores_mutable(&course).is_ok());
        assert!(ensure_grading_inputs_mutable(&course).is_ok());

        set_scores_lock(&mut course, true, &actor(), Utc::now()).unwrap();
        assert!(ensure_scores_mutable(&course).is_err());
        assert!(ensure_grading_inputs_mutable(&course).is_ok());

        set_grades_lock(&mut course, &actor(), Utc::now()).unwrap();
        assert!(ensure_grading_inputs_mutable(&course).is_err());
    }
}
