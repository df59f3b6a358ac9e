use std::sync::Arc;

use grading_engine::config::EngineSettings;
use grading_engine::course::ScoreUpdate;
use grading_engine::models::{
    Actor, Cohort, ComponentScores, CourseKey, CourseType, Grade, NewCourse, Semester, Student,
    Weightages,
};
use grading_engine::store::{MemoryStore, ResultStore, StudentDirectory};
use grading_engine::{EngineError, GradingService, NewResult};

fn cohort() -> Cohort {
    Cohort::new(2023, "IT")
}

fn student(uid: &str, name: &str) -> Student {
    Student {
        uid: uid.to_string(),
        name: name.to_string(),
        email: format!("{uid}@college.edu"),
        batch: 2023,
        branch: "IT".to_string(),
        cgpa: None,
    }
}

fn theory_course(code: &str, semester: Semester, course_type: CourseType, credits: f64) -> NewCourse {
    NewCourse {
        key: CourseKey::new(code, 2024, semester),
        name: format!("{code} course"),
        course_type,
        credits_theory: credits,
        credits_lab: 0.0,
        weightages: Weightages {
            theory_ise: 20.0,
            theory_mse: 30.0,
            theory_ese: 50.0,
            ..Default::default()
        },
    }
}

fn theory(uid: &str, ise: f64, mse: f64, ese: f64) -> ScoreUpdate {
    ScoreUpdate::new(
        uid,
        ComponentScores {
            theory_ise: Some(ise),
            theory_mse: Some(mse),
            theory_ese: Some(ese),
            ..Default::default()
        },
    )
}

fn registrar() -> Actor {
    Actor::new("Registrar", "registrar@college.edu")
}

async fn service_with_students() -> GradingService<MemoryStore> {
    let service = GradingService::new(Arc::new(MemoryStore::new()), EngineSettings::default());
    for (uid, name) in [("s1", "Asha"), ("s2", "Bilal"), ("s3", "Chen")] {
        service.add_student(student(uid, name)).await.unwrap();
    }
    service
}

fn uids() -> Vec<String> {
    ["s1", "s2", "s3"].iter().map(|uid| uid.to_string()).collect()
}

#[tokio::test]
async fn two_semesters_grade_and_accumulate() {
    let service = service_with_students().await;

    // Semester 1: one moderated course and one absolute course.
    let ds = service
        .add_course(theory_course("DS", Semester::Odd, CourseType::Core, 4.0))
        .await
        .unwrap()
        .key;
    let hs = service
        .add_course(theory_course("HS1", Semester::Odd, CourseType::Hss, 2.0))
        .await
        .unwrap()
        .key;
    service.enroll(&ds, &uids()).await.unwrap();
    service.enroll(&hs, &uids()).await.unwrap();

    let course = service
        .update_scores(
            &ds,
            &[
                theory("s1", 10.0, 10.0, 20.0),
                theory("s2", 15.0, 20.0, 25.0),
                theory("s3", 20.0, 25.0, 35.0),
            ],
        )
        .await
        .unwrap();
    assert!(course.enrolled_students.iter().all(|record| record.grade.is_none()));
    assert_eq!(course.statistics.median_total, 60.0);

    service
        .update_scores(
            &hs,
            &[
                theory("s1", 10.0, 10.0, 10.0),
                theory("s2", 15.0, 20.0, 30.0),
                theory("s3", 20.0, 25.0, 45.0),
            ],
        )
        .await
        .unwrap();

    let course = service.set_sa_score(&ds, 90.0).await.unwrap();
    let grades: Vec<Option<Grade>> = course
        .enrolled_students
        .iter()
        .map(|record| record.grade)
        .collect();
    assert_eq!(grades, vec![Some(Grade::Cd), Some(Grade::Bc), Some(Grade::Ab)]);

    let first = service
        .create_result(NewResult {
            year: 2024,
            semester: Semester::Odd,
            cohort: cohort(),
            semester_number: 1,
            course_codes: vec!["DS".to_string(), "HS1".to_string()],
        })
        .await
        .unwrap();

    let s1 = first.student("s1").unwrap();
    assert!(s1.failed);
    assert_eq!(s1.sgpa, 0.0);
    assert_eq!(s1.courses["hss"].grade, Some(Grade::Ng));
    assert_eq!(s1.cgpa, 3.33);
    assert_eq!(first.student("s2").unwrap().sgpa, 7.33);
    assert_eq!(first.student("s3").unwrap().sgpa, 9.33);

    // Semester 2: a single absolute course.
    let ss = service
        .add_course(theory_course("SS1", Semester::Even, CourseType::SevaSatva, 2.0))
        .await
        .unwrap()
        .key;
    service.enroll(&ss, &uids()).await.unwrap();
    service
        .update_scores(
            &ss,
            &[
                theory("s1", 10.0, 15.0, 25.0),
                theory("s2", 15.0, 20.0, 40.0),
                theory("s3", 20.0, 30.0, 45.0),
            ],
        )
        .await
        .unwrap();

    let second = service
        .create_result(NewResult {
            year: 2024,
            semester: Semester::Even,
            cohort: cohort(),
            semester_number: 2,
            course_codes: vec!["SS1".to_string()],
        })
        .await
        .unwrap();
    assert_eq!(second.student("s1").unwrap().sgpa, 5.0);
    assert_eq!(second.student("s3").unwrap().sgpa, 10.0);

    let cgpas = service.recalculate_cgpas(&cohort()).await.unwrap();
    assert_eq!(cgpas["s1"], 3.75);
    assert_eq!(cgpas["s2"], 7.75);
    assert_eq!(cgpas["s3"], 9.5);

    let stored = service.store().get_student("s2").await.unwrap().unwrap();
    assert_eq!(stored.cgpa, Some(7.75));
    let earlier = service.store().get_result(first.id).await.unwrap().unwrap();
    assert_eq!(earlier.student("s2").unwrap().cgpa, 7.75);
}

#[tokio::test]
async fn locks_gate_each_stage() {
    let service = service_with_students().await;
    let key = service
        .add_course(theory_course("DS", Semester::Odd, CourseType::Core, 4.0))
        .await
        .unwrap()
        .key;
    service.enroll(&key, &uids()).await.unwrap();
    service
        .update_scores(&key, &[theory("s1", 18.0, 24.0, 40.0)])
        .await
        .unwrap();

    let err = service.lock_grades(&key, &registrar()).await.unwrap_err();
    assert!(matches!(err, EngineError::Precondition(_)));

    service.set_scores_lock(&key, true, &registrar()).await.unwrap();
    let err = service
        .update_scores(&key, &[theory("s2", 10.0, 10.0, 10.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StateConflict(_)));

    // SA can still move while only scores are frozen.
    service.set_sa_score(&key, 85.0).await.unwrap();
    let course = service.lock_grades(&key, &registrar()).await.unwrap();
    assert!(course.grades_locked);
    assert_eq!(
        course.grades_lock.as_ref().map(|lock| lock.actor.email.as_str()),
        Some("registrar@college.edu")
    );

    let err = service.set_sa_score(&key, 70.0).await.unwrap_err();
    assert!(matches!(err, EngineError::StateConflict(_)));
    let err = service
        .set_scores_lock(&key, false, &registrar())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StateConflict(_)));
}

#[tokio::test]
async fn scores_outside_weightage_are_rejected_without_partial_writes() {
    let service = service_with_students().await;
    let key = service
        .add_course(theory_course("DS", Semester::Odd, CourseType::Core, 4.0))
        .await
        .unwrap()
        .key;
    service.enroll(&key, &uids()).await.unwrap();

    let err = service
        .update_scores(
            &key,
            &[theory("s1", 18.0, 24.0, 40.0), theory("s2", 21.0, 24.0, 40.0)],
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let course = service.course(&key).await.unwrap();
    let s1 = course.record("s1").unwrap();
    assert_eq!(s1.scores, ComponentScores::default());
}
