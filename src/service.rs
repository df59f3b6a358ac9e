//! Orchestrates engine operations against a [`Store`].
//!
//! Each operation loads a fresh snapshot, applies the pure engine functions
//! and writes the result back as one unit. Mutations are serialized per
//! course and per cohort; when both are needed the course lock is always
//! taken first.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, Semaphore};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::cgpa;
use crate::config::EngineSettings;
use crate::course::{self as course_ops, ScoreUpdate};
use crate::error::{EngineError, EngineResult};
use crate::lock;
use crate::marksheet::{build_marksheet, Marksheet, MarksheetPublisher};
use crate::models::{
    Actor, Cohort, Course, CourseKey, CourseStatistics, ExamResult, NewCourse, ResultPreview,
    ResultStatus, Semester, Student,
};
use crate::result as pipeline;
use crate::store::{CourseStore, ResultStore, Store, StudentDirectory};

/// One async mutex per key, created on first use and dropped once nobody
/// holds or waits on it.
struct KeyedLocks<K: Eq + Hash + Clone> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

/// Releases the key's mutex on drop and forgets the key when it went idle.
struct KeyedGuard<'a, K: Eq + Hash + Clone> {
    owner: &'a KeyedLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.owner.table();
        // the map's own reference is the only one left
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<K, Arc<AsyncMutex<()>>>> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn acquire(&self, key: &K) -> KeyedGuard<'_, K> {
        let lock = self.table().entry(key.clone()).or_default().clone();
        KeyedGuard {
            owner: self,
            key: key.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Lock several keys. Callers pass them sorted so that concurrent
    /// multi-key holders never wait on each other in a cycle.
    async fn acquire_all(&self, keys: &[K]) -> Vec<KeyedGuard<'_, K>> {
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.acquire(key).await);
        }
        guards
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table().len()
    }
}

/// Request to create a result for a cohort over a set of course codes.
#[derive(Debug, Clone)]
pub struct NewResult {
    pub year: i32,
    pub semester: Semester,
    pub cohort: Cohort,
    pub semester_number: u8,
    pub course_codes: Vec<String>,
}

pub struct GradingService<S> {
    store: Arc<S>,
    courses: KeyedLocks<CourseKey>,
    cohorts: KeyedLocks<Cohort>,
    sweeps: Semaphore,
}

impl<S: Store> GradingService<S> {
    pub fn new(store: Arc<S>, settings: EngineSettings) -> Self {
        Self {
            store,
            courses: KeyedLocks::new(),
            cohorts: KeyedLocks::new(),
            sweeps: Semaphore::new(settings.sweep_concurrency.max(1)),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn load_course(&self, key: &CourseKey) -> EngineResult<Course> {
        self.store
            .get_course(key)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("course {key}")))
    }

    async fn load_result(&self, id: Uuid) -> EngineResult<ExamResult> {
        self.store
            .get_result(id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("result {id}")))
    }

    pub async fn add_student(&self, student: Student) -> EngineResult<Student> {
        if self.store.get_student(&student.uid).await?.is_some() {
            return Err(EngineError::StateConflict(format!(
                "a student with uid {} already exists",
                student.uid
            )));
        }
        self.store.save_student(&student).await?;
        info!(uid = %student.uid, cohort = %student.cohort(), "student added");
        Ok(student)
    }

    pub async fn add_course(&self, new_course: NewCourse) -> EngineResult<Course> {
        let _guard = self.courses.acquire(&new_course.key).await;
        if self.store.get_course(&new_course.key).await?.is_some() {
            return Err(EngineError::StateConflict(format!(
                "course {} already exists",
                new_course.key
            )));
        }
        let mut course = Course::new(new_course);
        course_ops::recompute_course(&mut course)?;
        self.store.save_course(&course).await?;
        info!(course = %course.key, course_type = %course.course_type, "course added");
        Ok(course)
    }

    pub async fn course(&self, key: &CourseKey) -> EngineResult<Course> {
        self.load_course(key).await
    }

    pub async fn statistics(&self, key: &CourseKey) -> EngineResult<CourseStatistics> {
        Ok(self.load_course(key).await?.statistics)
    }

    /// Enroll students by uid. Recomputes statistics and grades.
    pub async fn enroll(&self, key: &CourseKey, uids: &[String]) -> EngineResult<Course> {
        let _guard = self.courses.acquire(key).await;
        let mut course = self.load_course(key).await?;
        lock::ensure_scores_mutable(&course)?;

        let mut students = Vec::with_capacity(uids.len());
        let mut missing = Vec::new();
        for uid in uids {
            match self.store.get_student(uid).await? {
                Some(student) => students.push(student),
                None => missing.push(uid.as_str()),
            }
        }
        if !missing.is_empty() {
            return Err(EngineError::not_found(format!(
                "students {}",
                missing.join(",")
            )));
        }

        course_ops::enroll_students(&mut course, &students)?;
        self.store.save_course(&course).await?;
        info!(course = %key, enrolled = students.len(), "students enrolled");
        Ok(course)
    }

    /// Apply score and flag updates. Recomputes statistics and grades.
    pub async fn update_scores(
        &self,
        key: &CourseKey,
        updates: &[ScoreUpdate],
    ) -> EngineResult<Course> {
        let _guard = self.courses.acquire(key).await;
        let mut course = self.load_course(key).await?;
        let outcome = course_ops::apply_score_updates(&mut course, updates)?;
        self.store.save_course(&course).await?;
        info!(course = %key, updated = updates.len(), ?outcome, "scores updated");
        Ok(course)
    }

    pub async fn set_scores_lock(
        &self,
        key: &CourseKey,
        locked: bool,
        actor: &Actor,
    ) -> EngineResult<Course> {
        let _guard = self.courses.acquire(key).await;
        let mut course = self.load_course(key).await?;
        lock::set_scores_lock(&mut course, locked, actor, Utc::now())?;
        self.store.save_course(&course).await?;
        info!(course = %key, locked, by = %actor.email, "scores lock changed");
        Ok(course)
    }

    pub async fn lock_grades(&self, key: &CourseKey, actor: &Actor) -> EngineResult<Course> {
        let _guard = self.courses.acquire(key).await;
        let mut course = self.load_course(key).await?;
        lock::set_grades_lock(&mut course, actor, Utc::now())?;
        self.store.save_course(&course).await?;
        info!(course = %key, by = %actor.email, "grades locked");
        Ok(course)
    }

    /// Set the SA score, regrade the course and sweep CGPAs for every cohort
    /// enrolled in it.
    pub async fn set_sa_score(&self, key: &CourseKey, sa_score: f64) -> EngineResult<Course> {
        let _guard = self.courses.acquire(key).await;
        let mut course = self.load_course(key).await?;
        let outcome = course_ops::set_sa_score(&mut course, sa_score)?;
        self.store.save_course(&course).await?;
        info!(course = %key, sa_score, ?outcome, "SA score set");

        for cohort in course.cohorts() {
            let _cohort_guard = self.cohorts.acquire(&cohort).await;
            self.sweep_locked(&cohort).await?;
        }
        Ok(course)
    }

    pub async fn add_faculty(&self, key: &CourseKey, faculty: Actor) -> EngineResult<Course> {
        let _guard = self.courses.acquire(key).await;
        let mut course = self.load_course(key).await?;
        course_ops::add_faculty(&mut course, faculty)?;
        self.store.save_course(&course).await?;
        Ok(course)
    }

    pub async fn remove_faculty(&self, key: &CourseKey, email: &str) -> EngineResult<Course> {
        let _guard = self.courses.acquire(key).await;
        let mut course = self.load_course(key).await?;
        course_ops::remove_faculty(&mut course, email)?;
        self.store.save_course(&course).await?;
        Ok(course)
    }

    /// Delete a course. Results referencing it keep their data but lose the
    /// reference, and their cohorts' CGPAs are swept again. Those cohorts stay
    /// locked from before the prune until the sweep is committed.
    pub async fn delete_course(&self, key: &CourseKey) -> EngineResult<Vec<ExamResult>> {
        let _guard = self.courses.acquire(key).await;
        let course = self.load_course(key).await?;

        // With the course lock held no new result can pick this course up.
        let mut cohorts: Vec<Cohort> = self
            .store
            .results_for_course(course.id)
            .await?
            .into_iter()
            .map(|result| result.cohort)
            .collect();
        cohorts.sort();
        cohorts.dedup();
        let _cohort_guards = self.cohorts.acquire_all(&cohorts).await;

        let pruned = self
            .store
            .remove_course(key)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("course {key}")))?;
        info!(course = %key, pruned = pruned.len(), "course deleted");

        for cohort in &cohorts {
            self.sweep_locked(cohort).await?;
        }
        Ok(pruned)
    }

    pub async fn preview(
        &self,
        year: i32,
        semester: Semester,
        cohort: &Cohort,
    ) -> EngineResult<ResultPreview> {
        let students = self.store.students_in_cohort(cohort).await?;
        let courses = self.store.courses_in_term(year, semester).await?;
        Ok(pipeline::preview(year, semester, cohort, &students, &courses))
    }

    /// Create and immediately generate a result for a cohort. The requested
    /// courses are locked before the cohort.
    pub async fn create_result(&self, request: NewResult) -> EngineResult<ExamResult> {
        pipeline::validate_semester_number(request.semester_number)?;
        let mut codes = request.course_codes.clone();
        codes.sort();
        codes.dedup();
        let keys: Vec<CourseKey> = codes
            .iter()
            .map(|code| CourseKey::new(code.clone(), request.year, request.semester))
            .collect();
        let _course_guards = self.courses.acquire_all(&keys).await;
        let _guard = self.cohorts.acquire(&request.cohort).await;

        if self
            .store
            .find_result(request.year, request.semester, &request.cohort)
            .await?
            .is_some()
        {
            return Err(EngineError::StateConflict(format!(
                "a result for {} in {} {} already exists",
                request.cohort, request.year, request.semester
            )));
        }

        let term = self
            .store
            .courses_in_term(request.year, request.semester)
            .await?;
        let course_ids = pipeline::resolve_course_set(&request.course_codes, &term)?;
        let mut result = ExamResult::new(
            request.year,
            request.semester,
            request.cohort.clone(),
            request.semester_number,
            course_ids,
        );
        info!(result = %result.id, cohort = %request.cohort, "result created");

        self.generate_locked(&mut result).await?;
        self.sweep_locked(&request.cohort).await?;
        self.load_result(result.id).await
    }

    /// Rebuild a result from current grades and sweep its cohort's CGPAs.
    pub async fn generate_result(&self, id: Uuid) -> EngineResult<ExamResult> {
        let cohort = self.load_result(id).await?.cohort;
        let _guard = self.cohorts.acquire(&cohort).await;
        let mut result = self.load_result(id).await?;
        self.generate_locked(&mut result).await?;
        self.sweep_locked(&cohort).await?;
        self.load_result(id).await
    }

    async fn generate_locked(&self, result: &mut ExamResult) -> EngineResult<()> {
        let students = self.store.students_in_cohort(&result.cohort).await?;
        let courses = self.store.courses_by_ids(&result.courses).await?;
        pipeline::generate(result, &students, &courses, Utc::now())?;
        self.store.save_result(result).await?;
        info!(
            result = %result.id,
            cohort = %result.cohort,
            students = result.result_data.len(),
            courses = courses.len(),
            "result generated"
        );
        Ok(())
    }

    pub async fn recalculate_cgpas(&self, cohort: &Cohort) -> EngineResult<BTreeMap<String, f64>> {
        let _guard = self.cohorts.acquire(cohort).await;
        self.sweep_locked(cohort).await
    }

    #[instrument(skip_all, fields(cohort = %cohort))]
    async fn sweep_locked(&self, cohort: &Cohort) -> EngineResult<BTreeMap<String, f64>> {
        let _permit = self
            .sweeps
            .acquire()
            .await
            .map_err(|err| EngineError::Store(err.into()))?;

        let results = self.store.results_for_cohort(cohort).await?;
        if results.is_empty() {
            debug!("no results to sweep");
            return Ok(BTreeMap::new());
        }
        let mut ids: Vec<Uuid> = results
            .iter()
            .flat_map(|result| result.courses.iter().copied())
            .collect();
        ids.sort();
        ids.dedup();
        let courses = self.store.courses_by_ids(&ids).await?;

        let sweep = cgpa::sweep(results, &courses);
        let updates: Vec<(String, f64)> = sweep
            .cgpas
            .iter()
            .map(|(uid, cgpa)| (uid.clone(), *cgpa))
            .collect();
        self.store
            .commit_cgpa_sweep(&updates, &sweep.results)
            .await?;
        info!(
            students = updates.len(),
            results = sweep.results.len(),
            "cgpa sweep committed"
        );
        Ok(sweep.cgpas)
    }

    pub async fn marksheet(&self, id: Uuid, uid: &str) -> EngineResult<Marksheet> {
        let result = self.load_result(id).await?;
        let entry = result
            .student(uid)
            .ok_or_else(|| EngineError::not_found(format!("student {uid} in result {id}")))?;
        let student = self
            .store
            .get_student(uid)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("student {uid}")))?;
        Ok(build_marksheet(&result, entry, &student))
    }

    /// Mark a result declared and publish every student's marksheet.
    pub async fn declare_result(
        &self,
        id: Uuid,
        publisher: &dyn MarksheetPublisher,
    ) -> EngineResult<ExamResult> {
        let cohort = self.load_result(id).await?.cohort;
        let _guard = self.cohorts.acquire(&cohort).await;
        let mut result = self.load_result(id).await?;
        if result.status == ResultStatus::Declared {
            return Err(EngineError::StateConflict(format!(
                "result {id} is already declared"
            )));
        }
        if result.generated_at.is_none() {
            return Err(EngineError::Precondition(format!(
                "result {id} has not been generated"
            )));
        }

        let mut sheets = Vec::with_capacity(result.result_data.len());
        for entry in &result.result_data {
            let student = self
                .store
                .get_student(&entry.uid)
                .await?
                .ok_or_else(|| EngineError::not_found(format!("student {}", entry.uid)))?;
            sheets.push(build_marksheet(&result, entry, &student));
        }

        // A failed delivery leaves the result a draft so it can be declared again.
        for sheet in &sheets {
            publisher.publish(sheet).await?;
        }
        result.status = ResultStatus::Declared;
        self.store.save_result(&result).await?;
        info!(result = %id, published = sheets.len(), "result declared");
        Ok(result)
    }
}
