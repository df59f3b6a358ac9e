//! Persistence collaborators the engine reads from and writes back to.
//!
//! Each trait covers one aggregate. [`Store`] bundles them and adds the two
//! writes that span aggregates and must land atomically.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Cohort, Course, CourseKey, ExamResult, Semester, Student};

#[async_trait]
pub trait CourseStore: Send + Sync {
    async fn get_course(&self, key: &CourseKey) -> anyhow::Result<Option<Course>>;
    async fn courses_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<Vec<Course>>;
    async fn courses_in_term(&self, year: i32, semester: Semester) -> anyhow::Result<Vec<Course>>;
    /// Insert or replace the whole aggregate, enrolled students included.
    async fn save_course(&self, course: &Course) -> anyhow::Result<()>;
}

#[async_trait]
pub trait StudentDirectory: Send + Sync {
    async fn get_student(&self, uid: &str) -> anyhow::Result<Option<Student>>;
    async fn students_in_cohort(&self, cohort: &Cohort) -> anyhow::Result<Vec<Student>>;
    async fn save_student(&self, student: &Student) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn get_result(&self, id: Uuid) -> anyhow::Result<Option<ExamResult>>;
    async fn results_for_cohort(&self, cohort: &Cohort) -> anyhow::Result<Vec<ExamResult>>;
    /// Results whose course set includes `course_id`.
    async fn results_for_course(&self, course_id: Uuid) -> anyhow::Result<Vec<ExamResult>>;
    async fn find_result(
        &self,
        year: i32,
        semester: Semester,
        cohort: &Cohort,
    ) -> anyhow::Result<Option<ExamResult>>;
    async fn save_result(&self, result: &ExamResult) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Store: CourseStore + StudentDirectory + ResultStore {
    /// Write student CGPAs and the swept results in one unit.
    async fn commit_cgpa_sweep(
        &self,
        cgpas: &[(String, f64)],
        results: &[ExamResult],
    ) -> anyhow::Result<()>;

    /// Delete a course and drop its id from every result referencing it.
    /// Returns the results that were pruned.
    async fn remove_course(&self, key: &CourseKey) -> anyhow::Result<Option<Vec<ExamResult>>>;
}

#[derive(Debug, Default)]
struct Tables {
    courses: HashMap<Uuid, Course>,
    students: HashMap<String, Student>,
    results: HashMap<Uuid, ExamResult>,
}

/// In-process store. Each call holds a single lock, so multi-row writes are
/// atomic with respect to other callers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> anyhow::Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

fn sorted_results(mut results: Vec<ExamResult>) -> Vec<ExamResult> {
    results.sort_by(|a, b| {
        (a.year, a.semester_number, a.id).cmp(&(b.year, b.semester_number, b.id))
    });
    results
}

#[async_trait]
impl CourseStore for MemoryStore {
    async fn get_course(&self, key: &CourseKey) -> anyhow::Result<Option<Course>> {
        let tables = self.tables()?;
        Ok(tables.courses.values().find(|course| &course.key == key).cloned())
    }

    async fn courses_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<Vec<Course>> {
        let tables = self.tables()?;
        Ok(ids
            .iter()
            .filter_map(|id| tables.courses.get(id).cloned())
            .collect())
    }

    async fn courses_in_term(&self, year: i32, semester: Semester) -> anyhow::Result<Vec<Course>> {
        let tables = self.tables()?;
        let mut courses: Vec<Course> = tables
            .courses
            .values()
            .filter(|course| course.key.year == year && course.key.semester == semester)
            .cloned()
            .collect();
        courses.sort_by(|a, b| a.key.code.cmp(&b.key.code));
        Ok(courses)
    }

    async fn save_course(&self, course: &Course) -> anyhow::Result<()> {
        let mut tables = self.tables()?;
        tables.courses.insert(course.id, course.clone());
        Ok(())
    }
}

#[async_trait]
impl StudentDirectory for MemoryStore {
    async fn get_student(&self, uid: &str) -> anyhow::Result<Option<Student>> {
        Ok(self.tables()?.students.get(uid).cloned())
    }

    async fn students_in_cohort(&self, cohort: &Cohort) -> anyhow::Result<Vec<Student>> {
        let tables = self.tables()?;
        let mut students: Vec<Student> = tables
            .students
            .values()
            .filter(|student| student.batch == cohort.batch && student.branch == cohort.branch)
            .cloned()
            .collect();
        students.sort_by(|a, b| a.uid.cmp(&b.uid));
        Ok(students)
    }

    async fn save_student(&self, student: &Student) -> anyhow::Result<()> {
        let mut tables = self.tables()?;
        tables.students.insert(student.uid.clone(), student.clone());
        Ok(())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn get_result(&self, id: Uuid) -> anyhow::Result<Option<ExamResult>> {
        Ok(self.tables()?.results.get(&id).cloned())
    }

    async fn results_for_cohort(&self, cohort: &Cohort) -> anyhow::Result<Vec<ExamResult>> {
        let tables = self.tables()?;
        let results = tables
            .results
            .values()
            .filter(|result| &result.cohort == cohort)
            .cloned()
            .collect();
        Ok(sorted_results(results))
    }

    async fn results_for_course(&self, course_id: Uuid) -> anyhow::Result<Vec<ExamResult>> {
        let tables = self.tables()?;
        let results = tables
            .results
            .values()
            .filter(|result| result.courses.contains(&course_id))
            .cloned()
            .collect();
        Ok(sorted_results(results))
    }

    async fn find_result(
        &self,
        year: i32,
        semester: Semester,
        cohort: &Cohort,
    ) -> anyhow::Result<Option<ExamResult>> {
        let tables = self.tables()?;
        Ok(tables
            .results
            .values()
            .find(|result| {
                result.year == year && result.semester == semester && &result.cohort == cohort
            })
            .cloned())
    }

    async fn save_result(&self, result: &ExamResult) -> anyhow::Result<()> {
        let mut tables = self.tables()?;
        tables.results.insert(result.id, result.clone());
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn commit_cgpa_sweep(
        &self,
        cgpas: &[(String, f64)],
        results: &[ExamResult],
    ) -> anyhow::Result<()> {
        let mut tables = self.tables()?;
        for (uid, cgpa) in cgpas {
            if let Some(student) = tables.students.get_mut(uid) {
                student.cgpa = Some(*cgpa);
            }
        }
        for result in results {
            tables.results.insert(result.id, result.clone());
        }
        Ok(())
    }

    async fn remove_course(&self, key: &CourseKey) -> anyhow::Result<Option<Vec<ExamResult>>> {
        let mut tables = self.tables()?;
        let Some(id) = tables
            .courses
            .values()
            .find(|course| &course.key == key)
            .map(|course| course.id)
        else {
            return Ok(None);
        };
        tables.courses.remove(&id);

        let mut pruned = Vec::new();
        for result in tables.results.values_mut() {
            if result.courses.contains(&id) {
                result.courses.retain(|course_id| *course_id != id);
                pruned.push(result.clone());
            }
        }
        Ok(Some(sorted_results(pruned)))
    }
}
