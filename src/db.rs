use anyhow::Context;
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    Cohort, Course, CourseKey, CourseType, ExamResult, NewCourse, Semester, Student, Weightages,
};
use crate::store::{CourseStore, ResultStore, Store, StudentDirectory};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed store. Course and result aggregates live in JSONB
/// columns next to the key columns used for lookups.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn student_from_row(row: &sqlx::postgres::PgRow) -> anyhow::Result<Student> {
    Ok(Student {
        uid: row.try_get("uid")?,
        name: row.try_get("full_name")?,
        email: row.try_get("email")?,
        batch: row.try_get("batch")?,
        branch: row.try_get("branch")?,
        cgpa: row.try_get("cgpa")?,
    })
}

fn body<T>(row: &sqlx::postgres::PgRow) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let Json(value) = row
        .try_get::<Json<T>, _>("body")
        .context("failed to decode aggregate body")?;
    Ok(value)
}

async fn upsert_result<'e, E>(executor: E, result: &ExamResult) -> anyhow::Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO grading.exam_results
        (id, year, semester, batch, branch, semester_number, status, course_ids, body)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO UPDATE
        SET status = EXCLUDED.status, course_ids = EXCLUDED.course_ids, body = EXCLUDED.body
        "#,
    )
    .bind(result.id)
    .bind(result.year)
    .bind(result.semester.as_str())
    .bind(result.cohort.batch)
    .bind(&result.cohort.branch)
    .bind(i16::from(result.semester_number))
    .bind(result.status.as_str())
    .bind(&result.courses)
    .bind(Json(result))
    .execute(executor)
    .await
    .with_context(|| format!("failed to save result {}", result.id))?;
    Ok(())
}

#[async_trait]
impl CourseStore for PgStore {
    async fn get_course(&self, key: &CourseKey) -> anyhow::Result<Option<Course>> {
        let row = sqlx::query(
            "SELECT body FROM grading.courses \
             WHERE course_code = $1 AND year = $2 AND semester = $3",
        )
        .bind(&key.code)
        .bind(key.year)
        .bind(key.semester.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(body).transpose()
    }

    async fn courses_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<Vec<Course>> {
        let rows = sqlx::query("SELECT body FROM grading.courses WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(body).collect()
    }

    async fn courses_in_term(&self, year: i32, semester: Semester) -> anyhow::Result<Vec<Course>> {
        let rows = sqlx::query(
            "SELECT body FROM grading.courses \
             WHERE year = $1 AND semester = $2 ORDER BY course_code",
        )
        .bind(year)
        .bind(semester.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(body).collect()
    }

    async fn save_course(&self, course: &Course) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO grading.courses (id, course_code, year, semester, body)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET body = EXCLUDED.body
            "#,
        )
        .bind(course.id)
        .bind(&course.key.code)
        .bind(course.key.year)
        .bind(course.key.semester.as_str())
        .bind(Json(course))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save course {}", course.key))?;
        Ok(())
    }
}

#[async_trait]
impl StudentDirectory for PgStore {
    async fn get_student(&self, uid: &str) -> anyhow::Result<Option<Student>> {
        let row = sqlx::query(
            "SELECT uid, full_name, email, batch, branch, cgpa \
             FROM grading.students WHERE uid = $1",
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(student_from_row).transpose()
    }

    async fn students_in_cohort(&self, cohort: &Cohort) -> anyhow::Result<Vec<Student>> {
        let rows = sqlx::query(
            "SELECT uid, full_name, email, batch, branch, cgpa \
             FROM grading.students WHERE batch = $1 AND branch = $2 ORDER BY uid",
        )
        .bind(cohort.batch)
        .bind(&cohort.branch)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(student_from_row).collect()
    }

    async fn save_student(&self, student: &Student) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO grading.students (uid, full_name, email, batch, branch, cgpa)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (uid) DO UPDATE
            SET full_name = EXCLUDED.full_name, email = EXCLUDED.email,
                batch = EXCLUDED.batch, branch = EXCLUDED.branch, cgpa = EXCLUDED.cgpa
            "#,
        )
        .bind(&student.uid)
        .bind(&student.name)
        .bind(&student.email)
        .bind(student.batch)
        .bind(&student.branch)
        .bind(student.cgpa)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ResultStore for PgStore {
    async fn get_result(&self, id: Uuid) -> anyhow::Result<Option<ExamResult>> {
        let row = sqlx::query("SELECT body FROM grading.exam_results WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(body).transpose()
    }

    async fn results_for_cohort(&self, cohort: &Cohort) -> anyhow::Result<Vec<ExamResult>> {
        let rows = sqlx::query(
            "SELECT body FROM grading.exam_results \
             WHERE batch = $1 AND branch = $2 ORDER BY year, semester_number, id",
        )
        .bind(cohort.batch)
        .bind(&cohort.branch)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(body).collect()
    }

    async fn results_for_course(&self, course_id: Uuid) -> anyhow::Result<Vec<ExamResult>> {
        let rows = sqlx::query(
            "SELECT body FROM grading.exam_results \
             WHERE $1 = ANY(course_ids) ORDER BY year, semester_number, id",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(body).collect()
    }

    async fn find_result(
        &self,
        year: i32,
        semester: Semester,
        cohort: &Cohort,
    ) -> anyhow::Result<Option<ExamResult>> {
        let row = sqlx::query(
            "SELECT body FROM grading.exam_results \
             WHERE year = $1 AND semester = $2 AND batch = $3 AND branch = $4",
        )
        .bind(year)
        .bind(semester.as_str())
        .bind(cohort.batch)
        .bind(&cohort.branch)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(body).transpose()
    }

    async fn save_result(&self, result: &ExamResult) -> anyhow::Result<()> {
        upsert_result(&self.pool, result).await
    }
}

#[async_trait]
impl Store for PgStore {
    async fn commit_cgpa_sweep(
        &self,
        cgpas: &[(String, f64)],
        results: &[ExamResult],
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        for (uid, cgpa) in cgpas {
            sqlx::query("UPDATE grading.students SET cgpa = $2 WHERE uid = $1")
                .bind(uid)
                .bind(cgpa)
                .execute(&mut *tx)
                .await?;
        }
        for result in results {
            upsert_result(&mut *tx, result).await?;
        }
        tx.commit().await.context("failed to commit cgpa sweep")?;
        Ok(())
    }

    async fn remove_course(&self, key: &CourseKey) -> anyhow::Result<Option<Vec<ExamResult>>> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query(
            "DELETE FROM grading.courses \
             WHERE course_code = $1 AND year = $2 AND semester = $3 RETURNING id",
        )
        .bind(&key.code)
        .bind(key.year)
        .bind(key.semester.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = deleted else {
            return Ok(None);
        };
        let id: Uuid = row.try_get("id")?;

        let rows = sqlx::query(
            "SELECT body FROM grading.exam_results WHERE $1 = ANY(course_ids) \
             ORDER BY year, semester_number, id FOR UPDATE",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        let mut pruned = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut result: ExamResult = body(row)?;
            result.courses.retain(|course_id| *course_id != id);
            upsert_result(&mut *tx, &result).await?;
            pruned.push(result);
        }
        tx.commit().await?;
        Ok(Some(pruned))
    }
}

pub async fn seed(store: &PgStore) -> anyhow::Result<()> {
    let students = vec![
        ("2022300001", "Avery Lee", "avery.lee@college.edu"),
        ("2022300002", "Jules Moreno", "jules.moreno@college.edu"),
        ("2022300003", "Kiara Patel", "kiara.patel@college.edu"),
    ];

    for (uid, name, email) in students {
        sqlx::query(
            r#"
            INSERT INTO grading.students (uid, full_name, email, batch, branch)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (uid) DO UPDATE
            SET full_name = EXCLUDED.full_name, email = EXCLUDED.email
            "#,
        )
        .bind(uid)
        .bind(name)
        .bind(email)
        .bind(2022)
        .bind("CE")
        .execute(store.pool())
        .await?;
    }

    let theory_and_lab = Weightages {
        theory_ise: 20.0,
        theory_mse: 30.0,
        theory_ese: 50.0,
        lab_ise: 25.0,
        lab_mse: 25.0,
        lab_ese: 50.0,
    };
    let theory_only = Weightages {
        theory_ise: 20.0,
        theory_mse: 30.0,
        theory_ese: 50.0,
        ..Default::default()
    };
    let courses = vec![
        ("CE301", "Operating Systems", CourseType::Core, 3.0, 1.0, theory_and_lab),
        ("CE302", "Computer Networks", CourseType::Core, 3.0, 1.0, theory_and_lab),
        ("CE3PE1", "Machine Learning", CourseType::ProgramElective, 3.0, 0.0, theory_only),
        ("HS301", "Professional Ethics", CourseType::Hss, 2.0, 0.0, theory_only),
    ];

    for (code, name, course_type, credits_theory, credits_lab, weightages) in courses {
        let course = Course::new(NewCourse {
            key: CourseKey::new(code, 2024, Semester::Odd),
            name: name.to_string(),
            course_type,
            credits_theory,
            credits_lab,
            weightages,
        });
        sqlx::query(
            r#"
            INSERT INTO grading.courses (id, course_code, year, semester, body)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (course_code, year, semester) DO NOTHING
            "#,
        )
        .bind(course.id)
        .bind(&course.key.code)
        .bind(course.key.year)
        .bind(course.key.semester.as_str())
        .bind(Json(&course))
        .execute(store.pool())
        .await?;
    }

    Ok(())
}
