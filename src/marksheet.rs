use std::fmt::Write;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::models::{ExamResult, Student, StudentResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarksheetLine {
    pub course_code: String,
    pub course_name: String,
    /// `None` when no credits were earned.
    pub course_credits: Option<f64>,
    pub grade: String,
}

/// Everything a document renderer needs for one student's semester.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marksheet {
    pub student_name: String,
    pub student_uid: String,
    pub student_email: String,
    pub student_branch: String,
    pub student_batch: i32,
    pub semester: String,
    pub semester_number: u8,
    pub sgpa: f64,
    pub cgpa: f64,
    pub failed: bool,
    pub courses: Vec<MarksheetLine>,
}

pub fn build_marksheet(result: &ExamResult, entry: &StudentResult, student: &Student) -> Marksheet {
    let courses = entry
        .courses
        .values()
        .map(|outcome| MarksheetLine {
            course_code: outcome.course_code.clone(),
            course_name: outcome.course_name.clone(),
            course_credits: (outcome.grade_points > 0)
                .then(|| outcome.credits / f64::from(outcome.grade_points)),
            grade: outcome
                .grade
                .map(|grade| grade.to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    Marksheet {
        student_name: entry.name.clone(),
        student_uid: entry.uid.clone(),
        student_email: student.email.clone(),
        student_branch: student.branch.clone(),
        student_batch: student.batch,
        semester: format!("{} - {}", result.year, result.semester),
        semester_number: result.semester_number,
        sgpa: entry.sgpa,
        cgpa: entry.cgpa,
        failed: entry.failed,
        courses,
    }
}

pub fn render_markdown(sheet: &Marksheet) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Statement of Marks");
    let _ = writeln!(
        output,
        "{} ({}), batch {} {}",
        sheet.student_name, sheet.student_uid, sheet.student_batch, sheet.student_branch
    );
    let _ = writeln!(
        output,
        "Semester {} ({})",
        sheet.semester_number, sheet.semester
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Courses");

    if sheet.courses.is_empty() {
        let _ = writeln!(output, "No courses recorded for this semester.");
    } else {
        let _ = writeln!(output, "| Code | Course | Credits | Grade |");
        let _ = writeln!(output, "|------|--------|---------|-------|");
        for line in &sheet.courses {
            let credits = line
                .course_credits
                .map(|credits| format!("{credits:.1}"))
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} |",
                line.course_code, line.course_name, credits, line.grade
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- SGPA: {:.2}", sheet.sgpa);
    let _ = writeln!(output, "- CGPA: {:.2}", sheet.cgpa);
    if sheet.failed {
        let _ = writeln!(output, "- Status: not cleared");
    }

    output
}

/// Delivers a finalized marksheet, e.g. renders it and mails it out.
#[async_trait]
pub trait MarksheetPublisher: Send + Sync {
    async fn publish(&self, sheet: &Marksheet) -> anyhow::Result<()>;
}

/// Writes one markdown file per student into a directory.
#[derive(Debug, Clone)]
pub struct MarkdownPublisher {
    dir: PathBuf,
}

impl MarkdownPublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, sheet: &Marksheet) -> PathBuf {
        self.dir.join(format!(
            "{}-semester-{}.md",
            sheet.student_uid, sheet.semester_number
        ))
    }
}

#[async_trait]
impl MarksheetPublisher for MarkdownPublisher {
    async fn publish(&self, sheet: &Marksheet) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.path_for(sheet);
        tokio::fs::write(&path, render_markdown(sheet))
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(uid = %sheet.student_uid, path = %path.display(), "marksheet written");
        Ok(())
    }
}
