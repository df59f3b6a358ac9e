use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Semester {
    Odd,
    Even,
}

impl Semester {
    pub fn as_str(&self) -> &'static str {
        match self {
            Semester::Odd => "odd",
            Semester::Even => "even",
        }
    }

    pub fn parse(value: &str) -> Option<Semester> {
        match value {
            "odd" => Some(Semester::Odd),
            "even" => Some(Semester::Even),
            _ => None,
        }
    }
}

impl fmt::Display for Semester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum CourseType {
    #[default]
    Core,
    OpenElective,
    ProgramElective,
    SevaSatva,
    Project,
    Hss,
}

impl CourseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourseType::Core => "core",
            CourseType::OpenElective => "open-elective",
            CourseType::ProgramElective => "program-elective",
            CourseType::SevaSatva => "seva-satva",
            CourseType::Project => "project",
            CourseType::Hss => "hss",
        }
    }

    /// Fixed-threshold courses; these never need an SA score and share one
    /// slot in a student's result.
    pub fn is_absolute(&self) -> bool {
        matches!(self, CourseType::Hss | CourseType::SevaSatva)
    }
}

impl fmt::Display for CourseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CourseKey {
    pub code: String,
    pub year: i32,
    pub semester: Semester,
}

impl CourseKey {
    pub fn new(code: impl Into<String>, year: i32, semester: Semester) -> Self {
        Self {
            code: code.into(),
            year,
            semester,
        }
    }
}

impl fmt::Display for CourseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {})", self.code, self.year, self.semester)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cohort {
    pub batch: i32,
    pub branch: String,
}

impl Cohort {
    pub fn new(batch: i32, branch: impl Into<String>) -> Self {
        Self {
            batch,
            branch: branch.into(),
        }
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.batch, self.branch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    TheoryIse,
    TheoryMse,
    TheoryEse,
    LabIse,
    LabMse,
    LabEse,
}

impl Component {
    pub const ALL: [Component; 6] = [
        Component::TheoryIse,
        Component::TheoryMse,
        Component::TheoryEse,
        Component::LabIse,
        Component::LabMse,
        Component::LabEse,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Component::TheoryIse => "Theory ISE",
            Component::TheoryMse => "Theory MSE",
            Component::TheoryEse => "Theory ESE",
            Component::LabIse => "Lab ISE",
            Component::LabMse => "Lab MSE",
            Component::LabEse => "Lab ESE",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Upper bound for each raw component score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Weightages {
    pub theory_ise: f64,
    pub theory_mse: f64,
    pub theory_ese: f64,
    pub lab_ise: f64,
    pub lab_mse: f64,
    pub lab_ese: f64,
}

impl Weightages {
    pub fn get(&self, component: Component) -> f64 {
        match component {
            Component::TheoryIse => self.theory_ise,
            Component::TheoryMse => self.theory_mse,
            Component::TheoryEse => self.theory_ese,
            Component::LabIse => self.lab_ise,
            Component::LabMse => self.lab_mse,
            Component::LabEse => self.lab_ese,
        }
    }
}

/// Raw component scores. `None` means not yet entered and counts as 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub theory_ise: Option<f64>,
    pub theory_mse: Option<f64>,
    pub theory_ese: Option<f64>,
    pub lab_ise: Option<f64>,
    pub lab_mse: Option<f64>,
    pub lab_ese: Option<f64>,
}

impl ComponentScores {
    pub fn get(&self, component: Component) -> Option<f64> {
        match component {
            Component::TheoryIse => self.theory_ise,
            Component::TheoryMse => self.theory_mse,
            Component::TheoryEse => self.theory_ese,
            Component::LabIse => self.lab_ise,
            Component::LabMse => self.lab_mse,
            Component::LabEse => self.lab_ese,
        }
    }

    pub fn set(&mut self, component: Component, value: Option<f64>) {
        let slot = match component {
            Component::TheoryIse => &mut self.theory_ise,
            Component::TheoryMse => &mut self.theory_mse,
            Component::TheoryEse => &mut self.theory_ese,
            Component::LabIse => &mut self.lab_ise,
            Component::LabMse => &mut self.lab_mse,
            Component::LabEse => &mut self.lab_ese,
        };
        *slot = value;
    }

    /// Overlay the provided components, keeping existing values where the
    /// patch is empty.
    pub fn merged(&self, patch: &ComponentScores) -> ComponentScores {
        let mut merged = *self;
        for component in Component::ALL {
            if let Some(value) = patch.get(component) {
                merged.set(component, Some(value));
            }
        }
        merged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Grade {
    Aa,
    Ab,
    Bb,
    Bc,
    Cc,
    Cd,
    Dd,
    Ff,
    Ng,
    Np,
    X,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::Aa => "AA",
            Grade::Ab => "AB",
            Grade::Bb => "BB",
            Grade::Bc => "BC",
            Grade::Cc => "CC",
            Grade::Cd => "CD",
            Grade::Dd => "DD",
            Grade::Ff => "FF",
            Grade::Ng => "NG",
            Grade::Np => "NP",
            Grade::X => "X",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
    pub email: String,
}

impl Actor {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledStudentRecord {
    pub uid: String,
    pub name: String,
    pub batch: i32,
    pub branch: String,
    pub scores: ComponentScores,
    /// Cached output of the grade engine; `None` until the course is graded.
    pub grade: Option<Grade>,
    pub flag_not_present: bool,
    pub flag_defaulter: bool,
}

impl EnrolledStudentRecord {
    pub fn for_student(student: &Student) -> Self {
        Self {
            uid: student.uid.clone(),
            name: student.name.clone(),
            batch: student.batch,
            branch: student.branch.clone(),
            scores: ComponentScores::default(),
            grade: None,
            flag_not_present: false,
            flag_defaulter: false,
        }
    }

    pub fn cohort(&self) -> Cohort {
        Cohort::new(self.batch, self.branch.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseStatistics {
    pub student_count: usize,
    pub mean_theory_ise: f64,
    pub mean_theory_mse: f64,
    pub mean_theory_ese: f64,
    pub mean_lab_ise: f64,
    pub mean_lab_mse: f64,
    pub mean_lab_ese: f64,
    pub mean_total: f64,
    pub median_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: Uuid,
    pub key: CourseKey,
    pub name: String,
    pub course_type: CourseType,
    pub credits_theory: f64,
    pub credits_lab: f64,
    pub weightages: Weightages,
    pub sa_score: Option<f64>,
    pub scores_locked: bool,
    pub scores_lock: Option<LockRecord>,
    pub grades_locked: bool,
    pub grades_lock: Option<LockRecord>,
    pub statistics: CourseStatistics,
    pub enrolled_students: Vec<EnrolledStudentRecord>,
    pub faculty: Vec<Actor>,
}

impl Course {
    pub fn new(input: NewCourse) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: input.key,
            name: input.name,
            course_type: input.course_type,
            credits_theory: input.credits_theory,
            credits_lab: input.credits_lab,
            weightages: input.weightages,
            sa_score: None,
            scores_locked: false,
            scores_lock: None,
            grades_locked: false,
            grades_lock: None,
            statistics: CourseStatistics::default(),
            enrolled_students: Vec::new(),
            faculty: Vec::new(),
        }
    }

    pub fn total_credits(&self) -> f64 {
        self.credits_theory + self.credits_lab
    }

    pub fn record(&self, uid: &str) -> Option<&EnrolledStudentRecord> {
        self.enrolled_students.iter().find(|record| record.uid == uid)
    }

    pub fn is_enrolled(&self, uid: &str) -> bool {
        self.record(uid).is_some()
    }

    /// Distinct cohorts among the enrolled students, in a stable order.
    pub fn cohorts(&self) -> Vec<Cohort> {
        let mut cohorts: Vec<Cohort> = self
            .enrolled_students
            .iter()
            .map(EnrolledStudentRecord::cohort)
            .collect();
        cohorts.sort();
        cohorts.dedup();
        cohorts
    }
}

/// Administrator input for creating a course.
#[derive(Debug, Clone)]
pub struct NewCourse {
    pub key: CourseKey,
    pub name: String,
    pub course_type: CourseType,
    pub credits_theory: f64,
    pub credits_lab: f64,
    pub weightages: Weightages,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub uid: String,
    pub name: String,
    pub email: String,
    pub batch: i32,
    pub branch: String,
    pub cgpa: Option<f64>,
}

impl Student {
    pub fn cohort(&self) -> Cohort {
        Cohort::new(self.batch, self.branch.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    #[default]
    Draft,
    Declared,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Draft => "draft",
            ResultStatus::Declared => "declared",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseOutcome {
    pub course_id: Uuid,
    pub course_code: String,
    pub course_name: String,
    pub course_type: CourseType,
    pub course_label: String,
    pub score: f64,
    pub grade: Option<Grade>,
    pub grade_points: u8,
    /// `(credits_theory + credits_lab) * grade_points`.
    pub credits: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentResult {
    pub uid: String,
    pub name: String,
    pub failed: bool,
    pub sgpa: f64,
    pub cgpa: f64,
    pub courses: BTreeMap<String, CourseOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamResult {
    pub id: Uuid,
    pub year: i32,
    pub semester: Semester,
    pub cohort: Cohort,
    pub semester_number: u8,
    pub status: ResultStatus,
    pub courses: Vec<Uuid>,
    pub generated_at: Option<DateTime<Utc>>,
    pub result_data: Vec<StudentResult>,
}

impl ExamResult {
    pub fn new(
        year: i32,
        semester: Semester,
        cohort: Cohort,
        semester_number: u8,
        courses: Vec<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            year,
            semester,
            cohort,
            semester_number,
            status: ResultStatus::Draft,
            courses,
            generated_at: None,
            result_data: Vec::new(),
        }
    }

    pub fn student(&self, uid: &str) -> Option<&StudentResult> {
        self.result_data.iter().find(|entry| entry.uid == uid)
    }
}

/// Per-course enrollment count for a prospective result.
#[derive(Debug, Clone, PartialEq)]
pub struct CoursePreview {
    pub course_code: String,
    pub course_name: String,
    pub enrolled: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultPreview {
    pub year: i32,
    pub semester: Semester,
    pub cohort: Cohort,
    pub student_count: usize,
    pub courses: Vec<CoursePreview>,
}
