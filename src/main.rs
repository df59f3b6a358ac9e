use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

use grading_engine::config::Settings;
use grading_engine::db::{self, PgStore};
use grading_engine::import::read_score_sheet;
use grading_engine::marksheet::{render_markdown, MarkdownPublisher};
use grading_engine::models::{
    Actor, Cohort, CourseKey, CourseType, NewCourse, Semester, Student, Weightages,
};
use grading_engine::{GradingService, NewResult};

#[derive(Parser)]
#[command(name = "grading-engine")]
#[command(about = "Grading and result computation for semester courses", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CourseArgs {
    #[arg(long)]
    code: String,
    #[arg(long)]
    year: i32,
    #[arg(long, value_enum)]
    semester: Semester,
}

impl CourseArgs {
    fn key(&self) -> CourseKey {
        CourseKey::new(self.code.clone(), self.year, self.semester)
    }
}

#[derive(Args)]
struct ActorArgs {
    /// Name recorded on the lock
    #[arg(long = "by-name")]
    name: String,
    /// Email recorded on the lock
    #[arg(long = "by-email")]
    email: String,
}

impl ActorArgs {
    fn actor(&self) -> Actor {
        Actor::new(self.name.clone(), self.email.clone())
    }
}

#[derive(Args)]
struct CohortArgs {
    #[arg(long)]
    batch: i32,
    #[arg(long)]
    branch: String,
}

impl CohortArgs {
    fn cohort(&self) -> Cohort {
        Cohort::new(self.batch, self.branch.clone())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Register a student
    AddStudent {
        #[arg(long)]
        uid: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[command(flatten)]
        cohort: CohortArgs,
    },
    /// Create a course for a term
    AddCourse {
        #[command(flatten)]
        course: CourseArgs,
        #[arg(long)]
        name: String,
        #[arg(long = "type", value_enum, default_value_t = CourseType::Core)]
        course_type: CourseType,
        #[arg(long, default_value_t = 3.0)]
        credits_theory: f64,
        #[arg(long, default_value_t = 0.0)]
        credits_lab: f64,
        /// Maximum marks as theory ISE,MSE,ESE,lab ISE,MSE,ESE
        #[arg(long, value_delimiter = ',', default_value = "20,30,50,0,0,0")]
        weightages: Vec<f64>,
    },
    /// Delete a course and re-sweep affected cohorts
    DeleteCourse {
        #[command(flatten)]
        course: CourseArgs,
    },
    /// Enroll one or more students in a course
    Enroll {
        #[command(flatten)]
        course: CourseArgs,
        #[arg(long = "uid", required = true)]
        uids: Vec<String>,
    },
    /// Apply a score sheet CSV to a course
    ImportScores {
        #[command(flatten)]
        course: CourseArgs,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Assign a faculty member to a course
    AddFaculty {
        #[command(flatten)]
        course: CourseArgs,
        #[command(flatten)]
        faculty: ActorArgs,
    },
    /// Remove a faculty member from a course
    RemoveFaculty {
        #[command(flatten)]
        course: CourseArgs,
        #[arg(long)]
        email: String,
    },
    /// Freeze score entry
    LockScores {
        #[command(flatten)]
        course: CourseArgs,
        #[command(flatten)]
        actor: ActorArgs,
    },
    /// Reopen score entry
    UnlockScores {
        #[command(flatten)]
        course: CourseArgs,
        #[command(flatten)]
        actor: ActorArgs,
    },
    /// Freeze grades for good
    LockGrades {
        #[command(flatten)]
        course: CourseArgs,
        #[command(flatten)]
        actor: ActorArgs,
    },
    /// Set the SA score of a moderated course
    SetSa {
        #[command(flatten)]
        course: CourseArgs,
        #[arg(long)]
        score: f64,
    },
    /// Print course statistics and grades
    Stats {
        #[command(flatten)]
        course: CourseArgs,
        /// Print the whole course record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show which courses a result would cover
    Preview {
        #[arg(long)]
        year: i32,
        #[arg(long, value_enum)]
        semester: Semester,
        #[command(flatten)]
        cohort: CohortArgs,
    },
    /// Create and generate a cohort result
    CreateResult {
        #[arg(long)]
        year: i32,
        #[arg(long, value_enum)]
        semester: Semester,
        #[command(flatten)]
        cohort: CohortArgs,
        #[arg(long)]
        semester_number: u8,
        #[arg(long = "course", required = true)]
        courses: Vec<String>,
    },
    /// Regenerate a result from current grades
    GenerateResult {
        #[arg(long)]
        id: Uuid,
    },
    /// Recompute CGPAs for a cohort
    RecalcCgpa {
        #[command(flatten)]
        cohort: CohortArgs,
    },
    /// Declare a result and write every marksheet
    DeclareResult {
        #[arg(long)]
        id: Uuid,
        #[arg(long, default_value = "marksheets")]
        out: PathBuf,
    },
    /// Print one student's marksheet
    Marksheet {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        uid: String,
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = (!json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(filter())
    });
    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .with_filter(filter())
    });

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    init_tracing();

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = Arc::new(PgStore::new(pool.clone()));
    let service = GradingService::new(Arc::clone(&store), settings.engine);

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&store).await?;
            println!("Seed data inserted.");
        }
        Commands::AddStudent {
            uid,
            name,
            email,
            cohort,
        } => {
            let student = service
                .add_student(Student {
                    uid,
                    name,
                    email,
                    batch: cohort.batch,
                    branch: cohort.branch,
                    cgpa: None,
                })
                .await?;
            println!("Added {} ({}).", student.name, student.uid);
        }
        Commands::AddCourse {
            course,
            name,
            course_type,
            credits_theory,
            credits_lab,
            weightages,
        } => {
            let [theory_ise, theory_mse, theory_ese, lab_ise, lab_mse, lab_ese] =
                <[f64; 6]>::try_from(weightages.as_slice())
                    .context("--weightages takes exactly six values")?;
            let created = service
                .add_course(NewCourse {
                    key: course.key(),
                    name,
                    course_type,
                    credits_theory,
                    credits_lab,
                    weightages: Weightages {
                        theory_ise,
                        theory_mse,
                        theory_ese,
                        lab_ise,
                        lab_mse,
                        lab_ese,
                    },
                })
                .await?;
            println!("Created {} [{}].", created.key, created.id);
        }
        Commands::DeleteCourse { course } => {
            let pruned = service.delete_course(&course.key()).await?;
            println!(
                "Deleted {}; {} result(s) updated.",
                course.key(),
                pruned.len()
            );
        }
        Commands::Enroll { course, uids } => {
            let updated = service.enroll(&course.key(), &uids).await?;
            println!(
                "{} now has {} enrolled students.",
                updated.key,
                updated.enrolled_students.len()
            );
        }
        Commands::ImportScores { course, csv } => {
            let updates = read_score_sheet(&csv)?;
            service.update_scores(&course.key(), &updates).await?;
            println!("Applied {} rows from {}.", updates.len(), csv.display());
        }
        Commands::AddFaculty { course, faculty } => {
            service.add_faculty(&course.key(), faculty.actor()).await?;
            println!("Assigned {} to {}.", faculty.email, course.key());
        }
        Commands::RemoveFaculty { course, email } => {
            service.remove_faculty(&course.key(), &email).await?;
            println!("Removed {email} from {}.", course.key());
        }
        Commands::LockScores { course, actor } => {
            service
                .set_scores_lock(&course.key(), true, &actor.actor())
                .await?;
            println!("Scores locked for {}.", course.key());
        }
        Commands::UnlockScores { course, actor } => {
            service
                .set_scores_lock(&course.key(), false, &actor.actor())
                .await?;
            println!("Scores unlocked for {}.", course.key());
        }
        Commands::LockGrades { course, actor } => {
            service.lock_grades(&course.key(), &actor.actor()).await?;
            println!("Grades locked for {}.", course.key());
        }
        Commands::SetSa { course, score } => {
            service.set_sa_score(&course.key(), score).await?;
            println!("SA score for {} set to {score:.2}.", course.key());
        }
        Commands::Stats { course, json } => {
            let course = service.course(&course.key()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&course)?);
                return Ok(());
            }
            let stats = &course.statistics;
            println!("{} {}", course.key, course.name);
            println!(
                "Students {} | mean {:.2} | median {:.2}",
                stats.student_count, stats.mean_total, stats.median_total
            );
            for record in &course.enrolled_students {
                let grade = record
                    .grade
                    .map(|grade| grade.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("- {} {} {}", record.uid, record.name, grade);
            }
        }
        Commands::Preview {
            year,
            semester,
            cohort,
        } => {
            let preview = service.preview(year, semester, &cohort.cohort()).await?;
            println!(
                "{} {} for {}: {} students",
                preview.year, preview.semester, preview.cohort, preview.student_count
            );
            if preview.courses.is_empty() {
                println!("No courses have students from this cohort.");
            }
            for course in &preview.courses {
                println!(
                    "- {} {} ({} enrolled)",
                    course.course_code, course.course_name, course.enrolled
                );
            }
        }
        Commands::CreateResult {
            year,
            semester,
            cohort,
            semester_number,
            courses,
        } => {
            let result = service
                .create_result(NewResult {
                    year,
                    semester,
                    cohort: cohort.cohort(),
                    semester_number,
                    course_codes: courses,
                })
                .await?;
            println!(
                "Result {} generated for {} students.",
                result.id,
                result.result_data.len()
            );
        }
        Commands::GenerateResult { id } => {
            let result = service.generate_result(id).await?;
            for entry in &result.result_data {
                println!(
                    "- {} {} SGPA {:.2} CGPA {:.2}{}",
                    entry.uid,
                    entry.name,
                    entry.sgpa,
                    entry.cgpa,
                    if entry.failed { " (failed)" } else { "" }
                );
            }
        }
        Commands::RecalcCgpa { cohort } => {
            let cgpas = service.recalculate_cgpas(&cohort.cohort()).await?;
            if cgpas.is_empty() {
                println!("No results recorded for this cohort.");
            }
            for (uid, cgpa) in &cgpas {
                println!("- {uid} {cgpa:.2}");
            }
        }
        Commands::DeclareResult { id, out } => {
            let publisher = MarkdownPublisher::new(&out);
            let result = service.declare_result(id, &publisher).await?;
            println!(
                "Declared {}; {} marksheets written to {}.",
                result.id,
                result.result_data.len(),
                out.display()
            );
        }
        Commands::Marksheet { id, uid, json } => {
            let sheet = service.marksheet(id, &uid).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sheet)?);
            } else {
                print!("{}", render_markdown(&sheet));
            }
        }
    }

    Ok(())
}
