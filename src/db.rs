use anyhow::Context;
use cohort_dropout_risk::{RawFeatures, StudentProfile, StudentRecord};
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

struct SeedStudent {
    name: &'static str,
    email: &'static str,
    course: &'static str,
    features: [f64; 6],
}

const SEED_STUDENTS: [SeedStudent; 9] = [
    SeedStudent {
        name: "Aida Toktarova",
        email: "aida@example.com",
        course: "Python Backend",
        features: [95.5, 92.0, 90.0, 18.0, 120.0, 0.0],
    },
    SeedStudent {
        name: "Bekzat Nurlanov",
        email: "bekzat@example.com",
        course: "Frontend React",
        features: [88.0, 85.0, 82.0, 12.0, 90.0, 1.0],
    },
    SeedStudent {
        name: "Gulmira Saparova",
        email: "gulmira@example.com",
        course: "Data Science",
        features: [92.0, 88.0, 87.0, 15.0, 150.0, 0.0],
    },
    SeedStudent {
        name: "Daniyar Yskakov",
        email: "daniyar@example.com",
        course: "Mobile Development",
        features: [65.0, 55.0, 62.0, 5.0, 60.0, 3.0],
    },
    SeedStudent {
        name: "Elena Kim",
        email: "elena@example.com",
        course: "DevOps",
        features: [70.0, 68.0, 65.0, 6.0, 75.0, 2.0],
    },
    SeedStudent {
        name: "Zhanar Asanova",
        email: "zhanar@example.com",
        course: "Python Backend",
        features: [58.0, 60.0, 58.0, 4.0, 45.0, 4.0],
    },
    SeedStudent {
        name: "Iskander Ormonov",
        email: "iskander@example.com",
        course: "Frontend React",
        features: [35.0, 30.0, 42.0, 1.0, 40.0, 7.0],
    },
    SeedStudent {
        name: "Kamila Dzhunusova",
        email: "kamila@example.com",
        course: "Data Science",
        features: [28.0, 25.0, 38.0, 0.0, 30.0, 8.0],
    },
    SeedStudent {
        name: "Luis Mambetaliev",
        email: "luis@example.com",
        course: "Mobile Development",
        features: [42.0, 38.0, 45.0, 2.0, 50.0, 6.0],
    },
];

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let mut inserted = 0usize;
    for student in SEED_STUDENTS.iter() {
        let [attendance, homework, test_score, communication, days, streak] = student.features;
        upsert_student(
            pool,
            student.name,
            student.email,
            student.course,
            &RawFeatures {
                attendance_rate: Some(attendance),
                homework_completion: Some(homework),
                test_avg_score: Some(test_score),
                communication_activity: Some(communication),
                days_enrolled: Some(days),
                missed_classes_streak: Some(streak),
            },
        )
        .await
        .with_context(|| format!("failed to seed {}", student.email))?;
        inserted += 1;
    }
    Ok(inserted)
}

async fn upsert_student(
    pool: &PgPool,
    name: &str,
    email: &str,
    course: &str,
    features: &RawFeatures,
) -> anyhow::Result<Uuid> {
    let count = |value: Option<f64>, field: &str| -> anyhow::Result<i32> {
        let value = value.with_context(|| format!("{field} is required"))?;
        if value.fract() != 0.0 || value < f64::from(i32::MIN) || value > f64::from(i32::MAX) {
            anyhow::bail!("{field} must be a whole number, got {value}");
        }
        Ok(value as i32)
    };
    let percent = |value: Option<f64>, field: &str| -> anyhow::Result<f64> {
        value.with_context(|| format!("{field} is required"))
    };

    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO cohort_dropout_risk.students
        (id, full_name, email, course, attendance_rate, homework_completion, test_avg_score,
         communication_activity, days_enrolled, missed_classes_streak)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (email) DO UPDATE
        SET full_name = EXCLUDED.full_name,
            course = EXCLUDED.course,
            attendance_rate = EXCLUDED.attendance_rate,
            homework_completion = EXCLUDED.homework_completion,
            test_avg_score = EXCLUDED.test_avg_score,
            communication_activity = EXCLUDED.communication_activity,
            days_enrolled = EXCLUDED.days_enrolled,
            missed_classes_streak = EXCLUDED.missed_classes_streak,
            updated_at = now()
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(email)
    .bind(course)
    .bind(percent(features.attendance_rate, "attendance_rate")?)
    .bind(percent(features.homework_completion, "homework_completion")?)
    .bind(percent(features.test_avg_score, "test_avg_score")?)
    .bind(count(features.communication_activity, "communication_activity")?)
    .bind(count(features.days_enrolled, "days_enrolled")?)
    .bind(count(features.missed_classes_streak, "missed_classes_streak")?)
    .fetch_one(pool)
    .await?
    .get("id");

    Ok(id)
}

pub async fn fetch_students(
    pool: &PgPool,
    course: Option<&str>,
    email: Option<&str>,
) -> anyhow::Result<Vec<StudentRecord>> {
    let mut query = String::from(
        "SELECT id, full_name, email, course, attendance_rate, homework_completion, \
         test_avg_score, communication_activity, days_enrolled, missed_classes_streak \
         FROM cohort_dropout_risk.students",
    );

    if course.is_some() {
        query.push_str(" WHERE course = $1");
    } else if email.is_some() {
        query.push_str(" WHERE email = $1");
    }
    query.push_str(" ORDER BY full_name");

    let mut rows = sqlx::query(&query);
    if let Some(value) = course.or(email) {
        rows = rows.bind(value);
    }

    let records = rows
        .fetch_all(pool)
        .await
        .context("failed to fetch students")?;
    let mut students = Vec::with_capacity(records.len());

    for row in records {
        let communication: i32 = row.get("communication_activity");
        let days: i32 = row.get("days_enrolled");
        let streak: i32 = row.get("missed_classes_streak");
        students.push(StudentRecord {
            profile: StudentProfile {
                id: row.get("id"),
                name: row.get("full_name"),
                email: row.get("email"),
                course: row.get("course"),
            },
            features: RawFeatures {
                attendance_rate: Some(row.get("attendance_rate")),
                homework_completion: Some(row.get("homework_completion")),
                test_avg_score: Some(row.get("test_avg_score")),
                communication_activity: Some(f64::from(communication)),
                days_enrolled: Some(f64::from(days)),
                missed_classes_streak: Some(f64::from(streak)),
            },
        });
    }

    Ok(students)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        email: String,
        course: String,
        attendance_rate: Option<f64>,
        homework_completion: Option<f64>,
        test_avg_score: Option<f64>,
        communication_activity: Option<f64>,
        days_enrolled: Option<f64>,
        missed_classes_streak: Option<f64>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut imported = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid CSV record {}", line + 1))?;
        let features = RawFeatures {
            attendance_rate: row.attendance_rate,
            homework_completion: row.homework_completion,
            test_avg_score: row.test_avg_score,
            communication_activity: row.communication_activity,
            days_enrolled: row.days_enrolled,
            missed_classes_streak: row.missed_classes_streak,
        };
        upsert_student(pool, &row.full_name, &row.email, &row.course, &features)
            .await
            .with_context(|| format!("failed to import {}", row.email))?;
        imported += 1;
    }

    Ok(imported)
}
