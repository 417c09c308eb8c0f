use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::models::{
    AcademicPhase, ApprovalStatus, Profile, ProfileEdit, Role, Semester, Track, Transition, UserType,
};
use crate::store::{IdentityVerifier, ProfileStore, RoleStore};

const PROFILE_COLUMNS: &str = "id, full_name, email, user_type, status, current_semester, \
     expected_passout_year, passout_year, scholarship_year, high_commission, program, created_at";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Builds the academic phase from the nullable profile columns.
pub fn phase_from_columns(
    user_type: UserType,
    current_semester: Option<i32>,
    expected_passout_year: Option<i32>,
    passout_year: Option<i32>,
) -> anyhow::Result<AcademicPhase> {
    let track = match user_type {
        UserType::Alumni => {
            if current_semester.is_some() {
                bail!("alumni cannot have a current semester");
            }
            if expected_passout_year.is_some() {
                bail!("alumni cannot have an expected passout year");
            }
            let passout_year = passout_year.context("alumni must have a passout year")?;
            return Ok(AcademicPhase::Graduated { passout_year });
        }
        UserType::Scholar => Track::Scholar,
        UserType::Student => Track::Student,
    };

    if passout_year.is_some() {
        bail!("only alumni carry a passout year");
    }

    let semester = current_semester
        .map(|n| Semester::new(n).with_context(|| format!("semester {n} out of range 1-8")))
        .transpose()?;

    Ok(AcademicPhase::Enrolled {
        track,
        semester,
        expected_passout_year,
    })
}

fn profile_from_row(row: &PgRow) -> anyhow::Result<Profile> {
    let id: Uuid = row.get("id");
    let user_type: String = row.get("user_type");
    let status: String = row.get("status");

    let phase = phase_from_columns(
        user_type.parse()?,
        row.get("current_semester"),
        row.get("expected_passout_year"),
        row.get("passout_year"),
    )
    .with_context(|| format!("profile {id} has inconsistent academic fields"))?;

    Ok(Profile {
        id,
        full_name: row.get("full_name"),
        email: row.get("email"),
        status: status.parse()?,
        phase,
        program: row.get("program"),
        scholarship_year: row.get("scholarship_year"),
        high_commission: row.get("high_commission"),
        created_at: row.get("created_at"),
    })
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_where(&self, clause: &str, value: Option<&str>) -> anyhow::Result<Vec<Profile>> {
        let query = format!("SELECT {PROFILE_COLUMNS} FROM directory.profiles {clause}");
        let mut rows = sqlx::query(&query);

        if let Some(value) = value {
            rows = rows.bind(value);
        }

        let records = rows.fetch_all(&self.pool).await?;
        records.iter().map(profile_from_row).collect()
    }

    /// Approved profiles, as the directory shows them.
    pub async fn fetch_directory(&self) -> anyhow::Result<Vec<Profile>> {
        self.fetch_where("WHERE status = $1 ORDER BY full_name", Some(ApprovalStatus::Approved.as_str()))
            .await
    }

    pub async fn fetch_pending(&self) -> anyhow::Result<Vec<Profile>> {
        self.fetch_where("WHERE status = $1 ORDER BY created_at", Some(ApprovalStatus::Pending.as_str()))
            .await
    }

    pub async fn fetch_all(&self) -> anyhow::Result<Vec<Profile>> {
        self.fetch_where("ORDER BY created_at", None).await
    }

    pub async fn fetch_by_email(&self, email: &str) -> anyhow::Result<Profile> {
        self.fetch_where("WHERE email = $1", Some(email))
            .await?
            .into_iter()
            .next()
            .with_context(|| format!("no profile with email {email}"))
    }

    /// Writes a member's own edit. The profile goes back to pending until an
    /// admin approves it again.
    pub async fn update_profile(&self, email: &str, edit: ProfileEdit) -> anyhow::Result<Profile> {
        let mut profile = self.fetch_by_email(email).await?;
        profile.edit(edit)?;

        sqlx::query(
            r#"
            UPDATE directory.profiles
            SET full_name = $2,
                program = $3,
                high_commission = $4,
                expected_passout_year = $5,
                scholarship_year = $6,
                status = $7,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(profile.id)
        .bind(&profile.full_name)
        .bind(&profile.program)
        .bind(&profile.high_commission)
        .bind(profile.expected_passout_year())
        .bind(profile.scholarship_year)
        .bind(profile.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(profile)
    }

    pub async fn set_status(&self, email: &str, status: ApprovalStatus) -> anyhow::Result<()> {
        let result = sqlx::query(
            "UPDATE directory.profiles SET status = $2, updated_at = now() WHERE email = $1",
        )
        .bind(email)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("no profile with email {email}");
        }

        Ok(())
    }

    pub async fn grant_role(&self, user_id: Uuid, role: Role) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO directory.user_roles (user_id, role) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stores a fresh random session token for `user_id`.
    pub async fn issue_session(&self, user_id: Uuid, valid_days: i64) -> anyhow::Result<String> {
        let token = Uuid::new_v4().simple().to_string();
        let expires_at = Utc::now() + Duration::days(valid_days.max(1));

        sqlx::query(
            "INSERT INTO directory.sessions (token, user_id, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(&token)
        .bind(user_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(token)
    }

    pub async fn seed(&self) -> anyhow::Result<()> {
        let profiles = vec![
            ("Avery Lee", "avery.lee@alumni.example.edu", "student", Some(8), Some(2026), None, None),
            ("Jules Moreno", "jules.moreno@alumni.example.edu", "student", Some(4), Some(2028), None, None),
            ("Kiara Patel", "kiara.patel@alumni.example.edu", "scholar", Some(3), Some(2028), None, Some("Kenya")),
            ("Omar Haddad", "omar.haddad@alumni.example.edu", "alumni", None, None, Some(2021), Some("Jordan")),
        ];

        for (name, email, user_type, semester, expected, passout, commission) in profiles {
            sqlx::query(
                r#"
                INSERT INTO directory.profiles
                (id, full_name, email, user_type, status, current_semester,
                 expected_passout_year, passout_year, high_commission, program)
                VALUES ($1, $2, $3, $4, 'approved', $5, $6, $7, $8, 'Computer Science')
                ON CONFLICT (email) DO UPDATE
                SET full_name = EXCLUDED.full_name
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(email)
            .bind(user_type)
            .bind(semester)
            .bind(expected)
            .bind(passout)
            .bind(commission)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Registers profiles from a CSV file. Rows whose email already exists are
    /// left alone.
    pub async fn import_csv(&self, csv_path: &std::path::Path) -> anyhow::Result<usize> {
        #[derive(serde::Deserialize)]
        struct CsvRow {
            full_name: String,
            email: String,
            user_type: String,
            current_semester: Option<i32>,
            expected_passout_year: Option<i32>,
            passout_year: Option<i32>,
            scholarship_year: Option<i32>,
            high_commission: Option<String>,
            program: Option<String>,
        }

        let mut reader = csv::Reader::from_path(csv_path)?;
        let mut inserted = 0usize;

        for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
            let row = result?;
            let user_type: UserType = row.user_type.parse()?;
            phase_from_columns(
                user_type,
                row.current_semester,
                row.expected_passout_year,
                row.passout_year,
            )
            .with_context(|| format!("row {} ({})", line + 1, row.email))?;

            let result = sqlx::query(
                r#"
                INSERT INTO directory.profiles
                (id, full_name, email, user_type, status, current_semester,
                 expected_passout_year, passout_year, scholarship_year, high_commission, program)
                VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $8, $9, $10)
                ON CONFLICT (email) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&row.full_name)
            .bind(&row.email)
            .bind(user_type.as_str())
            .bind(row.current_semester)
            .bind(row.expected_passout_year)
            .bind(row.passout_year)
            .bind(row.scholarship_year)
            .bind(&row.high_commission)
            .bind(&row.program)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }

        Ok(inserted)
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn fetch_progression_candidates(&self) -> anyhow::Result<Vec<Profile>> {
        let query = format!(
            "SELECT {PROFILE_COLUMNS} FROM directory.profiles \
             WHERE user_type IN ('student', 'scholar') \
             AND status = 'approved' \
             AND current_semester IS NOT NULL"
        );

        let records = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .context("failed to fetch students")?;

        records.iter().map(profile_from_row).collect()
    }

    async fn apply_transition(&self, id: Uuid, transition: &Transition) -> anyhow::Result<()> {
        let result = match *transition {
            Transition::Advance { from, to } => {
                sqlx::query(
                    r#"
                    UPDATE directory.profiles
                    SET current_semester = $2, updated_at = now()
                    WHERE id = $1 AND current_semester = $3
                    "#,
                )
                .bind(id)
                .bind(i32::from(to.number()))
                .bind(i32::from(from.number()))
                .execute(&self.pool)
                .await?
            }
            Transition::Graduate { passout_year } => {
                sqlx::query(
                    r#"
                    UPDATE directory.profiles
                    SET user_type = 'alumni',
                        current_semester = NULL,
                        expected_passout_year = NULL,
                        passout_year = $2,
                        updated_at = now()
                    WHERE id = $1 AND user_type <> 'alumni'
                    "#,
                )
                .bind(id)
                .bind(passout_year)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            bail!("profile changed since it was read");
        }

        Ok(())
    }
}

#[async_trait]
impl IdentityVerifier for PgStore {
    async fn verify_token(&self, token: &str) -> anyhow::Result<Option<Uuid>> {
        let row = sqlx::query(
            "SELECT user_id FROM directory.sessions WHERE token = $1 AND expires_at > now()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("user_id")))
    }
}

#[async_trait]
impl RoleStore for PgStore {
    async fn has_role(&self, user_id: Uuid, role: Role) -> anyhow::Result<bool> {
        let exists: bool = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM directory.user_roles WHERE user_id = $1 AND role = $2)",
        )
        .bind(user_id)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await?
        .get(0);

        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alumni_columns_become_graduated() {
        let phase = phase_from_columns(UserType::Alumni, None, None, Some(2020)).unwrap();
        assert_eq!(phase, AcademicPhase::Graduated { passout_year: 2020 });
    }

    #[test]
    fn student_columns_become_enrolled() {
        let phase = phase_from_columns(UserType::Scholar, Some(5), Some(2027), None).unwrap();
        assert_eq!(
            phase,
            AcademicPhase::Enrolled {
                track: Track::Scholar,
                semester: Semester::new(5),
                expected_passout_year: Some(2027),
            }
        );
    }

    #[test]
    fn rejects_inconsistent_columns() {
        assert!(phase_from_columns(UserType::Alumni, None, None, None).is_err());
        assert!(phase_from_columns(UserType::Alumni, Some(3), None, Some(2020)).is_err());
        assert!(phase_from_columns(UserType::Alumni, None, Some(2020), Some(2019)).is_err());
        assert!(phase_from_columns(UserType::Student, Some(2), None, Some(2020)).is_err());
        assert!(phase_from_columns(UserType::Student, Some(9), None, None).is_err());
    }
}
