use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub const FINAL_SEMESTER: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Semester(u8);

impl Semester {
    pub fn new(value: i32) -> Option<Self> {
        match u8::try_from(value) {
            Ok(n) if (1..=FINAL_SEMESTER).contains(&n) => Some(Self(n)),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        self.0
    }

    pub fn is_final(self) -> bool {
        self.0 == FINAL_SEMESTER
    }

    pub fn is_odd(self) -> bool {
        self.0 % 2 == 1
    }

    /// `None` once the final semester is reached.
    pub fn next(self) -> Option<Self> {
        if self.is_final() {
            None
        } else {
            Some(Self(self.0 + 1))
        }
    }
}

impl fmt::Display for Semester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UserType {
    Alumni,
    Scholar,
    Student,
}

impl UserType {
    pub fn as_str(self) -> &'static str {
        match self {
            UserType::Alumni => "alumni",
            UserType::Scholar => "scholar",
            UserType::Student => "student",
        }
    }
}

impl FromStr for UserType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alumni" => Ok(UserType::Alumni),
            "scholar" => Ok(UserType::Scholar),
            "student" => Ok(UserType::Student),
            other => bail!("unknown user type: {other}"),
        }
    }
}

/// Enrollment track of a profile that has not graduated yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    Student,
    Scholar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for ApprovalStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            other => bail!("unknown approval status: {other}"),
        }
    }
}

/// Academic standing. Graduating is a move from `Enrolled` to `Graduated`,
/// so a profile never carries a semester and a passout year at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum AcademicPhase {
    Enrolled {
        track: Track,
        semester: Option<Semester>,
        expected_passout_year: Option<i32>,
    },
    Graduated {
        passout_year: i32,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub status: ApprovalStatus,
    pub phase: AcademicPhase,
    pub program: Option<String>,
    pub scholarship_year: Option<i32>,
    pub high_commission: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn user_type(&self) -> UserType {
        match self.phase {
            AcademicPhase::Enrolled {
                track: Track::Student,
                ..
            } => UserType::Student,
            AcademicPhase::Enrolled {
                track: Track::Scholar,
                ..
            } => UserType::Scholar,
            AcademicPhase::Graduated { .. } => UserType::Alumni,
        }
    }

    pub fn current_semester(&self) -> Option<Semester> {
        match self.phase {
            AcademicPhase::Enrolled { semester, .. } => semester,
            AcademicPhase::Graduated { .. } => None,
        }
    }

    pub fn expected_passout_year(&self) -> Option<i32> {
        match self.phase {
            AcademicPhase::Enrolled {
                expected_passout_year,
                ..
            } => expected_passout_year,
            AcademicPhase::Graduated { .. } => None,
        }
    }

    pub fn passout_year(&self) -> Option<i32> {
        match self.phase {
            AcademicPhase::Graduated { passout_year } => Some(passout_year),
            AcademicPhase::Enrolled { .. } => None,
        }
    }

    /// Approved, enrolled and with a known semester.
    pub fn is_progression_eligible(&self) -> bool {
        self.status == ApprovalStatus::Approved && self.current_semester().is_some()
    }

    /// Applies a self-service edit. Any edit sends the profile back to the
    /// approval queue.
    pub fn edit(&mut self, edit: ProfileEdit) -> anyhow::Result<()> {
        if let Some(year) = edit.expected_passout_year {
            match &mut self.phase {
                AcademicPhase::Enrolled {
                    expected_passout_year,
                    ..
                } => *expected_passout_year = Some(year),
                AcademicPhase::Graduated { .. } => {
                    bail!("alumni have no expected passout year")
                }
            }
        }

        if let Some(full_name) = edit.full_name {
            self.full_name = full_name;
        }
        if let Some(program) = edit.program {
            self.program = Some(program);
        }
        if let Some(high_commission) = edit.high_commission {
            self.high_commission = Some(high_commission);
        }
        if let Some(year) = edit.scholarship_year {
            self.scholarship_year = Some(year);
        }

        self.status = ApprovalStatus::Pending;
        Ok(())
    }
}

/// Fields a member may change on their own profile. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct ProfileEdit {
    pub full_name: Option<String>,
    pub program: Option<String>,
    pub high_commission: Option<String>,
    pub expected_passout_year: Option<i32>,
    pub scholarship_year: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Advance { from: Semester, to: Semester },
    Graduate { passout_year: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => bail!("unknown role: {other}"),
        }
    }
}
