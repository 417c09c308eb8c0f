use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{ApprovalStatus, Profile, UserType};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySummary {
    pub total: usize,
    pub by_type: BTreeMap<UserType, usize>,
    pub by_status: BTreeMap<ApprovalStatus, usize>,
    /// Approved enrolled profiles per current semester.
    pub by_semester: BTreeMap<u8, usize>,
    /// Alumni per passout year.
    pub by_passout_year: BTreeMap<i32, usize>,
}

pub fn summarize(profiles: &[Profile]) -> DirectorySummary {
    let mut summary = DirectorySummary {
        total: profiles.len(),
        ..Default::default()
    };

    for profile in profiles {
        *summary.by_type.entry(profile.user_type()).or_insert(0) += 1;
        *summary.by_status.entry(profile.status).or_insert(0) += 1;

        if profile.status != ApprovalStatus::Approved {
            continue;
        }

        if let Some(semester) = profile.current_semester() {
            *summary.by_semester.entry(semester.number()).or_insert(0) += 1;
        }
        if let Some(year) = profile.passout_year() {
            *summary.by_passout_year.entry(year).or_insert(0) += 1;
        }
    }

    summary
}

pub fn build_report(generated_on: NaiveDate, profiles: &[Profile]) -> String {
    let summary = summarize(profiles);
    let mut output = String::new();

    let _ = writeln!(output, "# Directory Report");
    let _ = writeln!(
        output,
        "Generated on {} across {} profiles",
        generated_on, summary.total
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Members by Type");

    if summary.by_type.is_empty() {
        let _ = writeln!(output, "No profiles registered.");
    } else {
        for (user_type, count) in summary.by_type.iter() {
            let _ = writeln!(output, "- {}: {}", user_type.as_str(), count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Approval Queue");

    for status in [
        ApprovalStatus::Pending,
        ApprovalStatus::Approved,
        ApprovalStatus::Rejected,
    ] {
        let count = summary.by_status.get(&status).copied().unwrap_or(0);
        let _ = writeln!(output, "- {}: {}", status.as_str(), count);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students by Semester");

    if summary.by_semester.is_empty() {
        let _ = writeln!(output, "No enrolled students with a known semester.");
    } else {
        for (semester, count) in summary.by_semester.iter() {
            let _ = writeln!(output, "- Semester {}: {}", semester, count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Alumni by Passout Year");

    if summary.by_passout_year.is_empty() {
        let _ = writeln!(output, "No alumni recorded.");
    } else {
        for (year, count) in summary.by_passout_year.iter().rev() {
            let _ = writeln!(output, "- {}: {}", year, count);
        }
    }

    let mut recent: Vec<&Profile> = profiles
        .iter()
        .filter(|p| p.status == ApprovalStatus::Pending)
        .collect();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Latest Pending Registrations");

    if recent.is_empty() {
        let _ = writeln!(output, "Nothing awaiting approval.");
    } else {
        for profile in recent.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} ({}, {}) registered {}",
                profile.full_name,
                profile.email,
                profile.user_type().as_str(),
                profile.created_at.date_naive()
            );
        }
    }

    output
}
