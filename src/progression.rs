use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::Datelike;
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::models::{Profile, Transition};
use crate::store::ProfileStore;

pub const OUT_OF_WINDOW_MESSAGE: &str = "Semester progression only runs in January and July";
pub const COMPLETED_MESSAGE: &str = "Semester progression completed successfully";

/// The two progression windows of the academic year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Term {
    /// Odd semesters move to the following even semester.
    January,
    /// Even semesters move on, final semester students graduate.
    July,
}

impl Term {
    pub fn for_month(month: u32) -> Option<Self> {
        match month {
            1 => Some(Term::January),
            7 => Some(Term::July),
            _ => None,
        }
    }
}

impl FromStr for Term {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "january" | "jan" => Ok(Term::January),
            "july" | "jul" => Ok(Term::July),
            other => bail!("unknown term '{other}', expected january or july"),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::January => write!(f, "january"),
            Term::July => write!(f, "july"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Term(Term),
    /// Both rule sets in one sweep. Only reachable through a forced run
    /// that names no term.
    Combined,
}

impl Mode {
    fn runs_july_rules(self) -> bool {
        matches!(self, Mode::Term(Term::July) | Mode::Combined)
    }

    fn runs_january_rules(self) -> bool {
        matches!(self, Mode::Term(Term::January) | Mode::Combined)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Term(term) => write!(f, "{term}"),
            Mode::Combined => write!(f, "combined"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressionRequest {
    /// Bypass the January/July calendar gate.
    pub force: bool,
    /// Rule set to apply on a forced run.
    pub term: Option<Term>,
}

/// `None` means the calendar gate is closed for this request.
pub fn resolve_mode(month: u32, request: ProgressionRequest) -> Option<Mode> {
    if request.force {
        return Some(request.term.map_or(Mode::Combined, Mode::Term));
    }

    Term::for_month(month).map(Mode::Term)
}

pub fn plan_transition(profile: &Profile, mode: Mode, year: i32) -> Option<Transition> {
    let semester = profile.current_semester()?;

    if mode.runs_july_rules() {
        if semester.is_final() {
            return Some(Transition::Graduate { passout_year: year });
        }
        if !semester.is_odd() {
            return semester.next().map(|to| Transition::Advance { from: semester, to });
        }
    }

    if mode.runs_january_rules() && semester.is_odd() {
        return semester.next().map(|to| Transition::Advance { from: semester, to });
    }

    None
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionResults {
    pub semester_updates: usize,
    pub converted_to_alumni: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressionOutcome {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<ProgressionResults>,
}

/// Walks every eligible profile once. Individual write failures are
/// collected into the results; only the initial fetch aborts the run.
pub async fn run_progression(
    store: &dyn ProfileStore,
    clock: &dyn Clock,
    request: ProgressionRequest,
) -> anyhow::Result<ProgressionOutcome> {
    let today = clock.today();

    let Some(mode) = resolve_mode(today.month(), request) else {
        info!(month = today.month(), "Outside progression window, skipping");
        return Ok(ProgressionOutcome {
            message: OUT_OF_WINDOW_MESSAGE.to_string(),
            results: None,
        });
    };

    info!(%mode, forced = request.force, "Starting semester progression");

    let profiles = store.fetch_progression_candidates().await?;
    let mut results = ProgressionResults::default();

    for profile in profiles.iter().filter(|p| p.is_progression_eligible()) {
        let Some(transition) = plan_transition(profile, mode, today.year()) else {
            continue;
        };

        match store.apply_transition(profile.id, &transition).await {
            Ok(()) => match transition {
                Transition::Advance { .. } => results.semester_updates += 1,
                Transition::Graduate { .. } => results.converted_to_alumni += 1,
            },
            Err(e) => {
                warn!(profile = %profile.id, "Failed to progress {}: {e:#}", profile.full_name);
                results.errors.push(format!("{}: {e}", profile.full_name));
            }
        }
    }

    info!(
        candidates = profiles.len(),
        semester_updates = results.semester_updates,
        converted_to_alumni = results.converted_to_alumni,
        errors = results.errors.len(),
        "Semester progression finished"
    );

    Ok(ProgressionOutcome {
        message: COMPLETED_MESSAGE.to_string(),
        results: Some(results),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::{ApprovalStatus, Semester, Track, UserType};
    use crate::store::memory::{enrolled, student, MemoryStore};

    fn forced(term: Option<Term>) -> ProgressionRequest {
        ProgressionRequest { force: true, term }
    }

    #[test]
    fn gate_opens_only_in_january_and_july() {
        let plain = ProgressionRequest::default();
        assert_eq!(resolve_mode(1, plain), Some(Mode::Term(Term::January)));
        assert_eq!(resolve_mode(7, plain), Some(Mode::Term(Term::July)));
        for month in [2, 3, 4, 5, 6, 8, 9, 10, 11, 12] {
            assert_eq!(resolve_mode(month, plain), None, "month {month}");
        }
    }

    #[test]
    fn force_bypasses_gate() {
        assert_eq!(resolve_mode(3, forced(None)), Some(Mode::Combined));
        assert_eq!(
            resolve_mode(3, forced(Some(Term::July))),
            Some(Mode::Term(Term::July))
        );
        assert_eq!(
            resolve_mode(7, forced(Some(Term::January))),
            Some(Mode::Term(Term::January))
        );
    }

    #[test]
    fn term_is_ignored_without_force() {
        let request = ProgressionRequest {
            force: false,
            term: Some(Term::July),
        };
        assert_eq!(resolve_mode(1, request), Some(Mode::Term(Term::January)));
        assert_eq!(resolve_mode(4, request), None);
    }

    #[test]
    fn july_rules() {
        let july = Mode::Term(Term::July);
        for n in [2, 4, 6] {
            let plan = plan_transition(&student("Even", n), july, 2026);
            assert_eq!(
                plan,
                Some(Transition::Advance {
                    from: Semester::new(n).unwrap(),
                    to: Semester::new(n + 1).unwrap(),
                })
            );
        }
        for n in [1, 3, 5, 7] {
            assert_eq!(plan_transition(&student("Odd", n), july, 2026), None);
        }
        assert_eq!(
            plan_transition(&student("Final", 8), july, 2026),
            Some(Transition::Graduate { passout_year: 2026 })
        );
    }

    #[test]
    fn january_rules() {
        let january = Mode::Term(Term::January);
        for n in [1, 3, 5, 7] {
            let plan = plan_transition(&student("Odd", n), january, 2027);
            assert!(matches!(plan, Some(Transition::Advance { to, .. }) if to.number() == n as u8 + 1));
        }
        for n in [2, 4, 6, 8] {
            assert_eq!(plan_transition(&student("Even", n), january, 2027), None);
        }
    }

    #[test]
    fn combined_mode_moves_everyone() {
        for n in 1..8 {
            assert!(matches!(
                plan_transition(&student("Any", n), Mode::Combined, 2026),
                Some(Transition::Advance { .. })
            ));
        }
        assert_eq!(
            plan_transition(&student("Final", 8), Mode::Combined, 2026),
            Some(Transition::Graduate { passout_year: 2026 })
        );
    }

    #[test]
    fn missing_semester_is_not_planned() {
        let profile = student("Unknown", 0);
        assert!(profile.current_semester().is_none());
        assert_eq!(plan_transition(&profile, Mode::Combined, 2026), None);
    }

    #[tokio::test]
    async fn forced_july_run_graduates_and_advances() {
        let store = MemoryStore::new();
        let a = store.insert(student("Amina Yusuf", 8));
        let b = store.insert(student("Bilal Khan", 4));
        let clock = FixedClock::ymd(2026, 10, 19);

        let outcome = run_progression(&store, &clock, forced(Some(Term::July)))
            .await
            .unwrap();

        assert_eq!(outcome.message, COMPLETED_MESSAGE);
        let results = outcome.results.unwrap();
        assert_eq!(results.converted_to_alumni, 1);
        assert_eq!(results.semester_updates, 1);
        assert!(results.errors.is_empty());

        let a = store.profile(a);
        assert_eq!(a.user_type(), UserType::Alumni);
        assert_eq!(a.passout_year(), Some(2026));
        assert!(a.current_semester().is_none());
        assert!(a.expected_passout_year().is_none());

        let b = store.profile(b);
        assert_eq!(b.user_type(), UserType::Student);
        assert_eq!(b.current_semester(), Semester::new(5));
    }

    #[tokio::test]
    async fn january_run_advances_odd_semesters_only() {
        let store = MemoryStore::new();
        let odd = store.insert(enrolled("Chen Wei", Track::Scholar, 3));
        let even = store.insert(student("Dana Ortiz", 6));
        let last = store.insert(student("Emeka Obi", 8));
        let clock = FixedClock::ymd(2027, 1, 15);

        let outcome = run_progression(&store, &clock, ProgressionRequest::default())
            .await
            .unwrap();

        let results = outcome.results.unwrap();
        assert_eq!(results.semester_updates, 1);
        assert_eq!(results.converted_to_alumni, 0);
        assert_eq!(store.profile(odd).current_semester(), Semester::new(4));
        assert_eq!(store.profile(odd).user_type(), UserType::Scholar);
        assert_eq!(store.profile(even).current_semester(), Semester::new(6));
        assert_eq!(store.profile(last).user_type(), UserType::Student);
    }

    #[tokio::test]
    async fn closed_gate_writes_nothing() {
        let store = MemoryStore::new();
        store.insert(student("Farah Ali", 2));
        let clock = FixedClock::ymd(2026, 4, 1);

        let outcome = run_progression(&store, &clock, ProgressionRequest::default())
            .await
            .unwrap();

        assert_eq!(outcome.message, OUT_OF_WINDOW_MESSAGE);
        assert!(outcome.results.is_none());
        assert_eq!(store.fetch_count(), 0);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn failed_update_does_not_stop_the_batch() {
        let store = MemoryStore::new();
        let broken = store.insert(student("Gita Rao", 2));
        let fine = store.insert(student("Hugo Lind", 4));
        store.fail_updates_for(broken);
        let clock = FixedClock::ymd(2026, 7, 1);

        let outcome = run_progression(&store, &clock, ProgressionRequest::default())
            .await
            .unwrap();

        let results = outcome.results.unwrap();
        assert_eq!(results.semester_updates, 1);
        assert_eq!(results.errors, vec!["Gita Rao: row is locked".to_string()]);
        assert_eq!(store.profile(broken).current_semester(), Semester::new(2));
        assert_eq!(store.profile(fine).current_semester(), Semester::new(5));
    }

    #[tokio::test]
    async fn unapproved_profiles_are_skipped() {
        let store = MemoryStore::new();
        let mut pending = student("Ines Silva", 2);
        pending.status = ApprovalStatus::Pending;
        let pending = store.insert(pending);
        let clock = FixedClock::ymd(2026, 7, 1);

        let outcome = run_progression(&store, &clock, ProgressionRequest::default())
            .await
            .unwrap();

        assert_eq!(outcome.results.unwrap(), ProgressionResults::default());
        assert_eq!(store.profile(pending).current_semester(), Semester::new(2));
    }

    #[tokio::test]
    async fn racing_run_reports_stale_profiles() {
        let store = MemoryStore::new();
        let id = store.insert(student("Jonas Berg", 4));
        let last = store.insert(student("Kemal Aydin", 8));
        store.freeze_candidates();
        let clock = FixedClock::ymd(2026, 7, 1);

        let first = run_progression(&store, &clock, ProgressionRequest::default())
            .await
            .unwrap()
            .results
            .unwrap();
        assert_eq!(first.semester_updates, 1);
        assert_eq!(first.converted_to_alumni, 1);

        let second = run_progression(&store, &clock, ProgressionRequest::default())
            .await
            .unwrap()
            .results
            .unwrap();
        assert_eq!(second.semester_updates, 0);
        assert_eq!(second.converted_to_alumni, 0);
        assert_eq!(
            second.errors,
            vec![
                "Jonas Berg: profile changed since it was read".to_string(),
                "Kemal Aydin: profile changed since it was read".to_string(),
            ]
        );
        assert_eq!(store.profile(id).current_semester(), Semester::new(5));
        assert_eq!(store.profile(last).passout_year(), Some(2026));
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_aborts_run() {
        let store = MemoryStore::new();
        store.fail_fetches();
        let clock = FixedClock::ymd(2026, 7, 1);

        let result = run_progression(&store, &clock, ProgressionRequest::default()).await;
        assert!(result.is_err());
    }

    #[test]
    fn outcome_serializes_camel_case() {
        let outcome = ProgressionOutcome {
            message: COMPLETED_MESSAGE.to_string(),
            results: Some(ProgressionResults {
                semester_updates: 2,
                converted_to_alumni: 1,
                errors: vec![],
            }),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["results"]["semesterUpdates"], 2);
        assert_eq!(json["results"]["convertedToAlumni"], 1);

        let skipped = ProgressionOutcome {
            message: OUT_OF_WINDOW_MESSAGE.to_string(),
            results: None,
        };
        let json = serde_json::to_value(&skipped).unwrap();
        assert!(json.get("results").is_none());
    }
}
