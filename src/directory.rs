use crate::models::Profile;

fn searchable_fields(profile: &Profile) -> Vec<String> {
    let mut fields = vec![
        profile.full_name.to_lowercase(),
        profile.email.to_lowercase(),
        profile.user_type().as_str().to_string(),
    ];

    fields.extend(profile.program.as_deref().map(str::to_lowercase));
    fields.extend(profile.high_commission.as_deref().map(str::to_lowercase));
    fields.extend(profile.current_semester().map(|s| format!("semester {s}")));
    fields.extend(profile.passout_year().map(|y| y.to_string()));
    fields.extend(profile.expected_passout_year().map(|y| y.to_string()));
    fields.extend(profile.scholarship_year.map(|y| y.to_string()));

    fields
}

/// Every whitespace-separated term must appear in at least one field.
pub fn matches(profile: &Profile, query: &str) -> bool {
    let fields = searchable_fields(profile);

    query
        .split_whitespace()
        .map(str::to_lowercase)
        .all(|term| fields.iter().any(|field| field.contains(&term)))
}

pub fn filter_profiles<'a>(profiles: &'a [Profile], query: &str) -> Vec<&'a Profile> {
    profiles.iter().filter(|p| matches(p, query)).collect()
}
