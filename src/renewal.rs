use chrono::{DateTime, Months, NaiveDate, NaiveDateTime};

use crate::config::RenewalWindows;
use crate::models::{Policy, RenewalStatus};

/// Parse `DD/MM/YYYY`, `YYYY-MM-DD` or an ISO-8601 date-time into the
/// wall-clock date it names. Offsets are not applied.
pub fn parse_flexible_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.contains('/') {
        return NaiveDate::parse_from_str(raw, "%d/%m/%Y").ok();
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.date())
}

pub fn renewal_date(issue_date: NaiveDate) -> Option<NaiveDate> {
    issue_date.checked_add_months(Months::new(12))
}

/// Renewal state of a policy on `today`. Any unparseable input is "not due".
pub fn renewal_status(
    issue_date: Option<&str>,
    renewal: &str,
    today: NaiveDate,
    windows: &RenewalWindows,
) -> RenewalStatus {
    let renewal_date = issue_date.and_then(parse_flexible_date).and_then(renewal_date);
    let days_until = renewal_date.map(|date| (date - today).num_days());

    let due = renewal.trim() == "1"
        && days_until
            .map(|days| (0..=windows.due_days).contains(&days))
            .unwrap_or(false);
    let urgent = due && days_until.is_some_and(|days| days <= windows.urgent_days);

    RenewalStatus {
        renewal_date,
        days_until,
        due,
        urgent,
    }
}

pub fn policy_renewal(policy: &Policy, today: NaiveDate, windows: &RenewalWindows) -> RenewalStatus {
    renewal_status(policy.issue_date.as_deref(), &policy.renewal, today, windows)
}

/// Policies due for renewal, soonest first.
pub fn due_renewals<'a>(
    policies: &'a [Policy],
    today: NaiveDate,
    windows: &RenewalWindows,
) -> Vec<(&'a Policy, RenewalStatus)> {
    let mut due: Vec<(&Policy, RenewalStatus)> = policies
        .iter()
        .map(|policy| (policy, policy_renewal(policy, today, windows)))
        .filter(|(_, status)| status.due)
        .collect();
    due.sort_by_key(|(_, status)| status.days_until);
    due
}
