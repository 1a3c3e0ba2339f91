use chrono::{Datelike, Months, NaiveDate};

use crate::config::ScoringWeights;
use crate::models::{
    Activity, ActivityFrequency, EngagementMetrics, HealthLevel, Opportunity, OpportunityStage,
    Policy, RelationshipHealth, Trend, TrendPoint,
};
use crate::renewal::parse_flexible_date;

pub const TREND_MONTHS: u32 = 6;

/// Signals visible inside one scoring window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowSignals {
    pub policies: usize,
    pub open_opportunities: usize,
    pub won_opportunities: usize,
    pub activities: usize,
    pub previous_activities: usize,
}

/// Derive the engagement snapshot for one customer as of `today`.
///
/// Pure: the same collections and date always produce the same metrics.
pub fn calculate_engagement_metrics(
    policies: &[Policy],
    opportunities: &[Opportunity],
    activities: &[Activity],
    today: NaiveDate,
    weights: &ScoringWeights,
) -> EngagementMetrics {
    let current = month_start(today);
    let previous = shift_months(current, -1);

    let this_month = count_in_month(activities, current);
    let last_month = count_in_month(activities, previous);

    let (open_opportunities, won_opportunities) = opportunity_counts(opportunities);
    let relationship_health = score_window(
        &WindowSignals {
            policies: policies.len(),
            open_opportunities,
            won_opportunities,
            activities: this_month,
            previous_activities: last_month,
        },
        weights,
    );

    let engagement_trend = (0..TREND_MONTHS as i32)
        .rev()
        .map(|back| {
            let start = shift_months(current, -back);
            let month_activities = count_in_month(activities, start);
            let signals = WindowSignals {
                policies: policies_issued_by(policies, month_end(start)),
                open_opportunities,
                won_opportunities,
                activities: month_activities,
                previous_activities: count_in_month(activities, shift_months(start, -1)),
            };
            TrendPoint {
                period: start.format("%Y-%m").to_string(),
                activities: month_activities,
                score: score_window(&signals, weights).score,
            }
        })
        .collect();

    EngagementMetrics {
        policy_count: policies.len(),
        opportunity_count: opportunities.len(),
        activity_frequency: ActivityFrequency {
            this_month,
            last_month,
            trend: trend_between(this_month, last_month),
        },
        relationship_health,
        engagement_trend,
    }
}

pub fn score_window(signals: &WindowSignals, weights: &ScoringWeights) -> RelationshipHealth {
    let mut score = i64::from(weights.baseline);
    let mut factors = Vec::new();
    let mut add = |points: i64, reason: String| {
        if points != 0 {
            score = score.saturating_add(points);
            factors.push(reason);
        }
    };

    if signals.policies > 0 {
        add(
            i64::from(weights.has_policies),
            format!("Holds {}", counted(signals.policies, "policy", "policies")),
        );
        let extra = count(signals.policies - 1)
            .saturating_mul(i64::from(weights.per_extra_policy))
            .min(i64::from(weights.max_extra_policies));
        add(
            extra,
            format!(
                "{} additional {}",
                signals.policies - 1,
                if signals.policies == 2 { "policy" } else { "policies" }
            ),
        );
    }
    if signals.open_opportunities > 0 {
        add(
            i64::from(weights.open_opportunities),
            counted(signals.open_opportunities, "open opportunity", "open opportunities"),
        );
    }
    if signals.won_opportunities > 0 {
        add(
            i64::from(weights.won_opportunities),
            counted(signals.won_opportunities, "won opportunity", "won opportunities"),
        );
    }
    if signals.activities > 0 {
        let points = count(signals.activities)
            .saturating_mul(i64::from(weights.per_activity))
            .min(i64::from(weights.max_activity));
        add(
            points,
            counted(signals.activities, "recent activity", "recent activities"),
        );
    }
    if signals.activities > signals.previous_activities {
        add(
            i64::from(weights.rising_activity),
            "Activity rising versus previous month".to_string(),
        );
    }
    let has_relationship = signals.policies > 0
        || signals.open_opportunities > 0
        || signals.won_opportunities > 0;
    if has_relationship && signals.activities == 0 && signals.previous_activities == 0 {
        add(
            -i64::from(weights.inactivity_penalty),
            "No contact in the last two months".to_string(),
        );
    }

    let score = score.clamp(0, 100) as u8;
    RelationshipHealth {
        score,
        level: level_for(score, weights),
        factors,
    }
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// `1 policy`, `2 policies`.
pub(crate) fn counted(n: usize, one: &str, many: &str) -> String {
    format!("{n} {}", if n == 1 { one } else { many })
}

pub fn level_for(score: u8, weights: &ScoringWeights) -> HealthLevel {
    if score >= weights.excellent_at {
        HealthLevel::Excellent
    } else if score >= weights.good_at {
        HealthLevel::Good
    } else if score >= weights.fair_at {
        HealthLevel::Fair
    } else {
        HealthLevel::Poor
    }
}

pub fn trend_between(current: usize, previous: usize) -> Trend {
    match current.cmp(&previous) {
        std::cmp::Ordering::Greater => Trend::Up,
        std::cmp::Ordering::Less => Trend::Down,
        std::cmp::Ordering::Equal => Trend::Stable,
    }
}

fn opportunity_counts(opportunities: &[Opportunity]) -> (usize, usize) {
    let open = opportunities.iter().filter(|o| o.stage.is_open()).count();
    let won = opportunities
        .iter()
        .filter(|o| o.stage == OpportunityStage::Ganha)
        .count();
    (open, won)
}

/// Undated or unparseable policies count in every window.
fn policies_issued_by(policies: &[Policy], last_day: NaiveDate) -> usize {
    policies
        .iter()
        .filter(|p| {
            p.issue_date
                .as_deref()
                .and_then(parse_flexible_date)
                .map(|issued| issued <= last_day)
                .unwrap_or(true)
        })
        .count()
}

fn count_in_month(activities: &[Activity], start: NaiveDate) -> usize {
    activities
        .iter()
        .filter(|a| {
            let day = a.date.date_naive();
            day.year() == start.year() && day.month() == start.month()
        })
        .count()
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn month_end(start: NaiveDate) -> NaiveDate {
    shift_months(start, 1).pred_opt().unwrap_or(start)
}

fn shift_months(date: NaiveDate, delta: i32) -> NaiveDate {
    let months = Months::new(delta.unsigned_abs());
    let shifted = if delta >= 0 {
        date.checked_add_months(months)
    } else {
        date.checked_sub_months(months)
    };
    shifted.unwrap_or(date)
}
