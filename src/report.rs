use std::fmt::Write;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::engagement::counted;
use crate::models::{
    Activity, Customer, EngagementMetrics, PipelineSummary, Policy, RenewalStatus, Trend,
};

pub struct ReportInput<'a> {
    pub customer: &'a Customer,
    pub today: NaiveDate,
    pub metrics: &'a EngagementMetrics,
    pub pipeline: &'a PipelineSummary,
    pub renewals: &'a [(&'a Policy, RenewalStatus)],
    pub activities: &'a [Activity],
}

pub fn build_report(input: &ReportInput<'_>) -> String {
    let metrics = input.metrics;
    let health = &metrics.relationship_health;
    let mut output = String::new();

    let _ = writeln!(output, "# Engagement Report: {}", input.customer.name);
    let _ = writeln!(output, "Generated on {}", input.today);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Relationship Health");
    let _ = writeln!(output, "Score {} ({})", health.score, health.level);
    if health.factors.is_empty() {
        let _ = writeln!(output, "No contributing signals.");
    } else {
        for factor in &health.factors {
            let _ = writeln!(output, "- {factor}");
        }
    }

    let freq = &metrics.activity_frequency;
    let arrow = match freq.trend {
        Trend::Up => "up",
        Trend::Down => "down",
        Trend::Stable => "stable",
    };
    let _ = writeln!(output);
    let _ = writeln!(output, "## Activity");
    let _ = writeln!(
        output,
        "{} this month, {} last month (trend {arrow})",
        counted(freq.this_month, "activity", "activities"),
        freq.last_month
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "| Month | Activities | Score |");
    let _ = writeln!(output, "|---|---|---|");
    for point in &metrics.engagement_trend {
        let _ = writeln!(
            output,
            "| {} | {} | {} |",
            point.period, point.activities, point.score
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Pipeline");
    let _ = writeln!(
        output,
        "{}, {}",
        counted(metrics.policy_count, "policy", "policies"),
        counted(metrics.opportunity_count, "opportunity", "opportunities")
    );
    for stage in input.pipeline.stages.iter().filter(|s| s.count > 0) {
        let _ = writeln!(
            output,
            "- {}: {} ({})",
            stage.stage.label(),
            stage.count,
            format_brl(stage.total_value)
        );
    }
    let _ = writeln!(
        output,
        "Open value {}, won value {}",
        format_brl(input.pipeline.open_value),
        format_brl(input.pipeline.won_value)
    );
    if let Some(rate) = input.pipeline.win_rate {
        let _ = writeln!(output, "Win rate {:.0}%", rate * 100.0);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Upcoming Renewals");
    if input.renewals.is_empty() {
        let _ = writeln!(output, "No policies due for renewal.");
    } else {
        for (policy, status) in input.renewals {
            let number = if policy.is_proposal() {
                "proposal"
            } else {
                policy.policy_number.as_deref().unwrap_or_default()
            };
            let when = status
                .renewal_date
                .map(|d| d.format("%d/%m/%Y").to_string())
                .unwrap_or_default();
            let flag = if status.urgent { " URGENT" } else { "" };
            let days = status.days_until.unwrap_or_default();
            let days = if days == 1 {
                "1 day".to_string()
            } else {
                format!("{days} days")
            };
            let _ = writeln!(output, "- {number} renews {when} ({days}){flag}");
        }
    }

    let mut recent: Vec<&Activity> = input.activities.iter().collect();
    recent.sort_by(|a, b| b.date.cmp(&a.date));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Activities");

    if recent.is_empty() {
        let _ = writeln!(output, "No activities recorded.");
    } else {
        for activity in recent.iter().take(5) {
            let who = activity
                .user
                .as_ref()
                .and_then(|u| u.name.as_deref())
                .unwrap_or("unassigned");
            let _ = writeln!(
                output,
                "- {} {:?} by {}: {}",
                activity.date.format("%d/%m/%Y"),
                activity.kind,
                who,
                activity.description.as_deref().unwrap_or("")
            );
        }
    }

    output
}

/// `1234.5` -> `R$ 1.234,50`. Half-cents round away from zero.
pub fn format_brl(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let cents = (rounded.abs() * Decimal::ONE_HUNDRED)
        .trunc()
        .to_u128()
        .unwrap_or_default();
    let (units, cents) = (cents / 100, cents % 100);
    let digits = units.to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    let sign = if rounded < Decimal::ZERO && (units, cents) != (0, 0) { "-" } else { "" };
    format!("{sign}R$ {grouped},{cents:02}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RenewalWindows, ScoringWeights};
    use crate::engagement::calculate_engagement_metrics;
    use crate::models::{ActivityType, Opportunity, OpportunityStage, RecordId, UserRef};
    use crate::pipeline::summarize_pipeline;
    use crate::renewal::due_renewals;
    use chrono::{FixedOffset, TimeZone};

    fn customer() -> Customer {
        Customer {
            id: RecordId::from("1"),
            name: "Transportes Silva Ltda".to_string(),
            document: None,
            email: None,
            phone: None,
            created_at: None,
        }
    }

    #[test]
    fn formats_brazilian_currency() {
        assert_eq!(format_brl(Decimal::ZERO), "R$ 0,00");
        assert_eq!(format_brl(Decimal::new(12345, 1)), "R$ 1.234,50");
        assert_eq!(format_brl(Decimal::new(1_000_000, 0)), "R$ 1.000.000,00");
        assert_eq!(format_brl(Decimal::new(-125, 1)), "-R$ 12,50");
        assert_eq!(format_brl(Decimal::new(10005, 3)), "R$ 10,01");
        assert_eq!(format_brl(Decimal::new(-1, 3)), "R$ 0,00");
    }

    #[test]
    fn empty_customer_report_has_placeholders() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let metrics = calculate_engagement_metrics(&[], &[], &[], today, &ScoringWeights::default());
        let pipeline = summarize_pipeline(&[]);
        let report = build_report(&ReportInput {
            customer: &customer(),
            today,
            metrics: &metrics,
            pipeline: &pipeline,
            renewals: &[],
            activities: &[],
        });
        assert!(report.starts_with("# Engagement Report: Transportes Silva Ltda"));
        assert!(report.contains("Score 10 (poor)"));
        assert!(report.contains("No policies due for renewal."));
        assert!(report.contains("No activities recorded."));
        assert_eq!(report.matches("| 2026-").count(), 6);
    }

    #[test]
    fn report_lists_renewals_and_recent_activity() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let policies = vec![Policy {
            id: None,
            customer_id: None,
            policy_number: Some("AP-778".to_string()),
            insurer_id: None,
            product_id: None,
            situation_document: "A".to_string(),
            renewal: "1".to_string(),
            issue_date: Some("01/11/2025".to_string()),
            total_prize: Some(Decimal::new(3200, 0)),
        }];
        let opps = vec![Opportunity {
            id: None,
            customer_id: None,
            title: None,
            stage: OpportunityStage::Nova,
            value: Decimal::new(1500, 0),
        }];
        let activities = vec![Activity {
            id: None,
            customer_id: None,
            kind: ActivityType::Meeting,
            date: FixedOffset::west_opt(3 * 3600)
                .unwrap()
                .with_ymd_and_hms(2026, 10, 10, 22, 30, 0)
                .unwrap(),
            user: Some(UserRef {
                id: RecordId::from("u1"),
                name: Some("Carla".to_string()),
            }),
            description: Some("Revisão da frota".to_string()),
        }];
        let metrics = calculate_engagement_metrics(
            &policies,
            &opps,
            &activities,
            today,
            &ScoringWeights::default(),
        );
        let pipeline = summarize_pipeline(&opps);
        let renewals = due_renewals(&policies, today, &RenewalWindows::default());
        let report = build_report(&ReportInput {
            customer: &customer(),
            today,
            metrics: &metrics,
            pipeline: &pipeline,
            renewals: &renewals,
            activities: &activities,
        });
        assert!(report.contains("- AP-778 renews 01/11/2026 (15 days) URGENT"));
        assert!(report.contains("- Nova: 1 (R$ 1.500,00)"));
        assert!(report.contains("1 policy, 1 opportunity"));
        assert!(report.contains("1 activity this month"));
        assert!(report.contains("10/10/2026 Meeting by Carla: Revisão da frota"));
    }
}
