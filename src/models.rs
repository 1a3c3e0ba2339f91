use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::renewal::parse_flexible_date;

/// Backend identifiers arrive as either JSON numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) => Ok(Self(s)),
            serde_json::Value::Number(n) => Ok(Self(n.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "expected string or number id, got {other}"
            ))),
        }
    }
}

/// Lenient decimal: numbers, numeric strings ("1.234,56" or "1234.56"), or null.
pub(crate) fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Number(n) => {
            let raw = n.to_string();
            Decimal::from_str(&raw)
                .or_else(|_| Decimal::from_scientific(&raw))
                .ok()
        }
        serde_json::Value::String(s) => parse_decimal(&s),
        _ => None,
    }))
}

pub(crate) fn lenient_decimal_or_zero<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_decimal(deserializer)?.unwrap_or(Decimal::ZERO))
}

/// Dates as `DD/MM/YYYY`, `YYYY-MM-DD` or ISO-8601; unparseable values become `None`.
pub(crate) fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_flexible_date))
}

pub(crate) fn flexible_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_flexible_date(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognised date '{raw}'")))
}

/// Parse an amount written the Brazilian way (`1.234,56`), the English way
/// (`1,234.56`), or plain (`1234.56`).
///
/// When both separators appear the last one is the decimal mark. A lone `,`
/// is always decimal. A lone `.` followed by exactly three digits after a
/// one-to-three digit integer part is a thousands separator, so `1.234` is
/// 1234 while `1500.000` stays 1500.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    if cleaned.contains(&['e', 'E'][..]) {
        return Decimal::from_scientific(&cleaned).ok();
    }
    let (sign, body) = match cleaned.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", cleaned.as_str()),
    };

    let decimal_mark = match (body.rfind(','), body.rfind('.')) {
        (Some(comma), Some(dot)) => Some(if comma > dot { ',' } else { '.' }),
        (Some(_), None) => (body.matches(',').count() == 1).then_some(','),
        (None, Some(_)) => {
            (body.matches('.').count() == 1 && !is_thousands_group(body)).then_some('.')
        }
        (None, None) => None,
    };
    let (int_part, frac_part) = match decimal_mark {
        Some(mark) => body.rsplit_once(mark)?,
        None => (body, ""),
    };
    if !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let digits = ungroup(int_part)?;
    let normalized = if frac_part.is_empty() {
        format!("{sign}{digits}")
    } else {
        format!("{sign}{digits}.{frac_part}")
    };
    Decimal::from_str(&normalized).ok()
}

fn is_thousands_group(body: &str) -> bool {
    match body.split_once('.') {
        Some((head, tail)) => {
            tail.len() == 3
                && (1..=3).contains(&head.len())
                && head != "0"
                && head.chars().chain(tail.chars()).all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Strip thousands separators, checking that every group after the first has three digits.
fn ungroup(int_part: &str) -> Option<String> {
    if int_part.is_empty() {
        return Some("0".to_string());
    }
    let groups: Vec<&str> = int_part.split(&[',', '.'][..]).collect();
    let well_formed = groups.iter().all(|g| g.chars().all(|c| c.is_ascii_digit()))
        && (groups.len() == 1
            || ((1..=3).contains(&groups[0].len()) && groups[1..].iter().all(|g| g.len() == 3)));
    (well_formed && !groups[0].is_empty()).then(|| groups.concat())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default)]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub customer_id: Option<RecordId>,
    #[serde(default)]
    pub policy_number: Option<String>,
    #[serde(default)]
    pub insurer_id: Option<RecordId>,
    #[serde(default)]
    pub product_id: Option<RecordId>,
    #[serde(default)]
    pub situation_document: String,
    #[serde(default)]
    pub renewal: String,
    #[serde(default)]
    pub issue_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub total_prize: Option<Decimal>,
}

impl Policy {
    /// Proposals have no policy number yet.
    pub fn is_proposal(&self) -> bool {
        self.policy_number
            .as_deref()
            .map(|n| n.trim().is_empty())
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpportunityStage {
    Nova,
    Contactada,
    #[serde(rename = "Proposta Enviada")]
    PropostaEnviada,
    Ganha,
    Perdida,
}

impl OpportunityStage {
    pub const ALL: [OpportunityStage; 5] = [
        OpportunityStage::Nova,
        OpportunityStage::Contactada,
        OpportunityStage::PropostaEnviada,
        OpportunityStage::Ganha,
        OpportunityStage::Perdida,
    ];

    pub fn is_open(self) -> bool {
        !matches!(self, OpportunityStage::Ganha | OpportunityStage::Perdida)
    }

    pub fn label(self) -> &'static str {
        match self {
            OpportunityStage::Nova => "Nova",
            OpportunityStage::Contactada => "Contactada",
            OpportunityStage::PropostaEnviada => "Proposta Enviada",
            OpportunityStage::Ganha => "Ganha",
            OpportunityStage::Perdida => "Perdida",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    #[serde(default)]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub customer_id: Option<RecordId>,
    #[serde(default)]
    pub title: Option<String>,
    pub stage: OpportunityStage,
    #[serde(default, deserialize_with = "lenient_decimal_or_zero")]
    pub value: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Call,
    Email,
    Whatsapp,
    Meeting,
    Note,
}

impl std::str::FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "call" => Ok(ActivityType::Call),
            "email" => Ok(ActivityType::Email),
            "whatsapp" => Ok(ActivityType::Whatsapp),
            "meeting" => Ok(ActivityType::Meeting),
            "note" => Ok(ActivityType::Note),
            other => Err(format!("unknown activity type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(default)]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub customer_id: Option<RecordId>,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    /// Kept with its original offset so month bucketing uses the local calendar.
    pub date: DateTime<FixedOffset>,
    #[serde(default)]
    pub user: Option<UserRef>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRef {
    pub id: RecordId,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub document: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    #[default]
    Reported,
    UnderReview,
    Approved,
    Rejected,
    Settled,
    Closed,
}

impl ClaimStatus {
    pub fn can_transition_to(self, next: ClaimStatus) -> bool {
        use ClaimStatus::*;
        matches!(
            (self, next),
            (Reported, UnderReview)
                | (UnderReview, Approved)
                | (UnderReview, Rejected)
                | (Approved, Settled)
                | (Approved, Closed)
                | (Rejected, Closed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub id: RecordId,
    #[serde(default)]
    pub policy_id: Option<RecordId>,
    #[serde(default)]
    pub customer_id: Option<RecordId>,
    pub status: ClaimStatus,
    #[serde(default, deserialize_with = "lenient_date")]
    pub incident_date: Option<NaiveDate>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: RecordId,
    #[serde(default)]
    pub customer_id: Option<RecordId>,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default)]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub customer_id: Option<RecordId>,
    #[serde(default)]
    pub cep: String,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub complement: Option<String>,
    #[serde(default)]
    pub district: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: RecordId,
    #[serde(default)]
    pub customer_id: Option<RecordId>,
    #[serde(default)]
    pub policy_id: Option<RecordId>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub insurer_id: Option<RecordId>,
    #[serde(default)]
    pub category: Option<String>,
}

// Derived read-models. None of these are persisted.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityFrequency {
    pub this_month: usize,
    pub last_month: usize,
    pub trend: Trend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HealthLevel::Excellent => "excellent",
            HealthLevel::Good => "good",
            HealthLevel::Fair => "fair",
            HealthLevel::Poor => "poor",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipHealth {
    pub score: u8,
    pub level: HealthLevel,
    pub factors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub period: String,
    pub activities: usize,
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementMetrics {
    pub policy_count: usize,
    pub opportunity_count: usize,
    pub activity_frequency: ActivityFrequency,
    pub relationship_health: RelationshipHealth,
    pub engagement_trend: Vec<TrendPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalStatus {
    pub renewal_date: Option<NaiveDate>,
    pub days_until: Option<i64>,
    pub due: bool,
    pub urgent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSummary {
    pub stage: OpportunityStage,
    pub count: usize,
    pub total_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSummary {
    pub stages: Vec<StageSummary>,
    pub open_value: Decimal,
    pub won_value: Decimal,
    pub win_rate: Option<f64>,
}
