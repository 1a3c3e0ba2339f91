use chrono::{DateTime, FixedOffset, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::models::{
    flexible_date, lenient_decimal, lenient_decimal_or_zero, ActivityType, ClaimStatus,
    OpportunityStage, RecordId,
};
use crate::renewal::parse_flexible_date;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub trait Validate {
    const ENTITY: &'static str;

    fn problems(&self) -> Vec<String>;

    fn validate(&self) -> Result<(), ValidationError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                entity: Self::ENTITY,
                problems,
            })
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewActivity {
    pub customer_id: RecordId,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub date: DateTime<FixedOffset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_key: Option<String>,
}

impl Validate for NewActivity {
    const ENTITY: &'static str = "activity";

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        require_id(&mut problems, "customerId", &self.customer_id);
        let blank = self
            .description
            .as_deref()
            .map(|d| d.trim().is_empty())
            .unwrap_or(true);
        if self.kind == ActivityType::Note && blank {
            problems.push("notes need a description".to_string());
        }
        problems
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOpportunity {
    pub customer_id: RecordId,
    pub title: String,
    pub stage: OpportunityStage,
    #[serde(
        deserialize_with = "lenient_decimal_or_zero",
        serialize_with = "rust_decimal::serde::float::serialize"
    )]
    pub value: Decimal,
}

impl Validate for NewOpportunity {
    const ENTITY: &'static str = "opportunity";

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        require_id(&mut problems, "customerId", &self.customer_id);
        require_text(&mut problems, "title", &self.title);
        if self.value.is_sign_negative() && !self.value.is_zero() {
            problems.push("value must be a non-negative amount".to_string());
        }
        problems
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    pub customer_id: RecordId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Validate for NewContact {
    const ENTITY: &'static str = "contact";

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        require_id(&mut problems, "customerId", &self.customer_id);
        require_text(&mut problems, "name", &self.name);
        if let Some(email) = &self.email {
            if !looks_like_email(email) {
                problems.push(format!("email '{email}' is malformed"));
            }
        }
        if let Some(phone) = &self.phone {
            if normalize_phone(phone).is_none() {
                problems.push(format!("phone '{phone}' must have 10 to 13 digits"));
            }
        }
        problems
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAddress {
    pub customer_id: RecordId,
    pub cep: String,
    pub street: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complement: Option<String>,
    pub district: String,
    pub city: String,
    pub state: String,
}

impl Validate for NewAddress {
    const ENTITY: &'static str = "address";

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        require_id(&mut problems, "customerId", &self.customer_id);
        if normalize_cep(&self.cep).is_none() {
            problems.push(format!("cep '{}' must have 8 digits", self.cep));
        }
        require_text(&mut problems, "street", &self.street);
        require_text(&mut problems, "city", &self.city);
        let state = self.state.trim();
        if state.len() != 2 || !state.chars().all(|c| c.is_ascii_alphabetic()) {
            problems.push(format!("state '{}' must be a two-letter UF", self.state));
        }
        problems
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClaim {
    pub policy_id: RecordId,
    pub customer_id: RecordId,
    #[serde(deserialize_with = "flexible_date")]
    pub incident_date: NaiveDate,
    pub description: String,
    #[serde(
        default,
        deserialize_with = "lenient_decimal",
        serialize_with = "rust_decimal::serde::float_option::serialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub status: ClaimStatus,
}

impl Validate for NewClaim {
    const ENTITY: &'static str = "claim";

    fn problems(&self) -> Vec<String> {
        let mut problems = claim_problems(
            &self.policy_id,
            &self.customer_id,
            &self.description,
            self.amount,
        );
        if self.status != ClaimStatus::Reported {
            problems.push("new claims start as reported".to_string());
        }
        problems
    }
}

/// Edits to an existing claim. Status moves only through [`ClaimStatusChange`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimEdit {
    pub policy_id: RecordId,
    pub customer_id: RecordId,
    #[serde(deserialize_with = "flexible_date")]
    pub incident_date: NaiveDate,
    pub description: String,
    #[serde(
        default,
        deserialize_with = "lenient_decimal",
        serialize_with = "rust_decimal::serde::float_option::serialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub amount: Option<Decimal>,
}

impl Validate for ClaimEdit {
    const ENTITY: &'static str = "claim";

    fn problems(&self) -> Vec<String> {
        claim_problems(
            &self.policy_id,
            &self.customer_id,
            &self.description,
            self.amount,
        )
    }
}

fn claim_problems(
    policy_id: &RecordId,
    customer_id: &RecordId,
    description: &str,
    amount: Option<Decimal>,
) -> Vec<String> {
    let mut problems = Vec::new();
    require_id(&mut problems, "policyId", policy_id);
    require_id(&mut problems, "customerId", customer_id);
    require_text(&mut problems, "description", description);
    if amount.is_some_and(|a| a < Decimal::ZERO) {
        problems.push("amount must be a non-negative amount".to_string());
    }
    problems
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimStatusChange {
    #[serde(skip)]
    pub from: ClaimStatus,
    pub status: ClaimStatus,
}

impl Validate for ClaimStatusChange {
    const ENTITY: &'static str = "claim status";

    fn problems(&self) -> Vec<String> {
        if self.from.can_transition_to(self.status) {
            Vec::new()
        } else {
            vec![format!("cannot move from {:?} to {:?}", self.from, self.status)]
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPolicy {
    pub customer_id: RecordId,
    /// Absent while the policy is still a proposal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insurer_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<RecordId>,
    pub situation_document: String,
    pub renewal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_decimal",
        serialize_with = "rust_decimal::serde::float_option::serialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub total_prize: Option<Decimal>,
}

impl Validate for NewPolicy {
    const ENTITY: &'static str = "policy";

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        require_id(&mut problems, "customerId", &self.customer_id);
        require_text(&mut problems, "situationDocument", &self.situation_document);
        if !matches!(self.renewal.trim(), "0" | "1") {
            problems.push(format!("renewal '{}' must be 0 or 1", self.renewal));
        }
        let issue_date = self.issue_date.as_deref().map(str::trim).filter(|d| !d.is_empty());
        match issue_date {
            Some(raw) if parse_flexible_date(raw).is_none() => {
                problems.push(format!("issueDate '{raw}' is not a date"));
            }
            None if self.renewal.trim() == "1" => {
                problems.push("renewals need an issueDate".to_string());
            }
            _ => {}
        }
        if self.total_prize.is_some_and(|p| p < Decimal::ZERO) {
            problems.push("totalPrize must be a non-negative amount".to_string());
        }
        problems
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insurer_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Validate for NewProduct {
    const ENTITY: &'static str = "product";

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        require_text(&mut problems, "name", &self.name);
        if self.category.as_deref().is_some_and(|c| c.trim().is_empty()) {
            problems.push("category cannot be blank".to_string());
        }
        problems
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCustomer {
    pub name: String,
    /// CPF or CNPJ.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Validate for NewCustomer {
    const ENTITY: &'static str = "customer";

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        require_text(&mut problems, "name", &self.name);
        if let Some(document) = &self.document {
            if normalize_document(document).is_none() {
                problems.push(format!("document '{document}' must be a CPF or CNPJ"));
            }
        }
        if let Some(email) = &self.email {
            if !looks_like_email(email) {
                problems.push(format!("email '{email}' is malformed"));
            }
        }
        if let Some(phone) = &self.phone {
            if normalize_phone(phone).is_none() {
                problems.push(format!("phone '{phone}' must have 10 to 13 digits"));
            }
        }
        problems
    }
}

/// Multipart document upload; bytes travel as the `file` part.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub customer_id: RecordId,
    pub policy_id: Option<RecordId>,
    pub kind: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Validate for NewDocument {
    const ENTITY: &'static str = "document";

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        require_id(&mut problems, "customerId", &self.customer_id);
        require_text(&mut problems, "kind", &self.kind);
        require_text(&mut problems, "fileName", &self.file_name);
        if self.bytes.is_empty() {
            problems.push("file is empty".to_string());
        } else if self.bytes.len() > MAX_UPLOAD_BYTES {
            problems.push(format!(
                "file is {} bytes, limit is {MAX_UPLOAD_BYTES}",
                self.bytes.len()
            ));
        }
        problems
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsappMessage {
    pub phone: String,
    pub message: String,
}

impl Validate for WhatsappMessage {
    const ENTITY: &'static str = "whatsapp message";

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if normalize_phone(&self.phone).is_none() {
            problems.push(format!("phone '{}' must have 10 to 13 digits", self.phone));
        }
        require_text(&mut problems, "message", &self.message);
        problems
    }
}

/// Strip punctuation from a CEP; `None` unless exactly 8 digits remain.
pub fn normalize_cep(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| !matches!(c, '-' | '.' | ' ')).collect();
    (digits.len() == 8 && digits.chars().all(|c| c.is_ascii_digit())).then_some(digits)
}

/// CPF (11 digits) or CNPJ (14 digits), punctuation stripped.
pub fn normalize_document(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| !matches!(c, '.' | '-' | '/' | ' ')).collect();
    (matches!(digits.len(), 11 | 14) && digits.chars().all(|c| c.is_ascii_digit())).then_some(digits)
}

pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    (10..=13).contains(&digits.len()).then_some(digits)
}

fn looks_like_email(raw: &str) -> bool {
    match raw.trim().split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains('@')
        }
        None => false,
    }
}

fn require_text(problems: &mut Vec<String>, field: &str, value: &str) {
    if value.trim().is_empty() {
        problems.push(format!("{field} is required"));
    }
}

fn require_id(problems: &mut Vec<String>, field: &str, id: &RecordId) {
    require_text(problems, field, &id.0);
}
