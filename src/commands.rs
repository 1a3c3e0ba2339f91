use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::api::{with_retry, ApiClient, Resource};
use crate::config::Config;
use crate::engagement::{calculate_engagement_metrics, counted};
use crate::error::ApiError;
use crate::listing::{ListQuery, ListView};
use crate::models::{
    Activity, ActivityType, Address, Claim, ClaimStatus, Contact, Customer, Opportunity, Policy,
    Product, RecordId,
};
use crate::pipeline::summarize_pipeline;
use crate::renewal::{due_renewals, parse_flexible_date};
use crate::report::{build_report, format_brl, ReportInput};
use crate::validation::{
    ClaimEdit, ClaimStatusChange, NewActivity, NewAddress, NewClaim, NewContact, NewCustomer,
    NewDocument, NewOpportunity, NewPolicy, NewProduct, Validate, WhatsappMessage,
};

pub struct App {
    pub client: ApiClient,
    pub config: Config,
}

/// Policies, opportunities and activities of one customer, fetched concurrently.
pub struct CustomerRecords {
    pub policies: Vec<Policy>,
    pub opportunities: Vec<Opportunity>,
    pub activities: Vec<Activity>,
}

impl App {
    fn customer_query(&self, customer: &RecordId) -> ListQuery {
        ListQuery::new(self.config.api.page_size).filter("customerId", customer.to_string())
    }

    pub async fn customer_records(&self, customer: &RecordId) -> anyhow::Result<CustomerRecords> {
        let (policies, opportunities, activities) = tokio::try_join!(
            self.client
                .list_all::<Policy>(Resource::Policies, self.customer_query(customer)),
            self.client
                .list_all::<Opportunity>(Resource::Opportunities, self.customer_query(customer)),
            self.client
                .list_all::<Activity>(Resource::Activities, self.customer_query(customer)),
        )
        .with_context(|| format!("failed to load records for customer {customer}"))?;
        tracing::debug!(
            %customer,
            policies = policies.len(),
            opportunities = opportunities.len(),
            activities = activities.len(),
            "customer records loaded"
        );
        Ok(CustomerRecords {
            policies,
            opportunities,
            activities,
        })
    }
}

pub async fn metrics(app: &App, customer: &RecordId, json: bool, today: NaiveDate) -> anyhow::Result<()> {
    let records = app.customer_records(customer).await?;
    let metrics = calculate_engagement_metrics(
        &records.policies,
        &records.opportunities,
        &records.activities,
        today,
        &app.config.scoring,
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
        return Ok(());
    }

    let health = &metrics.relationship_health;
    println!("Relationship health {} ({})", health.score, health.level);
    for factor in &health.factors {
        println!("- {factor}");
    }
    println!(
        "{}, {}; {} this month vs {} last month ({:?})",
        counted(metrics.policy_count, "policy", "policies"),
        counted(metrics.opportunity_count, "opportunity", "opportunities"),
        counted(metrics.activity_frequency.this_month, "activity", "activities"),
        metrics.activity_frequency.last_month,
        metrics.activity_frequency.trend
    );
    for point in &metrics.engagement_trend {
        println!(
            "  {}  {:>3} activities  score {:>3}",
            point.period, point.activities, point.score
        );
    }
    Ok(())
}

pub async fn report(app: &App, customer_id: &RecordId, out: &Path, today: NaiveDate) -> anyhow::Result<()> {
    let (customer, records) = tokio::try_join!(
        async {
            app.client
                .get::<Customer>(Resource::Customers, customer_id)
                .await
                .with_context(|| format!("failed to load customer {customer_id}"))
        },
        app.customer_records(customer_id),
    )?;
    let metrics = calculate_engagement_metrics(
        &records.policies,
        &records.opportunities,
        &records.activities,
        today,
        &app.config.scoring,
    );
    let pipeline = summarize_pipeline(&records.opportunities);
    let renewals = due_renewals(&records.policies, today, &app.config.renewal);
    let report = build_report(&ReportInput {
        customer: &customer,
        today,
        metrics: &metrics,
        pipeline: &pipeline,
        renewals: &renewals,
        activities: &records.activities,
    });
    std::fs::write(out, report).with_context(|| format!("failed to write {}", out.display()))?;
    println!("Report written to {}.", out.display());
    Ok(())
}

pub async fn renewals(
    app: &App,
    customer: Option<&RecordId>,
    limit: usize,
    today: NaiveDate,
) -> anyhow::Result<()> {
    let query = match customer {
        Some(id) => app.customer_query(id),
        None => ListQuery::new(app.config.api.page_size),
    };
    let policies: Vec<Policy> = app.client.list_all(Resource::Policies, query).await?;
    let due = due_renewals(&policies, today, &app.config.renewal);

    if due.is_empty() {
        println!("No policies due for renewal.");
        return Ok(());
    }

    println!("Policies due for renewal:");
    for (policy, status) in due.iter().take(limit) {
        println!(
            "- {} (customer {}) renews {} in {} days{}{}",
            policy.policy_number.as_deref().unwrap_or("proposal"),
            policy
                .customer_id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "?".to_string()),
            status
                .renewal_date
                .map(|d| d.format("%d/%m/%Y").to_string())
                .unwrap_or_default(),
            status.days_until.unwrap_or_default(),
            policy
                .total_prize
                .map(|p| format!(", premium {}", format_brl(p)))
                .unwrap_or_default(),
            if status.urgent { " [urgent]" } else { "" },
        );
    }
    Ok(())
}

pub async fn pipeline(app: &App, customer: Option<&RecordId>, json: bool) -> anyhow::Result<()> {
    let query = match customer {
        Some(id) => app.customer_query(id),
        None => ListQuery::new(app.config.api.page_size),
    };
    let opportunities: Vec<Opportunity> = app.client.list_all(Resource::Opportunities, query).await?;
    let summary = summarize_pipeline(&opportunities);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    for stage in &summary.stages {
        println!(
            "{:<18} {:>4}  {}",
            stage.stage.label(),
            stage.count,
            format_brl(stage.total_value)
        );
    }
    println!("Open pipeline {}", format_brl(summary.open_value));
    match summary.win_rate {
        Some(rate) => println!("Win rate {:.1}%", rate * 100.0),
        None => println!("Win rate n/a (no closed opportunities)"),
    }
    Ok(())
}

pub struct ListArgs {
    pub search: Option<String>,
    pub filters: Vec<(String, String)>,
    pub page: u32,
    pub limit: Option<u32>,
    pub all: bool,
}

pub async fn list(app: &App, resource: Resource, args: ListArgs) -> anyhow::Result<()> {
    let limit = args.limit.unwrap_or(app.config.api.page_size);
    let mut view: ListView<Value> = ListView::new(ListQuery::new(limit));
    view.set_filters(args.search, args.filters.into_iter().collect::<BTreeMap<_, _>>());
    view.go_to_page(args.page);

    loop {
        let (ticket, query) = view.begin_fetch();
        tracing::debug!(resource = ?resource, query = ?view.query(), "fetching list page");
        let page = app.client.list(resource, &query).await?;
        if args.all {
            view.append(ticket, page);
            if !view.next_page() {
                break;
            }
        } else {
            view.apply(ticket, page);
            break;
        }
    }

    for row in view.rows() {
        println!("{}", serde_json::to_string(row)?);
    }
    if let Some(p) = view.pagination() {
        eprintln!(
            "page {}/{} ({} records total)",
            p.current_page, p.total_pages, p.total_count
        );
    }
    Ok(())
}

/// Re-fetch the first page of the affected list after a mutation.
/// The mutation already succeeded, so a failed refresh is only logged.
async fn refetch(app: &App, resource: Resource, customer: Option<&RecordId>) {
    let query = match customer {
        Some(id) => app.customer_query(id),
        None => ListQuery::new(app.config.api.page_size),
    };
    match app.client.list::<Value>(resource, &query).await {
        Ok(page) => tracing::info!(
            resource = ?resource,
            total = page.pagination.total_count,
            "list refreshed after mutation"
        ),
        Err(err) => tracing::warn!(
            resource = ?resource,
            error = %err,
            "mutation saved but list refresh failed"
        ),
    }
}

async fn create_validated<B, R>(app: &App, resource: Resource, payload: Value) -> anyhow::Result<()>
where
    B: DeserializeOwned + Serialize + Validate + HasCustomer,
    R: DeserializeOwned + Serialize,
{
    let body: B = serde_json::from_value(payload)
        .with_context(|| format!("payload does not match the {} form", B::ENTITY))?;
    let created: R = app.client.create(resource, &body).await?;
    println!("{}", serde_json::to_string_pretty(&created)?);
    refetch(app, resource, body.customer()).await;
    Ok(())
}

/// Load the stored record, overlay the patch, and validate the merged form.
async fn update_validated<B, R>(
    app: &App,
    resource: Resource,
    id: &RecordId,
    patch: Value,
) -> anyhow::Result<()>
where
    B: DeserializeOwned + Serialize + Validate + HasCustomer,
    R: DeserializeOwned + Serialize,
{
    let mut record: Value = app
        .client
        .get(resource, id)
        .await
        .with_context(|| format!("failed to load {} {id}", B::ENTITY))?;
    merge_patch(&mut record, patch);
    let body: B = serde_json::from_value(record)
        .with_context(|| format!("edited {} {id} does not match the {} form", B::ENTITY, B::ENTITY))?;
    let updated: R = app.client.update(resource, id, &body).await?;
    println!("{}", serde_json::to_string_pretty(&updated)?);
    refetch(app, resource, body.customer()).await;
    Ok(())
}

/// Shallow merge: top-level patch fields replace the stored ones.
fn merge_patch(record: &mut Value, patch: Value) {
    if let (Value::Object(target), Value::Object(fields)) = (record, patch) {
        target.extend(fields);
    }
}

trait HasCustomer {
    fn customer(&self) -> Option<&RecordId>;
}

macro_rules! has_customer {
    ($($ty:ty),*) => {
        $(impl HasCustomer for $ty {
            fn customer(&self) -> Option<&RecordId> {
                Some(&self.customer_id)
            }
        })*
    };
}

has_customer!(
    NewActivity,
    NewOpportunity,
    NewContact,
    NewAddress,
    NewClaim,
    ClaimEdit,
    NewPolicy
);

impl HasCustomer for NewProduct {
    fn customer(&self) -> Option<&RecordId> {
        None
    }
}

impl HasCustomer for NewCustomer {
    fn customer(&self) -> Option<&RecordId> {
        None
    }
}

pub async fn create(app: &App, resource: Resource, payload: &str) -> anyhow::Result<()> {
    let payload: Value = serde_json::from_str(payload).context("payload is not valid JSON")?;
    match resource {
        Resource::Activities => {
            create_validated::<NewActivity, Activity>(app, resource, payload).await
        }
        Resource::Opportunities => {
            create_validated::<NewOpportunity, Opportunity>(app, resource, payload).await
        }
        Resource::Contacts => create_validated::<NewContact, Contact>(app, resource, payload).await,
        Resource::Addresses => create_validated::<NewAddress, Address>(app, resource, payload).await,
        Resource::Claims => create_validated::<NewClaim, Claim>(app, resource, payload).await,
        Resource::Policies => create_validated::<NewPolicy, Policy>(app, resource, payload).await,
        Resource::Products => create_validated::<NewProduct, Product>(app, resource, payload).await,
        Resource::Customers => {
            create_validated::<NewCustomer, Customer>(app, resource, payload).await
        }
        other => bail!("{other:?} cannot be created from the command line"),
    }
}

pub async fn update(app: &App, resource: Resource, id: &RecordId, payload: &str) -> anyhow::Result<()> {
    let patch: Value = serde_json::from_str(payload).context("payload is not valid JSON")?;
    let Some(fields) = patch.as_object() else {
        bail!("update payload must be a JSON object");
    };
    let changes_status = fields.contains_key("status");
    match resource {
        Resource::Claims if changes_status => {
            bail!("claim status changes go through claim-status")
        }
        Resource::Claims => update_validated::<ClaimEdit, Claim>(app, resource, id, patch).await,
        Resource::Activities => {
            update_validated::<NewActivity, Activity>(app, resource, id, patch).await
        }
        Resource::Opportunities => {
            update_validated::<NewOpportunity, Opportunity>(app, resource, id, patch).await
        }
        Resource::Contacts => update_validated::<NewContact, Contact>(app, resource, id, patch).await,
        Resource::Addresses => update_validated::<NewAddress, Address>(app, resource, id, patch).await,
        Resource::Policies => update_validated::<NewPolicy, Policy>(app, resource, id, patch).await,
        Resource::Products => update_validated::<NewProduct, Product>(app, resource, id, patch).await,
        Resource::Customers => {
            update_validated::<NewCustomer, Customer>(app, resource, id, patch).await
        }
        other => bail!("{other:?} cannot be edited from the command line"),
    }
}

pub async fn delete(app: &App, resource: Resource, id: &RecordId) -> anyhow::Result<()> {
    app.client.delete(resource, id).await?;
    println!("Deleted {resource:?} {id}.");
    refetch(app, resource, None).await;
    Ok(())
}

pub async fn claim_status(app: &App, claim_id: &RecordId, to: ClaimStatus) -> anyhow::Result<()> {
    let claim: Claim = app.client.get(Resource::Claims, claim_id).await?;
    let change = ClaimStatusChange {
        from: claim.status,
        status: to,
    };
    let updated: Claim = app
        .client
        .update(Resource::Claims, claim_id, &change)
        .await
        .with_context(|| format!("claim {claim_id} was not changed"))?;
    println!("Claim {} is now {:?}.", updated.id, updated.status);
    refetch(app, Resource::Claims, claim.customer_id.as_ref()).await;
    Ok(())
}

#[derive(Debug, serde::Deserialize)]
struct ActivityRow {
    customer_id: String,
    #[serde(rename = "type")]
    kind: String,
    date: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    source_key: Option<String>,
}

/// RFC 3339 keeps its offset; bare dates are midnight UTC.
fn parse_activity_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw.trim()).ok().or_else(|| {
        parse_flexible_date(raw).map(|date| date.and_time(NaiveTime::MIN).and_utc().fixed_offset())
    })
}

/// Stable key for rows without a `source_key`, so a re-run hits the same records.
fn import_key(
    customer: &str,
    kind: ActivityType,
    date: &DateTime<FixedOffset>,
    description: &str,
) -> String {
    let name = format!("{customer}|{kind:?}|{}|{description}", date.to_rfc3339());
    format!("import-{}", Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
}

/// Parse and validate every row before anything is sent. Rows keep their CSV line number.
pub fn read_activity_csv(path: &Path) -> anyhow::Result<Vec<(usize, NewActivity)>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut activities = Vec::new();

    for (index, result) in reader.deserialize::<ActivityRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("line {line}: malformed row"))?;
        let kind = row
            .kind
            .parse::<ActivityType>()
            .map_err(|e| anyhow::anyhow!("line {line}: {e}"))?;
        let date = parse_activity_date(&row.date)
            .with_context(|| format!("line {line}: unparseable date '{}'", row.date))?;
        let customer = row.customer_id.trim();
        let description = row.description.filter(|d| !d.trim().is_empty());
        let external_key = match row.source_key.filter(|k| !k.trim().is_empty()) {
            Some(key) => key,
            None => import_key(customer, kind, &date, description.as_deref().unwrap_or_default()),
        };
        let activity = NewActivity {
            customer_id: RecordId(customer.to_string()),
            kind,
            date,
            description,
            external_key: Some(external_key),
        };
        activity
            .validate()
            .with_context(|| format!("line {line}: rejected"))?;
        activities.push((line, activity));
    }

    Ok(activities)
}

/// Post rows in file order. Rows the backend already holds (409) are skipped;
/// any other failure stops the import and reports how far it got.
pub async fn import_activities(app: &App, path: &Path) -> anyhow::Result<usize> {
    let rows = read_activity_csv(path)?;
    let mut inserted = 0usize;
    for (line, activity) in &rows {
        match app.client.create::<Value, _>(Resource::Activities, activity).await {
            Ok(_) => inserted += 1,
            Err(ApiError::Status { status: 409, .. }) => {
                tracing::info!(
                    line = *line,
                    key = ?activity.external_key,
                    "activity already imported; skipped"
                );
            }
            Err(err) => {
                return Err(anyhow::Error::new(err).context(format!(
                    "line {line}: import stopped after {inserted} activities were created"
                )));
            }
        }
    }
    if inserted > 0 {
        refetch(app, Resource::Activities, None).await;
    }
    Ok(inserted)
}

pub async fn upload_document(
    app: &App,
    customer: RecordId,
    policy: Option<RecordId>,
    kind: String,
    file: &Path,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let doc = NewDocument {
        customer_id: customer,
        policy_id: policy,
        kind,
        file_name,
        bytes,
    };
    let stored = app.client.upload_document(&doc).await?;
    println!(
        "Uploaded {} as document {}.",
        stored.file_name.as_deref().unwrap_or(&doc.file_name),
        stored.id
    );
    refetch(app, Resource::Documents, Some(&doc.customer_id)).await;
    Ok(())
}

pub async fn cep(app: &App, code: &str) -> anyhow::Result<()> {
    let address = app.client.lookup_cep(code).await?;
    println!("{}", serde_json::to_string_pretty(&address)?);
    Ok(())
}

pub async fn whatsapp_send(app: &App, phone: String, message: String) -> anyhow::Result<()> {
    let response = app
        .client
        .send_whatsapp(&WhatsappMessage { phone, message })
        .await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

pub async fn whatsapp_config(app: &App, set: Option<&str>) -> anyhow::Result<()> {
    let config = match set {
        Some(raw) => {
            let value: Value = serde_json::from_str(raw).context("config is not valid JSON")?;
            app.client.update_whatsapp_config(&value).await?
        }
        None => app.client.whatsapp_config().await?,
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[derive(Debug)]
pub struct DashboardSummary {
    pub customer_count: u64,
    pub open_pipeline: Decimal,
    pub won_value: Decimal,
    pub renewals_due: usize,
    pub renewals_urgent: usize,
}

/// Whole-dashboard reload, retried as a unit on transient failures.
pub async fn dashboard(app: &App, today: NaiveDate) -> anyhow::Result<()> {
    let page_size = app.config.api.page_size;
    let (customers, opportunities, policies) = with_retry(&app.config.retry, "dashboard", || async move {
        let first_page = ListQuery::new(1);
        tokio::try_join!(
            app.client.list::<Value>(Resource::Customers, &first_page),
            app.client
                .list_all::<Opportunity>(Resource::Opportunities, ListQuery::new(page_size)),
            app.client
                .list_all::<Policy>(Resource::Policies, ListQuery::new(page_size)),
        )
    })
    .await
    .context("dashboard reload failed")?;

    let pipeline = summarize_pipeline(&opportunities);
    let due = due_renewals(&policies, today, &app.config.renewal);
    let summary = DashboardSummary {
        customer_count: customers.pagination.total_count,
        open_pipeline: pipeline.open_value,
        won_value: pipeline.won_value,
        renewals_due: due.len(),
        renewals_urgent: due.iter().filter(|(_, s)| s.urgent).count(),
    };

    println!("Customers        {}", summary.customer_count);
    println!("Open pipeline    {}", format_brl(summary.open_pipeline));
    println!("Won              {}", format_brl(summary.won_value));
    println!(
        "Renewals due     {} ({} urgent)",
        summary.renewals_due, summary.renewals_urgent
    );
    tracing::info!(summary = ?summary, "dashboard loaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn csv_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_activity_rows_in_both_date_forms() {
        let file = csv_file(
            "customer_id,type,date,description,source_key\n\
             12,call,2026-10-01T13:00:00-03:00,Retorno sobre cotação,crm-1\n\
             12,WhatsApp,05/10/2026,,\n",
        );
        let rows = read_activity_csv(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        let (line, first) = &rows[0];
        assert_eq!(*line, 2);
        assert_eq!(first.kind, ActivityType::Call);
        assert_eq!(first.external_key.as_deref(), Some("crm-1"));
        assert_eq!(first.date.to_rfc3339(), "2026-10-01T13:00:00-03:00");
        let (line, second) = &rows[1];
        assert_eq!(*line, 3);
        assert_eq!(second.kind, ActivityType::Whatsapp);
        assert_eq!(second.date.to_rfc3339(), "2026-10-05T00:00:00+00:00");
        assert!(second.description.is_none());
        assert!(second
            .external_key
            .as_deref()
            .is_some_and(|k| k.starts_with("import-")));
    }

    #[test]
    fn generated_keys_are_stable_across_runs() {
        let contents = "customer_id,type,date,description,source_key\n\
                        12,call,2026-10-01,Retorno,\n\
                        12,call,2026-10-02,Retorno,\n";
        let first = read_activity_csv(csv_file(contents).path()).unwrap();
        let again = read_activity_csv(csv_file(contents).path()).unwrap();
        assert_eq!(first[0].1.external_key, again[0].1.external_key);
        assert_ne!(first[0].1.external_key, first[1].1.external_key);
    }

    #[test]
    fn rejects_rows_that_fail_validation() {
        let file = csv_file(
            "customer_id,type,date,description,source_key\n\
             12,note,2026-10-01,,\n",
        );
        let err = read_activity_csv(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn rejects_unknown_types_and_dates() {
        let file = csv_file("customer_id,type,date,description,source_key\n12,fax,2026-10-01,,\n");
        assert!(read_activity_csv(file.path()).is_err());
        let file = csv_file("customer_id,type,date,description,source_key\n12,call,ontem,,\n");
        assert!(read_activity_csv(file.path()).is_err());
    }

    async fn app(router: Router) -> App {
        App {
            client: crate::api::serve(router).await,
            config: Config::default(),
        }
    }

    fn stored_contact() -> Value {
        json!({"data": {"id": 5, "customerId": 7, "name": "Maria Souza",
                        "email": "maria@corretora.com.br", "phone": null, "role": "Financeiro"}})
    }

    #[tokio::test]
    async fn create_succeeds_when_list_refresh_fails() {
        let router = Router::new().route(
            "/api/contacts",
            post(|Json(body): Json<Value>| async move {
                let mut created = body;
                created["id"] = json!(55);
                (StatusCode::CREATED, Json(json!({ "data": created })))
            })
            .get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        );
        let app = app(router).await;
        create(
            &app,
            Resource::Contacts,
            r#"{"customerId": "7", "name": "Bruno Lima"}"#,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn update_merges_patch_over_stored_record() {
        let sent = Arc::new(Mutex::new(None::<Value>));
        let router = Router::new()
            .route(
                "/api/contacts/{id}",
                get(|| async { Json(stored_contact()) }).put(
                    |State(sent): State<Arc<Mutex<Option<Value>>>>, Json(body): Json<Value>| async move {
                        let mut echoed = body.clone();
                        echoed["id"] = json!(5);
                        *sent.lock().unwrap() = Some(body);
                        Json(json!({ "data": echoed }))
                    },
                ),
            )
            .with_state(sent.clone());
        let app = app(router).await;
        update(
            &app,
            Resource::Contacts,
            &RecordId::from("5"),
            r#"{"phone": "(11) 98765-4321"}"#,
        )
        .await
        .unwrap();

        let body = sent.lock().unwrap().take().unwrap();
        assert_eq!(body["name"], "Maria Souza");
        assert_eq!(body["role"], "Financeiro");
        assert_eq!(body["customerId"], "7");
        assert_eq!(body["phone"], "(11) 98765-4321");
        assert!(body.get("id").is_none());
    }

    #[tokio::test]
    async fn invalid_edits_are_never_sent() {
        let puts = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/api/contacts/{id}",
                get(|| async { Json(stored_contact()) }).put(
                    |State(puts): State<Arc<AtomicUsize>>| async move {
                        puts.fetch_add(1, Ordering::SeqCst);
                        Json(json!({}))
                    },
                ),
            )
            .with_state(puts.clone());
        let app = app(router).await;
        let err = update(
            &app,
            Resource::Contacts,
            &RecordId::from("5"),
            r#"{"email": "maria@", "name": " "}"#,
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("invalid contact"));
        assert_eq!(puts.load(Ordering::SeqCst), 0);

        let err = update(&app, Resource::Contacts, &RecordId::from("5"), "[1, 2]")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[tokio::test]
    async fn claim_status_moves_only_along_the_lifecycle() {
        let puts = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/api/claims/{id}",
                get(|| async {
                    Json(json!({"data": {"id": 31, "customerId": 1, "policyId": 9,
                                         "status": "reported", "description": "Colisão"}}))
                })
                .put(
                    |State(puts): State<Arc<AtomicUsize>>, Json(body): Json<Value>| async move {
                        puts.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(body, json!({"status": "under_review"}));
                        Json(json!({"data": {"id": 31, "status": "under_review"}}))
                    },
                ),
            )
            .with_state(puts.clone());
        let app = app(router).await;
        let claim = RecordId::from("31");

        let err = claim_status(&app, &claim, ClaimStatus::Settled)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("cannot move from Reported to Settled"));
        assert_eq!(puts.load(Ordering::SeqCst), 0);

        claim_status(&app, &claim, ClaimStatus::UnderReview)
            .await
            .unwrap();
        assert_eq!(puts.load(Ordering::SeqCst), 1);

        let err = update(&app, Resource::Claims, &claim, r#"{"status": "settled"}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("claim-status"));
        assert_eq!(puts.load(Ordering::SeqCst), 1);
    }

    fn single_page(data: Value, total: u64) -> Json<Value> {
        Json(json!({"data": data, "pagination": {"currentPage": 1, "totalPages": 1,
                    "totalCount": total, "limit": 20, "hasNext": false, "hasPrev": false}}))
    }

    #[tokio::test]
    async fn dashboard_loads_every_list() {
        let router = Router::new()
            .route(
                "/api/customers",
                get(|| async { single_page(json!([{"id": 1, "name": "Silva"}]), 42) }),
            )
            .route(
                "/api/opportunities",
                get(|| async {
                    single_page(json!([{"id": 1, "stage": "Nova", "value": "1.500,00"}]), 1)
                }),
            )
            .route("/api/policies", get(|| async { single_page(json!([]), 0) }));
        let app = app(router).await;
        let today = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        dashboard(&app, today).await.unwrap();
    }

    const THREE_ROWS: &str = "customer_id,type,date,description,source_key\n\
                              12,call,2026-10-01,Retorno,crm-1\n\
                              12,email,2026-10-02,Proposta,crm-2\n\
                              12,meeting,2026-10-03,Visita,crm-3\n";

    #[tokio::test]
    async fn import_reports_line_and_progress_on_failure() {
        let posts = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/api/activities",
                post(|State(posts): State<Arc<AtomicUsize>>| async move {
                    if posts.fetch_add(1, Ordering::SeqCst) == 1 {
                        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "db offline"})))
                    } else {
                        (StatusCode::CREATED, Json(json!({"data": {"id": 1}})))
                    }
                }),
            )
            .with_state(posts.clone());
        let app = app(router).await;
        let file = csv_file(THREE_ROWS);

        let err = import_activities(&app, file.path()).await.unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("line 3"), "{message}");
        assert!(message.contains("after 1 activities"), "{message}");
        assert!(message.contains("db offline"), "{message}");
        assert_eq!(posts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn import_skips_rows_already_present() {
        let router = Router::new().route(
            "/api/activities",
            post(|Json(body): Json<Value>| async move {
                if body["externalKey"] == "crm-2" {
                    (StatusCode::CONFLICT, Json(json!({"error": "duplicate externalKey"})))
                } else {
                    (StatusCode::CREATED, Json(json!({"data": {"id": 1}})))
                }
            })
            .get(|| async {
                Json(json!({"data": [], "pagination": {"currentPage": 1, "totalPages": 1,
                            "totalCount": 2, "limit": 20, "hasNext": false, "hasPrev": false}}))
            }),
        );
        let app = app(router).await;
        let file = csv_file(THREE_ROWS);
        assert_eq!(import_activities(&app, file.path()).await.unwrap(), 2);
    }
}
