//! Axum + Askama dashboard over the opportunity store: filter form,
//! results table, JSON APIs, and the feedback patch endpoint.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use askama::Template;
use axum::{
    extract::{Form, Path as AxumPath, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use govscout_core::{Feedback, Opportunity};
use govscout_store::{
    sort_opportunities, Clause, Combine, DocumentStore, FieldOp, FilterMode, FilterRequest,
    MemoryStore, PgStore, SortSpec, StoreError,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::warn;

pub const CRATE_NAME: &str = "govscout-web";

const FILTER_OPTIONS_TTL: Duration = Duration::from_secs(300);

pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub options: FilterOptionsCache,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            options: FilterOptionsCache::new(FILTER_OPTIONS_TTL),
        }
    }
}

/// Distinct values currently present in the store, offered by the filter
/// form so users pick from real data instead of guessing labels.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FilterOptions {
    pub sources: Vec<String>,
    pub naics: Vec<String>,
    pub psc: Vec<String>,
    pub statuses: Vec<String>,
    pub procurement: Vec<String>,
}

/// Single-slot expiring cache for the filter options. Computing them scans
/// the whole store, so the result is held with its computation time and
/// recomputed only once the TTL has passed.
pub struct FilterOptionsCache {
    ttl: Duration,
    slot: RwLock<Option<(FilterOptions, Instant)>>,
}

impl FilterOptionsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    pub async fn get_or_compute(
        &self,
        store: &dyn DocumentStore,
    ) -> Result<FilterOptions, StoreError> {
        if let Some((options, computed_at)) = self.slot.read().await.as_ref() {
            if computed_at.elapsed() < self.ttl {
                return Ok(options.clone());
            }
        }
        let options = compute_filter_options(store).await?;
        *self.slot.write().await = Some((options.clone(), Instant::now()));
        Ok(options)
    }
}

async fn compute_filter_options(store: &dyn DocumentStore) -> Result<FilterOptions, StoreError> {
    let docs = store.query(&Clause::AllOf(vec![])).await?;

    let mut sources = BTreeSet::new();
    let mut naics = BTreeSet::new();
    let mut psc = BTreeSet::new();
    let mut statuses = BTreeSet::new();
    let mut procurement = BTreeSet::new();
    for doc in &docs {
        if let Some(v) = &doc.source {
            sources.insert(v.clone());
        }
        for code in &doc.all_naics_codes {
            naics.insert(code.id.clone());
        }
        if let Some(v) = &doc.psc_code {
            psc.insert(v.clone());
        }
        if let Some(v) = &doc.status {
            statuses.insert(v.clone());
        }
        if let Some(v) = &doc.procurement {
            procurement.insert(v.clone());
        }
    }

    Ok(FilterOptions {
        sources: sources.into_iter().collect(),
        naics: naics.into_iter().collect(),
        psc: psc.into_iter().collect(),
        statuses: statuses.into_iter().collect(),
        procurement: procurement.into_iter().collect(),
    })
}

/// Raw dashboard query string. Category selections arrive comma-separated;
/// an absent or blank parameter imposes no constraint.
#[derive(Debug, Deserialize, Default)]
struct ListQuery {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    sources: Option<String>,
    naics: Option<String>,
    psc: Option<String>,
    statuses: Option<String>,
    procurement: Option<String>,
    mode: Option<String>,
    sort: Option<String>,
    dir: Option<String>,
}

impl ListQuery {
    /// Missing window bounds default to the last 24 hours.
    fn to_request(&self, now: DateTime<Utc>) -> FilterRequest {
        let to = self.to.unwrap_or(now);
        let from = self.from.unwrap_or(to - chrono::Duration::hours(24));
        let mut request = FilterRequest::window(from, to);
        request.sources = split_csv(self.sources.as_deref());
        request.naics = split_csv(self.naics.as_deref());
        request.psc = split_csv(self.psc.as_deref());
        request.statuses = split_csv(self.statuses.as_deref());
        request.procurement = split_csv(self.procurement.as_deref());
        request.mode = match self.mode.as_deref() {
            Some("and") => FilterMode::Uniform(Combine::All),
            Some("or") => FilterMode::Uniform(Combine::Any),
            _ => FilterMode::Relevance,
        };
        request
    }

    fn sort_spec(&self) -> SortSpec {
        SortSpec::parse(self.sort.as_deref(), self.dir.as_deref())
    }
}

fn split_csv(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Deserialize)]
struct FeedbackForm {
    relevant: Option<String>,
    pursued: Option<String>,
}

impl FeedbackForm {
    fn ops(&self) -> Result<Vec<FieldOp>, String> {
        let mut ops = Vec::new();
        if let Some(raw) = &self.relevant {
            ops.push(FieldOp::Relevant(parse_feedback(raw)?));
        }
        if let Some(raw) = &self.pursued {
            ops.push(FieldOp::Pursued(parse_feedback(raw)?));
        }
        if ops.is_empty() {
            return Err("no feedback field supplied".to_string());
        }
        Ok(ops)
    }
}

fn parse_feedback(raw: &str) -> Result<Feedback, String> {
    match raw {
        "Yes" => Ok(Feedback::Yes),
        "No" => Ok(Feedback::No),
        other => Err(format!("feedback value must be Yes or No, got {other:?}")),
    }
}

#[derive(Debug, Clone)]
struct RowView {
    id: String,
    title: String,
    source: String,
    status: String,
    procurement: String,
    contract_value: String,
    psc_code: String,
    ingested_at: String,
    relevant: String,
    pursued: String,
}

impl RowView {
    fn from_doc(doc: &Opportunity) -> Self {
        Self {
            id: doc.id.clone(),
            title: doc.title.clone().unwrap_or_else(|| doc.id.clone()),
            source: doc.source.clone().unwrap_or_default(),
            status: doc.status.clone().unwrap_or_default(),
            procurement: doc.procurement.clone().unwrap_or_default(),
            contract_value: doc
                .contract_value
                .map(|v| format!("${v:.0}"))
                .unwrap_or_else(|| "—".to_string()),
            psc_code: doc.psc_code.clone().unwrap_or_else(|| "—".to_string()),
            ingested_at: doc
                .ingested_at
                .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default(),
            relevant: feedback_label(doc.relevant),
            pursued: feedback_label(doc.pursued),
        }
    }
}

fn feedback_label(value: Option<Feedback>) -> String {
    match value {
        Some(Feedback::Yes) => "Yes".to_string(),
        Some(Feedback::No) => "No".to_string(),
        None => "—".to_string(),
    }
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    from: String,
    to: String,
    options: FilterOptions,
}

#[derive(Template)]
#[template(path = "opportunity_rows_partial.html")]
struct OpportunityRowsTemplate {
    total: usize,
    rows: Vec<RowView>,
}

#[derive(Template)]
#[template(path = "feedback_saved_partial.html")]
struct FeedbackSavedTemplate {
    value: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/opportunities", get(opportunities_handler))
        .route("/opportunities/{id}/feedback", post(feedback_handler))
        .route("/api/opportunities", get(api_opportunities_handler))
        .route("/api/filters", get(api_filters_handler))
        .with_state(Arc::new(state))
}

/// Bind and serve, picking Postgres when `DATABASE_URL` is set and falling
/// back to the in-memory store for database-less local runs.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("GOVSCOUT_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);

    let store: Arc<dyn DocumentStore> = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let store = PgStore::connect(&database_url).await?;
            store.ensure_schema().await?;
            Arc::new(store)
        }
        Err(_) => {
            warn!("DATABASE_URL not set; serving from an empty in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(AppState::new(store))).await?;
    Ok(())
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let options = match state.options.get_or_compute(state.store.as_ref()).await {
        Ok(options) => options,
        Err(err) => return server_error(err.into()),
    };
    let now = Utc::now();
    render_html(IndexTemplate {
        from: (now - chrono::Duration::hours(24)).to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        to: now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        options,
    })
}

async fn opportunities_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    match run_list_query(state.store.as_ref(), &query).await {
        Ok(rows) => render_html(OpportunityRowsTemplate {
            total: rows.len(),
            rows: rows.iter().map(RowView::from_doc).collect(),
        }),
        Err(err) => server_error(err.into()),
    }
}

async fn api_opportunities_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    match run_list_query(state.store.as_ref(), &query).await {
        Ok(rows) => Json(serde_json::json!({
            "count": rows.len(),
            "opportunities": rows,
        }))
        .into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn api_filters_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.options.get_or_compute(state.store.as_ref()).await {
        Ok(options) => Json(options).into_response(),
        Err(err) => server_error(err.into()),
    }
}

/// Read-then-conditional-patch with the revision token. A stale token means
/// another writer got there first; the user is told to refresh, never
/// retried silently.
async fn feedback_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    Form(form): Form<FeedbackForm>,
) -> Response {
    let ops = match form.ops() {
        Ok(ops) => ops,
        Err(message) => {
            return (StatusCode::UNPROCESSABLE_ENTITY, Html(message)).into_response()
        }
    };

    let revision = match state.store.read_by_id(&id).await {
        Ok((_, revision)) => revision,
        Err(err) => return feedback_error(err),
    };

    match state.store.patch_fields(&id, &revision, &ops).await {
        Ok(()) => {
            let value = ops
                .iter()
                .map(|op| match op {
                    FieldOp::Relevant(v) | FieldOp::Pursued(v) => feedback_label(Some(*v)),
                })
                .collect::<Vec<_>>()
                .join(", ");
            render_html(FeedbackSavedTemplate { value })
        }
        Err(err) => feedback_error(err),
    }
}

fn feedback_error(err: StoreError) -> Response {
    match err {
        StoreError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            Html("This record no longer exists; refresh the data.".to_string()),
        )
            .into_response(),
        StoreError::Conflict { .. } => (
            StatusCode::CONFLICT,
            Html("Someone else updated this record first; refresh and try again.".to_string()),
        )
            .into_response(),
        other => server_error(other.into()),
    }
}

async fn run_list_query(
    store: &dyn DocumentStore,
    query: &ListQuery,
) -> Result<Vec<Opportunity>, StoreError> {
    let request = query.to_request(Utc::now());
    let mut rows = store.query(&request.to_clause()).await?;
    sort_opportunities(&mut rows, query.sort_spec());
    Ok(rows)
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}
