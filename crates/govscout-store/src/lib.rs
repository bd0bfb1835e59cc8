//! Document store abstraction for opportunities: upsert/read/patch/query
//! over a revisioned document table, plus the filter-query builder that
//! turns dashboard filter requests into store-agnostic clause trees.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use govscout_core::{Feedback, Opportunity};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

pub const CRATE_NAME: &str = "govscout-store";

/// Opaque optimistic-concurrency token, analogous to an ETag.
pub type RevisionToken = String;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("opportunity {0} not found")]
    NotFound(String),
    #[error("opportunity {id} was updated by another writer")]
    Conflict { id: String },
    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(anyhow::Error::new(err))
    }
}

/// Field-level set operations accepted by the feedback patch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Relevant(Feedback),
    Pursued(Feedback),
}

impl FieldOp {
    pub fn apply(&self, doc: &mut Opportunity) {
        match *self {
            FieldOp::Relevant(value) => doc.relevant = Some(value),
            FieldOp::Pursued(value) => doc.pursued = Some(value),
        }
    }

    fn json_entry(&self) -> (&'static str, serde_json::Value) {
        match *self {
            FieldOp::Relevant(value) => ("relevant", feedback_json(value)),
            FieldOp::Pursued(value) => ("pursued", feedback_json(value)),
        }
    }
}

fn feedback_json(value: Feedback) -> serde_json::Value {
    match value {
        Feedback::Yes => serde_json::Value::String("Yes".to_string()),
        Feedback::No => serde_json::Value::String("No".to_string()),
    }
}

/// Store-agnostic filter expression. Each backend interprets the tree:
/// the memory store evaluates it directly, the Postgres store compiles it
/// to SQL over the JSONB document column.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// Inclusive window over the discovery timestamp (`ingestedAt`).
    IngestedBetween(DateTime<Utc>, DateTime<Utc>),
    SourceIn(Vec<String>),
    StatusIn(Vec<String>),
    ProcurementIn(Vec<String>),
    /// Matches when any entry of `allNAICSCodes` carries a selected id.
    NaicsAny(Vec<String>),
    PscIn(Vec<String>),
    /// Empty conjunction is vacuously true.
    AllOf(Vec<Clause>),
    /// Empty disjunction is vacuously false.
    AnyOf(Vec<Clause>),
}

impl Clause {
    pub fn matches(&self, doc: &Opportunity) -> bool {
        match self {
            Clause::IngestedBetween(from, to) => doc
                .ingested_at
                .map(|at| at >= *from && at <= *to)
                .unwrap_or(false),
            Clause::SourceIn(values) => field_in(doc.source.as_deref(), values),
            Clause::StatusIn(values) => field_in(doc.status.as_deref(), values),
            Clause::ProcurementIn(values) => field_in(doc.procurement.as_deref(), values),
            Clause::NaicsAny(ids) => doc
                .all_naics_codes
                .iter()
                .any(|n| ids.iter().any(|id| *id == n.id)),
            Clause::PscIn(values) => field_in(doc.psc_code.as_deref(), values),
            Clause::AllOf(clauses) => clauses.iter().all(|c| c.matches(doc)),
            Clause::AnyOf(clauses) => clauses.iter().any(|c| c.matches(doc)),
        }
    }
}

fn field_in(field: Option<&str>, values: &[String]) -> bool {
    field
        .map(|f| values.iter().any(|v| v == f))
        .unwrap_or(false)
}

/// How category clauses combine in a filter request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    /// NAICS and PSC cast a wide net (OR within and across each other);
    /// source, status, and procurement narrow precisely (AND).
    #[default]
    Relevance,
    /// One global AND/OR toggle across every category clause.
    Uniform(Combine),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combine {
    All,
    Any,
}

/// A dashboard filter request: date window plus category selections.
/// An empty selection set imposes no constraint for that category.
#[derive(Debug, Clone)]
pub struct FilterRequest {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub sources: Vec<String>,
    pub naics: Vec<String>,
    pub psc: Vec<String>,
    pub statuses: Vec<String>,
    pub procurement: Vec<String>,
    pub mode: FilterMode,
}

impl FilterRequest {
    pub fn window(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            sources: Vec::new(),
            naics: Vec::new(),
            psc: Vec::new(),
            statuses: Vec::new(),
            procurement: Vec::new(),
            mode: FilterMode::default(),
        }
    }

    pub fn to_clause(&self) -> Clause {
        let mut clauses = vec![Clause::IngestedBetween(self.from, self.to)];

        match self.mode {
            FilterMode::Relevance => {
                let mut relevance = Vec::new();
                if !self.naics.is_empty() {
                    relevance.push(Clause::NaicsAny(self.naics.clone()));
                }
                if !self.psc.is_empty() {
                    relevance.push(Clause::PscIn(self.psc.clone()));
                }
                if !relevance.is_empty() {
                    clauses.push(Clause::AnyOf(relevance));
                }
                clauses.extend(self.operational_clauses());
            }
            FilterMode::Uniform(combine) => {
                let mut categories = Vec::new();
                if !self.naics.is_empty() {
                    categories.push(Clause::NaicsAny(self.naics.clone()));
                }
                if !self.psc.is_empty() {
                    categories.push(Clause::PscIn(self.psc.clone()));
                }
                categories.extend(self.operational_clauses());
                if !categories.is_empty() {
                    clauses.push(match combine {
                        Combine::All => Clause::AllOf(categories),
                        Combine::Any => Clause::AnyOf(categories),
                    });
                }
            }
        }

        Clause::AllOf(clauses)
    }

    fn operational_clauses(&self) -> Vec<Clause> {
        let mut out = Vec::new();
        if !self.sources.is_empty() {
            out.push(Clause::SourceIn(self.sources.clone()));
        }
        if !self.statuses.is_empty() {
            out.push(Clause::StatusIn(self.statuses.clone()));
        }
        if !self.procurement.is_empty() {
            out.push(Clause::ProcurementIn(self.procurement.clone()));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortField {
    IngestedAt,
    ContractValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub field: SortField,
    pub dir: SortDir,
}

impl SortSpec {
    /// Unknown sort columns fall back to descending discovery timestamp.
    pub fn parse(field: Option<&str>, dir: Option<&str>) -> Self {
        let field = match field {
            Some("ingestedAt") => SortField::IngestedAt,
            Some("contractValue") => SortField::ContractValue,
            _ => {
                return Self {
                    field: SortField::IngestedAt,
                    dir: SortDir::Desc,
                }
            }
        };
        let dir = match dir {
            Some("asc") => SortDir::Asc,
            _ => SortDir::Desc,
        };
        Self { field, dir }
    }
}

/// Caller-side ordering: the store gives no ordering guarantee. Equal keys
/// keep their relative order in both directions.
pub fn sort_opportunities(rows: &mut [Opportunity], spec: SortSpec) {
    let cmp = |a: &Opportunity, b: &Opportunity| match spec.field {
        SortField::IngestedAt => a.ingested_at.cmp(&b.ingested_at),
        SortField::ContractValue => a
            .contract_value
            .unwrap_or(f64::NEG_INFINITY)
            .total_cmp(&b.contract_value.unwrap_or(f64::NEG_INFINITY)),
    };
    match spec.dir {
        SortDir::Asc => rows.sort_by(cmp),
        SortDir::Desc => rows.sort_by(|a, b| cmp(b, a)),
    }
}

/// Capability set every opportunity store must provide.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Replace-or-insert by `id`; a later ingest of the same id fully
    /// overwrites the stored document.
    async fn upsert(&self, doc: &Opportunity) -> Result<(), StoreError>;

    async fn read_by_id(&self, id: &str) -> Result<(Opportunity, RevisionToken), StoreError>;

    /// Apply field-level set operations, guarded by the revision token.
    /// A stale token fails with `StoreError::Conflict`; the caller surfaces
    /// that as a refresh-and-retry condition and never retries silently.
    async fn patch_fields(
        &self,
        id: &str,
        revision: &str,
        ops: &[FieldOp],
    ) -> Result<(), StoreError>;

    /// Read-only filtered scan. No ordering guarantee; the caller sorts.
    async fn query(&self, clause: &Clause) -> Result<Vec<Opportunity>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

struct StoredDoc {
    doc: Opportunity,
    revision: u64,
}

/// Map-backed store used by tests and database-less local runs.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<String, StoredDoc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(&self, doc: &Opportunity) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        let next_revision = docs.get(&doc.id).map(|d| d.revision + 1).unwrap_or(1);
        docs.insert(
            doc.id.clone(),
            StoredDoc {
                doc: doc.clone(),
                revision: next_revision,
            },
        );
        Ok(())
    }

    async fn read_by_id(&self, id: &str) -> Result<(Opportunity, RevisionToken), StoreError> {
        let docs = self.docs.read().await;
        let stored = docs
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok((stored.doc.clone(), stored.revision.to_string()))
    }

    async fn patch_fields(
        &self,
        id: &str,
        revision: &str,
        ops: &[FieldOp],
    ) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        let stored = docs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if stored.revision.to_string() != revision {
            warn!(id, "patch rejected: stale revision");
            return Err(StoreError::Conflict { id: id.to_string() });
        }
        for op in ops {
            op.apply(&mut stored.doc);
        }
        stored.revision += 1;
        Ok(())
    }

    async fn query(&self, clause: &Clause) -> Result<Vec<Opportunity>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs
            .values()
            .filter(|stored| clause.matches(&stored.doc))
            .map(|stored| stored.doc.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Postgres backend
// ---------------------------------------------------------------------------

/// JSONB document table keyed by opportunity id, one revision column for
/// optimistic concurrency.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS opportunities (
                id       TEXT PRIMARY KEY,
                revision TEXT NOT NULL,
                doc      JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

enum SqlArg {
    Text(String),
    TextArray(Vec<String>),
}

/// Compile a clause tree into a SQL predicate over the `doc` column,
/// pushing bind arguments in placeholder order.
fn clause_sql(clause: &Clause, args: &mut Vec<SqlArg>) -> String {
    match clause {
        Clause::IngestedBetween(from, to) => {
            args.push(SqlArg::Text(from.to_rfc3339()));
            let from_idx = args.len();
            args.push(SqlArg::Text(to.to_rfc3339()));
            let to_idx = args.len();
            format!(
                "((doc->>'ingestedAt')::timestamptz >= ${from_idx}::timestamptz \
                 AND (doc->>'ingestedAt')::timestamptz <= ${to_idx}::timestamptz)"
            )
        }
        Clause::SourceIn(values) => scalar_in_sql("source", values, args),
        Clause::StatusIn(values) => scalar_in_sql("status", values, args),
        Clause::ProcurementIn(values) => scalar_in_sql("procurement", values, args),
        Clause::PscIn(values) => scalar_in_sql("pscCode", values, args),
        Clause::NaicsAny(ids) => {
            args.push(SqlArg::TextArray(ids.clone()));
            let idx = args.len();
            format!(
                "EXISTS (SELECT 1 FROM jsonb_array_elements(\
                 COALESCE(doc->'allNAICSCodes', '[]'::jsonb)) AS n \
                 WHERE n->>'id' = ANY(${idx}))"
            )
        }
        Clause::AllOf(clauses) => {
            if clauses.is_empty() {
                "TRUE".to_string()
            } else {
                let parts: Vec<_> = clauses.iter().map(|c| clause_sql(c, args)).collect();
                format!("({})", parts.join(" AND "))
            }
        }
        Clause::AnyOf(clauses) => {
            if clauses.is_empty() {
                "FALSE".to_string()
            } else {
                let parts: Vec<_> = clauses.iter().map(|c| clause_sql(c, args)).collect();
                format!("({})", parts.join(" OR "))
            }
        }
    }
}

fn scalar_in_sql(json_key: &str, values: &[String], args: &mut Vec<SqlArg>) -> String {
    args.push(SqlArg::TextArray(values.to_vec()));
    let idx = args.len();
    format!("doc->>'{json_key}' = ANY(${idx})")
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn upsert(&self, doc: &Opportunity) -> Result<(), StoreError> {
        let body = serde_json::to_value(doc).map_err(anyhow::Error::new)?;
        sqlx::query(
            r#"
            INSERT INTO opportunities (id, revision, doc)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
               SET revision = EXCLUDED.revision,
                   doc      = EXCLUDED.doc
            "#,
        )
        .bind(&doc.id)
        .bind(Uuid::new_v4().to_string())
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read_by_id(&self, id: &str) -> Result<(Opportunity, RevisionToken), StoreError> {
        let row = sqlx::query("SELECT revision, doc FROM opportunities WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let revision: String = row.try_get("revision")?;
        let body: serde_json::Value = row.try_get("doc")?;
        let doc: Opportunity = serde_json::from_value(body).map_err(anyhow::Error::new)?;
        Ok((doc, revision))
    }

    async fn patch_fields(
        &self,
        id: &str,
        revision: &str,
        ops: &[FieldOp],
    ) -> Result<(), StoreError> {
        let mut patch = serde_json::Map::new();
        for op in ops {
            let (key, value) = op.json_entry();
            patch.insert(key.to_string(), value);
        }

        let result = sqlx::query(
            r#"
            UPDATE opportunities
               SET doc = doc || $3::jsonb,
                   revision = $4
             WHERE id = $1
               AND revision = $2
            "#,
        )
        .bind(id)
        .bind(revision)
        .bind(serde_json::Value::Object(patch))
        .bind(Uuid::new_v4().to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM opportunities WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            if exists {
                warn!(id, "patch rejected: stale revision");
                return Err(StoreError::Conflict { id: id.to_string() });
            }
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn query(&self, clause: &Clause) -> Result<Vec<Opportunity>, StoreError> {
        let mut args = Vec::new();
        let predicate = clause_sql(clause, &mut args);
        let sql = format!("SELECT doc FROM opportunities WHERE {predicate}");

        let mut query = sqlx::query(&sql);
        for arg in args {
            query = match arg {
                SqlArg::Text(value) => query.bind(value),
                SqlArg::TextArray(values) => query.bind(values),
            };
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let body: serde_json::Value = row.try_get("doc")?;
            let doc: Opportunity = serde_json::from_value(body).map_err(anyhow::Error::new)?;
            out.push(doc);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use govscout_core::NaicsCode;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 20, hour, 0, 0).single().unwrap()
    }

    fn mk_doc(id: &str, source: &str, naics: &[&str], psc: Option<&str>) -> Opportunity {
        Opportunity {
            id: id.to_string(),
            source: Some(source.to_string()),
            all_naics_codes: naics.iter().map(|n| NaicsCode::new(*n)).collect(),
            psc_code: psc.map(str::to_string),
            ingested_at: Some(ts(12)),
            ..Default::default()
        }
    }

    fn window() -> FilterRequest {
        FilterRequest::window(ts(0), ts(23))
    }

    #[tokio::test]
    async fn upsert_replaces_by_id_without_duplication() {
        let store = MemoryStore::new();
        let mut doc = mk_doc("OPP-1", "SAM.gov", &["541611"], Some("R406"));
        store.upsert(&doc).await.unwrap();

        doc.contract_value = Some(42.0);
        store.upsert(&doc).await.unwrap();

        let all = store.query(&Clause::AllOf(vec![])).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].contract_value, Some(42.0));
    }

    #[tokio::test]
    async fn patch_requires_fresh_revision() {
        let store = MemoryStore::new();
        store
            .upsert(&mk_doc("OPP-1", "SAM.gov", &[], None))
            .await
            .unwrap();

        let (_, revision) = store.read_by_id("OPP-1").await.unwrap();
        store
            .patch_fields("OPP-1", &revision, &[FieldOp::Relevant(Feedback::Yes)])
            .await
            .unwrap();

        // The old token is now stale.
        let err = store
            .patch_fields("OPP-1", &revision, &[FieldOp::Pursued(Feedback::No)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let (doc, _) = store.read_by_id("OPP-1").await.unwrap();
        assert_eq!(doc.relevant, Some(Feedback::Yes));
        assert_eq!(doc.pursued, None);
    }

    #[tokio::test]
    async fn patch_missing_document_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .patch_fields("nope", "1", &[FieldOp::Relevant(Feedback::No)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn relevance_mode_is_or_within_naics_and_psc() {
        let store = MemoryStore::new();
        store
            .upsert(&mk_doc("by-naics", "SAM.gov", &["541611", "518210"], None))
            .await
            .unwrap();
        store
            .upsert(&mk_doc("by-psc", "GSA eBuy/Task Orders", &[], Some("R408")))
            .await
            .unwrap();
        store
            .upsert(&mk_doc("neither", "SAM.gov", &["999999"], Some("Z999")))
            .await
            .unwrap();

        let mut request = window();
        request.naics = vec!["541611".to_string()];
        request.psc = vec!["R408".to_string()];

        let mut rows = store.query(&request.to_clause()).await.unwrap();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(
            rows.iter().map(|o| o.id.as_str()).collect::<Vec<_>>(),
            vec!["by-naics", "by-psc"]
        );

        // Adding a source restricts the relevance set.
        request.sources = vec!["SAM.gov".to_string()];
        let rows = store.query(&request.to_clause()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "by-naics");
    }

    #[tokio::test]
    async fn empty_selections_impose_no_filter() {
        let store = MemoryStore::new();
        store
            .upsert(&mk_doc("a", "SAM.gov", &[], None))
            .await
            .unwrap();
        store
            .upsert(&mk_doc("b", "Unknown", &[], None))
            .await
            .unwrap();

        let rows = store.query(&window().to_clause()).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn date_window_excludes_records_outside_it() {
        let store = MemoryStore::new();
        let mut inside = mk_doc("inside", "SAM.gov", &[], None);
        inside.ingested_at = Some(ts(12));
        let mut outside = mk_doc("outside", "SAM.gov", &[], None);
        outside.ingested_at = Some(Utc.with_ymd_and_hms(2026, 8, 21, 12, 0, 0).single().unwrap());
        store.upsert(&inside).await.unwrap();
        store.upsert(&outside).await.unwrap();

        let rows = store.query(&window().to_clause()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "inside");
    }

    #[tokio::test]
    async fn uniform_any_mode_matches_any_category() {
        let store = MemoryStore::new();
        store
            .upsert(&mk_doc("src-match", "SAM.gov", &[], None))
            .await
            .unwrap();
        store
            .upsert(&mk_doc("naics-match", "Unknown", &["541611"], None))
            .await
            .unwrap();
        store
            .upsert(&mk_doc("no-match", "Unknown", &[], None))
            .await
            .unwrap();

        let mut request = window();
        request.mode = FilterMode::Uniform(Combine::Any);
        request.sources = vec!["SAM.gov".to_string()];
        request.naics = vec!["541611".to_string()];

        let mut rows = store.query(&request.to_clause()).await.unwrap();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(
            rows.iter().map(|o| o.id.as_str()).collect::<Vec<_>>(),
            vec!["naics-match", "src-match"]
        );
    }

    #[tokio::test]
    async fn uniform_all_mode_requires_every_category() {
        let store = MemoryStore::new();
        store
            .upsert(&mk_doc("both", "SAM.gov", &["541611"], None))
            .await
            .unwrap();
        store
            .upsert(&mk_doc("source-only", "SAM.gov", &[], None))
            .await
            .unwrap();
        store
            .upsert(&mk_doc("naics-only", "Unknown", &["541611"], None))
            .await
            .unwrap();

        let mut request = window();
        request.mode = FilterMode::Uniform(Combine::All);
        request.sources = vec!["SAM.gov".to_string()];
        request.naics = vec!["541611".to_string()];

        let rows = store.query(&request.to_clause()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "both");
    }

    #[test]
    fn unknown_sort_column_falls_back_to_discovery_desc() {
        let spec = SortSpec::parse(Some("bogusColumn"), Some("asc"));
        assert_eq!(spec.field, SortField::IngestedAt);
        assert_eq!(spec.dir, SortDir::Desc);

        let spec = SortSpec::parse(Some("contractValue"), Some("asc"));
        assert_eq!(spec.field, SortField::ContractValue);
        assert_eq!(spec.dir, SortDir::Asc);
    }

    #[test]
    fn sorting_by_contract_value_puts_missing_values_last_on_desc() {
        let mut rows = vec![
            mk_doc("none", "SAM.gov", &[], None),
            {
                let mut d = mk_doc("big", "SAM.gov", &[], None);
                d.contract_value = Some(1_000_000.0);
                d
            },
            {
                let mut d = mk_doc("small", "SAM.gov", &[], None);
                d.contract_value = Some(10.0);
                d
            },
        ];
        sort_opportunities(
            &mut rows,
            SortSpec {
                field: SortField::ContractValue,
                dir: SortDir::Desc,
            },
        );
        assert_eq!(
            rows.iter().map(|o| o.id.as_str()).collect::<Vec<_>>(),
            vec!["big", "small", "none"]
        );
    }

    #[test]
    fn descending_sort_keeps_equal_keys_in_order() {
        let mut rows = vec![
            mk_doc("tie-a", "SAM.gov", &[], None),
            mk_doc("tie-b", "SAM.gov", &[], None),
            {
                let mut d = mk_doc("late", "SAM.gov", &[], None);
                d.ingested_at = Some(ts(18));
                d
            },
            mk_doc("tie-c", "SAM.gov", &[], None),
        ];
        sort_opportunities(
            &mut rows,
            SortSpec {
                field: SortField::IngestedAt,
                dir: SortDir::Desc,
            },
        );
        assert_eq!(
            rows.iter().map(|o| o.id.as_str()).collect::<Vec<_>>(),
            vec!["late", "tie-a", "tie-b", "tie-c"]
        );
    }

    #[test]
    fn clause_sql_numbers_placeholders_in_order() {
        let mut request = window();
        request.naics = vec!["541611".to_string()];
        request.psc = vec!["R408".to_string()];
        request.sources = vec!["SAM.gov".to_string()];

        let mut args = Vec::new();
        let sql = clause_sql(&request.to_clause(), &mut args);

        assert!(sql.contains("$1::timestamptz"));
        assert!(sql.contains("$2::timestamptz"));
        assert!(sql.contains("ANY($3)"));
        assert!(sql.contains("ANY($4)"));
        assert!(sql.contains("ANY($5)"));
        assert_eq!(args.len(), 5);

        // NAICS/PSC are ORed together, then ANDed with source.
        assert!(sql.contains("OR doc->>'pscCode' = ANY($4))"));
        assert!(sql.contains("AND doc->>'source' = ANY($5)"));
    }
}
