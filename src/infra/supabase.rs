//! Supabase (PostgREST) adapter for analysis history.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{Value, json};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::application::ports::{AnalysisStore, NewAnalysis, NewQuestion, StoreError};
use crate::infra::error::InfraError;

const ANALYSIS_TABLE: &str = "analysis_results";
const QA_TABLE: &str = "qa_history";
const SESSION_TABLE: &str = "user_sessions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SupabaseStore {
    client: Client,
    rest: Url,
    key: String,
}

impl std::fmt::Debug for SupabaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseStore")
            .field("rest", &self.rest.as_str())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl SupabaseStore {
    pub fn new(project_url: &Url, key: impl Into<String>) -> Result<Self, InfraError> {
        let mut base = project_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let rest = base
            .join("rest/v1/")
            .map_err(|err| InfraError::configuration(format!("invalid supabase url: {err}")))?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;

        Ok(Self {
            client,
            rest,
            key: key.into(),
        })
    }

    fn table_url(&self, table: &str, query: &[(&str, String)]) -> Result<Url, StoreError> {
        let mut url = self
            .rest
            .join(table)
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, StoreError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn insert(&self, table: &str, row: &Value) -> Result<(), StoreError> {
        let url = self.table_url(table, &[])?;
        self.send(
            self.client
                .post(url)
                .header("Prefer", "return=minimal")
                .json(row),
        )
        .await?;
        Ok(())
    }

    async fn select(&self, table: &str, query: &[(&str, String)]) -> Result<Vec<Value>, StoreError> {
        let url = self.table_url(table, query)?;
        let response = self.send(self.client.get(url)).await?;
        response
            .json::<Vec<Value>>()
            .await
            .map_err(|err| StoreError::Decode(err.to_string()))
    }

    async fn delete(&self, table: &str, query: &[(&str, String)]) -> Result<usize, StoreError> {
        let url = self.table_url(table, query)?;
        let response = self
            .send(
                self.client
                    .delete(url)
                    .header("Prefer", "return=representation"),
            )
            .await?;
        let removed = response
            .json::<Vec<Value>>()
            .await
            .map_err(|err| StoreError::Decode(err.to_string()))?;
        Ok(removed.len())
    }

    async fn touch_session(&self, user_id: &str, now: &str) -> Result<(), StoreError> {
        let existing = self
            .select(SESSION_TABLE, &[("user_id", eq(user_id)), ("limit", "1".into())])
            .await?;

        match existing.first() {
            Some(session) => {
                let total = session
                    .get("total_analyses")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                let url = self.table_url(SESSION_TABLE, &[("user_id", eq(user_id))])?;
                self.send(
                    self.client
                        .patch(url)
                        .header("Prefer", "return=minimal")
                        .json(&json!({
                            "total_analyses": total + 1,
                            "last_active": now,
                        })),
                )
                .await?;
            }
            None => {
                self.insert(
                    SESSION_TABLE,
                    &json!({
                        "id": Uuid::new_v4(),
                        "user_id": user_id,
                        "total_analyses": 1,
                        "last_active": now,
                        "created_at": now,
                    }),
                )
                .await?;
            }
        }
        Ok(())
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

fn analysis_row(id: Uuid, analysis: &NewAnalysis, created_at: &str) -> Value {
    let record = &analysis.record;
    let info = &record.project_info;
    let counts = &record.element_counts;
    let (errors, warnings) = record
        .validation
        .as_ref()
        .map(|report| (json!(report.errors), json!(report.warnings)))
        .unwrap_or_else(|| (json!([]), json!([])));
    let (total_cost, breakdown) = record
        .costing
        .as_ref()
        .map(|estimate| (estimate.total_cost, json!(estimate.breakdown)))
        .unwrap_or_else(|| (0.0, json!({})));

    json!({
        "id": id,
        "user_id": analysis.user_id,
        "filename": analysis.filename,
        "file_size": analysis.file_size,
        "project_name": info.project_name,
        "building_name": info.building_name,
        "description": info.description,
        "total_elements": counts.total,
        "walls_count": counts.walls,
        "doors_count": counts.doors,
        "windows_count": counts.windows,
        "slabs_count": counts.slabs,
        "columns_count": counts.columns,
        "beams_count": counts.beams,
        "stairs_count": counts.stairs,
        "roofs_count": counts.roofs,
        "materials": record.materials,
        "spaces": record.spaces,
        "ai_analysis": analysis.analysis,
        "validation_errors": errors,
        "validation_warnings": warnings,
        "total_cost": total_cost,
        "cost_breakdown": breakdown,
        "processing_time": analysis.processing_time.as_secs_f64(),
        "created_at": created_at,
    })
}

fn qa_row(id: Uuid, qa: &NewQuestion, created_at: &str) -> Value {
    json!({
        "id": id,
        "analysis_id": qa.analysis_id,
        "user_id": qa.user_id,
        "question": qa.question,
        "answer": qa.answer,
        "created_at": created_at,
    })
}

#[async_trait]
impl AnalysisStore for SupabaseStore {
    async fn store_analysis(&self, analysis: &NewAnalysis) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let now = timestamp();
        self.insert(ANALYSIS_TABLE, &analysis_row(id, analysis, &now))
            .await?;
        debug!(
            target = "bimvision::supabase",
            analysis_id = %id,
            user_id = %analysis.user_id,
            "analysis stored"
        );

        if let Err(err) = self.touch_session(&analysis.user_id, &now).await {
            warn!(
                target = "bimvision::supabase",
                user_id = %analysis.user_id,
                error = %err,
                "failed to update user session"
            );
        }
        Ok(id)
    }

    async fn store_qa(&self, qa: &NewQuestion) -> Result<(), StoreError> {
        let id = Uuid::new_v4();
        self.insert(QA_TABLE, &qa_row(id, qa, &timestamp())).await
    }

    async fn list_user_analyses(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Value>, StoreError> {
        self.select(
            ANALYSIS_TABLE,
            &[
                ("select", "*".into()),
                ("user_id", eq(user_id)),
                ("order", "created_at.desc".into()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ],
        )
        .await
    }

    async fn find_analysis(&self, id: Uuid) -> Result<Option<Value>, StoreError> {
        let mut rows = self
            .select(
                ANALYSIS_TABLE,
                &[
                    ("select", "*".into()),
                    ("id", eq(id)),
                    ("limit", "1".into()),
                ],
            )
            .await?;
        Ok(rows.pop())
    }

    async fn qa_history(&self, analysis_id: Uuid, limit: usize) -> Result<Vec<Value>, StoreError> {
        self.select(
            QA_TABLE,
            &[
                ("select", "*".into()),
                ("analysis_id", eq(analysis_id)),
                ("order", "created_at.asc".into()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn delete_analysis(&self, id: Uuid) -> Result<bool, StoreError> {
        // Q&A rows reference the analysis.
        self.delete(QA_TABLE, &[("analysis_id", eq(id))]).await?;
        let removed = self.delete(ANALYSIS_TABLE, &[("id", eq(id))]).await?;
        Ok(removed > 0)
    }

    async fn user_statistics(&self, user_id: &str) -> Result<Option<Value>, StoreError> {
        let mut rows = self
            .select(
                SESSION_TABLE,
                &[
                    ("select", "*".into()),
                    ("user_id", eq(user_id)),
                    ("limit", "1".into()),
                ],
            )
            .await?;
        Ok(rows.pop())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{
        Json, Router,
        body::Bytes,
        extract::State,
        http::{HeaderMap as AxumHeaders, Method, StatusCode as AxumStatus, Uri},
    };

    use super::*;
    use crate::domain::building::{BuildingRecord, ElementCounts, ElementKind, ProjectInfo};

    const KEY: &str = "service-key";

    #[derive(Debug, Clone)]
    struct Recorded {
        method: Method,
        path: String,
        query: String,
        apikey: Option<String>,
        authorization: Option<String>,
        prefer: Option<String>,
        body: Value,
    }

    /// PostgREST stand-in that records every request.
    #[derive(Default)]
    struct Backend {
        requests: Mutex<Vec<Recorded>>,
        sessions: Vec<Value>,
        deleted_rows: usize,
    }

    impl Backend {
        fn requests(&self) -> Vec<Recorded> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    fn header(headers: &AxumHeaders, name: &str) -> Option<String> {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }

    async fn record(
        State(backend): State<Arc<Backend>>,
        method: Method,
        uri: Uri,
        headers: AxumHeaders,
        body: Bytes,
    ) -> Json<Value> {
        let path = uri.path().to_string();
        backend.requests.lock().expect("requests lock").push(Recorded {
            method: method.clone(),
            path: path.clone(),
            query: uri.query().unwrap_or_default().to_string(),
            apikey: header(&headers, "apikey"),
            authorization: header(&headers, "authorization"),
            prefer: header(&headers, "prefer"),
            body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        });

        let rows = match method {
            Method::GET if path.ends_with(SESSION_TABLE) => backend.sessions.clone(),
            Method::GET => vec![json!({ "id": "row-1" })],
            Method::DELETE => (0..backend.deleted_rows)
                .map(|n| json!({ "id": n }))
                .collect(),
            _ => Vec::new(),
        };
        Json(Value::Array(rows))
    }

    async fn serve(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Url::parse(&format!("http://{addr}")).expect("url")
    }

    async fn store_for(backend: Backend) -> (SupabaseStore, Arc<Backend>) {
        let backend = Arc::new(backend);
        let router = Router::new().fallback(record).with_state(backend.clone());
        let base = serve(router).await;
        (SupabaseStore::new(&base, KEY).expect("store"), backend)
    }

    fn new_analysis() -> NewAnalysis {
        NewAnalysis {
            filename: "tower.ifc".into(),
            record: BuildingRecord::assemble(
                ProjectInfo::default().with_project(Some("Tower".into()), None),
                ElementCounts::default()
                    .with(ElementKind::Wall, 4)
                    .with(ElementKind::Door, 1),
                vec!["Concrete".into()],
                Vec::new(),
                Some("IFC4".into()),
            ),
            analysis: "A compact tower.".into(),
            user_id: "anonymous".into(),
            processing_time: Duration::from_millis(1500),
            file_size: 2048,
        }
    }

    #[test]
    fn rest_root_sits_under_the_project_url() {
        let store = SupabaseStore::new(&Url::parse("https://abc.supabase.co").expect("url"), "key")
            .expect("store");
        let url = store
            .table_url(
                ANALYSIS_TABLE,
                &[("user_id", eq("u 1")), ("order", "created_at.desc".into())],
            )
            .expect("table url");
        assert_eq!(
            url.as_str(),
            "https://abc.supabase.co/rest/v1/analysis_results?user_id=eq.u+1&order=created_at.desc"
        );
    }

    #[test]
    fn analysis_row_flattens_the_record() {
        let id = Uuid::new_v4();
        let row = analysis_row(id, &new_analysis(), "2026-01-01T00:00:00Z");

        assert_eq!(row["id"], json!(id));
        assert_eq!(row["project_name"], "Tower");
        assert_eq!(row["walls_count"], 4);
        assert_eq!(row["doors_count"], 1);
        assert_eq!(row["total_elements"], 5);
        assert_eq!(row["materials"], json!(["Concrete"]));
        assert_eq!(row["processing_time"], 1.5);
        assert_eq!(row["file_size"], 2048);
        assert!(row["validation_warnings"].as_array().is_some_and(|w| !w.is_empty()));
        assert!(row["total_cost"].as_f64().is_some_and(|cost| cost > 0.0));
        assert!(row["cost_breakdown"].get("walls").is_some());
    }

    #[test]
    fn qa_row_links_the_analysis() {
        let analysis_id = Uuid::new_v4();
        let row = qa_row(
            Uuid::new_v4(),
            &NewQuestion {
                analysis_id,
                user_id: "u".into(),
                question: "How tall?".into(),
                answer: "Unknown.".into(),
            },
            "2026-01-01T00:00:00Z",
        );
        assert_eq!(row["analysis_id"], json!(analysis_id));
        assert_eq!(row["question"], "How tall?");
    }

    #[tokio::test]
    async fn listing_sends_filters_and_credentials() {
        let (store, backend) = store_for(Backend::default()).await;

        let rows = store
            .list_user_analyses("u-1", 10, 20)
            .await
            .expect("list");
        assert_eq!(rows.len(), 1);

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.path, "/rest/v1/analysis_results");
        assert_eq!(
            request.query,
            "select=*&user_id=eq.u-1&order=created_at.desc&limit=10&offset=20"
        );
        assert_eq!(request.apikey.as_deref(), Some(KEY));
        assert_eq!(
            request.authorization.as_deref(),
            Some("Bearer service-key")
        );
    }

    #[tokio::test]
    async fn qa_history_is_oldest_first() {
        let (store, backend) = store_for(Backend::default()).await;
        let id = Uuid::new_v4();

        store.qa_history(id, 100).await.expect("history");

        let requests = backend.requests();
        assert_eq!(requests[0].path, "/rest/v1/qa_history");
        assert_eq!(
            requests[0].query,
            format!("select=*&analysis_id=eq.{id}&order=created_at.asc&limit=100")
        );
    }

    #[tokio::test]
    async fn delete_counts_returned_rows() {
        let (store, backend) = store_for(Backend {
            deleted_rows: 1,
            ..Backend::default()
        })
        .await;
        let id = Uuid::new_v4();

        assert!(store.delete_analysis(id).await.expect("delete"));

        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, Method::DELETE);
        assert_eq!(requests[0].path, "/rest/v1/qa_history");
        assert_eq!(requests[0].query, format!("analysis_id=eq.{id}"));
        assert_eq!(requests[1].path, "/rest/v1/analysis_results");
        assert_eq!(requests[1].query, format!("id=eq.{id}"));
        for request in &requests {
            assert_eq!(request.prefer.as_deref(), Some("return=representation"));
        }

        let (store, _) = store_for(Backend::default()).await;
        assert!(!store.delete_analysis(id).await.expect("delete"));
    }

    #[tokio::test]
    async fn first_analysis_creates_a_session() {
        let (store, backend) = store_for(Backend::default()).await;

        let id = store
            .store_analysis(&new_analysis())
            .await
            .expect("store analysis");

        let requests = backend.requests();
        assert_eq!(requests.len(), 3);

        let insert = &requests[0];
        assert_eq!(insert.method, Method::POST);
        assert_eq!(insert.path, "/rest/v1/analysis_results");
        assert_eq!(insert.prefer.as_deref(), Some("return=minimal"));
        assert_eq!(insert.body["id"], json!(id));
        assert_eq!(insert.body["user_id"], "anonymous");

        assert_eq!(requests[1].method, Method::GET);
        assert_eq!(requests[1].path, "/rest/v1/user_sessions");
        assert_eq!(requests[1].query, "user_id=eq.anonymous&limit=1");

        let session = &requests[2];
        assert_eq!(session.method, Method::POST);
        assert_eq!(session.path, "/rest/v1/user_sessions");
        assert_eq!(session.body["total_analyses"], 1);
        assert_eq!(session.body["user_id"], "anonymous");
    }

    #[tokio::test]
    async fn later_analyses_increment_the_session() {
        let (store, backend) = store_for(Backend {
            sessions: vec![json!({ "user_id": "anonymous", "total_analyses": 4 })],
            ..Backend::default()
        })
        .await;

        store
            .store_analysis(&new_analysis())
            .await
            .expect("store analysis");

        let requests = backend.requests();
        let update = requests.last().expect("session update");
        assert_eq!(update.method, Method::PATCH);
        assert_eq!(update.path, "/rest/v1/user_sessions");
        assert_eq!(update.query, "user_id=eq.anonymous");
        assert_eq!(update.body["total_analyses"], 5);
        assert!(update.body["last_active"].is_string());
    }

    #[tokio::test]
    async fn error_statuses_surface_with_their_body() {
        let router = Router::new().fallback(|| async {
            (AxumStatus::SERVICE_UNAVAILABLE, "backend down")
        });
        let base = serve(router).await;
        let store = SupabaseStore::new(&base, KEY).expect("store");

        match store.user_statistics("u-1").await {
            Err(StoreError::Status { status, message }) => {
                assert_eq!(status, 503);
                assert_eq!(message, "backend down");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }
}
