use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::{
    Json, Router,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::engine::Row;
use crate::error::SupertoolError;
use crate::interface::{CancelToken, QueryInterface, QueryOptions, Selection};
use crate::proxy;
use crate::query::{Query, Scope};
use crate::record::{Category, Handle};

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub category: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub initial_statements: String,
    #[serde(default)]
    pub statements: String,
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub expressions: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub unwind_lists: bool,
    #[serde(default)]
    pub commit_changes: bool,
    #[serde(default)]
    pub summary_only: bool,
    #[serde(default)]
    pub selected: Vec<Handle>,
    #[serde(default)]
    pub filtered: Vec<Handle>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl QueryRequest {
    fn query(&self) -> Query {
        Query {
            title: self.title.clone(),
            category: self.category.clone(),
            initial_statements: self.initial_statements.clone(),
            statements: self.statements.clone(),
            filter: self.filter.clone(),
            expressions: self.expressions.clone(),
            // a request without a scope runs over everything
            scope: self.scope.as_deref().map(Scope::parse).unwrap_or(Scope::All),
            unwind_lists: self.unwind_lists,
            commit_changes: self.commit_changes,
            summary_only: self.summary_only,
        }
    }
}

#[derive(Serialize)]
pub struct QueryResponse {
    pub status: String,
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_objects: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limited: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    fn error(elapsed_ms: f64, message: String) -> Self {
        QueryResponse {
            status: "error".into(),
            elapsed_ms,
            message: None,
            row_count: None,
            object_count: None,
            total_objects: None,
            limited: None,
            rows: None,
            error: Some(message),
        }
    }
}

#[derive(Serialize)]
pub struct CategoryDescription {
    pub name: &'static str,
    pub namespace: &'static str,
    pub attributes: Vec<&'static str>,
}

fn status_for(error: &SupertoolError) -> StatusCode {
    match error {
        SupertoolError::Persistence(_)
        | SupertoolError::Invariant(_)
        | SupertoolError::Lock(_)
        | SupertoolError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

async fn categories() -> Json<Vec<CategoryDescription>> {
    Json(
        Category::ALL
            .iter()
            .map(|c| CategoryDescription {
                name: c.name(),
                namespace: c.namespace(),
                attributes: proxy::attribute_names(*c),
            })
            .collect(),
    )
}

pub fn router(interface: Arc<QueryInterface>, row_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);
    Router::new()
        .route("/v1/categories", get(categories))
        .route("/v1/query", post(move |Json(req): Json<QueryRequest>| {
            let iface = Arc::clone(&interface);
            async move {
                // the engine is synchronous and not Send, so it runs on a blocking thread
                let started = std::time::Instant::now();
                let result = tokio::task::spawn_blocking(move || {
                    let options = QueryOptions {
                        stream_results: false,
                        timeout: req.timeout_ms.map(Duration::from_millis),
                        row_limit,
                    };
                    let selection = Selection {
                        selected: req.selected.clone(),
                        filtered: req.filtered.clone(),
                    };
                    iface.run_with(&req.query(), &selection, &options, &CancelToken::new())
                })
                .await;
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                match result {
                    Ok(Ok(outcome)) => {
                        info!(ms = elapsed_ms, rows = outcome.row_count, limited = outcome.limited, "query complete");
                        let body = QueryResponse {
                            status: "ok".into(),
                            elapsed_ms,
                            message: Some(outcome.status()),
                            row_count: Some(outcome.row_count),
                            object_count: Some(outcome.object_count),
                            total_objects: Some(outcome.total_objects),
                            limited: Some(outcome.limited),
                            rows: Some(outcome.rows),
                            error: None,
                        };
                        (StatusCode::OK, Json(body))
                    }
                    Ok(Err(e)) => {
                        let status = status_for(&e);
                        let msg = e.diagnostic();
                        warn!(%msg, code = %status.as_u16(), "query error");
                        (status, Json(QueryResponse::error(elapsed_ms, msg)))
                    }
                    Err(e) => {
                        warn!(error = %e, "Join error");
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            Json(QueryResponse::error(elapsed_ms, String::from("Join error"))),
                        )
                    }
                }
            }
        }))
        .layer(cors)
}
