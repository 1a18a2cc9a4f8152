use std::collections::BTreeMap;
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::config::Config;
use crate::fetcher::{Fetcher, SourceStatus};
use crate::merge::SourceCache;
use crate::normalize::Article;
use crate::query::{query_source, QueryError};
use crate::store::CacheStore;

pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<CacheStore>,
    pub fetcher: Arc<Fetcher>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/sources", get(list_sources))
        .route("/api/sources/:key", get(source_cache))
        .route("/status", get(status))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Template structs
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub source_key: String,
    pub source_name: String,
    pub sources: Vec<SourceLink>,
    pub days: Vec<DayGroup>,
}

pub struct SourceLink {
    pub key: String,
    pub name: String,
    pub active: bool,
}

pub struct DayGroup {
    pub date: String,
    pub articles: Vec<Article>,
}

impl IndexTemplate {
    fn new(config: &Config, source_key: String, cache: SourceCache) -> Self {
        let SourceCache {
            mut articles,
            sorted_dates,
        } = cache;

        let days = sorted_dates
            .into_iter()
            .filter_map(|date| {
                let articles = articles.remove(&date)?;
                Some(DayGroup { date, articles })
            })
            .collect();

        let sources = config
            .sources
            .iter()
            .map(|(key, source)| SourceLink {
                key: key.clone(),
                name: source.display_name(key).to_string(),
                active: *key == source_key,
            })
            .collect();

        let source_name = config
            .source(&source_key)
            .map(|s| s.display_name(&source_key).to_string())
            .unwrap_or_else(|| source_key.clone());

        Self {
            source_key,
            source_name,
            sources,
            days,
        }
    }
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

pub struct AppError(QueryError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            QueryError::UnknownSource(_) | QueryError::NoDefaultSource => StatusCode::BAD_REQUEST,
            QueryError::NotPopulated(_) => StatusCode::NOT_FOUND,
            QueryError::Store(e) => {
                error!("Failed to read cache: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.0.to_string()).into_response()
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        AppError(err)
    }
}

#[derive(Debug, Deserialize)]
pub struct SourceQuery {
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SourceSummary {
    pub key: String,
    pub name: String,
    pub url: String,
}

// Route handlers
pub async fn index(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SourceQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (key, cache) = query_source(&state.config, &state.store, query.source.as_deref()).await?;
    Ok(HtmlTemplate(IndexTemplate::new(&state.config, key, cache)))
}

pub async fn source_cache(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<SourceCache>, AppError> {
    let (_, cache) = query_source(&state.config, &state.store, Some(&key)).await?;
    Ok(Json(cache))
}

pub async fn list_sources(State(state): State<Arc<AppState>>) -> Json<Vec<SourceSummary>> {
    let sources = state
        .config
        .sources
        .iter()
        .map(|(key, source)| SourceSummary {
            key: key.clone(),
            name: source.display_name(key).to_string(),
            url: source.url.clone(),
        })
        .collect();
    Json(sources)
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, SourceStatus>> {
    Json(state.fetcher.statuses().await)
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
