//! HTTP query server.
//!
//! Read-only JSON API over a loaded [`Catalog`]:
//!
//! | Route           | Description                                   |
//! |-----------------|-----------------------------------------------|
//! | `/`             | Welcome message                               |
//! | `/health`       | Liveness plus catalog sizes                   |
//! | `/clusters`     | Labelled clusters, ascending numeric id       |
//! | `/articles`     | Search, cluster filter and pagination         |
//! | `/associations` | Rule filter by term and confidence, by lift   |
//!
//! Invalid parameters produce `400` with an [`ErrorResponse`] body.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::models::{ArticleView, AssociationRule, ClusterSummary};
use crate::query::{
    ArticleQuery, AssociationQuery, Catalog, QueryError, DEFAULT_ARTICLE_LIMIT,
    DEFAULT_MIN_CONFIDENCE, DEFAULT_RULE_LIMIT,
};

/// Errors that can occur in the HTTP layer.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Query evaluation failed
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Binding or serving failed
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: String,
    /// Human-readable message
    pub message: String,
}

impl ErrorResponse {
    /// Create an error body.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ServerError::InvalidRequest(_) | ServerError::Query(QueryError::InvalidQuery(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_REQUEST")
            }
            ServerError::Query(QueryError::Storage(_)) | ServerError::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };
        (status, Json(ErrorResponse::new(code, self.to_string()))).into_response()
    }
}

impl From<QueryRejection> for ServerError {
    fn from(rejection: QueryRejection) -> Self {
        ServerError::InvalidRequest(rejection.body_text())
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Catalog served by every handler
    pub catalog: Arc<Catalog>,
}

fn default_article_limit() -> usize {
    DEFAULT_ARTICLE_LIMIT
}

fn default_rule_limit() -> usize {
    DEFAULT_RULE_LIMIT
}

fn default_min_confidence() -> f64 {
    DEFAULT_MIN_CONFIDENCE
}

/// Query string of `/articles`.
#[derive(Debug, Clone, Deserialize)]
pub struct ArticlesParams {
    /// Final cluster id filter
    #[serde(default)]
    pub cluster_id: Option<String>,

    /// Substring search over title and abstract
    #[serde(default)]
    pub search: Option<String>,

    /// Offset (default: 0)
    #[serde(default)]
    pub skip: usize,

    /// Page size (default: 20)
    #[serde(default = "default_article_limit")]
    pub limit: usize,
}

impl From<ArticlesParams> for ArticleQuery {
    fn from(p: ArticlesParams) -> Self {
        ArticleQuery {
            cluster_id: p.cluster_id,
            search: p.search,
            skip: p.skip,
            limit: p.limit,
        }
    }
}

/// Query string of `/associations`.
#[derive(Debug, Clone, Deserialize)]
pub struct AssociationsParams {
    /// Antecedent term filter
    #[serde(default)]
    pub term: Option<String>,

    /// Minimum confidence (default: 0.5)
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Offset (default: 0)
    #[serde(default)]
    pub skip: usize,

    /// Page size (default: 10)
    #[serde(default = "default_rule_limit")]
    pub limit: usize,
}

impl From<AssociationsParams> for AssociationQuery {
    fn from(p: AssociationsParams) -> Self {
        AssociationQuery {
            term: p.term,
            min_confidence: p.min_confidence,
            skip: p.skip,
            limit: p.limit,
        }
    }
}

/// Body of `/`.
#[derive(Debug, Serialize, Deserialize)]
pub struct WelcomeResponse {
    /// Greeting
    pub message: String,
}

/// Body of `/health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"`
    pub status: String,
    /// Number of articles served
    pub articles: usize,
    /// Number of labelled clusters
    pub clusters: usize,
}

/// Body of `/clusters`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClustersResponse {
    /// Clusters ascending by numeric id
    pub clusters: Vec<ClusterSummary>,
}

/// Body of `/articles`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ArticlesResponse {
    /// Matches before pagination
    pub total_results: usize,
    /// Articles on this page
    pub articles: Vec<ArticleView>,
    /// Echo of `skip`
    pub skip: usize,
    /// Echo of `limit`
    pub limit: usize,
}

/// Body of `/associations`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AssociationsResponse {
    /// Matches before pagination
    pub total_results: usize,
    /// Rules on this page
    pub rules: Vec<AssociationRule>,
    /// Echo of `skip`
    pub skip: usize,
    /// Echo of `limit`
    pub limit: usize,
}

async fn root() -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        message: "Publication topics API. See /clusters, /articles and /associations.".to_string(),
    })
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        articles: state.catalog.article_count(),
        clusters: state.catalog.list_clusters().len(),
    })
}

async fn clusters(State(state): State<AppState>) -> Json<ClustersResponse> {
    Json(ClustersResponse {
        clusters: state.catalog.list_clusters().to_vec(),
    })
}

async fn articles(
    State(state): State<AppState>,
    params: Result<Query<ArticlesParams>, QueryRejection>,
) -> ServerResult<Json<ArticlesResponse>> {
    let Query(params) = params?;
    debug!(?params, "Article listing");
    let page = state.catalog.list_articles(&params.into())?;
    Ok(Json(ArticlesResponse {
        total_results: page.total_results,
        articles: page.items,
        skip: page.skip,
        limit: page.limit,
    }))
}

async fn associations(
    State(state): State<AppState>,
    params: Result<Query<AssociationsParams>, QueryRejection>,
) -> ServerResult<Json<AssociationsResponse>> {
    let Query(params) = params?;
    debug!(?params, "Association listing");
    let page = state.catalog.list_associations(&params.into())?;
    Ok(Json(AssociationsResponse {
        total_results: page.total_results,
        rules: page.items,
        skip: page.skip,
        limit: page.limit,
    }))
}

/// Build the router with open CORS and request tracing.
pub fn create_router(catalog: Arc<Catalog>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/clusters", get(clusters))
        .route("/articles", get(articles))
        .route("/associations", get(associations))
        .with_state(AppState { catalog })
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve the catalog until `shutdown` resolves.
///
/// # Errors
/// Returns `ServerError::Io` if the address cannot be bound or serving fails
pub async fn serve<F>(addr: SocketAddr, catalog: Arc<Catalog>, shutdown: F) -> ServerResult<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = create_router(catalog);
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP query server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("HTTP query server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::label::LabelTable;
    use crate::models::{ClusterLabel, FinalAssignment, Record};

    fn app() -> Router {
        let records = vec![
            Record::new("a", "Bone loss", "Microgravity bone loss in mice."),
            Record::new("b", "Plant roots", "Root growth in orbit."),
            Record::new("c", "Orphan", "No cluster."),
        ];
        let assignments = vec![
            FinalAssignment { link: "a".into(), final_cluster: 100 },
            FinalAssignment { link: "b".into(), final_cluster: 101 },
        ];
        let mut labels = LabelTable::new();
        labels.insert(101, ClusterLabel {
            keywords: vec!["plant".into(), "root".into()],
            sample_titles: vec![],
            size: 1,
        });
        labels.insert(100, ClusterLabel {
            keywords: vec!["bone".into(), "loss".into()],
            sample_titles: vec![],
            size: 1,
        });
        let rules = vec![AssociationRule {
            antecedents: vec!["bone".into()],
            consequents: vec!["loss".into()],
            support: 0.3,
            confidence: 0.8,
            lift: 2.5,
        }];
        create_router(Arc::new(Catalog::build(&records, &assignments, &labels, rules)))
    }

    async fn get_json(uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let (status, body) = get_json("/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].is_string());

        let (status, body) = get_json("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["articles"], 3);
        assert_eq!(body["clusters"], 2);
    }

    #[tokio::test]
    async fn test_clusters_sorted() {
        let (status, body) = get_json("/clusters").await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body["clusters"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["100", "101"]);
        assert_eq!(body["clusters"][0]["article_count"], 1);
    }

    #[tokio::test]
    async fn test_articles_defaults_and_uncategorized() {
        let (status, body) = get_json("/articles").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_results"], 3);
        assert_eq!(body["limit"], 20);
        assert_eq!(body["articles"][2]["final_cluster"], "-1");
        assert_eq!(body["articles"][2]["cluster_name"], "Uncategorized");
        assert_eq!(body["articles"][0]["abstract"], "Microgravity bone loss in mice.");
    }

    #[tokio::test]
    async fn test_articles_filters() {
        let (_, body) = get_json("/articles?search=ORBIT").await;
        assert_eq!(body["total_results"], 1);
        assert_eq!(body["articles"][0]["link"], "b");

        let (_, body) = get_json("/articles?cluster_id=-1").await;
        assert_eq!(body["total_results"], 1);
        assert_eq!(body["articles"][0]["link"], "c");
    }

    #[tokio::test]
    async fn test_articles_invalid_limit_is_400() {
        let (status, body) = get_json("/articles?limit=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_REQUEST");

        let (status, body) = get_json("/articles?limit=abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_associations() {
        let (status, body) = get_json("/associations?term=bone").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_results"], 1);
        assert_eq!(body["rules"][0]["lift"], 2.5);
        assert_eq!(body["limit"], 10);

        let (_, body) = get_json("/associations?min_confidence=0.9").await;
        assert_eq!(body["total_results"], 0);

        let (status, _) = get_json("/associations?min_confidence=2").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
