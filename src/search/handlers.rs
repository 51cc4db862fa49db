use super::engine::SearchEngine;
use super::types::{PicsParams, SearchErrorResponse, SearchResponse};
use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use std::sync::Arc;

/// `GET /pics?search=<query>`: media references of the best matches, best first.
pub async fn handle_pics(
    Query(params): Query<PicsParams>,
    Extension(engine): Extension<Arc<SearchEngine>>,
) -> Response {
    let query = params.search.trim();
    if query.is_empty() {
        return bad_request("Query parameter 'search' is required");
    }

    tracing::info!("Search query received: {}", query);

    match engine.search_media(query).await {
        Ok(hits) => {
            tracing::info!("Found {} comics matching query: {}", hits.len(), query);
            let pics: Vec<String> = hits.into_iter().map(|hit| hit.media_ref).collect();
            (StatusCode::OK, Json(pics)).into_response()
        }
        Err(err) => {
            tracing::error!("Search for '{}' failed: {}", query, err);
            internal_error(err.to_string())
        }
    }
}

/// `GET /search?search=<query>`: ranked hits with ids, scores and page links.
pub async fn handle_search(
    Query(params): Query<PicsParams>,
    Extension(engine): Extension<Arc<SearchEngine>>,
) -> Response {
    let query = params.search.trim().to_string();
    if query.is_empty() {
        return bad_request("Query parameter 'search' is required");
    }

    match engine.search_media(&query).await {
        Ok(results) => (
            StatusCode::OK,
            Json(SearchResponse {
                query,
                count: results.len(),
                results,
            }),
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Search for '{}' failed: {}", query, err);
            internal_error(err.to_string())
        }
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(SearchErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn internal_error(error: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(SearchErrorResponse { error }),
    )
        .into_response()
}
