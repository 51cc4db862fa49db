use super::service::IngestService;
use super::types::{Termination, UpdateErrorResponse, UpdateResponse};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use std::sync::Arc;

/// `POST /update`: runs the ingestion pipeline and reports the counts.
pub async fn handle_update(Extension(service): Extension<Arc<IngestService>>) -> Response {
    let Some(result) = service.try_update().await else {
        return (
            StatusCode::CONFLICT,
            Json(UpdateErrorResponse {
                error: "an update is already running".to_string(),
            }),
        )
            .into_response();
    };

    match result {
        Ok(report) => {
            tracing::info!(
                "Updated/Total comics: {}/{}",
                report.newly_ingested,
                report.total_known
            );

            let status = match report.termination {
                Termination::ErrorBudgetExceeded => StatusCode::BAD_GATEWAY,
                Termination::Exhausted | Termination::Cancelled => StatusCode::OK,
            };
            (
                status,
                Json(UpdateResponse {
                    newly_ingested: report.newly_ingested,
                    total_known: report.total_known,
                    termination: report.termination,
                }),
            )
                .into_response()
        }
        Err(err) => {
            tracing::error!("Error updating comics: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(UpdateErrorResponse {
                    error: format!("Error updating database: {}", err),
                }),
            )
                .into_response()
        }
    }
}
