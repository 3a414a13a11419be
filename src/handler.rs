//! HTTP boundary for the measure endpoint
//!
//! One route, `POST /api/v1/measure`. Malformed bodies and a missing
//! identifier list are client errors; the coordinator's partial results are
//! plain 200s. The per-request deadline starts here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info};

use crate::schema::Row;
use crate::ProxyError;

/// What the handler needs from the layers below it.
#[async_trait]
pub trait MeasureGetter: Send + Sync + 'static {
    async fn get(&self, deadline: Instant, rows: Vec<Row>) -> Result<Vec<Row>, ProxyError>;
}

#[derive(Clone)]
struct ApiState {
    getter: Arc<dyn MeasureGetter>,
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct MeasureRequest {
    #[serde(rename = "inventoryIds")]
    inventory_ids: Option<Vec<InventoryIdDto>>,
}

#[derive(Debug, Deserialize)]
struct InventoryIdDto {
    #[serde(rename = "inventoryId")]
    inventory_id: String,
    #[serde(default)]
    priority: u32,
}

#[derive(Debug, Serialize)]
struct MeasureResponse {
    rows: Vec<ResponseRowDto>,
}

#[derive(Debug, Serialize)]
struct ResponseRowDto {
    #[serde(rename = "inventoryId")]
    inventory_id: String,
    #[serde(rename = "emissionsBreakdown")]
    emissions_breakdown: BreakdownDto,
}

#[derive(Debug, Serialize)]
struct BreakdownDto {
    total_emissions_grams: f64,
    inventory_coverage: String,
    climate_risk_compliant: bool,
}

/// Build the API router. Non-POST methods get a 405 from the router itself.
pub fn router(getter: Arc<dyn MeasureGetter>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/api/v1/measure", post(measure))
        .with_state(ApiState {
            getter,
            request_timeout,
        })
}

async fn measure(
    State(state): State<ApiState>,
    payload: Result<Json<MeasureRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "invalid request body").into_response();
    };
    let Some(ids) = request.inventory_ids else {
        return (StatusCode::BAD_REQUEST, "invalid request body").into_response();
    };

    let rows = ids
        .into_iter()
        .map(|id| Row::pending(id.inventory_id, id.priority))
        .collect();

    let deadline = Instant::now() + state.request_timeout;
    let started = std::time::Instant::now();
    match state.getter.get(deadline, rows).await {
        Ok(rows) => {
            info!(latency_ms = started.elapsed().as_millis() as u64, "measure request served");
            Json(MeasureResponse {
                rows: rows.into_iter().map(to_response_row).collect(),
            })
            .into_response()
        }
        Err(err) => {
            error!(error = %err, "couldn't get emissions");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
        }
    }
}

fn to_response_row(row: Row) -> ResponseRowDto {
    ResponseRowDto {
        inventory_id: row.inventory_id,
        emissions_breakdown: BreakdownDto {
            total_emissions_grams: row.emissions_breakdown.total_grams,
            inventory_coverage: row.emissions_breakdown.coverage,
            climate_risk_compliant: row.emissions_breakdown.climate_risk_compliant,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EmissionsBreakdown;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use tower::ServiceExt;

    struct StubGetter {
        rows: Vec<Row>,
        fail: bool,
    }

    #[async_trait]
    impl MeasureGetter for StubGetter {
        async fn get(&self, _deadline: Instant, _rows: Vec<Row>) -> Result<Vec<Row>, ProxyError> {
            if self.fail {
                return Err(ProxyError::Upstream("boom".to_owned()));
            }
            Ok(self.rows.clone())
        }
    }

    fn app(rows: Vec<Row>) -> Router {
        router(
            Arc::new(StubGetter { rows, fail: false }),
            Duration::from_millis(100),
        )
    }

    fn post_request(body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/api/v1/measure")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn returns_rows_in_the_response_shape() {
        let row = Row {
            inventory_id: "A".to_owned(),
            priority: 1,
            emissions_breakdown: EmissionsBreakdown {
                total_grams: 10.0,
                coverage: "full".to_owned(),
                climate_risk_compliant: true,
            },
        };
        let response = app(vec![row])
            .oneshot(post_request(
                r#"{"inventoryIds":[{"inventoryId":"A","priority":1}]}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["rows"][0]["inventoryId"], "A");
        assert_eq!(
            body["rows"][0]["emissionsBreakdown"]["total_emissions_grams"],
            10.0
        );
        assert_eq!(
            body["rows"][0]["emissionsBreakdown"]["inventory_coverage"],
            "full"
        );
        assert_eq!(
            body["rows"][0]["emissionsBreakdown"]["climate_risk_compliant"],
            true
        );
    }

    #[tokio::test]
    async fn empty_identifier_list_returns_empty_rows() {
        let response = app(Vec::new())
            .oneshot(post_request(r#"{"inventoryIds":[]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["rows"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn missing_identifier_list_is_a_client_error() {
        let response = app(Vec::new()).oneshot(post_request(r#"{}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_body_is_a_client_error() {
        let response = app(Vec::new())
            .oneshot(post_request("this is not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wrong_method_is_rejected() {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/api/v1/measure")
            .body(Body::empty())
            .unwrap();
        let response = app(Vec::new()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn coordinator_failure_is_a_server_error() {
        let app = router(
            Arc::new(StubGetter {
                rows: Vec::new(),
                fail: true,
            }),
            Duration::from_millis(100),
        );
        let response = app
            .oneshot(post_request(r#"{"inventoryIds":[]}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
