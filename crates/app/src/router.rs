use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tracing::{info_span, Span};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use policy_svc_customer::CustomerClient;
use policy_svc_storage::Database;

use crate::policy_service::{Clock, PolicyService};
use crate::product_service::ProductService;
use crate::{policies, products, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    products: ProductService,
    policies: PolicyService,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, storage: Database, customers: CustomerClient) -> Self {
        let clock: Clock = Arc::new(Utc::now);
        let products = ProductService::new(storage.clone());
        let policies = PolicyService::new(storage, products.clone(), customers, clock);
        Self {
            metrics,
            products,
            policies,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.policies = self.policies.with_clock(clock);
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn products(&self) -> &ProductService {
        &self.products
    }

    pub fn policies(&self) -> &PolicyService {
        &self.policies
    }
}

pub fn app_router(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(CorsLayer::permissive());

    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/products", get(products::list).post(products::create))
        .route(
            "/products/:code",
            get(products::get)
                .patch(products::update)
                .delete(products::delete),
        )
        .route("/policies", get(policies::list).post(policies::create))
        .route(
            "/policies/:id",
            get(policies::get)
                .patch(policies::update)
                .delete(policies::delete),
        )
        .route(
            "/policies/:id/coverages",
            get(policies::list_coverages).post(policies::create_coverage),
        )
        .route(
            "/policies/:id/coverages/:coverage_id",
            get(policies::get_coverage)
                .patch(policies::update_coverage)
                .delete(policies::delete_coverage),
        )
        .route(
            "/policies/:id/beneficiaries",
            get(policies::list_beneficiaries).post(policies::create_beneficiary),
        )
        .route(
            "/policies/:id/beneficiaries/:beneficiary_id",
            get(policies::get_beneficiary)
                .patch(policies::update_beneficiary)
                .delete(policies::delete_beneficiary),
        )
        .layer(middleware)
        .with_state(state)
}

/// Span for one HTTP request, tagged with the id set by `SetRequestIdLayer`.
fn request_span(request: &Request<Body>) -> Span {
    info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        request_id = %request_id(request.headers())
    )
}

fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
}

const REQUEST_ID_HEADER: &str = "x-request-id";

async fn root() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> Response {
    let body = telemetry::render_metrics(state.metrics());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
        .into_response()
}
