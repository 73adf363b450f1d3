use std::{sync::Arc, time::Duration};

use axum::{body::Body, http::Request, Router};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use httpmock::{prelude::*, Mock};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;
use url::Url;

use policy_svc_core::{NewBeneficiary, NewCoverage, NewPolicy, NewProduct};
use policy_svc_customer::CustomerClient;
use policy_svc_storage::Database;

use crate::policy_service::{Clock, PolicyService};
use crate::product_service::ProductService;
use crate::router::AppState;
use crate::telemetry;

pub async fn setup_database() -> Database {
    let database = Database::connect("sqlite::memory:")
        .await
        .expect("connect");
    database.run_migrations().await.expect("migrations");
    database
}

pub fn fixed_clock() -> Clock {
    Arc::new(|| {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    })
}

pub fn customer_client(server: &MockServer) -> CustomerClient {
    let base = Url::parse(&server.base_url()).expect("mock url");
    CustomerClient::with_timeout(base, Duration::from_millis(500)).expect("customer client")
}

pub fn service_for(database: &Database, server: &MockServer) -> PolicyService {
    PolicyService::new(
        database.clone(),
        ProductService::new(database.clone()),
        customer_client(server),
        fixed_clock(),
    )
}

pub async fn state_for(server: &MockServer) -> AppState {
    let metrics = telemetry::init_metrics().expect("metrics init");
    AppState::new(metrics, setup_database().await, customer_client(server))
        .with_clock(fixed_clock())
}

/// Registers `GET /customers/{id}` answering with `status`.
pub async fn mock_customer(server: &MockServer, customer_id: i64, status: u16) -> Mock<'_> {
    server
        .mock_async(move |when, then| {
            when.method(GET).path(format!("/customers/{customer_id}"));
            if status == 200 {
                then.status(200)
                    .json_body(json!({ "id": customer_id, "full_name": "Test Customer" }));
            } else {
                then.status(status).json_body(json!({ "detail": "unavailable" }));
            }
        })
        .await
}

pub async fn seed_product(database: &Database, code: &str) {
    ProductService::new(database.clone())
        .create(NewProduct {
            code: code.to_string(),
            name: format!("Product {code}"),
            description: None,
            product_type: Some("LIFE".to_string()),
            base_premium: Some(Decimal::new(12000, 2)),
        })
        .await
        .expect("seed product");
}

pub fn policy_payload(number: &str, customer_id: i64, product: &str) -> NewPolicy {
    NewPolicy {
        policy_number: number.to_string(),
        customer_id,
        product_id: product.to_string(),
        agent_id: None,
        start_date: None,
        end_date: None,
        sum_insured: Some(Decimal::new(1_000_000, 2)),
        premium: Some(Decimal::new(12000, 2)),
        status: None,
        coverages: Vec::new(),
        beneficiaries: Vec::new(),
    }
}

pub fn coverage_payload(coverage_type: &str) -> NewCoverage {
    NewCoverage {
        coverage_type: coverage_type.to_string(),
        sum_assured: Some(Decimal::new(500_000, 2)),
    }
}

pub fn beneficiary_payload(client_id: i64, percentage: i64) -> NewBeneficiary {
    NewBeneficiary {
        client_id,
        full_name: "Maria Lopez".to_string(),
        relationship: "SPOUSE".to_string(),
        percentage: Decimal::from(percentage),
        contact_info: None,
    }
}

/// Sends one request through the router and decodes the JSON body, if any.
pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (u16, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("handler should respond");
    let status = response.status().as_u16();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should read")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}
