use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use policy_svc_core::{validation::Page, NewProduct, Product, ProductPatch, ValidationError};

use crate::problem::ProblemResponse;
use crate::router::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl PageQuery {
    pub fn page(&self) -> Result<Page, ValidationError> {
        Page::new(self.limit, self.offset)
    }
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    detail: &'static str,
}

pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<Vec<Product>>, ProblemResponse> {
    let Query(query) = query?;
    let page = query.page()?;
    Ok(Json(state.products().list(page).await?))
}

pub async fn get(
    State(state): State<AppState>,
    code: Result<Path<String>, PathRejection>,
) -> Result<Json<Product>, ProblemResponse> {
    let Path(code) = code?;
    Ok(Json(state.products().get(&code).await?))
}

pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<NewProduct>, JsonRejection>,
) -> Result<(StatusCode, Json<Product>), ProblemResponse> {
    let Json(payload) = payload?;
    let product = state.products().create(payload).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update(
    State(state): State<AppState>,
    code: Result<Path<String>, PathRejection>,
    payload: Result<Json<ProductPatch>, JsonRejection>,
) -> Result<Json<Product>, ProblemResponse> {
    let Path(code) = code?;
    let Json(patch) = payload?;
    Ok(Json(state.products().update(&code, patch).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    code: Result<Path<String>, PathRejection>,
) -> Result<Json<DeletedResponse>, ProblemResponse> {
    let Path(code) = code?;
    state.products().delete(&code).await?;
    Ok(Json(DeletedResponse {
        detail: "Product deleted successfully",
    }))
}
