use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use policy_svc_core::{
    validation::Page, Beneficiary, BeneficiaryPatch, CoveragePatch, NewBeneficiary, NewCoverage,
    NewPolicy, PolicyCoverage, PolicyPatch, PolicyWithCoverages,
};
use policy_svc_storage::PolicyFilter;

use crate::problem::ProblemResponse;
use crate::router::AppState;

type PolicyPath = Result<Path<i64>, PathRejection>;
type ChildPath = Result<Path<(i64, i64)>, PathRejection>;

#[derive(Debug, Default, Deserialize)]
pub struct PolicyQuery {
    #[serde(default, rename = "customerId")]
    pub customer_id: Option<i64>,
    #[serde(default, rename = "agentId")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub hard: Option<bool>,
}

pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<PolicyQuery>, QueryRejection>,
) -> Result<Json<Vec<PolicyWithCoverages>>, ProblemResponse> {
    let Query(query) = query?;
    let filter = PolicyFilter {
        page: Page::new(query.limit, query.offset)?,
        customer_id: query.customer_id,
        agent_id: query.agent_id,
        status: query.status,
    };
    Ok(Json(state.policies().list_policies(&filter).await?))
}

pub async fn get(
    State(state): State<AppState>,
    path: PolicyPath,
) -> Result<Json<PolicyWithCoverages>, ProblemResponse> {
    let Path(policy_id) = path?;
    Ok(Json(state.policies().get_policy(policy_id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<NewPolicy>, JsonRejection>,
) -> Result<(StatusCode, Json<PolicyWithCoverages>), ProblemResponse> {
    let Json(payload) = payload?;
    let created = state.policies().create_policy(payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(state): State<AppState>,
    path: PolicyPath,
    payload: Result<Json<PolicyPatch>, JsonRejection>,
) -> Result<Json<PolicyWithCoverages>, ProblemResponse> {
    let Path(policy_id) = path?;
    let Json(patch) = payload?;
    Ok(Json(state.policies().update_policy(policy_id, patch).await?))
}

/// Soft delete sets the status to `CANCELLED`; `?hard=true` removes the rows.
pub async fn delete(
    State(state): State<AppState>,
    path: PolicyPath,
    query: Result<Query<DeleteQuery>, QueryRejection>,
) -> Result<StatusCode, ProblemResponse> {
    let Path(policy_id) = path?;
    let Query(query) = query?;
    state
        .policies()
        .delete_policy(policy_id, query.hard.unwrap_or(false))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_coverages(
    State(state): State<AppState>,
    path: PolicyPath,
) -> Result<Json<Vec<PolicyCoverage>>, ProblemResponse> {
    let Path(policy_id) = path?;
    Ok(Json(state.policies().list_coverages(policy_id).await?))
}

pub async fn create_coverage(
    State(state): State<AppState>,
    path: PolicyPath,
    payload: Result<Json<NewCoverage>, JsonRejection>,
) -> Result<(StatusCode, Json<PolicyCoverage>), ProblemResponse> {
    let Path(policy_id) = path?;
    let Json(payload) = payload?;
    let coverage = state.policies().add_coverage(policy_id, payload).await?;
    Ok((StatusCode::CREATED, Json(coverage)))
}

pub async fn get_coverage(
    State(state): State<AppState>,
    path: ChildPath,
) -> Result<Json<PolicyCoverage>, ProblemResponse> {
    let Path((policy_id, coverage_id)) = path?;
    Ok(Json(
        state.policies().get_coverage(policy_id, coverage_id).await?,
    ))
}

pub async fn update_coverage(
    State(state): State<AppState>,
    path: ChildPath,
    payload: Result<Json<CoveragePatch>, JsonRejection>,
) -> Result<Json<PolicyCoverage>, ProblemResponse> {
    let Path((policy_id, coverage_id)) = path?;
    let Json(patch) = payload?;
    Ok(Json(
        state
            .policies()
            .update_coverage(policy_id, coverage_id, patch)
            .await?,
    ))
}

pub async fn delete_coverage(
    State(state): State<AppState>,
    path: ChildPath,
) -> Result<StatusCode, ProblemResponse> {
    let Path((policy_id, coverage_id)) = path?;
    state
        .policies()
        .remove_coverage(policy_id, coverage_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_beneficiaries(
    State(state): State<AppState>,
    path: PolicyPath,
) -> Result<Json<Vec<Beneficiary>>, ProblemResponse> {
    let Path(policy_id) = path?;
    Ok(Json(state.policies().list_beneficiaries(policy_id).await?))
}

pub async fn create_beneficiary(
    State(state): State<AppState>,
    path: PolicyPath,
    payload: Result<Json<NewBeneficiary>, JsonRejection>,
) -> Result<(StatusCode, Json<Beneficiary>), ProblemResponse> {
    let Path(policy_id) = path?;
    let Json(payload) = payload?;
    let beneficiary = state
        .policies()
        .add_beneficiary(policy_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(beneficiary)))
}

pub async fn get_beneficiary(
    State(state): State<AppState>,
    path: ChildPath,
) -> Result<Json<Beneficiary>, ProblemResponse> {
    let Path((policy_id, beneficiary_id)) = path?;
    Ok(Json(
        state
            .policies()
            .get_beneficiary(policy_id, beneficiary_id)
            .await?,
    ))
}

pub async fn update_beneficiary(
    State(state): State<AppState>,
    path: ChildPath,
    payload: Result<Json<BeneficiaryPatch>, JsonRejection>,
) -> Result<Json<Beneficiary>, ProblemResponse> {
    let Path((policy_id, beneficiary_id)) = path?;
    let Json(patch) = payload?;
    Ok(Json(
        state
            .policies()
            .update_beneficiary(policy_id, beneficiary_id, patch)
            .await?,
    ))
}

pub async fn delete_beneficiary(
    State(state): State<AppState>,
    path: ChildPath,
) -> Result<StatusCode, ProblemResponse> {
    let Path((policy_id, beneficiary_id)) = path?;
    state
        .policies()
        .remove_beneficiary(policy_id, beneficiary_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
