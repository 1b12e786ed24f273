use std::sync::Arc;

use axum::Extension;
use axum::extract::{Path, Query};
use axum::response::IntoResponse;

use loanportal_core::LoanId;
use loanportal_infra::Services;
use loanportal_infra::services::{DEFAULT_LOANS_PER_PAGE, ListParams};

use crate::app::dto::{AppJson, ApplyLoanRequest, Envelope, ListQuery, UpdateStatusRequest, path_id};
use crate::app::errors::ApiResult;
use crate::context::PrincipalContext;

pub async fn apply(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    AppJson(req): AppJson<ApplyLoanRequest>,
) -> ApiResult<impl IntoResponse> {
    let loan = services.loans.submit(ctx.principal(), req.into()).await?;
    Ok(Envelope::created("Loan application submitted successfully", loan))
}

pub async fn my_loans(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = ListParams::from(query).page_request(DEFAULT_LOANS_PER_PAGE);
    let loans = services.loans.list_own(ctx.principal(), page).await?;
    Ok(Envelope::ok(loans))
}

pub async fn show(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id: LoanId = path_id(&id, "Loan")?;
    let loan = services.loans.get(ctx.principal(), id).await?;
    Ok(Envelope::ok(loan))
}

pub async fn admin_list(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = ListParams::from(query).page_request(DEFAULT_LOANS_PER_PAGE);
    let loans = services.loans.list_all(ctx.principal(), page).await?;
    Ok(Envelope::ok(loans))
}

pub async fn update_status(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateStatusRequest>,
) -> ApiResult<impl IntoResponse> {
    let id: LoanId = path_id(&id, "Loan")?;
    let loan = services
        .loans
        .transition(ctx.principal(), id, req.into())
        .await?;
    Ok(Envelope::ok(loan).with_message("Loan status updated successfully"))
}
