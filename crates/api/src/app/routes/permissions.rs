use std::sync::Arc;

use axum::Extension;
use axum::extract::{Path, Query};
use axum::response::IntoResponse;

use loanportal_core::PermissionId;
use loanportal_infra::Services;

use crate::app::dto::{AppJson, Envelope, ListQuery, PermissionRequest, path_id};
use crate::app::errors::ApiResult;
use crate::context::PrincipalContext;

fn permission_id(raw: &str) -> ApiResult<PermissionId> {
    path_id(raw, "Permission")
}

pub async fn list(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let permissions = services
        .permissions
        .list(ctx.principal(), query.into())
        .await?;
    Ok(Envelope::ok(permissions))
}

pub async fn show(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let permission = services
        .permissions
        .show(ctx.principal(), permission_id(&id)?)
        .await?;
    Ok(Envelope::ok(permission))
}

pub async fn grouped(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
) -> ApiResult<impl IntoResponse> {
    let groups = services.permissions.grouped(ctx.principal()).await?;
    Ok(Envelope::ok(groups))
}

pub async fn create(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    AppJson(req): AppJson<PermissionRequest>,
) -> ApiResult<impl IntoResponse> {
    let permission = services
        .permissions
        .create(ctx.principal(), req.into())
        .await?;
    Ok(Envelope::created("Permission created successfully", permission))
}

pub async fn update(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Path(id): Path<String>,
    AppJson(req): AppJson<PermissionRequest>,
) -> ApiResult<impl IntoResponse> {
    let permission = services
        .permissions
        .update(ctx.principal(), permission_id(&id)?, req.into())
        .await?;
    Ok(Envelope::ok(permission).with_message("Permission updated successfully"))
}

pub async fn destroy(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    services
        .permissions
        .delete(ctx.principal(), permission_id(&id)?)
        .await?;
    Ok(Envelope::done("Permission deleted successfully"))
}
