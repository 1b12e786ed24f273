use std::sync::Arc;

use axum::Extension;
use axum::extract::{Path, Query};
use axum::response::IntoResponse;

use loanportal_core::RoleId;
use loanportal_infra::Services;

use crate::app::dto::{AppJson, AssignPermissionsRequest, Envelope, ListQuery, RoleRequest, path_id};
use crate::app::errors::ApiResult;
use crate::context::PrincipalContext;

fn role_id(raw: &str) -> ApiResult<RoleId> {
    path_id(raw, "Role")
}

pub async fn list(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let roles = services.roles.list(ctx.principal(), query.into()).await?;
    Ok(Envelope::ok(roles))
}

pub async fn show(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let role = services.roles.show(ctx.principal(), role_id(&id)?).await?;
    Ok(Envelope::ok(role))
}

pub async fn create(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    AppJson(req): AppJson<RoleRequest>,
) -> ApiResult<impl IntoResponse> {
    let role = services.roles.create(ctx.principal(), req.into()).await?;
    Ok(Envelope::created("Role created successfully", role))
}

pub async fn update(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Path(id): Path<String>,
    AppJson(req): AppJson<RoleRequest>,
) -> ApiResult<impl IntoResponse> {
    let role = services
        .roles
        .update(ctx.principal(), role_id(&id)?, req.into())
        .await?;
    Ok(Envelope::ok(role).with_message("Role updated successfully"))
}

pub async fn destroy(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    services.roles.delete(ctx.principal(), role_id(&id)?).await?;
    Ok(Envelope::done("Role deleted successfully"))
}

pub async fn assign_permissions(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Path(id): Path<String>,
    AppJson(req): AppJson<AssignPermissionsRequest>,
) -> ApiResult<impl IntoResponse> {
    let role = services
        .roles
        .assign_permissions(ctx.principal(), role_id(&id)?, req.references())
        .await?;
    Ok(Envelope::ok(role).with_message("Permissions assigned successfully"))
}
