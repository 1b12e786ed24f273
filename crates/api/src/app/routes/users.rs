use std::sync::Arc;

use axum::Extension;
use axum::extract::{Path, Query};
use axum::response::IntoResponse;

use loanportal_core::UserId;
use loanportal_infra::Services;

use crate::app::dto::{
    AppJson, AssignPermissionsRequest, AssignRoleRequest, Envelope, ListQuery, UserRequest, path_id,
};
use crate::app::errors::ApiResult;
use crate::context::PrincipalContext;

fn user_id(raw: &str) -> ApiResult<UserId> {
    path_id(raw, "User")
}

pub async fn list(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let users = services.users.list(ctx.principal(), query.into()).await?;
    Ok(Envelope::ok(users))
}

pub async fn show(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user = services.users.show(ctx.principal(), user_id(&id)?).await?;
    Ok(Envelope::ok(user))
}

pub async fn create(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    AppJson(req): AppJson<UserRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = services.users.create(ctx.principal(), req.into()).await?;
    Ok(Envelope::created("User created successfully", user))
}

pub async fn update(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Path(id): Path<String>,
    AppJson(req): AppJson<UserRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = services
        .users
        .update(ctx.principal(), user_id(&id)?, req.into())
        .await?;
    Ok(Envelope::ok(user).with_message("User updated successfully"))
}

pub async fn destroy(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    services.users.delete(ctx.principal(), user_id(&id)?).await?;
    Ok(Envelope::done("User deleted successfully"))
}

pub async fn assign_role(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Path(id): Path<String>,
    AppJson(req): AppJson<AssignRoleRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = services
        .users
        .assign_role(ctx.principal(), user_id(&id)?, req.role_id())
        .await?;
    Ok(Envelope::ok(user).with_message("Role assigned successfully"))
}

pub async fn assign_permissions(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    Path(id): Path<String>,
    AppJson(req): AppJson<AssignPermissionsRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = services
        .users
        .assign_permissions(ctx.principal(), user_id(&id)?, req.references())
        .await?;
    Ok(Envelope::ok(user).with_message("Permissions assigned successfully"))
}
