use std::sync::Arc;

use axum::Extension;
use axum::response::IntoResponse;

use loanportal_infra::Services;

use crate::app::dto::{
    AppJson, ChangePasswordRequest, Envelope, LoginRequest, ProfileRequest, RegisterRequest,
};
use crate::app::errors::ApiResult;
use crate::context::PrincipalContext;

pub async fn register(
    Extension(services): Extension<Arc<Services>>,
    AppJson(req): AppJson<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let session = services.sessions.register(req.into()).await?;
    Ok(Envelope::created("User registered successfully", session))
}

pub async fn login(
    Extension(services): Extension<Arc<Services>>,
    AppJson(req): AppJson<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let session = services.sessions.login(req.into()).await?;
    Ok(Envelope::ok(session).with_message("Login successful"))
}

pub async fn logout(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
) -> ApiResult<impl IntoResponse> {
    services.sessions.logout(ctx.authenticated()).await?;
    Ok(Envelope::done("Logged out successfully"))
}

pub async fn me(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
) -> ApiResult<impl IntoResponse> {
    let user = services.sessions.me(ctx.authenticated()).await?;
    Ok(Envelope::ok(user))
}

pub async fn update_profile(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    AppJson(req): AppJson<ProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = services
        .sessions
        .update_profile(ctx.authenticated(), req.into())
        .await?;
    Ok(Envelope::ok(user).with_message("Profile updated successfully"))
}

pub async fn change_password(
    Extension(services): Extension<Arc<Services>>,
    ctx: PrincipalContext,
    AppJson(req): AppJson<ChangePasswordRequest>,
) -> ApiResult<impl IntoResponse> {
    services
        .sessions
        .change_password(ctx.authenticated(), req.into())
        .await?;
    Ok(Envelope::done("Password changed successfully"))
}
