use axum::{
    Router,
    routing::{get, patch, post},
};

pub mod auth;
pub mod loans;
pub mod permissions;
pub mod roles;
pub mod system;
pub mod users;

/// Routes reachable without a bearer token.
pub fn public() -> Router {
    Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
}

/// Routes behind the auth middleware.
pub fn protected() -> Router {
    Router::new()
        // Session
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/profile", get(auth::me).put(auth::update_profile))
        .route("/change-password", post(auth::change_password))
        // Loans
        .route("/loans", post(loans::apply).get(loans::my_loans))
        .route("/loans/apply", post(loans::apply))
        .route("/loans/my-loans", get(loans::my_loans))
        .route("/loans/:id", get(loans::show))
        .route("/admin/loans", get(loans::admin_list))
        .route("/admin/loans/:id/status", patch(loans::update_status))
        // Users
        .route("/admin/users", get(users::list).post(users::create))
        .route(
            "/admin/users/:id",
            get(users::show).put(users::update).delete(users::destroy),
        )
        .route("/admin/users/:id/assign-role", post(users::assign_role))
        .route(
            "/admin/users/:id/assign-permissions",
            post(users::assign_permissions),
        )
        // Roles
        .route("/admin/roles", get(roles::list).post(roles::create))
        .route(
            "/admin/roles/:id",
            get(roles::show).put(roles::update).delete(roles::destroy),
        )
        .route(
            "/admin/roles/:id/assign-permissions",
            post(roles::assign_permissions),
        )
        // Permissions
        .route(
            "/admin/permissions",
            get(permissions::list).post(permissions::create),
        )
        .route(
            "/admin/permissions/:id",
            get(permissions::show)
                .put(permissions::update)
                .delete(permissions::destroy),
        )
        .route("/admin/permissions-grouped", get(permissions::grouped))
}
