//! Registration, login and bearer-session lifecycle.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument};

use loanportal_auth::{
    JwtClaims, Principal, Role, TokenCodec, hash_password, verify_password, verify_stored,
};
use loanportal_core::{FieldErrors, SessionId, UserId};

use super::error::{ServiceError, ServiceResult};
use super::validate::{email_field, name_field, password_field};
use super::views::{UserView, resolve_principal, user_view};
use super::Caches;
use crate::store::{SessionRecord, Store, StoreTx, UserRecord};

const BAD_CREDENTIALS: &str = "The provided credentials are incorrect.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasswordChange {
    pub current_password: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

/// Issued token plus the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthSession {
    pub access_token: String,
    pub token_type: &'static str,
    pub user: UserView,
}

/// A verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub principal: Principal,
    pub session_id: SessionId,
    pub user: UserRecord,
}

impl Authenticated {
    pub fn user_id(&self) -> UserId {
        self.principal.user_id
    }
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn Store>,
    tokens: Arc<dyn TokenCodec>,
    token_ttl: chrono::Duration,
    caches: Arc<Caches>,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn Store>,
        tokens: Arc<dyn TokenCodec>,
        token_ttl: chrono::Duration,
        caches: Arc<Caches>,
    ) -> Self {
        Self {
            store,
            tokens,
            token_ttl,
            caches,
        }
    }

    async fn issue(&self, tx: &mut dyn StoreTx, user: UserRecord) -> ServiceResult<AuthSession> {
        let now = Utc::now();
        let claims = JwtClaims::new(user.id, SessionId::new(), now, self.token_ttl);
        let access_token = self.tokens.issue(&claims)?;
        tx.insert_session(&SessionRecord {
            id: claims.sid,
            user_id: user.id,
            issued_at: now,
            expires_at: now + self.token_ttl,
            revoked: false,
        })
        .await?;
        Ok(AuthSession {
            access_token,
            token_type: "Bearer",
            user: user_view(tx, user).await?,
        })
    }

    /// New accounts always get the default applicant role.
    #[instrument(skip_all, err)]
    pub async fn register(&self, form: Registration) -> ServiceResult<AuthSession> {
        let mut errors = FieldErrors::new();
        let name = name_field(&mut errors, "name", form.name.as_deref(), true);
        let email = email_field(&mut errors, form.email.as_deref(), true);
        let password = password_field(
            &mut errors,
            "password",
            form.password.as_deref(),
            Some(form.password_confirmation.as_deref()),
        );

        let mut tx = self.store.begin().await?;
        if let Some(email) = &email {
            if tx.find_user_by_email(email).await?.is_some() {
                errors.add("email", "The email has already been taken.");
            }
        }
        let (Some(name), Some(email), Some(password), true) =
            (name, email, password, errors.is_empty())
        else {
            return Err(errors.into());
        };

        let applicant = tx
            .find_role_by_name(Role::APPLICANT)
            .await?
            .ok_or_else(|| ServiceError::Internal("default applicant role is missing".into()))?;

        let now = Utc::now();
        let user = UserRecord {
            id: UserId::new(),
            name,
            email,
            password_hash: hash_password(&password)?,
            created_at: now,
            updated_at: now,
        };
        tx.insert_user(&user).await?;
        tx.set_user_roles(user.id, &[applicant.id]).await?;
        let session = self.issue(tx.as_mut(), user).await?;
        tx.commit().await?;

        self.caches.invalidate_directory();
        info!(user_id = %session.user.id, "user registered");
        Ok(session)
    }

    #[instrument(skip_all, err)]
    pub async fn login(&self, credentials: Credentials) -> ServiceResult<AuthSession> {
        let mut errors = FieldErrors::new();
        let email = email_field(&mut errors, credentials.email.as_deref(), true);
        let password = credentials.password.filter(|p| !p.is_empty());
        if password.is_none() {
            errors.add("password", "The password field is required.");
        }
        let (Some(email), Some(password), true) = (email, password, errors.is_empty()) else {
            return Err(errors.into());
        };

        let mut tx = self.store.begin().await?;
        let found = tx.find_user_by_email(&email).await?;
        let verified = verify_stored(&password, found.as_ref().map(|u| u.password_hash.as_str()));
        let user = match found {
            Some(user) if verified => user,
            _ => return Err(ServiceError::validation("email", BAD_CREDENTIALS)),
        };
        let pruned = tx.delete_expired_sessions(Utc::now()).await?;
        if pruned > 0 {
            debug!(pruned, "expired sessions removed");
        }
        let session = self.issue(tx.as_mut(), user).await?;
        tx.commit().await?;

        info!(user_id = %session.user.id, "user logged in");
        Ok(session)
    }

    /// Accept a bearer token only while its session is live and its user exists.
    pub async fn authenticate(&self, token: &str) -> ServiceResult<Authenticated> {
        let now = Utc::now();
        let claims = self.tokens.verify(token, now)?;

        let mut tx = self.store.begin().await?;
        let session = tx
            .find_session(claims.sid)
            .await?
            .filter(|s| !s.revoked && s.user_id == claims.sub && s.expires_at > now)
            .ok_or_else(ServiceError::unauthenticated)?;
        let user = tx
            .find_user(session.user_id)
            .await?
            .ok_or_else(ServiceError::unauthenticated)?;
        let principal = resolve_principal(tx.as_mut(), user.id).await?;
        tx.commit().await?;

        Ok(Authenticated {
            principal,
            session_id: session.id,
            user,
        })
    }

    pub async fn logout(&self, auth: &Authenticated) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;
        tx.revoke_session(auth.session_id).await?;
        tx.commit().await?;
        info!(user_id = %auth.user_id(), "user logged out");
        Ok(())
    }

    pub async fn me(&self, auth: &Authenticated) -> ServiceResult<UserView> {
        let mut tx = self.store.begin().await?;
        let user = tx
            .find_user(auth.user_id())
            .await?
            .ok_or_else(ServiceError::unauthenticated)?;
        let view = user_view(tx.as_mut(), user).await?;
        tx.commit().await?;
        Ok(view)
    }

    pub async fn update_profile(
        &self,
        auth: &Authenticated,
        form: ProfileUpdate,
    ) -> ServiceResult<UserView> {
        let mut errors = FieldErrors::new();
        let name = name_field(&mut errors, "name", form.name.as_deref(), false);
        let email = email_field(&mut errors, form.email.as_deref(), false);

        let mut tx = self.store.begin().await?;
        let mut user = tx
            .find_user(auth.user_id())
            .await?
            .ok_or_else(ServiceError::unauthenticated)?;
        if let Some(email) = &email {
            let taken = tx.find_user_by_email(email).await?;
            if taken.is_some_and(|other| other.id != user.id) {
                errors.add("email", "The email has already been taken.");
            }
        }
        errors.into_result()?;

        if let Some(name) = name {
            user.name = name;
        }
        if let Some(email) = email {
            user.email = email;
        }
        user.updated_at = Utc::now();
        tx.update_user(&user).await?;
        let view = user_view(tx.as_mut(), user).await?;
        tx.commit().await?;

        self.caches.invalidate_directory();
        Ok(view)
    }

    pub async fn change_password(
        &self,
        auth: &Authenticated,
        form: PasswordChange,
    ) -> ServiceResult<()> {
        let mut errors = FieldErrors::new();
        let current = form.current_password.filter(|p| !p.is_empty());
        if current.is_none() {
            errors.add("current_password", "The current password field is required.");
        }
        let password = password_field(
            &mut errors,
            "password",
            form.password.as_deref(),
            Some(form.password_confirmation.as_deref()),
        );

        let mut tx = self.store.begin().await?;
        let mut user = tx
            .find_user(auth.user_id())
            .await?
            .ok_or_else(ServiceError::unauthenticated)?;
        if let Some(current) = &current {
            if !verify_password(current, &user.password_hash) {
                errors.add("current_password", "The current password is incorrect.");
            }
        }
        let (Some(password), true) = (password, errors.is_empty()) else {
            return Err(errors.into());
        };

        user.password_hash = hash_password(&password)?;
        user.updated_at = Utc::now();
        tx.update_user(&user).await?;
        tx.commit().await?;
        info!(user_id = %user.id, "password changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{self, ADMIN_EMAIL, ADMIN_PASSWORD};

    fn registration(email: &str) -> Registration {
        Registration {
            name: Some("Ann Applicant".into()),
            email: Some(email.into()),
            password: Some("password123".into()),
            password_confirmation: Some("password123".into()),
        }
    }

    fn field_errors(err: ServiceError) -> FieldErrors {
        match err {
            ServiceError::Validation(errors) => errors,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn registration_assigns_applicant_role_and_returns_token() {
        let fx = testing::fixture().await;
        let session = fx.services.sessions.register(registration("Ann@Example.com")).await.unwrap();

        assert_eq!(session.token_type, "Bearer");
        assert_eq!(session.user.email, "ann@example.com");
        let roles: Vec<_> = session.user.roles.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(roles, vec![Role::APPLICANT]);
        assert_eq!(session.user.all_permissions, vec!["loan.create".to_string()]);

        let auth = fx.services.sessions.authenticate(&session.access_token).await.unwrap();
        assert_eq!(auth.user_id(), session.user.id);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_case_insensitively() {
        let fx = testing::fixture().await;
        fx.services.sessions.register(registration("ann@example.com")).await.unwrap();

        let err = fx
            .services
            .sessions
            .register(registration("ANN@example.com"))
            .await
            .unwrap_err();
        assert!(field_errors(err).contains("email"));
    }

    #[tokio::test]
    async fn registration_reports_every_bad_field() {
        let fx = testing::fixture().await;
        let err = fx
            .services
            .sessions
            .register(Registration {
                name: None,
                email: Some("not-an-email".into()),
                password: Some("password123".into()),
                password_confirmation: Some("different".into()),
            })
            .await
            .unwrap_err();
        let errors = field_errors(err);
        assert_eq!(errors.fields().collect::<Vec<_>>(), vec!["email", "name", "password"]);
    }

    #[tokio::test]
    async fn wrong_password_is_a_validation_error_on_email() {
        let fx = testing::fixture().await;
        let err = fx
            .services
            .sessions
            .login(Credentials {
                email: Some(ADMIN_EMAIL.into()),
                password: Some("wrong-password".into()),
            })
            .await
            .unwrap_err();
        assert_eq!(
            field_errors(err).get("email"),
            Some(&[BAD_CREDENTIALS.to_string()][..])
        );
    }

    #[tokio::test]
    async fn unknown_email_gets_the_same_answer_as_a_wrong_password() {
        let fx = testing::fixture().await;
        let err = fx
            .services
            .sessions
            .login(Credentials {
                email: Some("nobody@example.com".into()),
                password: Some("wrong-password".into()),
            })
            .await
            .unwrap_err();
        assert_eq!(
            field_errors(err).get("email"),
            Some(&[BAD_CREDENTIALS.to_string()][..])
        );
    }

    #[tokio::test]
    async fn login_prunes_expired_sessions() {
        let fx = testing::fixture().await;
        let now = Utc::now();
        let stale = SessionRecord {
            id: SessionId::new(),
            user_id: fx.admin.user_id(),
            issued_at: now - chrono::Duration::days(2),
            expires_at: now - chrono::Duration::days(1),
            revoked: false,
        };
        let mut tx = fx.store.begin().await.unwrap();
        tx.insert_session(&stale).await.unwrap();
        tx.commit().await.unwrap();

        testing::sign_in(&fx.services, ADMIN_EMAIL, ADMIN_PASSWORD).await;

        let mut tx = fx.store.begin().await.unwrap();
        assert!(tx.find_session(stale.id).await.unwrap().is_none());
        assert!(tx.find_session(fx.admin.session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn logout_revokes_only_that_session() {
        let fx = testing::fixture().await;
        let first = fx
            .services
            .sessions
            .login(Credentials {
                email: Some(ADMIN_EMAIL.into()),
                password: Some(ADMIN_PASSWORD.into()),
            })
            .await
            .unwrap();
        let auth = fx.services.sessions.authenticate(&first.access_token).await.unwrap();
        fx.services.sessions.logout(&auth).await.unwrap();

        let err = fx.services.sessions.authenticate(&first.access_token).await.unwrap_err();
        assert_eq!(err, ServiceError::unauthenticated());
        // The fixture's own session is still live.
        assert!(fx.services.sessions.me(&fx.admin).await.is_ok());
    }

    #[tokio::test]
    async fn garbage_tokens_are_unauthenticated() {
        let fx = testing::fixture().await;
        let err = fx.services.sessions.authenticate("not-a-jwt").await.unwrap_err();
        assert_eq!(err, ServiceError::unauthenticated());
    }

    #[tokio::test]
    async fn profile_update_keeps_email_unique() {
        let fx = testing::fixture().await;
        let ann = testing::register(&fx.services, "Ann", "ann@example.com").await;

        let err = fx
            .services
            .sessions
            .update_profile(
                &ann,
                ProfileUpdate {
                    name: None,
                    email: Some(ADMIN_EMAIL.into()),
                },
            )
            .await
            .unwrap_err();
        assert!(field_errors(err).contains("email"));

        let view = fx
            .services
            .sessions
            .update_profile(
                &ann,
                ProfileUpdate {
                    name: Some("Ann B".into()),
                    email: Some("ann@example.com".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(view.name, "Ann B");
    }

    #[tokio::test]
    async fn change_password_checks_current_password() {
        let fx = testing::fixture().await;
        let ann = testing::register(&fx.services, "Ann", "ann@example.com").await;

        let err = fx
            .services
            .sessions
            .change_password(
                &ann,
                PasswordChange {
                    current_password: Some("nope-nope".into()),
                    password: Some("newpassword".into()),
                    password_confirmation: Some("newpassword".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(field_errors(err).contains("current_password"));

        fx.services
            .sessions
            .change_password(
                &ann,
                PasswordChange {
                    current_password: Some("password123".into()),
                    password: Some("newpassword".into()),
                    password_confirmation: Some("newpassword".into()),
                },
            )
            .await
            .unwrap();
        testing::sign_in(&fx.services, "ann@example.com", "newpassword").await;
    }
}
