use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use loanportal_auth::Principal;
use loanportal_core::{LoanId, Page, PageRequest};
use loanportal_loans::{Loan, SubmitLoan, TransitionLoan};

use super::error::{ServiceError, ServiceResult};
use super::views::{LoanView, SummaryLookup, loan_view};
use super::{Caches, actor};
use crate::store::{Store, StoreTx};

/// Raw application form. Values are kept as text so bounds errors can be
/// reported per field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoanSubmission {
    pub amount: Option<String>,
    pub tenure: Option<String>,
    pub purpose: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusDecision {
    pub status: Option<String>,
    pub admin_comment: Option<String>,
}

#[derive(Clone)]
pub struct LoanService {
    store: Arc<dyn Store>,
    caches: Arc<Caches>,
}

async fn page_of_views(tx: &mut dyn StoreTx, page: Page<Loan>) -> ServiceResult<Page<LoanView>> {
    let mut lookup = SummaryLookup::default();
    let mut data = Vec::with_capacity(page.data.len());
    for loan in page.data {
        data.push(lookup.loan_view(tx, loan).await?);
    }
    Ok(Page {
        data,
        current_page: page.current_page,
        per_page: page.per_page,
        total: page.total,
        last_page: page.last_page,
    })
}

impl LoanService {
    pub fn new(store: Arc<dyn Store>, caches: Arc<Caches>) -> Self {
        Self { store, caches }
    }

    /// New applications are always pending and owned by the caller.
    #[instrument(skip(self, caller, form), fields(actor = %caller.user_id), err)]
    pub async fn submit(&self, caller: &Principal, form: LoanSubmission) -> ServiceResult<LoanView> {
        let mut tx = self.store.begin().await?;
        let principal = actor(tx.as_mut(), caller).await?;
        principal.loans().create()?;

        let loan = Loan::submit(
            LoanId::new(),
            &SubmitLoan {
                owner: principal.user_id,
                amount: form.amount,
                tenure: form.tenure,
                purpose: form.purpose,
                occurred_at: Utc::now(),
            },
        )?;
        tx.insert_loan(&loan).await?;
        let view = loan_view(tx.as_mut(), loan).await?;
        tx.commit().await?;

        self.caches.loans.invalidate_all();
        info!(loan_id = %view.id, amount = %view.amount, "loan submitted");
        Ok(view)
    }

    /// The caller's own applications, newest first.
    pub async fn list_own(&self, caller: &Principal, page: PageRequest) -> ServiceResult<Page<LoanView>> {
        let mut tx = self.store.begin().await?;
        let loans = tx.list_loans_by_owner(caller.user_id, page).await?;
        let views = page_of_views(tx.as_mut(), loans).await?;
        tx.commit().await?;
        Ok(views)
    }

    /// Every application, newest first. Served from cache when fresh.
    pub async fn list_all(&self, caller: &Principal, page: PageRequest) -> ServiceResult<Page<LoanView>> {
        caller.loans().view_any()?;

        let key = (page.page, page.per_page);
        if let Some(hit) = self.caches.loans.get(&key) {
            return Ok(hit);
        }
        let generation = self.caches.loans.generation();

        let mut tx = self.store.begin().await?;
        let loans = tx.list_loans(page).await?;
        let views = page_of_views(tx.as_mut(), loans).await?;
        tx.commit().await?;

        self.caches.loans.insert(key, views.clone(), generation);
        Ok(views)
    }

    pub async fn get(&self, caller: &Principal, id: LoanId) -> ServiceResult<LoanView> {
        let mut tx = self.store.begin().await?;
        let loan = tx
            .find_loan(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Loan"))?;
        caller.loans().view(loan.owner_id)?;
        let view = loan_view(tx.as_mut(), loan).await?;
        tx.commit().await?;
        Ok(view)
    }

    /// Approve or reject a pending application.
    #[instrument(skip(self, caller, decision), fields(actor = %caller.user_id), err)]
    pub async fn transition(
        &self,
        caller: &Principal,
        id: LoanId,
        decision: StatusDecision,
    ) -> ServiceResult<LoanView> {
        let mut tx = self.store.begin().await?;
        let principal = actor(tx.as_mut(), caller).await?;
        principal.loans().approve()?;

        let mut loan = tx
            .lock_loan(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Loan"))?;
        loan.transition(&TransitionLoan {
            actor: principal.user_id,
            status: decision.status,
            admin_comment: decision.admin_comment,
            occurred_at: Utc::now(),
        })?;
        tx.update_loan(&loan).await?;
        let view = loan_view(tx.as_mut(), loan).await?;
        tx.commit().await?;

        self.caches.loans.invalidate_all();
        info!(loan_id = %view.id, status = %view.status, "loan status changed");
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing;
    use crate::services::{NewRole, NewUser};
    use loanportal_loans::LoanStatus;

    fn form(amount: &str, tenure: &str, purpose: &str) -> LoanSubmission {
        LoanSubmission {
            amount: Some(amount.into()),
            tenure: Some(tenure.into()),
            purpose: Some(purpose.into()),
        }
    }

    fn decision(status: &str, comment: Option<&str>) -> StatusDecision {
        StatusDecision {
            status: Some(status.into()),
            admin_comment: comment.map(str::to_string),
        }
    }

    fn first_page() -> PageRequest {
        PageRequest::new(None, None, 10)
    }

    #[tokio::test]
    async fn applicant_submits_and_admin_approves() {
        let fx = testing::fixture().await;
        let ann = testing::register(&fx.services, "Ann", "ann@example.com").await;
        let loans = &fx.services.loans;

        let loan = loans
            .submit(&ann.principal, form("50000", "24", "Home renovation"))
            .await
            .unwrap();
        assert_eq!(loan.status, LoanStatus::Pending);
        assert_eq!(loan.user.as_ref().map(|u| u.id), Some(ann.user_id()));

        let decided = loans
            .transition(&fx.admin.principal, loan.id, decision("APPROVED", Some("approved")))
            .await
            .unwrap();
        assert_eq!(decided.status, LoanStatus::Approved);
        assert_eq!(decided.updated_by, fx.admin.user_id());
        assert_eq!(decided.created_by, ann.user_id());

        let own = loans.list_own(&ann.principal, first_page()).await.unwrap();
        assert_eq!(own.total, 1);
        assert_eq!(own.data[0].status, LoanStatus::Approved);
        assert_eq!(own.data[0].admin_comment.as_deref(), Some("approved"));
    }

    #[tokio::test]
    async fn invalid_submissions_create_nothing() {
        let fx = testing::fixture().await;
        let ann = testing::register(&fx.services, "Ann", "ann@example.com").await;
        let loans = &fx.services.loans;

        for bad in [
            form("0", "24", "x"),
            form("1000000000", "24", "x"),
            form("100", "0", "x"),
            form("100", "361", "x"),
            form("100", "12", ""),
        ] {
            let err = loans.submit(&ann.principal, bad).await.unwrap_err();
            assert!(matches!(err, ServiceError::Validation(_)));
        }
        let own = loans.list_own(&ann.principal, first_page()).await.unwrap();
        assert_eq!(own.total, 0);
    }

    #[tokio::test]
    async fn strangers_cannot_view_other_loans() {
        let fx = testing::fixture().await;
        let ann = testing::register(&fx.services, "Ann", "ann@example.com").await;
        let bob = testing::register(&fx.services, "Bob", "bob@example.com").await;
        let loans = &fx.services.loans;

        let loan = loans.submit(&ann.principal, form("100", "12", "Car")).await.unwrap();
        assert!(loans.get(&ann.principal, loan.id).await.is_ok());
        assert!(loans.get(&fx.admin.principal, loan.id).await.is_ok());
        assert!(matches!(
            loans.get(&bob.principal, loan.id).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            loans.get(&ann.principal, LoanId::new()).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn applicants_cannot_review() {
        let fx = testing::fixture().await;
        let ann = testing::register(&fx.services, "Ann", "ann@example.com").await;
        let loans = &fx.services.loans;
        let loan = loans.submit(&ann.principal, form("100", "12", "Car")).await.unwrap();

        assert!(matches!(
            loans.list_all(&ann.principal, first_page()).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            loans.transition(&ann.principal, loan.id, decision("APPROVED", None)).await,
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn pending_target_is_invalid_and_decided_loans_are_final() {
        let fx = testing::fixture().await;
        let ann = testing::register(&fx.services, "Ann", "ann@example.com").await;
        let loans = &fx.services.loans;
        let loan = loans.submit(&ann.principal, form("100", "12", "Car")).await.unwrap();

        assert!(matches!(
            loans.transition(&fx.admin.principal, loan.id, decision("PENDING", None)).await,
            Err(ServiceError::Validation(_))
        ));
        loans
            .transition(&fx.admin.principal, loan.id, decision("REJECTED", Some("no")))
            .await
            .unwrap();
        assert!(matches!(
            loans.transition(&fx.admin.principal, loan.id, decision("APPROVED", None)).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn admin_list_is_cached_until_a_transition() {
        let fx = testing::fixture().await;
        let ann = testing::register(&fx.services, "Ann", "ann@example.com").await;
        let loans = &fx.services.loans;
        let loan = loans.submit(&ann.principal, form("100", "12", "Car")).await.unwrap();

        let listed = loans.list_all(&fx.admin.principal, first_page()).await.unwrap();
        assert_eq!(listed.data[0].status, LoanStatus::Pending);
        assert_eq!(fx.services.caches.loans.len(), 1);

        loans
            .transition(&fx.admin.principal, loan.id, decision("APPROVED", None))
            .await
            .unwrap();
        assert!(fx.services.caches.loans.is_empty());

        let listed = loans.list_all(&fx.admin.principal, first_page()).await.unwrap();
        assert_eq!(listed.data[0].status, LoanStatus::Approved);
    }

    #[tokio::test]
    async fn reviewer_role_can_review_but_not_administer() {
        let fx = testing::fixture().await;
        let admin = &fx.admin.principal;
        let reviewer = fx
            .services
            .roles
            .create(
                admin,
                NewRole {
                    name: Some("Reviewer".into()),
                    permissions: Some(vec!["loan.approve".into()]),
                },
            )
            .await
            .unwrap();
        fx.services
            .users
            .create(
                admin,
                NewUser {
                    name: Some("Carl".into()),
                    email: Some("carl@example.com".into()),
                    password: Some("password123".into()),
                    role_id: Some(reviewer.id.to_string()),
                },
            )
            .await
            .unwrap();
        let carl = testing::sign_in(&fx.services, "carl@example.com", "password123").await;
        let ann = testing::register(&fx.services, "Ann", "ann@example.com").await;
        let loan = fx
            .services
            .loans
            .submit(&ann.principal, form("100", "12", "Car"))
            .await
            .unwrap();

        assert!(fx.services.loans.list_all(&carl.principal, first_page()).await.is_ok());
        assert!(
            fx.services
                .loans
                .transition(&carl.principal, loan.id, decision("APPROVED", None))
                .await
                .is_ok()
        );
        assert!(matches!(
            fx.services.users.show(&carl.principal, ann.user_id()).await,
            Err(ServiceError::Forbidden(_))
        ));
    }
}
