use chrono::{DateTime, Utc};
use serde::Serialize;

use loanportal_core::{DomainError, DomainResult, Entity, FieldErrors, LoanId, UserId};

use crate::{AdminComment, Amount, LoanStatus, Purpose, Tenure};

/// A loan application.
///
/// Everything except `status`, `admin_comment`, `updated_by` and `updated_at`
/// is fixed at submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Loan {
    pub id: LoanId,
    pub owner_id: UserId,
    pub amount: Amount,
    pub tenure: Tenure,
    pub purpose: Purpose,
    pub status: LoanStatus,
    pub admin_comment: Option<AdminComment>,
    pub created_by: UserId,
    pub updated_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Loan {
    type Id = LoanId;

    fn id(&self) -> LoanId {
        self.id
    }
}

/// Command: SubmitLoan.
///
/// Fields arrive as raw text so every offending field can be reported at once.
/// No status field: new loans are always pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitLoan {
    pub owner: UserId,
    pub amount: Option<String>,
    pub tenure: Option<String>,
    pub purpose: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransitionLoan (review decision).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionLoan {
    pub actor: UserId,
    pub status: Option<String>,
    pub admin_comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

fn required<T>(
    errors: &mut FieldErrors,
    field: &str,
    raw: Option<&str>,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> Option<T> {
    let Some(raw) = raw else {
        errors.add(field, format!("The {field} field is required."));
        return None;
    };
    match parse(raw) {
        Ok(value) => Some(value),
        Err(message) => {
            errors.add(field, message);
            None
        }
    }
}

impl Loan {
    /// Validate and create a new pending application owned by `cmd.owner`.
    pub fn submit(id: LoanId, cmd: &SubmitLoan) -> DomainResult<Loan> {
        let mut errors = FieldErrors::new();
        let amount = required(&mut errors, "amount", cmd.amount.as_deref(), Amount::parse);
        let tenure = required(&mut errors, "tenure", cmd.tenure.as_deref(), Tenure::parse);
        let purpose = required(&mut errors, "purpose", cmd.purpose.as_deref(), |raw| {
            Purpose::new(raw)
        });

        let (Some(amount), Some(tenure), Some(purpose)) = (amount, tenure, purpose) else {
            return Err(DomainError::Validation(errors));
        };

        Ok(Loan {
            id,
            owner_id: cmd.owner,
            amount,
            tenure,
            purpose,
            status: LoanStatus::Pending,
            admin_comment: None,
            created_by: cmd.owner,
            updated_by: cmd.owner,
            created_at: cmd.occurred_at,
            updated_at: cmd.occurred_at,
        })
    }

    /// Apply a review decision.
    ///
    /// Input is validated first; only then is the current state checked, so a
    /// malformed request against a decided loan is still a validation error.
    pub fn transition(&mut self, cmd: &TransitionLoan) -> DomainResult<()> {
        let mut errors = FieldErrors::new();
        let status = required(&mut errors, "status", cmd.status.as_deref(), |raw| {
            raw.parse::<LoanStatus>()
                .ok()
                .filter(|s| s.is_decision())
                .ok_or_else(|| "The selected status is invalid.".to_string())
        });
        let comment = match cmd.admin_comment.as_deref() {
            None => None,
            Some(raw) => match AdminComment::new(raw) {
                Ok(c) => Some(c),
                Err(message) => {
                    errors.add("admin_comment", message);
                    None
                }
            },
        };
        let (Some(status), true) = (status, errors.is_empty()) else {
            return Err(DomainError::Validation(errors));
        };

        if self.status.is_terminal() {
            return Err(DomainError::conflict(format!(
                "Loan has already been {}",
                self.status.as_str().to_lowercase()
            )));
        }

        self.status = status;
        self.admin_comment = comment;
        self.updated_by = cmd.actor;
        self.updated_at = cmd.occurred_at;
        Ok(())
    }
}
