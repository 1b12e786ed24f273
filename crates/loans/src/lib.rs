//! Loan application domain module.
//!
//! Business rules for loan applications, implemented as deterministic domain
//! logic (no IO, no HTTP, no storage).

pub mod loan;
pub mod status;
pub mod values;

pub use loan::{Loan, SubmitLoan, TransitionLoan};
pub use status::LoanStatus;
pub use values::{AdminComment, Amount, Purpose, Tenure};
