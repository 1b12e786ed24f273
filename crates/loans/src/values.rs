//! Validated loan attributes.
//!
//! Each constructor returns the client-facing message on failure; the caller
//! decides which field it belongs to.

use serde::{Deserialize, Serialize, Serializer};

use loanportal_core::ValueObject;

/// Upper bound on a loan amount, in whole currency units.
pub const MAX_AMOUNT_UNITS: i64 = 999_999_999;
pub const MIN_TENURE_MONTHS: i64 = 1;
pub const MAX_TENURE_MONTHS: i64 = 360;
pub const MAX_TEXT_CHARS: usize = 1000;

const MAX_AMOUNT_CENTS: i64 = MAX_AMOUNT_UNITS * 100;

/// Positive decimal amount with at most two fractional digits, kept in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl ValueObject for Amount {}

impl Amount {
    /// Parse a decimal string such as `"50000"` or `"1250.5"`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let s = raw.trim();
        if s.is_empty() {
            return Err("The amount field is required.".into());
        }

        let (negative, unsigned) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let (whole, frac) = unsigned.split_once('.').unwrap_or((unsigned, ""));

        let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !is_digits(whole) || !is_digits(frac) {
            return Err("The amount field must be a number.".into());
        }

        let frac = frac.trim_end_matches('0');
        if frac.len() > 2 {
            return Err("The amount field must not have more than 2 decimal places.".into());
        }

        let too_large = || format!("The amount field must not be greater than {MAX_AMOUNT_UNITS}.");
        let mut units: i64 = 0;
        for digit in whole.bytes() {
            units = units
                .checked_mul(10)
                .and_then(|u| u.checked_add(i64::from(digit - b'0')))
                .ok_or_else(too_large)?;
        }
        let cents_part: i64 = format!("{frac:0<2}").parse().unwrap_or(0);
        let cents = units
            .checked_mul(100)
            .and_then(|c| c.checked_add(cents_part))
            .ok_or_else(too_large)?;

        if negative || cents == 0 {
            return Err("The amount field must be greater than 0.".into());
        }
        if cents > MAX_AMOUNT_CENTS {
            return Err(too_large());
        }
        Ok(Self(cents))
    }

    /// Rehydrate from storage. Out-of-range values are rejected.
    pub fn from_cents(cents: i64) -> Result<Self, String> {
        if cents <= 0 || cents > MAX_AMOUNT_CENTS {
            return Err(format!("amount out of range: {cents} cents"));
        }
        Ok(Self(cents))
    }

    pub fn cents(self) -> i64 {
        self.0
    }
}

impl core::fmt::Display for Amount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Loan duration in months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tenure(u16);

impl ValueObject for Tenure {}

impl Tenure {
    pub fn new(months: i64) -> Result<Self, String> {
        if months < MIN_TENURE_MONTHS {
            return Err(format!("The tenure field must be at least {MIN_TENURE_MONTHS}."));
        }
        if months > MAX_TENURE_MONTHS {
            return Err(format!(
                "The tenure field must not be greater than {MAX_TENURE_MONTHS}."
            ));
        }
        u16::try_from(months)
            .map(Self)
            .map_err(|_| "The tenure field must be an integer.".to_string())
    }

    /// Parse an integer given as text (`"24"`); fractions are rejected.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let s = raw.trim();
        if s.is_empty() {
            return Err("The tenure field is required.".into());
        }
        match s.parse::<i64>() {
            Ok(months) => Self::new(months),
            // Integral but out of i64 range is still an integer.
            Err(_) if s.trim_start_matches(['-', '+']).bytes().all(|b| b.is_ascii_digit()) => {
                if s.starts_with('-') {
                    Self::new(i64::MIN)
                } else {
                    Self::new(i64::MAX)
                }
            }
            Err(_) => Err("The tenure field must be an integer.".into()),
        }
    }

    pub fn months(self) -> u16 {
        self.0
    }
}

/// Free-text reason for the loan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Purpose(String);

impl ValueObject for Purpose {}

impl Purpose {
    pub fn new(raw: impl Into<String>) -> Result<Self, String> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err("The purpose field is required.".into());
        }
        if raw.chars().count() > MAX_TEXT_CHARS {
            return Err(format!(
                "The purpose field must not be greater than {MAX_TEXT_CHARS} characters."
            ));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Reviewer's note attached to a decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdminComment(String);

impl ValueObject for AdminComment {}

impl AdminComment {
    pub fn new(raw: impl Into<String>) -> Result<Self, String> {
        let raw = raw.into();
        if raw.chars().count() > MAX_TEXT_CHARS {
            return Err(format!(
                "The admin comment field must not be greater than {MAX_TEXT_CHARS} characters."
            ));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
