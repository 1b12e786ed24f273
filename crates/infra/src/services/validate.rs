//! Field rules shared by registration, profile and admin forms.

use loanportal_core::{FieldErrors, PermissionId};

use crate::services::error::ServiceResult;
use crate::store::{PermissionRecord, StoreTx};

pub const MAX_NAME_CHARS: usize = 255;
pub const MIN_PASSWORD_CHARS: usize = 8;

/// Trimmed text of at most 255 characters. `None` when absent and optional.
pub fn name_field(
    errors: &mut FieldErrors,
    field: &str,
    raw: Option<&str>,
    required: bool,
) -> Option<String> {
    let value = raw.map(str::trim).unwrap_or_default();
    if value.is_empty() {
        if required || raw.is_some() {
            errors.add(field, format!("The {field} field is required."));
        }
        return None;
    }
    if value.chars().count() > MAX_NAME_CHARS {
        errors.add(
            field,
            format!("The {field} field must not be greater than {MAX_NAME_CHARS} characters."),
        );
        return None;
    }
    Some(value.to_string())
}

/// Lower-cased, structurally valid address.
pub fn email_field(errors: &mut FieldErrors, raw: Option<&str>, required: bool) -> Option<String> {
    let email = name_field(errors, "email", raw, required)?.to_lowercase();
    if !is_well_formed_email(&email) {
        errors.add("email", "The email field must be a valid email address.");
        return None;
    }
    Some(email)
}

fn is_well_formed_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

/// At least 8 characters; `confirmation`, when checked, must match.
pub fn password_field(
    errors: &mut FieldErrors,
    field: &str,
    raw: Option<&str>,
    confirmation: Option<Option<&str>>,
) -> Option<String> {
    let Some(password) = raw.filter(|p| !p.is_empty()) else {
        errors.add(field, format!("The {field} field is required."));
        return None;
    };
    if password.chars().count() < MIN_PASSWORD_CHARS {
        errors.add(
            field,
            format!("The {field} field must be at least {MIN_PASSWORD_CHARS} characters."),
        );
        return None;
    }
    if let Some(confirmation) = confirmation {
        if confirmation != Some(password) {
            errors.add(field, format!("The {field} field confirmation does not match."));
            return None;
        }
    }
    Some(password.to_string())
}

/// Resolve permission references given either as ids or as names.
///
/// Unknown references are reported as `permissions.<index>`.
pub async fn permission_refs(
    tx: &mut dyn StoreTx,
    refs: Option<&[String]>,
) -> ServiceResult<Vec<PermissionRecord>> {
    let Some(refs) = refs else {
        return Err(FieldErrors::single("permissions", "The permissions field is required.").into());
    };

    let mut errors = FieldErrors::new();
    let mut found = Vec::with_capacity(refs.len());
    for (index, reference) in refs.iter().enumerate() {
        let by_id = match reference.parse::<PermissionId>() {
            Ok(id) => tx.find_permission(id).await?,
            Err(_) => None,
        };
        let record = match by_id {
            Some(record) => Some(record),
            None => tx.find_permission_by_name(reference.trim()).await?,
        };
        match record {
            Some(record) if !found.iter().any(|p: &PermissionRecord| p.id == record.id) => {
                found.push(record)
            }
            Some(_) => {}
            None => errors.add(
                format!("permissions.{index}"),
                format!("The selected permissions.{index} is invalid."),
            ),
        }
    }

    if errors.is_empty() {
        Ok(found)
    } else {
        Err(errors.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_and_bounded() {
        let mut errors = FieldErrors::new();
        assert_eq!(name_field(&mut errors, "name", Some("  Ann "), true).as_deref(), Some("Ann"));
        assert!(name_field(&mut errors, "name", Some(&"x".repeat(256)), true).is_none());
        assert!(name_field(&mut errors, "title", None, false).is_none());
        assert_eq!(errors.fields().collect::<Vec<_>>(), vec!["name"]);
    }

    #[test]
    fn blank_optional_name_is_still_an_error() {
        let mut errors = FieldErrors::new();
        assert!(name_field(&mut errors, "name", Some("   "), false).is_none());
        assert!(errors.contains("name"));
    }

    #[test]
    fn emails_are_lowercased_and_checked() {
        let mut errors = FieldErrors::new();
        assert_eq!(
            email_field(&mut errors, Some("Ann@Example.COM"), true).as_deref(),
            Some("ann@example.com")
        );
        for bad in ["ann", "ann@", "@example.com", "ann@example", "a b@example.com", "a@b@c.com"] {
            let mut errors = FieldErrors::new();
            assert!(email_field(&mut errors, Some(bad), true).is_none(), "{bad}");
            assert!(errors.contains("email"));
        }
    }

    #[test]
    fn password_rules() {
        let mut errors = FieldErrors::new();
        assert!(password_field(&mut errors, "password", Some("short"), None).is_none());
        assert!(
            password_field(&mut errors, "password", Some("longenough"), Some(Some("other")))
                .is_none()
        );
        assert_eq!(errors.get("password").map(<[String]>::len), Some(2));

        let mut errors = FieldErrors::new();
        assert_eq!(
            password_field(&mut errors, "password", Some("longenough"), Some(Some("longenough")))
                .as_deref(),
            Some("longenough")
        );
        assert!(errors.is_empty());
    }
}
