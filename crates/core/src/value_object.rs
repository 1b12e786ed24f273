//! Value object trait: equality by value, not identity.
//!
//! Value objects have **no identity**; they are defined entirely by their
//! attribute values. In this system they are the validated building blocks of
//! a loan application (amount, tenure, purpose, comment).

/// Marker trait for value objects.
///
/// Implementors are immutable once constructed and are only obtainable through
/// a validating constructor, so holding one is proof the bounds were checked.
///
/// ```ignore
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// struct Tenure(u16);
///
/// impl ValueObject for Tenure {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
