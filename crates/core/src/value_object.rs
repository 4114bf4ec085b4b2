//! Value object trait: equality by value, not identity.
//!
//! Accounts and conversion snapshots are embedded in every ledger entry and
//! carry no identity of their own. Two accounts with the same
//! `(account_type, name, sub, contra)` are the same account.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "change" one,
/// build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

impl ValueObject for crate::id::CustomerId {}
