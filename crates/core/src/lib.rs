//! `keepsats-core`: identifiers and errors shared by the ledger crates.
//!
//! Pure values only; nothing here touches storage, locks or the network.

pub mod error;
pub mod id;
pub mod value_object;

pub use error::{DomainError, DomainResult};
pub use id::{CustomerId, EntryId};
pub use value_object::ValueObject;
