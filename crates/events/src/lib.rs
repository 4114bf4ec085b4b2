//! Tracked events: everything the two external systems can tell the ledger.

pub mod bus;
pub mod chain;
pub mod envelope;
pub mod event;
pub mod lightning;

pub use bus::{BusError, TrackedReceiver, TrackedSender, channel};
pub use chain::{CustomJson, CustomJsonPayload, KeepsatsTransfer, LightningWithdraw, Transfer};
pub use envelope::{EventSource, StreamPosition, TrackedEnvelope};
pub use event::TrackedEvent;
pub use lightning::{Forward, Invoice, InvoiceState, Payment, PaymentStatus};
