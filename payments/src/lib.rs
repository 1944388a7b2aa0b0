//! Payment orchestration with a transactional outbox.
//!
//! Solves the dual-write problem: the payment row and its event are inserted
//! in one database transaction, and the [`relay::OutboxRelay`] publishes the
//! event afterwards. A broker outage delays events, it never loses them, and
//! trip completion latency depends only on the local transaction — the PSP
//! charge runs asynchronously behind a circuit breaker and bounded retry.
//!
//! The [`reconciler::Reconciler`] sweeps FAILED payments (PSP was down) and
//! stale PENDING payments (crash between the commit and the async charge)
//! back through the same charger.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod charger;
pub mod consumer;
pub mod memory;
pub mod model;
pub mod orchestrator;
pub mod postgres;
pub mod psp;
pub mod reconciler;
pub mod relay;
pub mod store;

pub use charger::{ChargeError, PspCharger};
pub use model::{NewOutboxEntry, OutboxEntry, Payment};
pub use orchestrator::PaymentOrchestrator;
pub use psp::{PspCharge, PspError, PspGateway};
pub use reconciler::Reconciler;
pub use relay::OutboxRelay;
pub use store::{PaymentStore, PaymentStoreError};
