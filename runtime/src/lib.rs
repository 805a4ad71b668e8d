//! # Pass Ledger Runtime
//!
//! The write path and service layer of the pass ledger.
//!
//! - [`coordinator`]: the consumption coordinator run at entry time
//! - [`service`]: [`LedgerService`], the operations kiosk surfaces call
//! - [`retry`]: backoff policy for lost consumption races
//! - [`config`]: environment-driven configuration
//! - [`metrics`]: metric names recorded through the `metrics` facade
//!
//! ## Example
//!
//! ```ignore
//! use passledger_runtime::{LedgerService, RetryPolicy};
//! use passledger_core::environment::SystemClock;
//! use std::sync::Arc;
//!
//! let ledger = LedgerService::with_backend(backend, Arc::new(SystemClock), RetryPolicy::default());
//! let outcome = ledger.enter("https://kiosk.example/my-qr/4f1c").await?;
//! println!("remaining: {:?}", outcome.remaining());
//! ```

pub mod config;
pub mod coordinator;
pub mod metrics;
pub mod retry;
pub mod service;

// Re-export for convenience
pub use config::LedgerConfig;
pub use coordinator::{ConsumeError, ConsumeOutcome, ConsumeRequest, ConsumptionCoordinator};
pub use retry::RetryPolicy;
pub use service::{Enrollment, LedgerError, LedgerService, MemberStatement};
