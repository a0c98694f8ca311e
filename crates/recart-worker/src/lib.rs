//! The reminder pipeline: pick due abandoned carts, gate on consent, send
//! one tier-specific email with a recovery link, and record the outcome.
//!
//! Everything here is generic over the [`recart_core::store::CartStore`],
//! [`recart_core::store::ProfileDirectory`] and [`recart_core::mail::Mailer`]
//! seams. Scheduling (intervals, overlap) belongs to the caller.

pub mod dispatch;
pub mod state;
pub mod sweep;
pub mod template;

pub use dispatch::{Delivery, DispatchError, Dispatcher};
pub use state::SchedulerState;
pub use sweep::{SweepReport, Sweeper};

#[cfg(test)]
mod tests;
