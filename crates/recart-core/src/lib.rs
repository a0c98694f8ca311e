//! Core types and trait definitions for the recart abandoned-cart service.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! Storage backends, the reminder worker and the HTTP layer all depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod cart;
pub mod error;
pub mod lifecycle;
pub mod mail;
pub mod policy;
pub mod recovery;
pub mod reminder;
pub mod stats;
pub mod store;

pub use error::{Error, Result, StoreError};
