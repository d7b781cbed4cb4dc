// src/future/mod.rs

//! Futures handed back to callers at submission time.
//!
//! - [`app_future`] holds [`AppFuture`], the single-assignment result of one
//!   submitted app, with ordered exactly-once continuations.
//! - [`data_future`] holds [`DataFuture`], a view on one declared output file.

pub mod app_future;
pub mod data_future;

pub use app_future::{AppFuture, AppValue, Outcome};
pub use data_future::DataFuture;
