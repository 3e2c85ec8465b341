//! Core types and traits for queuestack
//!
//! This crate provides the error codes and time source shared by the
//! queue engine and the HTTP front end.

pub mod clock;
pub mod error;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{ApiError, ErrorCode};
