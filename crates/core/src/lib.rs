//! Core business logic for mailops-rs.

pub mod services;

pub use services::*;
