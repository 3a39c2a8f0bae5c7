//! Command handlers.

pub mod scan;
pub mod subscribers;
