//! Response bodies the client itself interprets.

pub mod error;
