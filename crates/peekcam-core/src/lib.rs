//! Core types, config and errors for peekcam.

pub mod config;
pub mod error;
pub mod types;
