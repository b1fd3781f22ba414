//! CLI command implementations.

pub mod align;
pub mod config;
pub mod keystore;
pub mod sign;
pub mod tools;
pub mod verify;
