//! TTN fleet - incremental LoRaWAN storage pull and static fleet dashboard
//!
//! This library exposes the core modules for testing and reuse.

pub mod classify;
pub mod common;
pub mod config;
pub mod error;
pub mod json;
pub mod normalize;
pub mod render;
pub mod store;
pub mod sync;
pub mod ttn;

#[cfg(test)]
mod testing;
