//! Domain models and utilities for the feed server.
//!
//! This module groups the state used by the command receiver, the per-client stream
//! threads and the background generator:
//! - `board` — latest generated quote per symbol, read by snapshot requests.
//! - `ping_monitor` — in-memory keep-alive tracker for client timeouts.
//! - `generator` — background quote/option-chain generator and event broadcasting.

pub mod board;
pub mod generator;
pub mod ping_monitor;
