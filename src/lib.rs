//! # deferq
//!
//! Durable background upload queue.
//!
//! Captures are appended to a persisted FIFO queue (SQLite) the moment they
//! are taken. A background task, woken by a host scheduler, delivers at most
//! one item per run to a remote classification endpoint and removes it only
//! once delivery is confirmed. Items survive restarts, crashes, and failed
//! deliveries; delivery is at-least-once.

pub mod config;
pub mod db;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod model;
pub mod scheduler;
pub mod store;
pub mod telemetry;
