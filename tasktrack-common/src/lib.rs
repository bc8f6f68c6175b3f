//! # Task Tracker Common Library
//!
//! Shared code for the task-tracker pipeline services:
//! - Broker abstraction, connection manager and retry policy
//! - Event publisher and log side-channel publisher
//! - Generic consume loop used by every queue consumer
//! - Event envelopes, routing key catalog and shared domain enums
//! - Deadline status derivation
//! - Configuration loading, database bootstrap, HTTP helpers

pub mod api;
pub mod backoff;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod db;
pub mod deadline;
pub mod error;
pub mod events;
pub mod logchannel;
pub mod publisher;
pub mod status_mirror;
pub mod time;

pub use error::{Error, Result};
