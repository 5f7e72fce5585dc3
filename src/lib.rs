// src/lib.rs

//! Presence sync library
//!
//! Mirrors a social/presence service into local entity caches, kept current
//! by paginated reconciliation passes and a push event stream.

pub mod api;
pub mod bus;
pub mod cache;
pub mod error;
pub mod location;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod services;
pub mod storage;
