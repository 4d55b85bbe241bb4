//! Common library for the sandbox platform services
//!
//! This crate provides shared infrastructure used across services:
//! PostgreSQL connection pooling, the Redis connection wrapper, and
//! shared error types.

pub mod cache;
pub mod database;
pub mod error;
