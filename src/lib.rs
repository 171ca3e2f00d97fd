//! Worldguard - Distributed Failed-Attempt Rate Limiting
//!
//! This crate throttles failed shared-secret authentication attempts per
//! `(world, subject)` pair. State lives in a shared external cache, and a
//! TTL-bounded lock in that same cache serializes updates across every
//! service instance. Coordination failures always fail open.

pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
