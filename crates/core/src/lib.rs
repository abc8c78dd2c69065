//! Storebridge Core - Shared types library.
//!
//! This crate provides common types used across all Storebridge components:
//! - `engine` - The store synchronization engine (worker pool + webhook ingress)
//! - `cli` - Command-line tools for migrations and management
//!
//! # Architecture
//!
//! The core crate contains only types and pure logic - no I/O, no database
//! access, no HTTP clients. This keeps it lightweight and allows it to be
//! used anywhere, including the CRUD layer of a wrapping application that
//! only needs to enqueue sync work.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, provider/status enums,
//!   natural-key derivation, and the unified webhook payload shapes

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
