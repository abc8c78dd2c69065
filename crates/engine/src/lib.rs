//! Storebridge engine library.
//!
//! The store synchronization engine: keeps local catalog/order data
//! consistent with Shopify, WooCommerce, and EasyOrder under per-tenant rate
//! limits, with per-tenant job ordering and crash-recoverable sync state.
//!
//! # Architecture
//!
//! - [`limiter`] - Rate-limited request executor (per-store reservoir + backoff)
//! - [`providers`] - One adapter per external platform behind a single trait
//! - [`queue`] - Durable tenant-ordered job queue
//! - [`worker`] - Bounded dispatch pool draining the queue
//! - [`sync`] - Reconciliation, full-store orchestration, sync lifecycle
//! - [`webhooks`] - Inbound order webhook ingress
//! - [`enqueue`] - The fire-and-forget API the CRUD layer calls into
//!
//! The surrounding application (REST controllers, permission checks,
//! reporting) lives elsewhere and talks to the engine only through
//! [`enqueue::SyncDispatcher`] and the webhook routes.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod enqueue;
pub mod error;
pub mod limiter;
pub mod models;
pub mod providers;
pub mod queue;
pub mod state;
pub mod sync;
pub mod webhooks;
pub mod worker;
