//! Domain types - core business entities
//!
//! This module contains the canonical domain types used throughout the application.
//! These types are independent of the bus and hosting-API clients that carry them.

pub mod clone_url;
pub mod config;
pub mod record;
