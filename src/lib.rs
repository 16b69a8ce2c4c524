//! tiergate - entitlement and payment confirmation for tiered content
//!
//! Decides which content tiers a caller may access from their session,
//! trial window and paid status, and confirms upgrades against an external
//! payment gateway.

pub mod api;
pub mod config;
pub mod db;
pub mod gateway;
pub mod models;
pub mod services;
