// crates/toolhost-config/src/lib.rs
// ============================================================================
// Module: Toolhost Config Library
// Description: Canonical config model and validation.
// Purpose: Single source of truth for toolhost.toml semantics.
// Dependencies: serde, serde_json, toml
// ============================================================================

//! ## Overview
//! `toolhost-config` defines the configuration model for the tool host:
//! authorization identities, rate limits, cache sizing, audit retention,
//! pipeline timeouts, plugin discovery, and logging. Validation is strict and
//! fails closed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
