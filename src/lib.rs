//! SACS Credential Verification Service
//!
//! This library provides the core functionality for the sacs-verify system,
//! which verifies health-professional registrations against the Venezuelan
//! SACS public registry by driving its HTML search form with a headless
//! browser.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
