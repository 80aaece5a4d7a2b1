//! Charge point control core: connector state machines, tag authorization
//! and smart charging limits.

pub mod auth;
pub mod config;
pub mod controller;
pub mod domain;
pub mod evse;
pub mod hardware;
pub mod repo;
pub mod smart_charging;
pub mod telemetry;
