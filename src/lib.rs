//! HAL question broker
//!
//! Accepts plain-language questions for map data, runs each distinct question
//! once in the background, and lets any number of clients poll for the
//! answer. Job state lives in a single JSON document that survives restarts.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
