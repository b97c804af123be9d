#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod dashboard;
pub mod error;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Environment variable read by the bundled demo for the server endpoint.
pub const ENDPOINT_VAR: &str = "DASHBOARD_WS_URL";

/// Endpoint the dashboard server listens on when run locally.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8000/ws";
