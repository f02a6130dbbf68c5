// Library root - exposes modules for the binary and integration tests

pub mod alerting;
pub mod api;
pub mod auth;
pub mod backoff;
pub mod config;
pub mod error;
pub mod lockdown;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod monitor;
pub mod notify;
pub mod runtime;
pub mod status;
pub mod stomp;
pub mod stream;
pub mod subject;
pub mod subscription;
pub mod window;
