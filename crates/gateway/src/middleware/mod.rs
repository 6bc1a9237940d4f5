//! Middleware modules

pub mod metrics;
