#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Observability: Prometheus metrics exposed at `/metrics`.

pub mod metrics;
