//! `posest-runtime` – Estimator Service
//!
//! Drives the estimation core at a fixed rate from live bus samples.
//!
//! # Modules
//!
//! - [`estimator`] – [`EstimatorService`][estimator::EstimatorService]:
//!   drains sensor topics, assembles one frame per tick, runs the
//!   [`EstimationCycle`][posest_filter::EstimationCycle] and publishes the
//!   estimate and any channel faults.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   installs the global `tracing` subscriber, with OTLP span export when
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

pub mod estimator;
pub mod telemetry;

pub use estimator::{DEGENERATE_UPDATE_CODE, EstimatorService, EstimatorSettings};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
