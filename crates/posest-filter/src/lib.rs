//! `posest-filter` – Estimation Core
//!
//! Four independent constant-velocity Kalman filters, one per axis and
//! sensor, advanced together once per tick.
//!
//! # Modules
//!
//! - [`kalman`] – [`ScalarKalmanFilter`][kalman::ScalarKalmanFilter]:
//!   a 2-state (position, velocity) filter driven by acceleration, with an
//!   optional velocity observation.
//! - [`params`] – [`NoiseParameterStore`][params::NoiseParameterStore]:
//!   lock-free store for the noise values and the `use_gps_speed` flag,
//!   shared with the configuration reload path.
//! - [`bank`] – [`FilterBank`][bank::FilterBank]:
//!   owns the four filters and binds each to its noise parameter.
//! - [`outlier`] – [`UltraPreFilter`][outlier::UltraPreFilter]:
//!   hook for substituting implausible ultrasonic samples.
//! - [`cycle`] – [`EstimationCycle`][cycle::EstimationCycle]:
//!   runs one tick over all channels and assembles the
//!   [`EstimateFrame`][posest_types::EstimateFrame].

pub mod bank;
pub mod cycle;
pub mod kalman;
pub mod outlier;
pub mod params;

pub use bank::{FilterBank, SpeedBinding};
pub use cycle::{EstimationCycle, SoftFaults, TickOutcome};
pub use kalman::{CorrectionError, ScalarKalmanFilter};
pub use outlier::{BaroDeltaGate, PassThrough, UltraContext, UltraPreFilter};
pub use params::{NoiseParam, NoiseParameterStore, ParamValue};
