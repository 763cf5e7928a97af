//! `posest-middleware` – Sample Transport
//!
//! Moves sensor samples from their drivers to the estimator and estimates
//! back out, without interpreting them.
//!
//! # Modules
//!
//! - [`bus`] – topic-based publish/subscribe bus on Tokio broadcast channels.
//! - [`samples`] – [`SampleCache`][samples::SampleCache]: latest sample per
//!   sensor with freshness tracking, assembled into one
//!   [`MeasurementFrame`][posest_types::MeasurementFrame] per tick.
//! - [`ranging`] – [`RangeFinder`][ranging::RangeFinder] driver trait, range
//!   clamp and the periodic [`SonarEmitter`][ranging::SonarEmitter].
//! - [`sim`] – deterministic simulated sensors.

pub mod bus;
pub mod ranging;
pub mod samples;
pub mod sim;

pub use bus::{SampleBus, Topic, TopicReceiver};
pub use ranging::{RangeFinder, SonarEmitter, clamp_range};
pub use samples::{Freshness, SampleCache, SampleSource};
pub use sim::{SimRangeFinder, SimTrajectory};
