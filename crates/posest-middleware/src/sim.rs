//! Simulated sensors for running the estimator without hardware.
//!
//! [`SimTrajectory`] describes a vehicle moving at constant horizontal
//! velocity and climb rate.  It produces deterministic GPS, barometer and
//! acceleration samples, and [`SimRangeFinder`] serves the matching sonar
//! vector through the [`RangeFinder`] trait.
//!
//! # Example
//!
//! ```rust
//! use posest_middleware::sim::SimTrajectory;
//!
//! let traj = SimTrajectory::new(1.0, 0.0, 0.5).with_start_altitude(2.0);
//! let s = traj.sample_at(2.0);
//! assert_eq!(s.gps.pos_n, 2.0);
//! assert_eq!(s.baro_u, 3.0);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use posest_types::{Event, EventPayload, GpsFix, Neu, PosestError};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, trace};

use crate::bus::{SampleBus, Topic};
use crate::ranging::RangeFinder;

const SOURCE: &str = "posest-middleware::sim";

/// One instant of simulated sensor output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimSample {
    pub gps: GpsFix,
    pub baro_u: f32,
    /// Height above ground seen by the downward sonar.
    pub ground_range: f32,
    pub accel: Neu,
}

/// Constant-velocity trajectory starting at the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimTrajectory {
    speed_n: f32,
    speed_e: f32,
    climb_rate: f32,
    start_altitude: f32,
    ground_altitude: f32,
}

impl SimTrajectory {
    pub fn new(speed_n: f32, speed_e: f32, climb_rate: f32) -> Self {
        Self {
            speed_n,
            speed_e,
            climb_rate,
            start_altitude: 0.0,
            ground_altitude: 0.0,
        }
    }

    /// Barometric altitude at `t = 0`.
    pub fn with_start_altitude(mut self, altitude: f32) -> Self {
        self.start_altitude = altitude;
        self
    }

    /// Terrain height under the vehicle, in barometric metres.
    pub fn with_ground_altitude(mut self, altitude: f32) -> Self {
        self.ground_altitude = altitude;
        self
    }

    /// Sensor output `t` seconds after start.
    pub fn sample_at(&self, t: f32) -> SimSample {
        let altitude = self.start_altitude + self.climb_rate * t;
        SimSample {
            gps: GpsFix {
                pos_n: self.speed_n * t,
                pos_e: self.speed_e * t,
                speed_n: self.speed_n,
                speed_e: self.speed_e,
            },
            baro_u: altitude,
            ground_range: altitude - self.ground_altitude,
            accel: Neu::ZERO,
        }
    }

    /// Publish GPS, barometer and acceleration samples for time `t`.
    /// Returns how many topics had at least one subscriber.
    pub fn publish_at(&self, bus: &SampleBus, t: f32) -> usize {
        let s = self.sample_at(t);
        [
            (Topic::Position, EventPayload::GpsFix(s.gps)),
            (Topic::Altitude, EventPayload::BaroAltitude(s.baro_u)),
            (Topic::Acceleration, EventPayload::Acceleration(s.accel)),
        ]
        .into_iter()
        .filter(|(topic, payload)| {
            bus.publish_to(*topic, Event::new(SOURCE, payload.clone()))
                .is_ok()
        })
        .count()
    }

    /// Publish samples every `period` until `shutdown` is set.  Sonar
    /// samples are left to a [`SonarEmitter`][crate::ranging::SonarEmitter]
    /// driving a [`SimRangeFinder`].
    pub async fn drive(self, bus: SampleBus, period: Duration, shutdown: Arc<AtomicBool>) {
        let started = Instant::now();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(trajectory = ?self, "simulated sensors started");

        while !shutdown.load(Ordering::Acquire) {
            ticker.tick().await;
            let t = started.elapsed().as_secs_f32();
            let delivered = self.publish_at(&bus, t);
            trace!(t, delivered, "simulated samples published");
        }
    }
}

/// Sonar array following a [`SimTrajectory`] in real time.
///
/// The downward sonar sees the height above ground; the others see no echo.
pub struct SimRangeFinder {
    trajectory: SimTrajectory,
    started: Instant,
    down_index: usize,
}

impl SimRangeFinder {
    pub fn new(trajectory: SimTrajectory, down_index: usize) -> Self {
        Self {
            trajectory,
            started: Instant::now(),
            down_index: down_index.min(3),
        }
    }

    /// Ranging vector `t` seconds after start.
    pub fn ranges_at(&self, t: f32) -> [f32; 4] {
        let mut ranges = [f32::INFINITY; 4];
        ranges[self.down_index] = self.trajectory.sample_at(t).ground_range;
        ranges
    }
}

impl RangeFinder for SimRangeFinder {
    fn id(&self) -> &str {
        "sim_sonar"
    }

    fn read(&mut self) -> Result<[f32; 4], PosestError> {
        Ok(self.ranges_at(self.started.elapsed().as_secs_f32()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranging::clamp_ranges;
    use posest_types::SonarConfig;

    #[test]
    fn trajectory_is_linear_in_time() {
        let traj = SimTrajectory::new(2.0, -1.0, 0.25).with_start_altitude(10.0);
        let s = traj.sample_at(4.0);
        assert_eq!(s.gps.pos_n, 8.0);
        assert_eq!(s.gps.pos_e, -4.0);
        assert_eq!(s.gps.speed_n, 2.0);
        assert_eq!(s.baro_u, 11.0);
        assert_eq!(s.accel, Neu::ZERO);
    }

    #[test]
    fn ground_range_is_relative_to_terrain() {
        let traj = SimTrajectory::new(0.0, 0.0, 0.0)
            .with_start_altitude(101.5)
            .with_ground_altitude(100.0);
        assert!((traj.sample_at(0.0).ground_range - 1.5).abs() < 1e-6);
    }

    #[test]
    fn range_finder_fills_down_element_only() {
        let traj = SimTrajectory::new(0.0, 0.0, 0.0).with_start_altitude(1.2);
        let finder = SimRangeFinder::new(traj, 1);
        let ranges = finder.ranges_at(0.0);
        assert_eq!(ranges[1], 1.2);
        assert_eq!(
            clamp_ranges(ranges, &SonarConfig::default()),
            [5.0, 1.2, 5.0, 5.0]
        );
    }

    #[tokio::test]
    async fn publish_reaches_subscribed_topics() -> Result<(), Box<dyn std::error::Error>> {
        let bus = SampleBus::default();
        let mut pos = bus.subscribe_to(Topic::Position);
        let _alt = bus.subscribe_to(Topic::Altitude);

        let traj = SimTrajectory::new(1.0, 0.0, 0.0);
        assert_eq!(traj.publish_at(&bus, 3.0), 2);
        match pos.recv().await?.payload {
            EventPayload::GpsFix(fix) => assert_eq!(fix.pos_n, 3.0),
            other => panic!("unexpected payload {other:?}"),
        }
        Ok(())
    }
}
