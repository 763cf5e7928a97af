//! Sonar ranging: driver trait, range clamp, and the periodic emitter.
//!
//! The ranging driver reports one distance per sonar (four in total).  Each
//! reading is clamped into the sensor's usable window before it reaches the
//! bus; the estimator picks the downward-facing element.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use posest_types::{Event, EventPayload, PosestError, SonarConfig};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, trace, warn};

use crate::bus::{SampleBus, Topic};

const SOURCE: &str = "posest-middleware::sonar";

/// A source of four-element ranging vectors, in metres.
pub trait RangeFinder: Send {
    fn id(&self) -> &str;

    /// Take one reading from every sonar.
    fn read(&mut self) -> Result<[f32; 4], PosestError>;
}

/// Clamp one reading into `[min, max]`.
///
/// A non-finite reading (no echo) is reported as `max`.
pub fn clamp_range(value: f32, min: f32, max: f32) -> f32 {
    if !value.is_finite() {
        max
    } else if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// Clamp every element of a ranging vector with the limits in `cfg`.
pub fn clamp_ranges(ranges: [f32; 4], cfg: &SonarConfig) -> [f32; 4] {
    ranges.map(|r| clamp_range(r, cfg.min_range, cfg.max_range))
}

/// Polls a [`RangeFinder`] at a fixed period and publishes on
/// [`Topic::Ranging`].
///
/// A failed read skips that period.
pub struct SonarEmitter {
    finder: Box<dyn RangeFinder>,
    bus: SampleBus,
    config: SonarConfig,
    failures: u64,
}

impl SonarEmitter {
    pub fn new(finder: Box<dyn RangeFinder>, bus: SampleBus, config: SonarConfig) -> Self {
        Self {
            finder,
            bus,
            config,
            failures: 0,
        }
    }

    /// Read, clamp and publish once.  Returns the clamped vector.
    pub fn poll_once(&mut self) -> Result<[f32; 4], PosestError> {
        let raw = self.finder.read().inspect_err(|_| self.failures += 1)?;
        let ranges = clamp_ranges(raw, &self.config);
        let event = Event::new(SOURCE, EventPayload::SonarRanges(ranges));
        if let Err(e) = self.bus.publish_to(Topic::Ranging, event) {
            trace!(error = %e, "ranging sample dropped");
        }
        Ok(ranges)
    }

    /// Number of failed reads so far.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Poll until `shutdown` is set.  Returns the emitter so the caller can
    /// inspect its counters.
    pub async fn run(mut self, shutdown: Arc<AtomicBool>) -> Self {
        let period = Duration::from_millis(self.config.period_ms.max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            finder = self.finder.id(),
            period_ms = period.as_millis() as u64,
            "sonar emitter started"
        );

        while !shutdown.load(Ordering::Acquire) {
            ticker.tick().await;
            match self.poll_once() {
                Ok(ranges) => debug!(?ranges, "ranging sample"),
                Err(e) => warn!(finder = self.finder.id(), error = %e, "ranging read failed"),
            }
        }
        info!(failures = self.failures, "sonar emitter stopped");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays a fixed script of readings, then repeats the last one.
    struct ScriptedFinder {
        script: Vec<Result<[f32; 4], PosestError>>,
        cursor: usize,
    }

    impl RangeFinder for ScriptedFinder {
        fn id(&self) -> &str {
            "scripted"
        }

        fn read(&mut self) -> Result<[f32; 4], PosestError> {
            let i = self.cursor.min(self.script.len() - 1);
            self.cursor += 1;
            self.script[i].clone()
        }
    }

    #[test]
    fn clamp_limits_readings() {
        assert_eq!(clamp_range(0.05, 0.2, 5.0), 0.2);
        assert_eq!(clamp_range(7.5, 0.2, 5.0), 5.0);
        assert_eq!(clamp_range(1.25, 0.2, 5.0), 1.25);
        assert_eq!(clamp_range(f32::NAN, 0.2, 5.0), 5.0);
        assert_eq!(
            clamp_ranges([0.0, 1.0, 9.0, 0.2], &SonarConfig::default()),
            [0.2, 1.0, 5.0, 0.2]
        );
    }

    #[tokio::test]
    async fn poll_once_publishes_clamped_vector() -> Result<(), Box<dyn std::error::Error>> {
        let bus = SampleBus::default();
        let mut rx = bus.subscribe_to(Topic::Ranging);
        let finder = ScriptedFinder {
            script: vec![Ok([0.1, 2.0, 6.0, 3.0])],
            cursor: 0,
        };
        let mut emitter = SonarEmitter::new(Box::new(finder), bus, SonarConfig::default());

        assert_eq!(emitter.poll_once()?, [0.2, 2.0, 5.0, 3.0]);
        match rx.recv().await?.payload {
            EventPayload::SonarRanges(r) => assert_eq!(r, [0.2, 2.0, 5.0, 3.0]),
            other => panic!("unexpected payload {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn failed_read_is_counted_and_not_published() {
        let bus = SampleBus::default();
        let mut rx = bus.subscribe_to(Topic::Ranging);
        let finder = ScriptedFinder {
            script: vec![Err(PosestError::Ranging("i2c nack".into()))],
            cursor: 0,
        };
        let mut emitter = SonarEmitter::new(Box::new(finder), bus, SonarConfig::default());
        assert!(emitter.poll_once().is_err());
        assert_eq!(emitter.failures(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn run_survives_failures_until_shutdown() {
        let bus = SampleBus::default();
        let mut rx = bus.subscribe_to(Topic::Ranging);
        let finder = ScriptedFinder {
            script: vec![Err(PosestError::Ranging("timeout".into())), Ok([1.0; 4])],
            cursor: 0,
        };
        let config = SonarConfig {
            period_ms: 2,
            ..SonarConfig::default()
        };
        let shutdown = Arc::new(AtomicBool::new(false));
        let emitter = SonarEmitter::new(Box::new(finder), bus, config);
        let handle = tokio::spawn(emitter.run(shutdown.clone()));

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("emitter must publish after a failed read")
            .expect("bus open");
        assert!(matches!(event.payload, EventPayload::SonarRanges(_)));

        shutdown.store(true, Ordering::Release);
        let emitter = handle.await.expect("emitter task panicked");
        assert_eq!(emitter.failures(), 1);
    }
}
