//! [`SampleCache`] – latest sample per sensor, with freshness tracking.
//!
//! Sensors publish at their own rates; the estimator ticks at a fixed rate.
//! The cache keeps the most recent sample from each [`SampleSource`] together
//! with its arrival instant and turns them into one
//! [`MeasurementFrame`] per tick with [`SampleCache::assemble`].
//!
//! A source is *stale* once its timeout has elapsed since the last sample.
//! Stale sources are treated as follows:
//!
//! | Source | Stale or never seen |
//! |---|---|
//! | GPS | positions hold the last fix (0 before the first), velocity is 0 |
//! | Barometer | holds the last altitude |
//! | Sonar | holds the last range (`max_range` before the first) |
//! | Acceleration | 0 |
//!
//! A zero GPS velocity disables the velocity observation for that tick.

use std::time::{Duration, Instant};

use posest_types::{EventPayload, GpsFix, MeasurementFrame, Neu, SonarConfig};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleSource {
    Gps,
    Baro,
    Sonar,
    Accel,
}

impl SampleSource {
    pub const ALL: [SampleSource; 4] = [
        SampleSource::Gps,
        SampleSource::Baro,
        SampleSource::Sonar,
        SampleSource::Accel,
    ];
}

/// Per-source freshness timeouts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Freshness {
    pub gps: Duration,
    pub baro: Duration,
    pub sonar: Duration,
    pub accel: Duration,
}

impl Default for Freshness {
    fn default() -> Self {
        Self {
            gps: Duration::from_millis(1_000),
            baro: Duration::from_millis(250),
            sonar: Duration::from_millis(150),
            accel: Duration::from_millis(100),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Internal entry
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Stamped<T> {
    value: T,
    received: Option<Instant>,
    timeout: Duration,
}

impl<T> Stamped<T> {
    fn seeded(value: T, timeout: Duration) -> Self {
        Self {
            value,
            received: None,
            timeout,
        }
    }

    fn set(&mut self, value: T, now: Instant) {
        self.value = value;
        self.received = Some(now);
    }

    fn is_fresh(&self, now: Instant) -> bool {
        self.received
            .is_some_and(|at| now.saturating_duration_since(at) <= self.timeout)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SampleCache
// ────────────────────────────────────────────────────────────────────────────

/// Latest-sample store feeding the estimation cycle.
///
/// # Example
///
/// ```
/// use posest_middleware::samples::SampleCache;
/// use posest_types::{EventPayload, GpsFix};
///
/// let mut cache = SampleCache::default();
/// cache.ingest(&EventPayload::GpsFix(GpsFix { pos_n: 4.0, speed_n: 1.0, ..Default::default() }));
/// cache.ingest(&EventPayload::SonarRanges([0.8, 5.0, 5.0, 5.0]));
///
/// let frame = cache.assemble(0.01);
/// assert_eq!(frame.pos_n, 4.0);
/// assert_eq!(frame.speed_n, 1.0);
/// assert_eq!(frame.ultra_u, 0.8);
/// ```
#[derive(Debug, Clone)]
pub struct SampleCache {
    gps: Stamped<GpsFix>,
    baro: Stamped<f32>,
    sonar: Stamped<[f32; 4]>,
    accel: Stamped<Neu>,
    down_index: usize,
}

impl SampleCache {
    /// `sonar.down_index` selects the downward-facing element of the
    /// ranging vector; out-of-range indices fall back to element 0.  Until
    /// the first ranging sample arrives every element reads
    /// `sonar.max_range`, the same value a missing echo clamps to.
    pub fn new(freshness: Freshness, sonar: &SonarConfig) -> Self {
        let down_index = if sonar.down_index < 4 {
            sonar.down_index
        } else {
            0
        };
        Self {
            gps: Stamped::seeded(GpsFix::default(), freshness.gps),
            baro: Stamped::seeded(0.0, freshness.baro),
            sonar: Stamped::seeded([sonar.max_range; 4], freshness.sonar),
            accel: Stamped::seeded(Neu::ZERO, freshness.accel),
            down_index,
        }
    }

    /// Store `payload` if it is an estimator input.  Returns `false` for
    /// payloads the cache does not consume.
    pub fn ingest(&mut self, payload: &EventPayload) -> bool {
        self.ingest_at(payload, Instant::now())
    }

    pub fn ingest_at(&mut self, payload: &EventPayload, now: Instant) -> bool {
        match payload {
            EventPayload::GpsFix(fix) => self.gps.set(*fix, now),
            EventPayload::BaroAltitude(alt) => self.baro.set(*alt, now),
            EventPayload::SonarRanges(ranges) => self.sonar.set(*ranges, now),
            EventPayload::Acceleration(accel) => self.accel.set(*accel, now),
            _ => return false,
        }
        true
    }

    /// Build the frame for a tick of length `dt`.
    pub fn assemble(&self, dt: f32) -> MeasurementFrame {
        self.assemble_at(dt, Instant::now())
    }

    pub fn assemble_at(&self, dt: f32, now: Instant) -> MeasurementFrame {
        let fix = self.gps.value;
        let (speed_n, speed_e) = if self.gps.is_fresh(now) {
            (fix.speed_n, fix.speed_e)
        } else {
            (0.0, 0.0)
        };
        let accel = if self.accel.is_fresh(now) {
            self.accel.value
        } else {
            Neu::ZERO
        };

        MeasurementFrame {
            pos_n: fix.pos_n,
            pos_e: fix.pos_e,
            speed_n,
            speed_e,
            baro_u: self.baro.value,
            ultra_u: self.sonar.value[self.down_index],
            accel,
            dt,
        }
    }

    pub fn is_fresh(&self, source: SampleSource) -> bool {
        self.is_fresh_at(source, Instant::now())
    }

    pub fn is_fresh_at(&self, source: SampleSource, now: Instant) -> bool {
        match source {
            SampleSource::Gps => self.gps.is_fresh(now),
            SampleSource::Baro => self.baro.is_fresh(now),
            SampleSource::Sonar => self.sonar.is_fresh(now),
            SampleSource::Accel => self.accel.is_fresh(now),
        }
    }

    /// Sources whose timeout has elapsed, in [`SampleSource::ALL`] order.
    pub fn stale_sources(&self) -> Vec<SampleSource> {
        let now = Instant::now();
        SampleSource::ALL
            .into_iter()
            .filter(|s| !self.is_fresh_at(*s, now))
            .collect()
    }
}

impl Default for SampleCache {
    fn default() -> Self {
        Self::new(Freshness::default(), &SonarConfig::default())
    }
}
