//! [`EstimatorService`] – the fixed-rate estimation loop.
//!
//! Each tick:
//!
//! 1. **Drain** – every sample already waiting on the input topics is moved
//!    into the [`SampleCache`] without blocking.
//! 2. **Assemble** – `dt` is taken from a monotonic clock (`0` on the first
//!    tick) and the cache builds the [`MeasurementFrame`].
//! 3. **Estimate** – the [`EstimationCycle`] advances all four channels.
//! 4. **Publish** – the estimate goes out on [`Topic::Estimate`]; channels that
//!    skipped their correction are reported on [`Topic::Faults`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use posest_filter::{
    BaroDeltaGate, EstimationCycle, FilterBank, NoiseParameterStore, TickOutcome,
};
use posest_middleware::{Freshness, SampleBus, SampleCache, Topic, TopicReceiver};
use posest_types::{Channel, EstimateFrame, Event, EventPayload, PosestError, SonarConfig};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, trace, warn};

const SOURCE: &str = "posest-runtime::estimator";

/// Fault code carried by [`EventPayload::ChannelFault`] for a skipped
/// correction.
pub const DEGENERATE_UPDATE_CODE: u32 = 1;

/// Construction-time settings of the service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorSettings {
    /// When set, installs a [`BaroDeltaGate`] with this ratio.
    pub ultra_outlier_ratio: Option<f32>,
    /// Ranging limits and the index of the downward sonar.
    pub sonar: SonarConfig,
    pub freshness: Freshness,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            ultra_outlier_ratio: None,
            sonar: SonarConfig::default(),
            freshness: Freshness::default(),
        }
    }
}

/// Owns the estimation state and its bus endpoints.
pub struct EstimatorService {
    cycle: EstimationCycle,
    cache: SampleCache,
    bus: SampleBus,
    inputs: Vec<TopicReceiver>,
    last_tick: Option<Instant>,
    dropped_samples: u64,
}

impl EstimatorService {
    /// Build and initialize the filter bank, then subscribe to every input
    /// topic on `bus`.
    pub fn new(
        params: Arc<NoiseParameterStore>,
        bus: SampleBus,
        settings: EstimatorSettings,
    ) -> Result<Self, PosestError> {
        let mut bank = FilterBank::new(params);
        bank.initialize()?;
        let mut cycle = EstimationCycle::new(bank)?;
        if let Some(ratio) = settings.ultra_outlier_ratio {
            info!(ratio, "ultrasonic outlier gate enabled");
            cycle = cycle.with_ultra_pre_filter(Box::new(BaroDeltaGate::new(ratio)));
        }

        let inputs = Topic::INPUTS
            .into_iter()
            .map(|topic| bus.subscribe_to(topic))
            .collect();

        Ok(Self {
            cycle,
            cache: SampleCache::new(settings.freshness, &settings.sonar),
            bus,
            inputs,
            last_tick: None,
            dropped_samples: 0,
        })
    }

    /// Run one tick now.
    pub fn tick(&mut self) -> TickOutcome {
        self.tick_at(Instant::now())
    }

    /// Run one tick as if the clock read `now`.
    pub fn tick_at(&mut self, now: Instant) -> TickOutcome {
        self.drain_inputs(now);

        let dt = self
            .last_tick
            .map_or(0.0, |prev| now.saturating_duration_since(prev).as_secs_f32());
        self.last_tick = Some(now);

        let frame = self.cache.assemble_at(dt, now);
        let outcome = self.cycle.update(&frame);

        debug!(
            tick = self.cycle.ticks(),
            dt,
            pos_n = outcome.estimate.ne_pos.n,
            pos_e = outcome.estimate.ne_pos.e,
            baro_u = outcome.estimate.baro_u.pos,
            ultra_u = outcome.estimate.ultra_u.pos,
            "estimate"
        );
        self.publish(&outcome);
        outcome
    }

    /// Tick every `period` until `shutdown` is set or `max_ticks` ticks have
    /// run.  Returns the number of ticks run.
    pub async fn run(
        &mut self,
        period: Duration,
        shutdown: Arc<AtomicBool>,
        max_ticks: Option<u64>,
    ) -> u64 {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_ms = period.as_millis() as u64, ?max_ticks, "estimator started");

        let mut ran = 0u64;
        while !shutdown.load(Ordering::Acquire) && max_ticks.is_none_or(|max| ran < max) {
            ticker.tick().await;
            self.tick();
            ran += 1;
        }

        info!(
            ticks = ran,
            dropped_samples = self.dropped_samples,
            faults_north = self.fault_count(Channel::North),
            faults_east = self.fault_count(Channel::East),
            faults_baro = self.fault_count(Channel::BaroUp),
            faults_ultra = self.fault_count(Channel::UltraUp),
            "estimator stopped"
        );
        ran
    }

    /// Latest estimate.
    pub fn estimate(&self) -> EstimateFrame {
        self.cycle.estimate()
    }

    /// Skipped corrections on `channel` since start.
    pub fn fault_count(&self, channel: Channel) -> u64 {
        self.cycle.fault_count(channel)
    }

    /// Samples lost because this service fell behind a sensor.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }

    pub fn params(&self) -> &Arc<NoiseParameterStore> {
        self.cycle.bank().params()
    }

    pub fn bus(&self) -> &SampleBus {
        &self.bus
    }

    // ────────────────────────────────────────────────────────────────────────
    // Private helpers
    // ────────────────────────────────────────────────────────────────────────

    fn drain_inputs(&mut self, now: Instant) {
        for rx in &mut self.inputs {
            loop {
                match rx.try_recv() {
                    Ok(event) => {
                        self.cache.ingest_at(&event.payload, now);
                    }
                    Err(TryRecvError::Lagged(n)) => {
                        warn!(topic = ?rx.topic(), lagged_by = n, "estimator fell behind");
                        self.dropped_samples += n;
                    }
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
        }
    }

    fn publish(&self, outcome: &TickOutcome) {
        let estimate = Event::new(SOURCE, EventPayload::Estimate(outcome.estimate));
        if let Err(e) = self.bus.publish_to(Topic::Estimate, estimate) {
            trace!(error = %e, "estimate not delivered");
        }

        for channel in outcome.faults.iter() {
            let fault = Event::new(
                SOURCE,
                EventPayload::ChannelFault {
                    channel,
                    code: DEGENERATE_UPDATE_CODE,
                    message: PosestError::DegenerateUpdate { channel }.to_string(),
                },
            );
            if let Err(e) = self.bus.publish_to(Topic::Faults, fault) {
                trace!(error = %e, "fault not delivered");
            }
        }
    }
}
