//! [`EstimationCycle`] – one estimator tick.
//!
//! Runs the four channels in a fixed order (north, east, baro, ultra) and
//! assembles the [`EstimateFrame`].  The channels share no data, so the order
//! only matters for reproducible logs.
//!
//! A channel whose correction is degenerate keeps its predicted state for the
//! tick and is reported in [`TickOutcome::faults`]; the other channels are
//! unaffected.

use posest_types::{Channel, EstimateFrame, MeasurementFrame, NePair, PosestError};
use tracing::{trace, warn};

use crate::bank::FilterBank;
use crate::outlier::{PassThrough, UltraContext, UltraPreFilter};

// ────────────────────────────────────────────────────────────────────────────
// Soft faults
// ────────────────────────────────────────────────────────────────────────────

/// Set of channels that skipped their correction on one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftFaults(u8);

impl SoftFaults {
    pub fn insert(&mut self, channel: Channel) {
        self.0 |= 1 << channel.index();
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.0 & (1 << channel.index()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Faulted channels in run order.
    pub fn iter(&self) -> impl Iterator<Item = Channel> + '_ {
        Channel::ALL.into_iter().filter(|ch| self.contains(*ch))
    }
}

/// Result of one [`EstimationCycle::update`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    pub estimate: EstimateFrame,
    pub faults: SoftFaults,
}

// ────────────────────────────────────────────────────────────────────────────
// EstimationCycle
// ────────────────────────────────────────────────────────────────────────────

/// Per-tick orchestrator over an initialized [`FilterBank`].
///
/// Not reentrant: `update` takes `&mut self`, so the borrow checker enforces
/// the single-caller contract.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use posest_filter::{EstimationCycle, FilterBank, NoiseParameterStore};
/// use posest_types::MeasurementFrame;
///
/// let mut bank = FilterBank::new(Arc::new(NoiseParameterStore::default()));
/// bank.initialize().unwrap();
/// let mut cycle = EstimationCycle::new(bank).unwrap();
///
/// let frame = MeasurementFrame { pos_n: 1.0, ultra_u: 0.5, dt: 0.01, ..Default::default() };
/// let outcome = cycle.update(&frame);
/// assert!(outcome.faults.is_empty());
/// assert!(outcome.estimate.ne_pos.n > 0.0);
/// ```
pub struct EstimationCycle {
    bank: FilterBank,
    ultra_filter: Box<dyn UltraPreFilter>,
    prev_baro_est: f32,
    prev_ultra_est: f32,
    fault_counts: [u64; 4],
    ticks: u64,
}

impl EstimationCycle {
    /// Wrap an initialized bank.  The ultrasonic pre-filter is
    /// [`PassThrough`].
    ///
    /// # Errors
    ///
    /// [`PosestError::NotInitialized`] if `bank` has not been initialized.
    pub fn new(bank: FilterBank) -> Result<Self, PosestError> {
        if !bank.is_initialized() {
            return Err(PosestError::NotInitialized);
        }
        Ok(Self {
            bank,
            ultra_filter: Box::new(PassThrough),
            prev_baro_est: 0.0,
            prev_ultra_est: 0.0,
            fault_counts: [0; 4],
            ticks: 0,
        })
    }

    /// Install a different ultrasonic pre-filter.
    pub fn with_ultra_pre_filter(mut self, filter: Box<dyn UltraPreFilter>) -> Self {
        self.ultra_filter = filter;
        self
    }

    /// Advance every channel by one tick.
    ///
    /// `frame.dt` must be `>= 0` (see [`MeasurementFrame::validate`]).
    pub fn update(&mut self, frame: &MeasurementFrame) -> TickOutcome {
        let mut faults = SoftFaults::default();

        let (dt, accel) = (frame.dt, frame.accel);
        self.run_channel(Channel::North, frame.pos_n, frame.speed_n, accel.n, dt, &mut faults);
        self.run_channel(Channel::East, frame.pos_e, frame.speed_e, accel.e, dt, &mut faults);
        self.run_channel(Channel::BaroUp, frame.baro_u, 0.0, accel.u, dt, &mut faults);

        let ultra_u = self.ultra_filter.apply(&UltraContext {
            ultra_u: frame.ultra_u,
            baro_u: frame.baro_u,
            prev_ultra_est: self.prev_ultra_est,
            prev_baro_est: self.prev_baro_est,
        });
        if ultra_u != frame.ultra_u {
            trace!(
                filter = self.ultra_filter.name(),
                measured = frame.ultra_u,
                substituted = ultra_u,
                "ultrasonic sample replaced"
            );
        }
        self.run_channel(Channel::UltraUp, ultra_u, 0.0, accel.u, dt, &mut faults);

        let estimate = self.estimate();
        self.prev_baro_est = estimate.baro_u.pos;
        self.prev_ultra_est = estimate.ultra_u.pos;
        self.ticks += 1;

        TickOutcome { estimate, faults }
    }

    /// Current estimate assembled from the filter states.
    pub fn estimate(&self) -> EstimateFrame {
        let north = self.bank.channel_state(Channel::North);
        let east = self.bank.channel_state(Channel::East);
        EstimateFrame {
            ne_pos: NePair {
                n: north.pos,
                e: east.pos,
            },
            ne_speed: NePair {
                n: north.speed,
                e: east.speed,
            },
            baro_u: self.bank.channel_state(Channel::BaroUp),
            ultra_u: self.bank.channel_state(Channel::UltraUp),
        }
    }

    /// Total skipped corrections on `channel` since construction.
    pub fn fault_count(&self, channel: Channel) -> u64 {
        self.fault_counts[channel.index()]
    }

    /// Number of completed ticks.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn bank(&self) -> &FilterBank {
        &self.bank
    }

    fn run_channel(
        &mut self,
        channel: Channel,
        position: f32,
        speed: f32,
        accel: f32,
        dt: f32,
        faults: &mut SoftFaults,
    ) {
        if let Err(e) = self.bank.step(channel, position, speed, accel, dt) {
            // Log only the first degenerate correction per channel.
            let first = self.fault_counts[channel.index()] == 0;
            if first || !matches!(e, PosestError::DegenerateUpdate { .. }) {
                warn!(%channel, error = %e, tick = self.ticks, "channel fell back to prediction");
            }
            self.fault_counts[channel.index()] += 1;
            faults.insert(channel);
        }
    }
}
