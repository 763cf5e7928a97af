//! [`FilterBank`] – the four channel filters and their parameter bindings.
//!
//! | Channel | Measurement noise | Velocity observations |
//! |---|---|---|
//! | [`Channel::North`] | `gps_noise` | when `use_gps_speed` is set |
//! | [`Channel::East`] | `gps_noise` | when `use_gps_speed` is set |
//! | [`Channel::BaroUp`] | `baro_noise` | never |
//! | [`Channel::UltraUp`] | `ultra_noise` | never |
//!
//! Every channel uses `process_noise`.  Parameters are read from the shared
//! [`NoiseParameterStore`] on every step, so a reload takes effect on the
//! next tick.

use std::sync::Arc;

use posest_types::{Channel, PosSpeed, PosestError};
use tracing::{debug, info};

use crate::kalman::ScalarKalmanFilter;
use crate::params::{NoiseParam, NoiseParameterStore};

/// How a channel decides whether it may observe velocity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedBinding {
    /// Never use a velocity measurement.
    Never,
    /// Follow the live `use_gps_speed` flag.
    UseGpsSpeed,
}

/// Parameter binding of a channel.
pub fn binding_for(channel: Channel) -> (NoiseParam, SpeedBinding) {
    match channel {
        Channel::North | Channel::East => (NoiseParam::GpsNoise, SpeedBinding::UseGpsSpeed),
        Channel::BaroUp => (NoiseParam::BaroNoise, SpeedBinding::Never),
        Channel::UltraUp => (NoiseParam::UltraNoise, SpeedBinding::Never),
    }
}

#[derive(Debug, Clone)]
struct Slot {
    channel: Channel,
    filter: ScalarKalmanFilter,
    noise: NoiseParam,
    speed: SpeedBinding,
}

impl Slot {
    fn new(channel: Channel, params: &NoiseParameterStore) -> Self {
        let (noise, speed) = binding_for(channel);
        let use_speed = match speed {
            SpeedBinding::Never => false,
            SpeedBinding::UseGpsSpeed => params.use_gps_speed(),
        };
        Self {
            channel,
            filter: ScalarKalmanFilter::new(use_speed),
            noise,
            speed,
        }
    }
}

/// Owns one [`ScalarKalmanFilter`] per [`Channel`].
///
/// Construct with [`FilterBank::new`], then call [`FilterBank::initialize`]
/// exactly once.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use posest_filter::{FilterBank, NoiseParameterStore};
/// use posest_types::{Channel, PosestError};
///
/// let mut bank = FilterBank::new(Arc::new(NoiseParameterStore::default()));
/// bank.initialize().unwrap();
/// assert_eq!(bank.initialize(), Err(PosestError::AlreadyInitialized));
///
/// bank.step(Channel::North, 1.0, 0.0, 0.0, 0.1).unwrap();
/// assert!(bank.channel_state(Channel::North).pos > 0.0);
/// ```
#[derive(Debug)]
pub struct FilterBank {
    params: Arc<NoiseParameterStore>,
    slots: Option<[Slot; 4]>,
}

impl FilterBank {
    pub fn new(params: Arc<NoiseParameterStore>) -> Self {
        Self {
            params,
            slots: None,
        }
    }

    /// Build the four filters at rest (`x = [0, 0]`, `P = I`).
    ///
    /// # Errors
    ///
    /// [`PosestError::AlreadyInitialized`] on any call after the first.
    pub fn initialize(&mut self) -> Result<(), PosestError> {
        if self.slots.is_some() {
            return Err(PosestError::AlreadyInitialized);
        }
        let params = &self.params;
        self.slots = Some(Channel::ALL.map(|channel| Slot::new(channel, params)));

        let cfg = self.params.snapshot();
        info!(
            process_noise = cfg.process_noise,
            ultra_noise = cfg.ultra_noise,
            baro_noise = cfg.baro_noise,
            gps_noise = cfg.gps_noise,
            use_gps_speed = cfg.use_gps_speed,
            "filter bank initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.slots.is_some()
    }

    pub fn params(&self) -> &Arc<NoiseParameterStore> {
        &self.params
    }

    /// The filter bound to `channel`, or `None` before initialization.
    pub fn filter(&self, channel: Channel) -> Option<&ScalarKalmanFilter> {
        self.slots
            .as_ref()
            .map(|slots| &slots[channel.index()].filter)
    }

    /// Current position and velocity of `channel` (zero before initialization).
    pub fn channel_state(&self, channel: Channel) -> PosSpeed {
        self.filter(channel)
            .map(|f| PosSpeed {
                pos: f.position(),
                speed: f.velocity(),
            })
            .unwrap_or_default()
    }

    /// Run one predict/correct pair on `channel`.
    ///
    /// Refreshes `Q`, `R`, `A` and `B` from the parameter store and `dt`
    /// first.  A degenerate correction leaves the channel at its predicted
    /// state.
    ///
    /// # Errors
    ///
    /// - [`PosestError::NotInitialized`] before [`initialize`][Self::initialize].
    /// - [`PosestError::DegenerateUpdate`] when the correction was skipped.
    pub fn step(
        &mut self,
        channel: Channel,
        position: f32,
        speed: f32,
        accel: f32,
        dt: f32,
    ) -> Result<(), PosestError> {
        let slots = self.slots.as_mut().ok_or(PosestError::NotInitialized)?;
        let slot = &mut slots[channel.index()];

        let use_speed = match slot.speed {
            SpeedBinding::Never => false,
            SpeedBinding::UseGpsSpeed => self.params.use_gps_speed(),
        };
        slot.filter.set_use_speed(use_speed);
        slot.filter.refresh(
            dt,
            self.params.process_noise(),
            self.params.noise(slot.noise),
        );

        slot.filter.predict(accel);
        slot.filter.correct(position, speed).map_err(|e| {
            debug!(channel = %slot.channel, error = %e, "correction skipped");
            PosestError::DegenerateUpdate {
                channel: slot.channel,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamValue;
    use posest_types::NoiseConfig;

    fn bank_with(cfg: NoiseConfig) -> FilterBank {
        let mut bank = FilterBank::new(Arc::new(NoiseParameterStore::new(&cfg)));
        bank.initialize().unwrap();
        bank
    }

    #[test]
    fn initialize_builds_four_filters_at_rest() {
        let bank = bank_with(NoiseConfig::default());
        for ch in Channel::ALL {
            let f = bank.filter(ch).expect("filter must exist");
            assert_eq!(f.position(), 0.0);
            assert_eq!(f.velocity(), 0.0);
            assert_eq!(f.covariance(), nalgebra::Matrix2::identity());
        }
    }

    #[test]
    fn second_initialize_is_rejected() {
        let mut bank = bank_with(NoiseConfig::default());
        bank.step(Channel::North, 1.0, 0.0, 0.0, 0.1).unwrap();
        let before = bank.channel_state(Channel::North);
        assert_eq!(bank.initialize(), Err(PosestError::AlreadyInitialized));
        // State survives the rejected call.
        assert_eq!(bank.channel_state(Channel::North), before);
    }

    #[test]
    fn step_before_initialize_fails() {
        let mut bank = FilterBank::new(Arc::new(NoiseParameterStore::default()));
        assert!(!bank.is_initialized());
        assert!(bank.filter(Channel::East).is_none());
        assert_eq!(
            bank.step(Channel::East, 0.0, 0.0, 0.0, 0.1),
            Err(PosestError::NotInitialized)
        );
        assert_eq!(bank.channel_state(Channel::East), PosSpeed::default());
    }

    #[test]
    fn bindings_match_channels() {
        assert_eq!(
            binding_for(Channel::North),
            (NoiseParam::GpsNoise, SpeedBinding::UseGpsSpeed)
        );
        assert_eq!(
            binding_for(Channel::East),
            (NoiseParam::GpsNoise, SpeedBinding::UseGpsSpeed)
        );
        assert_eq!(
            binding_for(Channel::BaroUp),
            (NoiseParam::BaroNoise, SpeedBinding::Never)
        );
        assert_eq!(
            binding_for(Channel::UltraUp),
            (NoiseParam::UltraNoise, SpeedBinding::Never)
        );
    }

    #[test]
    fn vertical_channels_never_observe_speed() {
        let mut bank = bank_with(NoiseConfig::default());
        bank.step(Channel::BaroUp, 1.0, 3.0, 0.0, 0.1).unwrap();
        bank.step(Channel::UltraUp, 1.0, 3.0, 0.0, 0.1).unwrap();
        for ch in [Channel::BaroUp, Channel::UltraUp] {
            assert_eq!(bank.filter(ch).unwrap().observation()[(1, 1)], 0.0);
        }
    }

    #[test]
    fn use_gps_speed_flag_is_read_live() {
        let mut bank = bank_with(NoiseConfig {
            use_gps_speed: false,
            ..NoiseConfig::default()
        });
        bank.step(Channel::North, 1.0, 1.0, 0.0, 0.1).unwrap();
        assert_eq!(bank.filter(Channel::North).unwrap().observation()[(1, 1)], 0.0);

        bank.params()
            .write(NoiseParam::UseGpsSpeed, ParamValue::Flag(true))
            .unwrap();
        bank.step(Channel::North, 1.0, 1.0, 0.0, 0.1).unwrap();
        assert_eq!(bank.filter(Channel::North).unwrap().observation()[(1, 1)], 1.0);
    }

    #[test]
    fn noise_reload_changes_next_correction() {
        let mut fast = bank_with(NoiseConfig::default());
        let mut slow = bank_with(NoiseConfig::default());
        slow.params()
            .write(NoiseParam::BaroNoise, ParamValue::Float(100.0))
            .unwrap();
        fast.step(Channel::BaroUp, 10.0, 0.0, 0.0, 0.1).unwrap();
        slow.step(Channel::BaroUp, 10.0, 0.0, 0.0, 0.1).unwrap();
        // Larger measurement noise → smaller pull toward the measurement.
        let fast_pos = fast.channel_state(Channel::BaroUp).pos;
        let slow_pos = slow.channel_state(Channel::BaroUp).pos;
        assert!(fast_pos > slow_pos);
    }

    #[test]
    fn degenerate_step_reports_channel() {
        let mut bank = bank_with(NoiseConfig {
            ultra_noise: 0.0,
            ..NoiseConfig::default()
        });
        assert_eq!(
            bank.step(Channel::UltraUp, 1.0, 0.0, 0.5, 0.1),
            Err(PosestError::DegenerateUpdate {
                channel: Channel::UltraUp
            })
        );
        // Predicted state was kept: v = 0.5 * 0.1.
        let state = bank.channel_state(Channel::UltraUp);
        assert!((state.speed - 0.05).abs() < 1e-6);
        assert!(state.pos.is_finite());
    }
}
