//! `posest-types` – Shared Vocabulary
//!
//! Value types exchanged between the estimator crates: NEU vectors,
//! measurement and estimate frames, noise and sonar configuration, bus
//! events, and the [`PosestError`] enum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A 3-axis vector in the local geographic frame (north, east, up).
///
/// Sensors that report in device coordinates convert through
/// [`Neu::from_device`]: the pitch axis maps to north, the roll axis to east
/// and the yaw axis to up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Neu {
    pub n: f32,
    pub e: f32,
    pub u: f32,
}

impl Neu {
    pub const ZERO: Neu = Neu { n: 0.0, e: 0.0, u: 0.0 };

    pub fn new(n: f32, e: f32, u: f32) -> Self {
        Self { n, e, u }
    }

    /// Build from device-frame components `(x, y, z)`.
    pub fn from_device(x: f32, y: f32, z: f32) -> Self {
        Self { n: x, e: y, u: z }
    }

    /// Device-frame components `[x, y, z]`.
    pub fn to_device(self) -> [f32; 3] {
        [self.n, self.e, self.u]
    }
}

impl From<[f32; 3]> for Neu {
    fn from(v: [f32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<Neu> for [f32; 3] {
    fn from(v: Neu) -> Self {
        [v.n, v.e, v.u]
    }
}

/// One of the four independent estimation axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Horizontal north axis, observed by GPS.
    North,
    /// Horizontal east axis, observed by GPS.
    East,
    /// Vertical axis observed by the barometer.
    BaroUp,
    /// Vertical axis observed by the ultrasonic ranger.
    UltraUp,
}

impl Channel {
    /// All channels in the order the estimation cycle runs them.
    pub const ALL: [Channel; 4] = [
        Channel::North,
        Channel::East,
        Channel::BaroUp,
        Channel::UltraUp,
    ];

    /// Stable slot index in `0..4`.
    pub fn index(self) -> usize {
        match self {
            Channel::North => 0,
            Channel::East => 1,
            Channel::BaroUp => 2,
            Channel::UltraUp => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Channel::North => "north",
            Channel::East => "east",
            Channel::BaroUp => "baro_up",
            Channel::UltraUp => "ultra_up",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything the estimator consumes in one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementFrame {
    /// Horizontal position observation, north (metres).
    pub pos_n: f32,
    /// Horizontal position observation, east (metres).
    pub pos_e: f32,
    /// Horizontal velocity observation, north (m/s). `0` means unavailable.
    pub speed_n: f32,
    /// Horizontal velocity observation, east (m/s). `0` means unavailable.
    pub speed_e: f32,
    /// Barometric altitude (metres).
    pub baro_u: f32,
    /// Ultrasonic altitude (metres), already clamped by the ranging driver.
    pub ultra_u: f32,
    /// Specific force / acceleration per axis (m/s²).
    pub accel: Neu,
    /// Seconds since the previous tick, `>= 0`.
    pub dt: f32,
}

impl MeasurementFrame {
    /// Check the caller contract on `dt`.
    ///
    /// The estimator itself never calls this; producers of frames do.
    pub fn validate(&self) -> Result<(), PosestError> {
        if !self.dt.is_finite() || self.dt < 0.0 {
            return Err(PosestError::InvalidDt(self.dt));
        }
        Ok(())
    }
}

/// Horizontal pair of north/east components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NePair {
    pub n: f32,
    pub e: f32,
}

/// Position and velocity along one vertical channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PosSpeed {
    pub pos: f32,
    pub speed: f32,
}

/// Fused output of one estimation tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimateFrame {
    pub ne_pos: NePair,
    pub ne_speed: NePair,
    pub baro_u: PosSpeed,
    pub ultra_u: PosSpeed,
}

/// Tunable noise parameters as they appear in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseConfig {
    #[serde(default = "default_process_noise")]
    pub process_noise: f32,
    #[serde(default = "default_ultra_noise")]
    pub ultra_noise: f32,
    #[serde(default = "default_baro_noise")]
    pub baro_noise: f32,
    #[serde(default = "default_gps_noise")]
    pub gps_noise: f32,
    #[serde(default = "default_use_gps_speed")]
    pub use_gps_speed: bool,
}

fn default_process_noise() -> f32 {
    0.01
}
fn default_ultra_noise() -> f32 {
    0.05
}
fn default_baro_noise() -> f32 {
    0.5
}
fn default_gps_noise() -> f32 {
    1.0
}
fn default_use_gps_speed() -> bool {
    true
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            process_noise: default_process_noise(),
            ultra_noise: default_ultra_noise(),
            baro_noise: default_baro_noise(),
            gps_noise: default_gps_noise(),
            use_gps_speed: default_use_gps_speed(),
        }
    }
}

/// Sonar ranging driver settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SonarConfig {
    /// Readings below this are clamped up (metres).
    #[serde(default = "default_min_range")]
    pub min_range: f32,
    /// Readings above this are clamped down (metres).
    #[serde(default = "default_max_range")]
    pub max_range: f32,
    /// Polling period of the ranging emitter.
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    /// Index of the downward-facing sensor in the ranging vector.
    #[serde(default)]
    pub down_index: usize,
}

fn default_min_range() -> f32 {
    0.2
}
fn default_max_range() -> f32 {
    5.0
}
fn default_period_ms() -> u64 {
    30
}

impl Default for SonarConfig {
    fn default() -> Self {
        Self {
            min_range: default_min_range(),
            max_range: default_max_range(),
            period_ms: default_period_ms(),
            down_index: 0,
        }
    }
}

/// A horizontal fix from the GPS decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub pos_n: f32,
    pub pos_e: f32,
    pub speed_n: f32,
    pub speed_e: f32,
}

/// Unified event wrapper for the sample bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "posest-middleware::sonar"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` with a fresh id and the current wall-clock time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the sample bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    GpsFix(GpsFix),
    /// Barometric altitude in metres.
    BaroAltitude(f32),
    /// Raw ranging vector from the sonar array, metres, pre-clamped.
    SonarRanges([f32; 4]),
    Acceleration(Neu),
    Estimate(EstimateFrame),
    /// A channel skipped its correction this tick.
    ChannelFault {
        channel: Channel,
        code: u32,
        message: String,
    },
}

/// Error type shared by every posest crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PosestError {
    #[error("filter bank already initialized")]
    AlreadyInitialized,

    #[error("filter bank not initialized")]
    NotInitialized,

    #[error("degenerate update on channel {channel}: innovation covariance not invertible")]
    DegenerateUpdate { channel: Channel },

    #[error("invalid dt {0}: must be finite and >= 0")]
    InvalidDt(f32),

    #[error("parameter {param} written with a value of the wrong type")]
    ParamType { param: String },

    #[error("Ranging Error: {0}")]
    Ranging(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Config Error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neu_device_conversion_maps_axes() {
        let v = Neu::from_device(1.0, 2.0, 3.0);
        assert_eq!(v.n, 1.0);
        assert_eq!(v.e, 2.0);
        assert_eq!(v.u, 3.0);
        assert_eq!(v.to_device(), [1.0, 2.0, 3.0]);
        let arr: [f32; 3] = Neu::new(4.0, 5.0, 6.0).into();
        assert_eq!(Neu::from(arr), Neu::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn channel_indices_match_run_order() {
        for (i, ch) in Channel::ALL.iter().enumerate() {
            assert_eq!(ch.index(), i);
        }
        assert_eq!(Channel::UltraUp.to_string(), "ultra_up");
    }

    #[test]
    fn frame_validate_rejects_negative_dt() {
        let frame = MeasurementFrame {
            dt: -0.01,
            ..Default::default()
        };
        assert_eq!(frame.validate(), Err(PosestError::InvalidDt(-0.01)));
    }

    #[test]
    fn frame_validate_rejects_nan_dt() {
        let frame = MeasurementFrame {
            dt: f32::NAN,
            ..Default::default()
        };
        assert!(frame.validate().is_err());
    }

    #[test]
    fn frame_validate_accepts_zero_dt() {
        let frame = MeasurementFrame::default();
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn noise_config_missing_fields_use_defaults() {
        let cfg: NoiseConfig = serde_json::from_str(r#"{"gps_noise": 2.5}"#).unwrap();
        assert!((cfg.gps_noise - 2.5).abs() < f32::EPSILON);
        assert!((cfg.process_noise - 0.01).abs() < f32::EPSILON);
        assert!(cfg.use_gps_speed);
    }

    #[test]
    fn sonar_config_defaults() {
        let cfg: SonarConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, SonarConfig::default());
        assert_eq!(cfg.period_ms, 30);
        assert!((cfg.max_range - 5.0).abs() < f32::EPSILON);
    }

    #[test]
    fn channel_fault_event_roundtrip() {
        let event = Event::new(
            "posest-runtime::estimator",
            EventPayload::ChannelFault {
                channel: Channel::BaroUp,
                code: 1,
                message: "degenerate".to_string(),
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        match back.payload {
            EventPayload::ChannelFault { channel, .. } => assert_eq!(channel, Channel::BaroUp),
            _ => panic!("unexpected variant"),
        }
    }

    #[test]
    fn posest_error_display() {
        let err = PosestError::DegenerateUpdate {
            channel: Channel::North,
        };
        assert!(err.to_string().contains("north"));
        assert!(PosestError::AlreadyInitialized
            .to_string()
            .contains("already initialized"));
    }
}
