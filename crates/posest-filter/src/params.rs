//! [`NoiseParameterStore`] – live-tunable filter noise parameters.
//!
//! The estimator reads every parameter once per tick while a configuration
//! reload path may overwrite them from another thread at any time.  Each
//! parameter is an independent atomic, so a read never observes a partially
//! written value.  Two reads of *different* parameters within one tick may
//! straddle a reload; the filters tolerate that.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use posest_types::{NoiseConfig, PosestError};

/// Names of the five tunable parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoiseParam {
    ProcessNoise,
    UltraNoise,
    BaroNoise,
    GpsNoise,
    UseGpsSpeed,
}

impl NoiseParam {
    pub fn name(self) -> &'static str {
        match self {
            NoiseParam::ProcessNoise => "process_noise",
            NoiseParam::UltraNoise => "ultra_noise",
            NoiseParam::BaroNoise => "baro_noise",
            NoiseParam::GpsNoise => "gps_noise",
            NoiseParam::UseGpsSpeed => "use_gps_speed",
        }
    }
}

/// A value read from or written to the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Float(f32),
    Flag(bool),
}

/// `f32` stored as its bit pattern in an [`AtomicU32`].
#[derive(Debug)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Shared, lock-free parameter store.  Wrap in an [`Arc`][std::sync::Arc]
/// to share between the estimator and the reload path.
///
/// # Example
///
/// ```
/// use posest_filter::params::{NoiseParam, NoiseParameterStore, ParamValue};
///
/// let store = NoiseParameterStore::default();
/// store.write(NoiseParam::GpsNoise, ParamValue::Float(2.0)).unwrap();
/// assert_eq!(store.read(NoiseParam::GpsNoise), ParamValue::Float(2.0));
/// assert!(store.write(NoiseParam::GpsNoise, ParamValue::Flag(true)).is_err());
/// ```
#[derive(Debug)]
pub struct NoiseParameterStore {
    process_noise: AtomicF32,
    ultra_noise: AtomicF32,
    baro_noise: AtomicF32,
    gps_noise: AtomicF32,
    use_gps_speed: AtomicBool,
}

impl NoiseParameterStore {
    pub fn new(cfg: &NoiseConfig) -> Self {
        Self {
            process_noise: AtomicF32::new(cfg.process_noise),
            ultra_noise: AtomicF32::new(cfg.ultra_noise),
            baro_noise: AtomicF32::new(cfg.baro_noise),
            gps_noise: AtomicF32::new(cfg.gps_noise),
            use_gps_speed: AtomicBool::new(cfg.use_gps_speed),
        }
    }

    /// Most recently written value of `param`.  Never blocks.
    pub fn read(&self, param: NoiseParam) -> ParamValue {
        match param {
            NoiseParam::UseGpsSpeed => ParamValue::Flag(self.use_gps_speed()),
            other => ParamValue::Float(self.noise(other)),
        }
    }

    /// Overwrite `param`.
    ///
    /// Fails with [`PosestError::ParamType`] when the value kind does not
    /// match the parameter (a flag for a noise value or vice versa).
    pub fn write(&self, param: NoiseParam, value: ParamValue) -> Result<(), PosestError> {
        match (self.slot(param), value) {
            (Some(slot), ParamValue::Float(v)) => {
                slot.store(v);
                Ok(())
            }
            (None, ParamValue::Flag(flag)) => {
                self.use_gps_speed.store(flag, Ordering::Release);
                Ok(())
            }
            _ => Err(PosestError::ParamType {
                param: param.name().to_string(),
            }),
        }
    }

    /// Read a noise value.  Returns `0.0` for [`NoiseParam::UseGpsSpeed`],
    /// which is not a noise value.
    pub fn noise(&self, param: NoiseParam) -> f32 {
        self.slot(param).map_or(0.0, AtomicF32::load)
    }

    pub fn process_noise(&self) -> f32 {
        self.process_noise.load()
    }

    pub fn use_gps_speed(&self) -> bool {
        self.use_gps_speed.load(Ordering::Acquire)
    }

    /// Write every field of `cfg`, one parameter at a time.
    pub fn apply(&self, cfg: &NoiseConfig) {
        self.process_noise.store(cfg.process_noise);
        self.ultra_noise.store(cfg.ultra_noise);
        self.baro_noise.store(cfg.baro_noise);
        self.gps_noise.store(cfg.gps_noise);
        self.use_gps_speed.store(cfg.use_gps_speed, Ordering::Release);
    }

    /// Current values as a [`NoiseConfig`].  Not a transaction.
    pub fn snapshot(&self) -> NoiseConfig {
        NoiseConfig {
            process_noise: self.process_noise.load(),
            ultra_noise: self.ultra_noise.load(),
            baro_noise: self.baro_noise.load(),
            gps_noise: self.gps_noise.load(),
            use_gps_speed: self.use_gps_speed(),
        }
    }

    fn slot(&self, param: NoiseParam) -> Option<&AtomicF32> {
        match param {
            NoiseParam::ProcessNoise => Some(&self.process_noise),
            NoiseParam::UltraNoise => Some(&self.ultra_noise),
            NoiseParam::BaroNoise => Some(&self.baro_noise),
            NoiseParam::GpsNoise => Some(&self.gps_noise),
            NoiseParam::UseGpsSpeed => None,
        }
    }
}

impl Default for NoiseParameterStore {
    fn default() -> Self {
        Self::new(&NoiseConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn new_store_reflects_config() {
        let cfg = NoiseConfig {
            process_noise: 0.2,
            ultra_noise: 0.3,
            baro_noise: 0.4,
            gps_noise: 0.5,
            use_gps_speed: false,
        };
        let store = NoiseParameterStore::new(&cfg);
        assert_eq!(store.read(NoiseParam::ProcessNoise), ParamValue::Float(0.2));
        assert_eq!(store.read(NoiseParam::UltraNoise), ParamValue::Float(0.3));
        assert_eq!(store.read(NoiseParam::BaroNoise), ParamValue::Float(0.4));
        assert_eq!(store.read(NoiseParam::GpsNoise), ParamValue::Float(0.5));
        assert_eq!(store.read(NoiseParam::UseGpsSpeed), ParamValue::Flag(false));
        assert_eq!(store.snapshot(), cfg);
    }

    #[test]
    fn writes_are_independent_per_parameter() {
        let store = NoiseParameterStore::default();
        store
            .write(NoiseParam::BaroNoise, ParamValue::Float(7.0))
            .unwrap();
        assert_eq!(store.noise(NoiseParam::BaroNoise), 7.0);
        assert_eq!(store.noise(NoiseParam::GpsNoise), NoiseConfig::default().gps_noise);
        assert_eq!(store.process_noise(), NoiseConfig::default().process_noise);
    }

    #[test]
    fn wrong_value_kind_is_rejected() {
        let store = NoiseParameterStore::default();
        assert!(matches!(
            store.write(NoiseParam::UseGpsSpeed, ParamValue::Float(1.0)),
            Err(PosestError::ParamType { .. })
        ));
        assert!(store
            .write(NoiseParam::ProcessNoise, ParamValue::Flag(true))
            .is_err());
        // Nothing changed.
        assert_eq!(store.snapshot(), NoiseConfig::default());
    }

    #[test]
    fn flag_can_be_toggled() {
        let store = NoiseParameterStore::default();
        store
            .write(NoiseParam::UseGpsSpeed, ParamValue::Flag(false))
            .unwrap();
        assert!(!store.use_gps_speed());
    }

    #[test]
    fn apply_overwrites_every_field() {
        let store = NoiseParameterStore::default();
        let cfg = NoiseConfig {
            process_noise: 1.5,
            ultra_noise: 2.5,
            baro_noise: 3.5,
            gps_noise: 4.5,
            use_gps_speed: false,
        };
        store.apply(&cfg);
        assert_eq!(store.snapshot(), cfg);
    }

    #[test]
    fn concurrent_reads_never_observe_torn_values() {
        let store = Arc::new(NoiseParameterStore::default());
        let done = Arc::new(AtomicBool::new(false));
        // Two bit patterns that share no bytes.
        let a = f32::from_bits(0x3f80_0000);
        let b = f32::from_bits(0x4049_0fdb);

        let writer = {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut flip = false;
                while !done.load(Ordering::Acquire) {
                    let v = if flip { a } else { b };
                    store
                        .write(NoiseParam::GpsNoise, ParamValue::Float(v))
                        .unwrap();
                    flip = !flip;
                }
            })
        };

        for _ in 0..100_000 {
            let v = store.noise(NoiseParam::GpsNoise);
            assert!(
                v == a || v == b || v == NoiseConfig::default().gps_noise,
                "observed torn value {v}"
            );
        }
        done.store(true, Ordering::Release);
        writer.join().unwrap();
    }
}
