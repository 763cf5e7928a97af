//! Pre-filters applied to the ultrasonic altitude before it is fused.
//!
//! The estimation cycle passes every ultrasonic sample through an
//! [`UltraPreFilter`].  The default, [`PassThrough`], forwards the sample
//! untouched.  [`BaroDeltaGate`] is the optional outlier policy: when the
//! sonar jumps far more than the barometer moved since the last tick, the
//! sonar reading is replaced by the previous sonar estimate shifted by the
//! barometric delta.  It is off unless the caller installs it.

/// Inputs available to a pre-filter on one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UltraContext {
    /// Ultrasonic altitude measured this tick.
    pub ultra_u: f32,
    /// Barometric altitude measured this tick.
    pub baro_u: f32,
    /// Ultrasonic channel position estimate from the previous tick.
    pub prev_ultra_est: f32,
    /// Barometric channel position estimate from the previous tick.
    pub prev_baro_est: f32,
}

/// Substitutes or forwards the ultrasonic measurement.
pub trait UltraPreFilter: Send {
    /// Name used in log output.
    fn name(&self) -> &str;

    /// Return the measurement to feed into the ultrasonic filter.
    fn apply(&mut self, ctx: &UltraContext) -> f32;
}

/// Forwards the measurement unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl UltraPreFilter for PassThrough {
    fn name(&self) -> &str {
        "pass_through"
    }

    fn apply(&mut self, ctx: &UltraContext) -> f32 {
        ctx.ultra_u
    }
}

/// Rejects sonar jumps that the barometer does not confirm.
///
/// A sample is an outlier when
/// `|ultra_u - prev_ultra_est| > ratio * |baro_u - prev_baro_est|`; it is then
/// replaced with `prev_ultra_est + (baro_u - prev_baro_est)`.
///
/// A perfectly still barometer makes every sonar change an outlier.
#[derive(Debug, Clone, Copy)]
pub struct BaroDeltaGate {
    ratio: f32,
    rejected: u64,
}

impl BaroDeltaGate {
    pub const DEFAULT_RATIO: f32 = 10.0;

    pub fn new(ratio: f32) -> Self {
        Self { ratio, rejected: 0 }
    }

    /// Number of samples replaced so far.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

impl Default for BaroDeltaGate {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RATIO)
    }
}

impl UltraPreFilter for BaroDeltaGate {
    fn name(&self) -> &str {
        "baro_delta_gate"
    }

    fn apply(&mut self, ctx: &UltraContext) -> f32 {
        let ultra_delta = ctx.ultra_u - ctx.prev_ultra_est;
        let baro_delta = ctx.baro_u - ctx.prev_baro_est;
        if ultra_delta.abs() > self.ratio * baro_delta.abs() {
            self.rejected += 1;
            ctx.prev_ultra_est + baro_delta
        } else {
            ctx.ultra_u
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(ultra_u: f32, baro_u: f32) -> UltraContext {
        UltraContext {
            ultra_u,
            baro_u,
            prev_ultra_est: 1.0,
            prev_baro_est: 100.0,
        }
    }

    #[test]
    fn pass_through_forwards_measurement() {
        let mut f = PassThrough;
        assert_eq!(f.apply(&ctx(3.7, 100.0)), 3.7);
    }

    #[test]
    fn gate_accepts_jump_confirmed_by_barometer() {
        let mut gate = BaroDeltaGate::default();
        // sonar +0.5, baro +0.4: 0.5 <= 10 * 0.4
        assert_eq!(gate.apply(&ctx(1.5, 100.4)), 1.5);
        assert_eq!(gate.rejected(), 0);
    }

    #[test]
    fn gate_replaces_unconfirmed_jump() {
        let mut gate = BaroDeltaGate::default();
        // sonar +3.0, baro +0.1: 3.0 > 10 * 0.1 → 1.0 + 0.1
        let out = gate.apply(&ctx(4.0, 100.1));
        assert!((out - 1.1).abs() < 1e-4);
        assert_eq!(gate.rejected(), 1);
    }

    #[test]
    fn gate_with_still_barometer_rejects_any_change() {
        let mut gate = BaroDeltaGate::new(10.0);
        assert_eq!(gate.apply(&ctx(1.01, 100.0)), 1.0);
        // No change at all is not an outlier.
        assert_eq!(gate.apply(&ctx(1.0, 100.0)), 1.0);
        assert_eq!(gate.rejected(), 1);
    }
}
