//! Two-state (position, velocity) discrete Kalman filter.
//!
//! System model, with `u` the measured acceleration:
//!
//! ```text
//! | 1  dt | * | p | + | 0.5 * dt^2 | * u
//! | 0   1 |   | v |   |     dt     |
//! ```
//!
//! Both observation rows exist, but the velocity row is switched on per
//! correction: `H[1][1]` is `1` only when the filter is allowed to use a
//! velocity measurement *and* the supplied velocity is non-zero.
//!
//! # Example
//!
//! ```rust
//! use posest_filter::kalman::ScalarKalmanFilter;
//!
//! let mut kf = ScalarKalmanFilter::new(false);
//! for _ in 0..50 {
//!     kf.refresh(0.1, 0.1, 1.0);
//!     kf.predict(0.0);
//!     kf.correct(2.0, 0.0).expect("well-conditioned update");
//! }
//! assert!((kf.position() - 2.0).abs() < 0.1);
//! ```

use nalgebra::{Matrix2, Vector2};
use thiserror::Error;

/// Relative tolerance on the determinant of the innovation covariance.
///
/// `S` is treated as singular when `|det S| <= tol * (|s00 * s11| + |s01 * s10|)`.
pub const SINGULARITY_TOLERANCE: f32 = 1.0e-6;

/// Why a correction step was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CorrectionError {
    #[error("innovation covariance is singular (det = {determinant})")]
    SingularInnovation { determinant: f32 },

    #[error("correction produced a non-finite state")]
    NonFinite,
}

/// A single-axis position/velocity Kalman filter.
///
/// `A`, `B`, `Q` and `R` are tick-local: call [`refresh`][Self::refresh]
/// before each [`predict`][Self::predict] / [`correct`][Self::correct] pair.
#[derive(Debug, Clone)]
pub struct ScalarKalmanFilter {
    /// State `[position, velocity]`.
    x: Vector2<f32>,
    /// Error covariance.
    p: Matrix2<f32>,
    /// System matrix.
    a: Matrix2<f32>,
    /// Control matrix (2x1).
    b: Vector2<f32>,
    /// Observer matrix.
    h: Matrix2<f32>,
    /// Process noise.
    q: Matrix2<f32>,
    /// Measurement noise.
    r: Matrix2<f32>,
    /// Kalman gain of the last successful correction.
    k: Matrix2<f32>,
    use_speed: bool,
}

impl ScalarKalmanFilter {
    /// Filter at rest: `x = [0, 0]`, `P = I`.
    pub fn new(use_speed: bool) -> Self {
        Self::with_initial_state(0.0, 0.0, use_speed)
    }

    /// Filter starting at the given position and velocity with `P = I`.
    pub fn with_initial_state(position: f32, velocity: f32, use_speed: bool) -> Self {
        let mut h = Matrix2::identity();
        h[(1, 1)] = if use_speed { 1.0 } else { 0.0 };
        Self {
            x: Vector2::new(position, velocity),
            p: Matrix2::identity(),
            a: Matrix2::identity(),
            b: Vector2::zeros(),
            h,
            q: Matrix2::zeros(),
            r: Matrix2::zeros(),
            k: Matrix2::zeros(),
            use_speed,
        }
    }

    /// Replace the initial covariance.
    pub fn with_covariance(mut self, p: Matrix2<f32>) -> Self {
        self.p = p;
        self
    }

    /// Rewrite the tick-local matrices from this tick's `dt` and the current
    /// noise parameters.
    ///
    /// `dt = 0` leaves `A = I` and `B = 0`, so the following predict only
    /// adds `Q` to the covariance.
    pub fn refresh(&mut self, dt: f32, process_noise: f32, measurement_noise: f32) {
        self.a[(0, 1)] = dt;
        self.b = Vector2::new(0.5 * dt * dt, dt);
        self.q = Matrix2::identity() * process_noise;
        self.r = Matrix2::identity() * measurement_noise;
    }

    /// Allow or forbid use of velocity observations from the next correction on.
    pub fn set_use_speed(&mut self, use_speed: bool) {
        self.use_speed = use_speed;
    }

    /// Time update: `x = A x + B u`, `P = A P Aᵀ + Q`.
    pub fn predict(&mut self, accel: f32) {
        self.x = self.a * self.x + self.b * accel;
        self.p = self.a * self.p * self.a.transpose() + self.q;
    }

    /// Measurement update with `z = [position, speed]`.
    ///
    /// On error `x` and `P` keep their predicted values and `K` keeps the
    /// gain of the previous successful correction.
    pub fn correct(&mut self, position: f32, speed: f32) -> Result<(), CorrectionError> {
        self.h[(1, 1)] = if self.use_speed && speed != 0.0 { 1.0 } else { 0.0 };
        let z = Vector2::new(position, speed);

        let s = self.h * self.p * self.h.transpose() + self.r;
        let s_inv = invert_innovation(&s)?;
        let k = self.p * self.h.transpose() * s_inv;

        let x = self.x + k * (z - self.h * self.x);
        let p = (Matrix2::identity() - k * self.h) * self.p;
        if !x.iter().all(|v| v.is_finite()) || !p.iter().all(|v| v.is_finite()) {
            return Err(CorrectionError::NonFinite);
        }

        self.k = k;
        self.x = x;
        self.p = p;
        Ok(())
    }

    pub fn position(&self) -> f32 {
        self.x[0]
    }

    pub fn velocity(&self) -> f32 {
        self.x[1]
    }

    pub fn state(&self) -> Vector2<f32> {
        self.x
    }

    pub fn covariance(&self) -> Matrix2<f32> {
        self.p
    }

    pub fn observation(&self) -> Matrix2<f32> {
        self.h
    }

    pub fn gain(&self) -> Matrix2<f32> {
        self.k
    }
}

/// Closed-form 2x2 inverse guarded by [`SINGULARITY_TOLERANCE`].
fn invert_innovation(s: &Matrix2<f32>) -> Result<Matrix2<f32>, CorrectionError> {
    let determinant = s.determinant();
    let scale = (s[(0, 0)] * s[(1, 1)]).abs() + (s[(0, 1)] * s[(1, 0)]).abs();
    if !determinant.is_finite() || determinant.abs() <= SINGULARITY_TOLERANCE * scale {
        return Err(CorrectionError::SingularInnovation { determinant });
    }
    s.try_inverse()
        .ok_or(CorrectionError::SingularInnovation { determinant })
}
