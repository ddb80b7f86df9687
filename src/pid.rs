// Discrete-time PID controller with integral anti-windup
//
// Gains are passed in on every update rather than stored in the controller,
// so one consistent parameter snapshot drives a whole control tick and
// parameter updates never tear mid-computation.

/// Error returned when a control step is attempted with a non-positive
/// or non-finite timestep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingError;

/// PID gain and limit set for one control loop.
///
/// Replaced as a whole unit, never partially mutated.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidParams {
    /// Proportional gain
    pub kp: f32,
    /// Integral gain
    pub ki: f32,
    /// Derivative gain
    pub kd: f32,
    /// Integral accumulator clamp (symmetric: ±integral_limit)
    pub integral_limit: f32,
    /// Output clamp (symmetric: ±output_limit)
    pub output_limit: f32,
}

impl PidParams {
    /// Create a new parameter set.
    pub const fn new(kp: f32, ki: f32, kd: f32, integral_limit: f32, output_limit: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            integral_limit,
            output_limit,
        }
    }

    /// Check that all members are finite and both limits are non-negative.
    pub fn is_valid(&self) -> bool {
        self.kp.is_finite()
            && self.ki.is_finite()
            && self.kd.is_finite()
            && self.integral_limit.is_finite()
            && self.output_limit.is_finite()
            && self.integral_limit >= 0.0
            && self.output_limit >= 0.0
    }
}

/// Mutable controller state, owned exclusively by one control loop.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidState {
    /// Integral accumulator (error * dt sum, clamped)
    pub integral: f32,
    /// Previous error (for the derivative term)
    pub prev_error: f32,
}

/// PID controller. Pure over its explicit inputs apart from the owned state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pid {
    state: PidState,
}

impl Pid {
    /// Create a controller with zeroed state.
    pub const fn new() -> Self {
        Self {
            state: PidState {
                integral: 0.0,
                prev_error: 0.0,
            },
        }
    }

    /// Run one control step.
    ///
    /// The integral accumulator is clamped to ±integral_limit *before* the
    /// integral contribution is formed, so accumulated energy never exceeds
    /// the configured bound no matter how long the output stays saturated.
    /// `prev_error` is tracked even with `ki == 0` so the derivative term
    /// stays correct across gain changes.
    ///
    /// # Arguments
    /// * `error` - Setpoint minus measurement
    /// * `dt` - Time step in seconds, must be positive and finite
    /// * `params` - Gain set for this step
    ///
    /// # Returns
    /// Controller output clamped to ±output_limit, or `TimingError` for a
    /// bad timestep (the state is left untouched in that case).
    pub fn update(&mut self, error: f32, dt: f32, params: &PidParams) -> Result<f32, TimingError> {
        if !(dt > 0.0) || !dt.is_finite() {
            return Err(TimingError);
        }

        let p_term = params.kp * error;

        self.state.integral += error * dt;
        self.state.integral = self
            .state
            .integral
            .clamp(-params.integral_limit, params.integral_limit);
        let i_term = params.ki * self.state.integral;

        let d_term = params.kd * (error - self.state.prev_error) / dt;
        self.state.prev_error = error;

        let output = p_term + i_term + d_term;
        Ok(output.clamp(-params.output_limit, params.output_limit))
    }

    /// Reset integrator and derivative history to zero.
    pub fn reset(&mut self) {
        self.state = PidState::default();
    }

    /// Get a copy of the controller state.
    pub fn state(&self) -> PidState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 0.0001;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    fn params(kp: f32, ki: f32, kd: f32) -> PidParams {
        PidParams::new(kp, ki, kd, 100.0, 100.0)
    }

    #[test]
    fn test_proportional_only() {
        let mut pid = Pid::new();
        let out = pid.update(5.0, 0.1, &params(1.0, 0.0, 0.0)).unwrap();
        assert!(approx_eq(out, 5.0));
    }

    #[test]
    fn test_output_limiting() {
        let mut pid = Pid::new();
        let p = PidParams::new(1.0, 0.0, 0.0, 100.0, 10.0);
        let out = pid.update(20.0, 0.1, &p).unwrap();
        assert!(approx_eq(out, 10.0));
        let out = pid.update(-20.0, 0.1, &p).unwrap();
        assert!(approx_eq(out, -10.0));
    }

    #[test]
    fn test_integral_accumulation() {
        let mut pid = Pid::new();
        let p = params(0.0, 1.0, 0.0);
        // Error = 10, dt = 0.1, so integral should accumulate by 1.0 each step
        pid.update(10.0, 0.1, &p).unwrap();
        assert!(approx_eq(pid.state().integral, 1.0));
        pid.update(10.0, 0.1, &p).unwrap();
        assert!(approx_eq(pid.state().integral, 2.0));
    }

    #[test]
    fn test_anti_windup_bounds_accumulator() {
        let mut pid = Pid::new();
        let p = PidParams::new(0.0, 1.0, 0.0, 2.0, 1.0);
        // Output saturates immediately; the accumulator must still obey
        // its own clamp no matter how long the error persists.
        for _ in 0..1000 {
            let out = pid.update(50.0, 0.1, &p).unwrap();
            assert!(out.abs() <= 1.0);
            assert!(pid.state().integral.abs() <= 2.0);
        }
        assert!(approx_eq(pid.state().integral, 2.0));
    }

    #[test]
    fn test_derivative_term() {
        let mut pid = Pid::new();
        let p = params(0.0, 0.0, 1.0);
        // First step: prev_error starts at 0, d = (4 - 0) / 0.1
        let out = pid.update(4.0, 0.1, &p).unwrap();
        assert!(approx_eq(out, 40.0));
        // Constant error: derivative vanishes
        let out = pid.update(4.0, 0.1, &p).unwrap();
        assert!(approx_eq(out, 0.0));
    }

    #[test]
    fn test_prev_error_tracked_without_integral_gain() {
        let mut pid = Pid::new();
        pid.update(3.0, 0.1, &params(0.0, 0.0, 0.0)).unwrap();
        assert!(approx_eq(pid.state().prev_error, 3.0));
        // Switching on kd later sees the tracked history, not a jump from 0
        let out = pid.update(3.0, 0.1, &params(0.0, 0.0, 1.0)).unwrap();
        assert!(approx_eq(out, 0.0));
    }

    #[test]
    fn test_rejects_bad_timestep() {
        let mut pid = Pid::new();
        let p = params(1.0, 1.0, 0.0);
        assert_eq!(pid.update(1.0, 0.0, &p), Err(TimingError));
        assert_eq!(pid.update(1.0, -0.01, &p), Err(TimingError));
        assert_eq!(pid.update(1.0, f32::NAN, &p), Err(TimingError));
        // State untouched by rejected steps
        assert!(approx_eq(pid.state().integral, 0.0));
        assert!(approx_eq(pid.state().prev_error, 0.0));
    }

    #[test]
    fn test_reset() {
        let mut pid = Pid::new();
        pid.update(10.0, 0.1, &params(1.0, 1.0, 1.0)).unwrap();
        pid.reset();
        assert_eq!(pid.state(), PidState::default());
    }

    #[test]
    fn test_params_validation() {
        assert!(PidParams::new(0.5, 0.1, 0.0, 10.0, 1.0).is_valid());
        assert!(!PidParams::new(f32::NAN, 0.1, 0.0, 10.0, 1.0).is_valid());
        assert!(!PidParams::new(0.5, 0.1, 0.0, -1.0, 1.0).is_valid());
        assert!(!PidParams::new(0.5, 0.1, 0.0, 10.0, f32::INFINITY).is_valid());
    }
}
