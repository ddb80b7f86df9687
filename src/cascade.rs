// Cascaded control composer
//
// Executes the position → speed → current → voltage → duty pipeline for one
// control tick. Stages run strictly outer-to-inner, so every inner loop sees
// a reference already constrained by its outer loop's limit.

use crate::config::{CascadeGains, MotorConfig, PidAxis};
use crate::driver::{PhaseDuty, ThreePhaseCurrent};
use crate::pid::{Pid, PidState, TimingError};
use crate::transforms::{clarke, inverse_clarke, inverse_park, limit_voltage, park};
use crate::ControlMode;

/// Target values for the cascade. Only the fields at and below the active
/// control mode are read; outer-stage fields are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reference {
    /// Position target [rad] (Position mode)
    pub position: f32,
    /// Speed target (Speed mode)
    pub speed: f32,
    /// d-axis current reference [A]. Zero for surface-mount magnet motors;
    /// left configurable for field-weakening strategies.
    pub current_d: f32,
    /// q-axis current reference [A] (Current mode)
    pub current_q: f32,
    /// d-axis voltage command [V] (Voltage mode)
    pub voltage_d: f32,
    /// q-axis voltage command [V] (Voltage mode)
    pub voltage_q: f32,
}

/// Measured rotor quantities for one tick. Encoder/resolver processing is an
/// already-solved input; the core only consumes its results.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RotorFeedback {
    /// Electrical angle [rad]
    pub electrical_angle: f32,
    /// Measured or estimated speed (same unit as `max_speed`)
    pub speed: f32,
    /// Mechanical position [rad]
    pub position: f32,
}

/// Intermediate and final results of one cascade pass.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CascadeOutput {
    /// Speed reference produced by the position loop (or taken from the
    /// caller), after the ±max_speed clamp
    pub speed_ref: f32,
    /// dq current references fed to the current loops
    pub current_ref: (f32, f32),
    /// Measured dq currents (Park of the sensed phase currents)
    pub current_dq: (f32, f32),
    /// dq voltage commands after per-loop and circular limiting
    pub voltage_dq: (f32, f32),
    /// Final three-phase duty command, each value clamped to [0, 1]
    pub duty: PhaseDuty,
}

/// The four loop controllers and the mode bookkeeping between ticks.
#[derive(Debug, Default)]
pub struct CascadeController {
    position: Pid,
    speed: Pid,
    current_d: Pid,
    current_q: Pid,
    last_mode: Option<ControlMode>,
}

impl CascadeController {
    pub const fn new() -> Self {
        Self {
            position: Pid::new(),
            speed: Pid::new(),
            current_d: Pid::new(),
            current_q: Pid::new(),
            last_mode: None,
        }
    }

    /// Reset every loop's state (fault clear, enable transitions).
    pub fn reset(&mut self) {
        self.position.reset();
        self.speed.reset();
        self.current_d.reset();
        self.current_q.reset();
        self.last_mode = None;
    }

    /// Inspect one loop's state (telemetry / tuning).
    pub fn pid_state(&self, axis: PidAxis) -> PidState {
        match axis {
            PidAxis::D => self.current_d.state(),
            PidAxis::Q => self.current_q.state(),
            PidAxis::Speed => self.speed.state(),
            PidAxis::Position => self.position.state(),
        }
    }

    /// A mode downgrade deactivates outer loops; their integral energy must
    /// not re-inject when the mode is later upgraded again.
    fn apply_mode(&mut self, mode: ControlMode) {
        if let Some(last) = self.last_mode {
            if mode < last {
                if last >= ControlMode::Position && mode < ControlMode::Position {
                    self.position.reset();
                }
                if last >= ControlMode::Speed && mode < ControlMode::Speed {
                    self.speed.reset();
                }
                if last >= ControlMode::Current && mode < ControlMode::Current {
                    self.current_d.reset();
                    self.current_q.reset();
                }
                debug!("cascade mode downgrade: {} -> {}", last, mode);
            }
        }
        self.last_mode = Some(mode);
    }

    /// Run one control tick.
    ///
    /// Stage order is fixed: position loop, then speed loop, then the two
    /// current loops, then the transform chain down to duty values. The
    /// final [0, 1] duty clamp is the safety backstop even when every
    /// upstream limit already held.
    ///
    /// # Arguments
    /// * `dt` - Tick period in seconds
    /// * `reference` - Targets for the active mode
    /// * `currents` - Sensed phase currents
    /// * `rotor` - Rotor angle/speed/position feedback
    /// * `config` - Motor limits and active mode (one consistent snapshot)
    /// * `gains` - Loop gains (same snapshot)
    pub fn run(
        &mut self,
        dt: f32,
        reference: &Reference,
        currents: ThreePhaseCurrent,
        rotor: RotorFeedback,
        config: &MotorConfig,
        gains: &CascadeGains,
    ) -> Result<CascadeOutput, TimingError> {
        if !(dt > 0.0) || !dt.is_finite() {
            return Err(TimingError);
        }

        let mode = config.control_mode;
        self.apply_mode(mode);

        // Measured currents into the rotor frame
        let (i_alpha, i_beta) = clarke(currents.ia, currents.ib, currents.ic);
        let (i_d, i_q) = park(i_alpha, i_beta, rotor.electrical_angle);

        // Position loop: produces the speed reference. A caller-supplied
        // reference is held to the same limit as the loop output.
        let mut speed_ref = reference.speed.clamp(-config.max_speed, config.max_speed);
        if mode >= ControlMode::Position {
            let out = self
                .position
                .update(reference.position - rotor.position, dt, &gains.position)?;
            speed_ref = out.clamp(-config.max_speed, config.max_speed);
        }

        // Speed loop: produces the q-axis current reference; the d-axis
        // reference always comes from the caller
        let mut current_ref = (reference.current_d, reference.current_q);
        if mode >= ControlMode::Speed {
            let out = self.speed.update(speed_ref - rotor.speed, dt, &gains.speed)?;
            current_ref.1 = out.clamp(-config.max_current, config.max_current);
        }

        // Current loops: produce the dq voltage command
        let voltage_dq = if mode >= ControlMode::Current {
            let vd = self
                .current_d
                .update(current_ref.0 - i_d, dt, &gains.current_d)?;
            let vq = self
                .current_q
                .update(current_ref.1 - i_q, dt, &gains.current_q)?;
            limit_voltage(vd, vq, config.max_voltage)
        } else {
            // Voltage mode: the command bypasses every loop
            limit_voltage(reference.voltage_d, reference.voltage_q, config.max_voltage)
        };

        // Transform chain down to per-phase duty
        let (v_alpha, v_beta) = inverse_park(voltage_dq.0, voltage_dq.1, rotor.electrical_angle);
        let (v_a, v_b, v_c) = inverse_clarke(v_alpha, v_beta);

        // Phase voltage to duty: center at 50% and normalize by the bus
        // voltage, then clamp to [0, 1] as the final backstop
        let duty = PhaseDuty {
            a: (0.5 + v_a / config.v_bus).clamp(0.0, 1.0),
            b: (0.5 + v_b / config.v_bus).clamp(0.0, 1.0),
            c: (0.5 + v_c / config.v_bus).clamp(0.0, 1.0),
        };

        Ok(CascadeOutput {
            speed_ref,
            current_ref,
            current_dq: (i_d, i_q),
            voltage_dq,
            duty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CascadeGains, MotorConfig};
    use crate::pid::PidParams;

    const EPSILON: f32 = 0.0001;
    const DT: f32 = 0.0004; // 2.5 kHz

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    fn config(mode: ControlMode) -> MotorConfig {
        MotorConfig {
            pole_pairs: 7,
            max_current: 10.0,
            max_speed: 10_000.0,
            max_voltage: 24.0,
            v_bus: 24.0,
            control_mode: mode,
        }
    }

    fn zero_currents() -> ThreePhaseCurrent {
        ThreePhaseCurrent::new(0.0, 0.0, 0.0)
    }

    #[test]
    fn test_rejects_bad_timestep() {
        let mut cascade = CascadeController::new();
        let result = cascade.run(
            0.0,
            &Reference::default(),
            zero_currents(),
            RotorFeedback::default(),
            &config(ControlMode::Current),
            &CascadeGains::DEFAULT,
        );
        assert_eq!(result, Err(TimingError));
    }

    #[test]
    fn test_voltage_mode_zero_command_centers_duty() {
        let mut cascade = CascadeController::new();
        let out = cascade
            .run(
                DT,
                &Reference::default(),
                zero_currents(),
                RotorFeedback::default(),
                &config(ControlMode::Voltage),
                &CascadeGains::DEFAULT,
            )
            .unwrap();
        assert!(approx_eq(out.duty.a, 0.5));
        assert!(approx_eq(out.duty.b, 0.5));
        assert!(approx_eq(out.duty.c, 0.5));
    }

    #[test]
    fn test_current_mode_scenario() {
        // MotorConfig{pole_pairs=7, max_current=10, max_speed=10000,
        // mode=Current}, reference (id=0, iq=5), measured zero currents:
        // the q loop saturates toward kp * 5.0 clamped at output_limit.
        let mut cascade = CascadeController::new();
        let reference = Reference {
            current_q: 5.0,
            ..Default::default()
        };
        let out = cascade
            .run(
                DT,
                &reference,
                zero_currents(),
                RotorFeedback::default(),
                &config(ControlMode::Current),
                &CascadeGains::DEFAULT,
            )
            .unwrap();

        // kp=0.5 * err=5.0 = 2.5, clamped at output_limit=1.0
        assert!(approx_eq(out.voltage_dq.1, 1.0));
        assert!(approx_eq(out.voltage_dq.0, 0.0));

        // Duty values in range and matching inverse-Clarke geometry: at
        // theta=0 the command lands on beta, so a stays centered and b/c
        // split symmetrically around it
        for d in [out.duty.a, out.duty.b, out.duty.c] {
            assert!((0.0..=1.0).contains(&d));
        }
        assert!(approx_eq(out.duty.a, 0.5));
        assert!(approx_eq(out.duty.b - 0.5, 0.5 - out.duty.c));
        let expected_spread = 0.866_025_4 * 1.0 / 24.0;
        assert!(approx_eq(out.duty.b - 0.5, expected_spread));
    }

    #[test]
    fn test_position_saturation_bounds_speed_reference() {
        // A position error large enough to saturate the position loop must
        // produce exactly max_speed as the speed reference, before any
        // current reference is computed.
        let mut cascade = CascadeController::new();
        let mut gains = CascadeGains::DEFAULT;
        gains.position = PidParams::new(5.0, 0.0, 0.0, 0.0, f32::MAX);

        let reference = Reference {
            position: 1.0e6,
            ..Default::default()
        };
        let out = cascade
            .run(
                DT,
                &reference,
                zero_currents(),
                RotorFeedback::default(),
                &config(ControlMode::Position),
                &gains,
            )
            .unwrap();
        assert_eq!(out.speed_ref, 10_000.0);
        // The inner current reference is bounded by the speed loop's clamp
        assert!(out.current_ref.1.abs() <= 10.0);
    }

    #[test]
    fn test_caller_speed_reference_is_clamped() {
        // In Speed mode the reference comes straight from the caller, but it
        // still goes through the ±max_speed clamp before the speed loop.
        let mut cascade = CascadeController::new();
        let reference = Reference {
            speed: 50_000.0,
            ..Default::default()
        };
        let out = cascade
            .run(
                DT,
                &reference,
                zero_currents(),
                RotorFeedback::default(),
                &config(ControlMode::Speed),
                &CascadeGains::DEFAULT,
            )
            .unwrap();
        assert_eq!(out.speed_ref, 10_000.0);
    }

    #[test]
    fn test_speed_mode_produces_bounded_current_reference() {
        let mut cascade = CascadeController::new();
        let reference = Reference {
            speed: 1.0e9, // absurd target, loop output must still be bounded
            ..Default::default()
        };
        let out = cascade
            .run(
                DT,
                &reference,
                zero_currents(),
                RotorFeedback::default(),
                &config(ControlMode::Speed),
                &CascadeGains::DEFAULT,
            )
            .unwrap();
        assert!(out.current_ref.1.abs() <= 10.0);
        // d-axis reference passes through from the caller
        assert!(approx_eq(out.current_ref.0, 0.0));
    }

    #[test]
    fn test_downgrade_resets_outer_loops() {
        let mut cascade = CascadeController::new();
        let reference = Reference {
            position: 100.0,
            ..Default::default()
        };
        let mut gains = CascadeGains::DEFAULT;
        gains.position = PidParams::new(1.0, 1.0, 0.0, 50.0, 1000.0);

        // Run in Position mode to charge the outer integrators
        for _ in 0..10 {
            cascade
                .run(
                    DT,
                    &reference,
                    zero_currents(),
                    RotorFeedback::default(),
                    &config(ControlMode::Position),
                    &gains,
                )
                .unwrap();
        }
        assert!(cascade.pid_state(PidAxis::Position).integral != 0.0);
        assert!(cascade.pid_state(PidAxis::Speed).prev_error != 0.0);
        let q_before = cascade.pid_state(PidAxis::Q);
        assert!(q_before.integral != 0.0);

        // Downgrade to Current: position and speed state must clear
        cascade
            .run(
                DT,
                &reference,
                zero_currents(),
                RotorFeedback::default(),
                &config(ControlMode::Current),
                &gains,
            )
            .unwrap();
        assert_eq!(cascade.pid_state(PidAxis::Position), PidState::default());
        assert_eq!(cascade.pid_state(PidAxis::Speed), PidState::default());
        // The still-active current loops keep their accumulated state; the
        // downgrade tick itself runs them with zero error, so the integral
        // carries over unchanged
        assert_eq!(cascade.pid_state(PidAxis::Q).integral, q_before.integral);
        assert!(cascade.pid_state(PidAxis::Q).integral != 0.0);
    }

    #[test]
    fn test_duty_always_in_range() {
        // Even with a voltage command at the circular limit and an angle
        // sweep, the final clamp keeps every duty inside [0, 1]
        let mut cascade = CascadeController::new();
        let reference = Reference {
            voltage_d: 100.0,
            voltage_q: 100.0,
            ..Default::default()
        };
        let cfg = config(ControlMode::Voltage);
        for i in 0..64 {
            let rotor = RotorFeedback {
                electrical_angle: i as f32 * core::f32::consts::TAU / 64.0,
                ..Default::default()
            };
            let out = cascade
                .run(DT, &reference, zero_currents(), rotor, &cfg, &CascadeGains::DEFAULT)
                .unwrap();
            for d in [out.duty.a, out.duty.b, out.duty.c] {
                assert!((0.0..=1.0).contains(&d));
            }
        }
    }
}
