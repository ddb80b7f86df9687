// Motor state machine
//
// Owns the operating lifecycle (Idle / Running / Error / Fault), the fault
// latch and the cascade controller, and gates all control execution. Every
// public operation returns an explicit outcome; nothing fails silently.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::cascade::{CascadeController, CascadeOutput, Reference, RotorFeedback};
use crate::config::ParamStore;
use crate::driver::{CurrentSensor, FaultBits, FaultMonitor, PhaseActuator, PhaseDuty};
use crate::ControlMode;

/// Imbalance (|ia + ib + ic|) above this fraction of max_current is logged
/// as a sensing anomaly. It is a diagnostic, not a trip condition.
const CURRENT_BALANCE_FRACTION: f32 = 0.1;

/// Operating state of the motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotorStatus {
    /// Outputs disabled, ready to run
    Idle,
    /// Cascade executes each tick
    Running,
    /// Transient single-tick validation failure; recovers on its own
    Error,
    /// Latched; outputs forced off until an explicit `fault_reset`
    Fault,
}

/// Cause of a latched fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultKind {
    /// A phase current exceeded ±max_current
    Overcurrent,
    /// Measured speed exceeded ±max_speed
    Overspeed,
    /// The current sensor returned no fresh sample within the tick period
    SensorTimeout,
    /// The power stage reported fault bits
    Hardware(FaultBits),
}

/// Why a command did not take effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// The motor is not in a state where the command acts; carries the
    /// current status so the caller always knows what happened
    NotRunning(MotorStatus),
    /// A fault is latched; clear it with `fault_reset` first
    Faulted(FaultKind),
    /// The reference targets a cascade stage above the active mode
    ModeMismatch {
        requested: ControlMode,
        active: ControlMode,
    },
    /// A reference value was not finite
    NonFinite,
    /// No fault is latched, so there is nothing to reset
    NoFaultLatched(MotorStatus),
}

/// Why a control tick produced no new output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TickError {
    /// `dt <= 0` or non-finite; the tick is skipped and the previous duty
    /// is held (not zeroed) so a single scheduling hiccup does not glitch
    /// the phases
    Timing,
    /// A fault latched during this tick; outputs are already forced off
    Fault(FaultKind),
}

/// Result of a successful tick call.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TickOutcome {
    /// The cascade ran and this duty was applied
    Applied(PhaseDuty),
    /// Not running; outputs untouched, current status reported
    Inactive(MotorStatus),
}

/// The motor entity: exclusive owner of the hardware handles, the loop
/// states and the fault latch. Parameters are read from the shared store
/// one whole snapshot per tick.
pub struct Motor<'a, M: RawMutex, A, S, F>
where
    A: PhaseActuator,
    S: CurrentSensor,
    F: FaultMonitor,
{
    actuator: A,
    sensor: S,
    fault_monitor: F,
    params: &'a ParamStore<M>,
    cascade: CascadeController,
    reference: Reference,
    status: MotorStatus,
    latched: Option<FaultKind>,
    last_duty: PhaseDuty,
    last_output: Option<CascadeOutput>,
}

impl<'a, M: RawMutex, A, S, F> Motor<'a, M, A, S, F>
where
    A: PhaseActuator,
    S: CurrentSensor,
    F: FaultMonitor,
{
    /// Take ownership of the hardware capabilities. The motor starts `Idle`
    /// with outputs disabled.
    pub fn new(actuator: A, sensor: S, fault_monitor: F, params: &'a ParamStore<M>) -> Self {
        let mut motor = Self {
            actuator,
            sensor,
            fault_monitor,
            params,
            cascade: CascadeController::new(),
            reference: Reference::default(),
            status: MotorStatus::Idle,
            latched: None,
            last_duty: PhaseDuty::ZERO,
            last_output: None,
        };
        motor.actuator.set_enabled(false);
        motor
    }

    pub fn status(&self) -> MotorStatus {
        self.status
    }

    pub fn latched_fault(&self) -> Option<FaultKind> {
        self.latched
    }

    /// Duty applied on the last successful tick (zero after disable/fault).
    pub fn last_duty(&self) -> PhaseDuty {
        self.last_duty
    }

    /// Cascade internals from the last successful tick, for telemetry.
    pub fn last_output(&self) -> Option<CascadeOutput> {
        self.last_output
    }

    pub fn reference(&self) -> Reference {
        self.reference
    }

    /// Enable or disable the motor.
    ///
    /// `enable(false)` is idempotent from `Idle`, and `enable(true)` from
    /// the transient `Error` state returns to `Running`. While a fault is
    /// latched both directions are rejected; only `fault_reset` leaves
    /// `Fault`.
    pub fn enable(&mut self, enable: bool) -> Result<(), CommandError> {
        if self.status == MotorStatus::Fault {
            // Report the cause, not just the refusal
            let kind = self.latched.unwrap_or(FaultKind::Hardware(FaultBits::NONE));
            return Err(CommandError::Faulted(kind));
        }

        match (self.status, enable) {
            (MotorStatus::Idle, true) => {
                // Loop states start clean on every entry into Running
                self.cascade.reset();
                self.actuator.set_enabled(true);
                self.status = MotorStatus::Running;
                info!("motor enabled");
            }
            (MotorStatus::Running, false) | (MotorStatus::Error, false) => {
                self.stop_outputs();
                self.status = MotorStatus::Idle;
                info!("motor disabled");
            }
            (MotorStatus::Error, true) => {
                // Outputs are already on; an explicit enable clears the
                // transient error the same way the next good tick would
                self.status = MotorStatus::Running;
                info!("motor recovered from transient error");
            }
            // Already in the requested state
            _ => {}
        }
        Ok(())
    }

    /// Set the position target. Acts only in Position mode while `Running`.
    pub fn set_position(&mut self, position: f32) -> Result<(), CommandError> {
        self.guard_reference(ControlMode::Position, position)?;
        self.reference.position = position;
        Ok(())
    }

    /// Set the speed target. Acts in Speed mode (and below a later
    /// downgrade) while `Running`.
    pub fn set_speed(&mut self, speed: f32) -> Result<(), CommandError> {
        self.guard_reference(ControlMode::Speed, speed)?;
        self.reference.speed = speed;
        Ok(())
    }

    /// Set the dq current references. The d-axis value is an explicit
    /// reference (zero for surface-mount magnet motors, nonzero for
    /// field weakening).
    pub fn set_current(&mut self, i_d: f32, i_q: f32) -> Result<(), CommandError> {
        self.guard_reference(ControlMode::Current, i_d)?;
        if !i_q.is_finite() {
            return Err(CommandError::NonFinite);
        }
        self.reference.current_d = i_d;
        self.reference.current_q = i_q;
        Ok(())
    }

    /// Set the dq voltage command used in Voltage mode.
    pub fn set_voltage(&mut self, v_d: f32, v_q: f32) -> Result<(), CommandError> {
        self.guard_reference(ControlMode::Voltage, v_d)?;
        if !v_q.is_finite() {
            return Err(CommandError::NonFinite);
        }
        self.reference.voltage_d = v_d;
        self.reference.voltage_q = v_q;
        Ok(())
    }

    /// Run one control tick.
    ///
    /// Order while `Running`: hardware fault bits, current sample (timeout
    /// latches a fault), software overcurrent/overspeed checks, cascade,
    /// duty application. Disable requests issued from other contexts take
    /// effect at this boundary; nothing inside a tick blocks.
    pub fn tick(&mut self, dt: f32, rotor: RotorFeedback) -> Result<TickOutcome, TickError> {
        // A transient timing error only lasts one tick
        if self.status == MotorStatus::Error {
            self.status = MotorStatus::Running;
        }
        if self.status != MotorStatus::Running {
            return Ok(TickOutcome::Inactive(self.status));
        }

        if !(dt > 0.0) || !dt.is_finite() {
            // Hold the previous duty; a consistent, documented choice
            self.status = MotorStatus::Error;
            warn!("tick skipped: bad timestep");
            return Err(TickError::Timing);
        }

        let snap = self.params.snapshot();

        let hw_faults = self.fault_monitor.read_faults();
        if !hw_faults.is_clear() {
            return Err(self.trip(FaultKind::Hardware(hw_faults)));
        }

        let currents = match self.sensor.read_currents() {
            Ok(sample) => sample,
            Err(_) => return Err(self.trip(FaultKind::SensorTimeout)),
        };

        if currents.max_magnitude() > snap.config.max_current {
            return Err(self.trip(FaultKind::Overcurrent));
        }
        if rotor.speed.abs() > snap.config.max_speed {
            return Err(self.trip(FaultKind::Overspeed));
        }
        if !currents.is_balanced(snap.config.max_current * CURRENT_BALANCE_FRACTION) {
            warn!("unbalanced current sample: {} + {} + {} != 0", currents.ia, currents.ib, currents.ic);
        }

        let output = match self
            .cascade
            .run(dt, &self.reference, currents, rotor, &snap.config, &snap.gains)
        {
            Ok(output) => output,
            Err(_) => {
                self.status = MotorStatus::Error;
                return Err(TickError::Timing);
            }
        };

        self.actuator.apply_duty(output.duty);
        self.last_duty = output.duty;
        self.last_output = Some(output);
        Ok(TickOutcome::Applied(output.duty))
    }

    /// Clear a latched fault. The only exit from `Fault`; resets every loop
    /// state and all references so the motor comes back inert in `Idle`.
    pub fn fault_reset(&mut self) -> Result<(), CommandError> {
        if self.status != MotorStatus::Fault {
            return Err(CommandError::NoFaultLatched(self.status));
        }
        info!("fault reset");
        self.latched = None;
        self.cascade.reset();
        self.reference = Reference::default();
        self.status = MotorStatus::Idle;
        Ok(())
    }

    /// Release the hardware handles, forcing outputs off first.
    pub fn into_parts(mut self) -> (A, S, F) {
        self.stop_outputs();
        (self.actuator, self.sensor, self.fault_monitor)
    }

    /// Latch a fault: outputs forced to zero and disabled before the state
    /// change is visible anywhere.
    fn trip(&mut self, kind: FaultKind) -> TickError {
        error!("fault latched: {}", kind);
        self.stop_outputs();
        self.latched = Some(kind);
        self.status = MotorStatus::Fault;
        TickError::Fault(kind)
    }

    fn stop_outputs(&mut self) {
        self.actuator.apply_duty(PhaseDuty::ZERO);
        self.actuator.set_enabled(false);
        self.last_duty = PhaseDuty::ZERO;
    }

    /// Common checks for the reference setters: must be `Running`, the
    /// requested stage must be active, and the value must be finite.
    fn guard_reference(&self, requested: ControlMode, value: f32) -> Result<(), CommandError> {
        match self.status {
            MotorStatus::Fault => {
                let kind = self.latched.unwrap_or(FaultKind::Hardware(FaultBits::NONE));
                Err(CommandError::Faulted(kind))
            }
            MotorStatus::Running => {
                let active = self.params.snapshot().config.control_mode;
                if requested > active {
                    return Err(CommandError::ModeMismatch { requested, active });
                }
                if !value.is_finite() {
                    return Err(CommandError::NonFinite);
                }
                Ok(())
            }
            status => Err(CommandError::NotRunning(status)),
        }
    }
}
