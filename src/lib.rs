// FOC (Field Oriented Control) motor control core
//
// Hardware-independent cascaded control: PID loops, Clarke/Park transforms,
// the position/speed/current cascade and the fault-latching motor state
// machine. PWM, current sensing and fault reporting are capabilities the
// application implements and hands in at construction time.

#![no_std]

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub mod cascade;
pub mod config;
pub mod driver;
pub mod motor;
pub mod pid;
pub mod transforms;

// Re-export main types for easier access
pub use cascade::{CascadeController, CascadeOutput, Reference, RotorFeedback};
pub use config::{CascadeGains, ConfigError, MotorConfig, ParamStore, PidAxis};
pub use driver::{
    CurrentSensor, FaultBits, FaultMonitor, PhaseActuator, PhaseDuty, SensorTimeout,
    ThreePhaseCurrent,
};
pub use motor::{CommandError, FaultKind, Motor, MotorStatus, TickError, TickOutcome};
pub use pid::{Pid, PidParams, PidState, TimingError};
pub use transforms::{clarke, inverse_clarke, inverse_park, limit_voltage, normalize_angle, park};

/// Motor control mode: selects how deep the cascade runs. Higher modes
/// subsume lower ones (Position drives Speed drives Current).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlMode {
    /// Direct dq voltage command, no closed loop
    Voltage,
    /// Current (torque) control
    Current,
    /// Speed control driving the current loops
    Speed,
    /// Position control driving the speed loop
    Position,
}
