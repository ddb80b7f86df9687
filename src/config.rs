// Motor configuration, loop gains and the shared parameter store
//
// Parameters are mutated from a command-handling context while the control
// tick reads them. The store follows a swap-not-mutate discipline: a writer
// validates a complete new set off to the side and publishes it as one unit,
// so the tick always observes a fully-old or fully-new set and never blocks
// on a writer across a tick boundary.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::pid::PidParams;
use crate::ControlMode;

/// Current-loop gains (default values, per axis)
///
/// Conservative gains for a small surface-mount PMSM; output is a voltage
/// command normalized to the loop's voltage limit.
pub const DEFAULT_CURRENT_KP: f32 = 0.5;
pub const DEFAULT_CURRENT_KI: f32 = 0.1;
pub const DEFAULT_CURRENT_INTEGRAL_LIMIT: f32 = 10.0;
pub const DEFAULT_CURRENT_OUTPUT_LIMIT: f32 = 1.0;

/// Speed-loop gains (default values)
pub const DEFAULT_SPEED_KP: f32 = 0.8;
pub const DEFAULT_SPEED_KI: f32 = 0.1;

/// Position-loop proportional gain (default value)
pub const DEFAULT_POSITION_KP: f32 = 5.0;

/// Motor limits (default values)
pub const DEFAULT_POLE_PAIRS: u8 = 7;
pub const DEFAULT_MAX_CURRENT: f32 = 10.0;
pub const DEFAULT_MAX_SPEED: f32 = 10_000.0;

/// Voltage limits (default values)
pub const DEFAULT_MAX_VOLTAGE: f32 = 24.0;
pub const DEFAULT_V_DC_BUS: f32 = 24.0;

/// Selects one of the four cascade loops for a gain update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PidAxis {
    /// d-axis current loop
    D,
    /// q-axis current loop
    Q,
    /// Speed loop
    Speed,
    /// Position loop
    Position,
}

/// Reason a configuration update was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// `pole_pairs` must be greater than zero
    PolePairsZero,
    /// `max_current` must be positive and finite
    MaxCurrentOutOfRange,
    /// `max_speed` must be positive and finite
    MaxSpeedOutOfRange,
    /// `max_voltage` must be positive and finite
    MaxVoltageOutOfRange,
    /// `v_bus` must be positive and finite
    BusVoltageOutOfRange,
    /// A PID parameter set has a non-finite member or a negative limit
    PidParams(PidAxis),
}

/// Motor configuration, validated as a whole before publication.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorConfig {
    /// Number of rotor pole pairs
    pub pole_pairs: u8,
    /// Software overcurrent trip level [A]
    pub max_current: f32,
    /// Speed reference clamp and overspeed trip level
    pub max_speed: f32,
    /// dq voltage vector magnitude limit [V]
    pub max_voltage: f32,
    /// DC bus voltage used for the voltage-to-duty mapping [V]
    pub v_bus: f32,
    /// Active cascade depth
    pub control_mode: ControlMode,
}

impl MotorConfig {
    pub const DEFAULT: Self = Self {
        pole_pairs: DEFAULT_POLE_PAIRS,
        max_current: DEFAULT_MAX_CURRENT,
        max_speed: DEFAULT_MAX_SPEED,
        max_voltage: DEFAULT_MAX_VOLTAGE,
        v_bus: DEFAULT_V_DC_BUS,
        control_mode: ControlMode::Current,
    };

    /// Reject any non-positive or non-finite bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pole_pairs == 0 {
            return Err(ConfigError::PolePairsZero);
        }
        if !(self.max_current > 0.0) || !self.max_current.is_finite() {
            return Err(ConfigError::MaxCurrentOutOfRange);
        }
        if !(self.max_speed > 0.0) || !self.max_speed.is_finite() {
            return Err(ConfigError::MaxSpeedOutOfRange);
        }
        if !(self.max_voltage > 0.0) || !self.max_voltage.is_finite() {
            return Err(ConfigError::MaxVoltageOutOfRange);
        }
        if !(self.v_bus > 0.0) || !self.v_bus.is_finite() {
            return Err(ConfigError::BusVoltageOutOfRange);
        }
        Ok(())
    }
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Gain sets for all four cascade loops.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CascadeGains {
    pub position: PidParams,
    pub speed: PidParams,
    pub current_d: PidParams,
    pub current_q: PidParams,
}

impl CascadeGains {
    pub const DEFAULT: Self = Self {
        // Position loop outputs a speed reference; the cascade additionally
        // clamps it to ±max_speed.
        position: PidParams::new(DEFAULT_POSITION_KP, 0.0, 0.0, 0.0, DEFAULT_MAX_SPEED),
        // Speed loop outputs a q-axis current reference.
        speed: PidParams::new(
            DEFAULT_SPEED_KP,
            DEFAULT_SPEED_KI,
            0.0,
            DEFAULT_MAX_CURRENT,
            DEFAULT_MAX_CURRENT,
        ),
        current_d: PidParams::new(
            DEFAULT_CURRENT_KP,
            DEFAULT_CURRENT_KI,
            0.0,
            DEFAULT_CURRENT_INTEGRAL_LIMIT,
            DEFAULT_CURRENT_OUTPUT_LIMIT,
        ),
        current_q: PidParams::new(
            DEFAULT_CURRENT_KP,
            DEFAULT_CURRENT_KI,
            0.0,
            DEFAULT_CURRENT_INTEGRAL_LIMIT,
            DEFAULT_CURRENT_OUTPUT_LIMIT,
        ),
    };

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (axis, params) in [
            (PidAxis::Position, &self.position),
            (PidAxis::Speed, &self.speed),
            (PidAxis::D, &self.current_d),
            (PidAxis::Q, &self.current_q),
        ] {
            if !params.is_valid() {
                return Err(ConfigError::PidParams(axis));
            }
        }
        Ok(())
    }
}

impl Default for CascadeGains {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// One consistent view of all tunable parameters, copied out whole at the
/// start of a control tick.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ParamSnapshot {
    pub config: MotorConfig,
    pub gains: CascadeGains,
}

/// Shared parameter store.
///
/// Generic over the `RawMutex` so the application picks the exclusion
/// mechanism matching its execution model (`CriticalSectionRawMutex` for a
/// timer-interrupt control loop, `ThreadModeRawMutex` under a single-core
/// executor, and so on).
pub struct ParamStore<M: RawMutex> {
    inner: Mutex<M, Cell<ParamSnapshot>>,
}

impl<M: RawMutex> ParamStore<M> {
    /// Create a store from an already-validated parameter set.
    pub fn new(config: MotorConfig, gains: CascadeGains) -> Result<Self, ConfigError> {
        config.validate()?;
        gains.validate()?;
        Ok(Self {
            inner: Mutex::new(Cell::new(ParamSnapshot { config, gains })),
        })
    }

    /// Create a store holding the default parameter set.
    ///
    /// `const`, so the store can live in a `static`.
    pub const fn with_defaults() -> Self {
        Self {
            inner: Mutex::new(Cell::new(ParamSnapshot {
                config: MotorConfig::DEFAULT,
                gains: CascadeGains::DEFAULT,
            })),
        }
    }

    /// Copy out the current parameter set.
    pub fn snapshot(&self) -> ParamSnapshot {
        self.inner.lock(|cell| cell.get())
    }

    /// Validate and publish a new motor configuration.
    pub fn set_config(&self, config: MotorConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.inner.lock(|cell| {
            let mut snap = cell.get();
            snap.config = config;
            cell.set(snap);
        });
        info!("motor config updated");
        Ok(())
    }

    /// Validate and publish a gain update for one cascade loop.
    pub fn update_pid(&self, axis: PidAxis, params: PidParams) -> Result<(), ConfigError> {
        if !params.is_valid() {
            return Err(ConfigError::PidParams(axis));
        }
        self.inner.lock(|cell| {
            let mut snap = cell.get();
            match axis {
                PidAxis::D => snap.gains.current_d = params,
                PidAxis::Q => snap.gains.current_q = params,
                PidAxis::Speed => snap.gains.speed = params,
                PidAxis::Position => snap.gains.position = params,
            }
            cell.set(snap);
        });
        info!("pid gains updated: axis={}", axis);
        Ok(())
    }

    /// Publish a control mode change. Depth changes take effect at the next
    /// tick boundary; the cascade resets the loops a downgrade deactivates.
    pub fn set_mode(&self, mode: ControlMode) {
        self.inner.lock(|cell| {
            let mut snap = cell.get();
            snap.config.control_mode = mode;
            cell.set(snap);
        });
        info!("control mode set: {}", mode);
    }
}
