// Hardware capability interfaces
//
// The control core never touches PWM timers, ADCs or buses itself. The
// application owns the peripherals and hands the core ownership-typed
// implementations of these traits at construction time.

/// Instantaneous three-phase current sample [A].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ThreePhaseCurrent {
    /// Phase A current
    pub ia: f32,
    /// Phase B current
    pub ib: f32,
    /// Phase C current
    pub ic: f32,
}

impl ThreePhaseCurrent {
    pub const fn new(ia: f32, ib: f32, ic: f32) -> Self {
        Self { ia, ib, ic }
    }

    /// Largest phase current magnitude, for overcurrent detection.
    pub fn max_magnitude(&self) -> f32 {
        self.ia.abs().max(self.ib.abs()).max(self.ic.abs())
    }

    /// Check the balanced three-phase assumption (ia + ib + ic ≈ 0).
    pub fn is_balanced(&self, tolerance: f32) -> bool {
        (self.ia + self.ib + self.ic).abs() <= tolerance
    }
}

/// Three-phase PWM duty command, each value in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhaseDuty {
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

impl PhaseDuty {
    /// All outputs off.
    pub const ZERO: Self = Self {
        a: 0.0,
        b: 0.0,
        c: 0.0,
    };
}

/// The current-sensing collaborator failed to return fresh data within one
/// tick period. Retrying belongs to the bus layer, not this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorTimeout;

/// Raw hardware fault flags reported by the gate driver / power stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultBits(u16);

impl FaultBits {
    pub const NONE: Self = Self(0);
    pub const OVERTEMPERATURE: Self = Self(1 << 0);
    pub const GATE_FAULT: Self = Self(1 << 1);
    pub const BUS_UNDERVOLTAGE: Self = Self(1 << 2);
    pub const BUS_OVERVOLTAGE: Self = Self(1 << 3);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_clear(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Three-phase PWM actuation capability.
///
/// Duty values handed over are already clamped to [0, 1]; passing anything
/// outside that range is a contract violation of the caller.
pub trait PhaseActuator {
    /// Apply a three-phase duty command.
    fn apply_duty(&mut self, duty: PhaseDuty);

    /// Enable or disable the power stage outputs.
    fn set_enabled(&mut self, enabled: bool);
}

/// Phase current sensing capability.
pub trait CurrentSensor {
    /// Return the instantaneous three-phase currents, or a timeout if no
    /// fresh sample is available within the tick period.
    fn read_currents(&mut self) -> Result<ThreePhaseCurrent, SensorTimeout>;
}

/// Hardware fault reporting capability, polled once per tick.
pub trait FaultMonitor {
    fn read_faults(&mut self) -> FaultBits;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_magnitude() {
        let i = ThreePhaseCurrent::new(1.0, -7.5, 2.0);
        assert_eq!(i.max_magnitude(), 7.5);
    }

    #[test]
    fn test_balance_check() {
        assert!(ThreePhaseCurrent::new(1.0, -0.5, -0.5).is_balanced(0.01));
        assert!(!ThreePhaseCurrent::new(1.0, 1.0, 1.0).is_balanced(0.01));
    }

    #[test]
    fn test_fault_bits() {
        let bits = FaultBits::from_bits(
            FaultBits::OVERTEMPERATURE.bits() | FaultBits::BUS_UNDERVOLTAGE.bits(),
        );
        assert!(!bits.is_clear());
        assert!(bits.contains(FaultBits::OVERTEMPERATURE));
        assert!(bits.contains(FaultBits::BUS_UNDERVOLTAGE));
        assert!(!bits.contains(FaultBits::GATE_FAULT));
        assert!(FaultBits::NONE.is_clear());
    }
}
