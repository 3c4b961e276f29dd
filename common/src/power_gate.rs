use tracing::info;

use crate::hal::PowerRail;

pub const DEFAULT_DEBOUNCE_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Energized,
    DeEnergized,
}

/// Switches the servos' power rail. Turning on is immediate; turning off is
/// only a request that takes effect once it has stood for the debounce window
/// without a newer `energize`.
pub struct PowerGate {
    rail: Box<dyn PowerRail>,
    current: PowerState,
    target: PowerState,
    deenergize_requested_ms: u64,
    debounce_ms: u64,
}

impl PowerGate {
    pub fn new(mut rail: Box<dyn PowerRail>, debounce_ms: u64) -> Self {
        rail.set_power(false);
        Self {
            rail,
            current: PowerState::DeEnergized,
            target: PowerState::DeEnergized,
            deenergize_requested_ms: 0,
            debounce_ms,
        }
    }

    pub fn current(&self) -> PowerState {
        self.current
    }

    pub fn target(&self) -> PowerState {
        self.target
    }

    pub fn is_energized(&self) -> bool {
        self.current == PowerState::Energized
    }

    pub fn energize(&mut self) {
        if self.current == PowerState::DeEnergized {
            info!("turning on servos power supply");
        }
        self.target = PowerState::Energized;
        self.current = PowerState::Energized;
        self.rail.set_power(true);
    }

    pub fn request_deenergize_after_delay(&mut self, now_ms: u64) {
        self.target = PowerState::DeEnergized;
        self.deenergize_requested_ms = now_ms;
    }

    /// Returns `true` when this call switched the rail off.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        if self.current == self.target || self.target != PowerState::DeEnergized {
            return false;
        }

        if now_ms.saturating_sub(self.deenergize_requested_ms) <= self.debounce_ms {
            return false;
        }

        info!("turning off servos power supply");
        self.current = PowerState::DeEnergized;
        self.rail.set_power(false);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingRail;

    #[test]
    fn energize_is_immediate_and_idempotent() {
        let rail = RecordingRail::default();
        let mut gate = PowerGate::new(Box::new(rail.clone()), DEFAULT_DEBOUNCE_MS);

        gate.energize();
        gate.energize();

        assert!(gate.is_energized());
        assert_eq!(rail.history(), vec![false, true, true]);
    }

    #[test]
    fn deenergize_waits_for_debounce() {
        let rail = RecordingRail::default();
        let mut gate = PowerGate::new(Box::new(rail.clone()), 2_000);

        gate.energize();
        gate.request_deenergize_after_delay(1_000);
        assert_eq!(gate.current(), PowerState::Energized);
        assert_eq!(gate.target(), PowerState::DeEnergized);

        assert!(!gate.tick(2_000));
        assert!(!gate.tick(3_000));
        assert!(gate.is_energized());

        assert!(gate.tick(3_001));
        assert_eq!(gate.current(), PowerState::DeEnergized);
        assert!(!rail.is_on());

        // Already off: further ticks are no-ops.
        assert!(!gate.tick(10_000));
    }

    #[test]
    fn energize_cancels_pending_deenergize() {
        let rail = RecordingRail::default();
        let mut gate = PowerGate::new(Box::new(rail.clone()), 2_000);

        gate.energize();
        gate.request_deenergize_after_delay(0);
        gate.tick(500);
        gate.energize();

        for now in (0..20_000).step_by(250) {
            gate.tick(now);
            assert!(gate.is_energized());
        }
        assert!(rail.is_on());
    }

    #[test]
    fn later_request_restarts_the_window() {
        let rail = RecordingRail::default();
        let mut gate = PowerGate::new(Box::new(rail.clone()), 2_000);

        gate.energize();
        gate.request_deenergize_after_delay(0);
        gate.energize();
        gate.request_deenergize_after_delay(1_500);

        assert!(!gate.tick(2_500));
        assert!(gate.tick(3_501));
    }
}
