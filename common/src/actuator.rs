use serde::Serialize;
use tracing::{debug, info};

use crate::{
    config::SettingKey,
    controller::MAX_OPENING,
    error::StoreError,
    hal::ServoHardware,
    power_gate::PowerGate,
    store::SettingsStore,
};

pub const MAX_ANGLE: u8 = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServoRole {
    PullOpen,
    PullClose,
}

impl ServoRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PullOpen => "pull-open",
            Self::PullClose => "pull-close",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "open" | "pull-open" => Some(Self::PullOpen),
            "close" | "pull-close" => Some(Self::PullClose),
            _ => None,
        }
    }

    pub fn min_key(self) -> SettingKey {
        match self {
            Self::PullOpen => SettingKey::OpenServoMin,
            Self::PullClose => SettingKey::CloseServoMin,
        }
    }

    pub fn max_key(self) -> SettingKey {
        match self {
            Self::PullOpen => SettingKey::OpenServoMax,
            Self::PullClose => SettingKey::CloseServoMax,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationBound {
    Min,
    Max,
}

impl CalibrationBound {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServoState {
    #[serde(rename = "calibratedMinAngle")]
    pub calibrated_min_angle: u8,
    #[serde(rename = "calibratedMaxAngle")]
    pub calibrated_max_angle: u8,
    #[serde(rename = "isRamping")]
    pub is_ramping: bool,
    #[serde(rename = "rampTarget")]
    pub ramp_target: u8,
    #[serde(rename = "rampCurrent")]
    pub ramp_current: u8,
}

impl Default for ServoState {
    fn default() -> Self {
        Self {
            calibrated_min_angle: 0,
            calibrated_max_angle: MAX_ANGLE,
            is_ramping: false,
            ramp_target: 0,
            ramp_current: 0,
        }
    }
}

impl ServoState {
    /// Linear map from a 0..=100 position to an angle between the calibrated
    /// bounds. `min > max` inverts the direction.
    pub fn position_to_angle(&self, position: u8) -> u8 {
        let min = u16::from(self.calibrated_min_angle);
        let max = u16::from(self.calibrated_max_angle);
        let position = u16::from(position.min(MAX_OPENING));

        if min == max {
            return self.calibrated_min_angle;
        }

        let angle = if max > min {
            min + (max - min) * position / 100
        } else {
            min - (min - max) * position / 100
        };
        angle as u8
    }

    pub fn angle_to_position(&self, angle: u8) -> u8 {
        let min = self.calibrated_min_angle;
        let max = self.calibrated_max_angle;

        if min == max {
            return MAX_OPENING;
        }

        let (distance, offset) = if max > min {
            let angle = angle.clamp(min, max);
            (max - min, angle - min)
        } else {
            let angle = angle.clamp(max, min);
            (min - max, min - angle)
        };

        (u16::from(offset) * 100 / u16::from(distance)) as u8
    }
}

/// One physical servo: position mapping, calibration and step-wise ramping.
/// Every hardware write is preceded by energizing the power gate and followed
/// by a delayed de-energize request.
pub struct ServoActuator {
    role: ServoRole,
    hardware: Box<dyn ServoHardware>,
    state: ServoState,
}

impl ServoActuator {
    pub fn new(role: ServoRole, hardware: Box<dyn ServoHardware>) -> Self {
        Self {
            role,
            hardware,
            state: ServoState::default(),
        }
    }

    pub fn role(&self) -> ServoRole {
        self.role
    }

    pub fn state(&self) -> ServoState {
        self.state
    }

    pub fn is_ramping(&self) -> bool {
        self.state.is_ramping
    }

    pub fn load_calibration(&mut self, store: &dyn SettingsStore) {
        let min_key = self.role.min_key();
        if store.is_set(min_key) {
            self.state.calibrated_min_angle = clamp_angle(store.read(min_key));
        }
        let max_key = self.role.max_key();
        if store.is_set(max_key) {
            self.state.calibrated_max_angle = clamp_angle(store.read(max_key));
        }
        debug!(
            servo = self.role.as_str(),
            min = self.state.calibrated_min_angle,
            max = self.state.calibrated_max_angle,
            "servo calibration loaded"
        );
    }

    pub fn set_calibration(
        &mut self,
        bound: CalibrationBound,
        angle: u8,
        store: &mut dyn SettingsStore,
    ) -> Result<(), StoreError> {
        let key = match bound {
            CalibrationBound::Min => self.role.min_key(),
            CalibrationBound::Max => self.role.max_key(),
        };
        key.validate(i32::from(angle))?;
        store.write(key, i32::from(angle))?;

        match bound {
            CalibrationBound::Min => self.state.calibrated_min_angle = angle,
            CalibrationBound::Max => self.state.calibrated_max_angle = angle,
        }
        info!(servo = self.role.as_str(), ?bound, angle, "servo calibration updated");
        Ok(())
    }

    /// Position read back from the hardware through the calibration map.
    pub fn current_position(&self) -> u8 {
        self.state.angle_to_position(self.hardware.read_angle())
    }

    pub fn move_to(&mut self, position: u8, gate: &mut PowerGate, now_ms: u64) {
        let angle = self.state.position_to_angle(position);
        gate.energize();
        self.hardware.write_angle(angle);
        gate.request_deenergize_after_delay(now_ms);
    }

    pub fn set_ramp_target(&mut self, position: u8) {
        let target = position.min(MAX_OPENING);
        let current = self.current_position();

        self.state.ramp_target = target;
        self.state.ramp_current = current;
        self.state.is_ramping = current != target;

        if self.state.is_ramping {
            debug!(servo = self.role.as_str(), from = current, to = target, "ramp started");
        }
    }

    /// Advances an active ramp by one position unit. Returns `true` if a step
    /// was written.
    pub fn tick_ramp(&mut self, gate: &mut PowerGate, now_ms: u64) -> bool {
        if !self.state.is_ramping {
            return false;
        }

        if self.state.ramp_current == self.state.ramp_target {
            self.state.is_ramping = false;
            return false;
        }

        if self.state.ramp_current > self.state.ramp_target {
            self.state.ramp_current -= 1;
        } else {
            self.state.ramp_current += 1;
        }

        let position = self.state.ramp_current;
        self.move_to(position, gate, now_ms);

        if self.state.ramp_current == self.state.ramp_target {
            self.state.is_ramping = false;
            debug!(servo = self.role.as_str(), position, "ramp finished");
        }
        true
    }
}

fn clamp_angle(raw: i32) -> u8 {
    raw.clamp(0, i32::from(MAX_ANGLE)) as u8
}

impl std::fmt::Debug for ServoActuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServoActuator")
            .field("role", &self.role)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        power_gate::PowerGate,
        store::MemoryStore,
        testing::{RecordingRail, RecordingServo},
    };

    fn state(min: u8, max: u8) -> ServoState {
        ServoState {
            calibrated_min_angle: min,
            calibrated_max_angle: max,
            ..ServoState::default()
        }
    }

    fn rig(min: u8, max: u8, angle: u8) -> (ServoActuator, RecordingServo, RecordingRail, PowerGate) {
        let rail = RecordingRail::default();
        let servo = RecordingServo::new(&rail, angle);
        let gate = PowerGate::new(Box::new(rail.clone()), 2_000);
        let mut store = MemoryStore::default();
        store.write(SettingKey::OpenServoMin, i32::from(min)).unwrap();
        store.write(SettingKey::OpenServoMax, i32::from(max)).unwrap();

        let mut actuator = ServoActuator::new(ServoRole::PullOpen, Box::new(servo.clone()));
        actuator.load_calibration(&store);
        (actuator, servo, rail, gate)
    }

    #[test]
    fn maps_positions_onto_calibrated_range() {
        let normal = state(20, 120);
        assert_eq!(normal.position_to_angle(0), 20);
        assert_eq!(normal.position_to_angle(50), 70);
        assert_eq!(normal.position_to_angle(100), 120);
        assert_eq!(normal.position_to_angle(250), 120);

        let inverted = state(160, 60);
        assert_eq!(inverted.position_to_angle(0), 160);
        assert_eq!(inverted.position_to_angle(25), 135);
        assert_eq!(inverted.position_to_angle(100), 60);
    }

    #[test]
    fn maps_angles_back_to_positions() {
        let normal = state(20, 120);
        assert_eq!(normal.angle_to_position(70), 50);
        assert_eq!(normal.angle_to_position(0), 0);
        assert_eq!(normal.angle_to_position(180), 100);

        let inverted = state(160, 60);
        assert_eq!(inverted.angle_to_position(135), 25);
        assert_eq!(inverted.angle_to_position(170), 0);
        assert_eq!(inverted.angle_to_position(10), 100);
    }

    #[test]
    fn degenerate_calibration_uses_fallbacks() {
        let flat = state(90, 90);
        assert_eq!(flat.position_to_angle(0), 90);
        assert_eq!(flat.position_to_angle(100), 90);
        assert_eq!(flat.angle_to_position(10), 100);
    }

    #[test]
    fn move_to_brackets_write_with_power() {
        let (mut actuator, servo, rail, mut gate) = rig(0, 100, 0);

        actuator.move_to(40, &mut gate, 1_000);

        assert_eq!(servo.writes(), vec![(40, true)]);
        assert!(gate.is_energized());
        assert!(!gate.tick(3_000));
        assert!(gate.tick(3_001));
        assert!(!rail.is_on());
    }

    #[test]
    fn ramp_steps_one_unit_per_tick() {
        let (mut actuator, servo, rail, mut gate) = rig(0, 100, 10);

        actuator.set_ramp_target(13);
        assert!(actuator.is_ramping());

        let mut now = 0;
        while actuator.tick_ramp(&mut gate, now) {
            now += 40;
            gate.tick(now);
        }

        assert_eq!(servo.writes(), vec![(11, true), (12, true), (13, true)]);
        assert!(!actuator.is_ramping());
        assert_eq!(actuator.state().ramp_current, 13);

        // Power stays on across the ramp and drops once the debounce elapses.
        assert!(gate.is_energized());
        assert!(gate.tick(80 + 2_001));
        assert_eq!(rail.history(), vec![false, true, true, true, false]);
    }

    #[test]
    fn ramp_downwards() {
        let (mut actuator, servo, _rail, mut gate) = rig(0, 100, 5);

        actuator.set_ramp_target(2);
        while actuator.tick_ramp(&mut gate, 0) {}

        let angles: Vec<_> = servo.writes().iter().map(|(angle, _)| *angle).collect();
        assert_eq!(angles, vec![4, 3, 2]);
    }

    #[test]
    fn ramp_to_current_position_is_not_started() {
        let (mut actuator, servo, _rail, mut gate) = rig(0, 100, 30);

        actuator.set_ramp_target(30);

        assert!(!actuator.is_ramping());
        assert!(!actuator.tick_ramp(&mut gate, 0));
        assert!(servo.writes().is_empty());
    }

    #[test]
    fn calibration_persists_and_applies_immediately() {
        let (mut actuator, servo, _rail, mut gate) = rig(0, 100, 0);
        let mut store = MemoryStore::default();

        actuator
            .set_calibration(CalibrationBound::Max, 50, &mut store)
            .unwrap();
        assert_eq!(store.read(SettingKey::OpenServoMax), 50);

        actuator.move_to(100, &mut gate, 0);
        assert_eq!(servo.angle(), 50);

        let err = actuator
            .set_calibration(CalibrationBound::Min, 200, &mut store)
            .unwrap_err();
        assert!(matches!(err, StoreError::OutOfRange { .. }));
        assert!(!store.is_set(SettingKey::OpenServoMin));
    }
}
