//! Application context and the recurring tasks that drive it.
//!
//! Everything runs on the scheduler: evaluation, servo ramping, the network
//! poller and the periodic weather refresh are self-rescheduling tasks over
//! one shared [`App`]. The host only has to call [`Runtime::poll`] in a loop.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::{
    actuator::{CalibrationBound, ServoActuator, ServoRole},
    config::{seed_defaults, ControllerConfig, SettingKey, TimingConfig},
    controller::{self, BOOTSTRAP_OPENING},
    error::StoreError,
    hal::{
        Connectivity, PowerRail, ServoHardware, TelemetrySink, TemperatureSensor, WallClock,
        WeatherSource,
    },
    history::{TemperatureHistory, WeatherHistory},
    network_queue::{
        LinkState, NetworkQueue, NetworkQueueEntry, NetworkServices, PollResult, RequestOutcome,
    },
    power_gate::PowerGate,
    scheduler::Scheduler,
    store::SettingsStore,
    types::{AppMode, ControllerStatus, Log},
    warnings::{check_wind_warning, WarningSet, WarningSink},
};

/// Hardware and service adapters the runtime is built from.
pub struct Collaborators {
    pub sensor: Box<dyn TemperatureSensor>,
    pub store: Box<dyn SettingsStore>,
    pub clock: Box<dyn WallClock>,
    pub connectivity: Box<dyn Connectivity>,
    pub weather: Box<dyn WeatherSource>,
    pub telemetry: Box<dyn TelemetrySink>,
    pub power_rail: Box<dyn PowerRail>,
    pub open_servo: Box<dyn ServoHardware>,
    pub close_servo: Box<dyn ServoHardware>,
}

/// Flags shared between tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppState {
    pub mode: AppMode,
    pub force_evaluation: bool,
    pub link: LinkState,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            mode: AppMode::Manual,
            force_evaluation: false,
            link: LinkState::default(),
        }
    }
}

pub struct App {
    sensor: Box<dyn TemperatureSensor>,
    store: Box<dyn SettingsStore>,
    clock: Box<dyn WallClock>,
    connectivity: Box<dyn Connectivity>,
    services: NetworkServices,
    power: PowerGate,
    open_servo: ServoActuator,
    close_servo: ServoActuator,
    history: TemperatureHistory,
    weather: WeatherHistory,
    network: NetworkQueue,
    warnings: WarningSet,
    state: AppState,
    timing: TimingConfig,
    /// Bumped on every servo sequence; a stagger task from an older sequence
    /// is stale.
    servo_sequence: u64,
    boot_started_ms: u64,
}

impl App {
    pub fn new(collaborators: Collaborators, mut timing: TimingConfig) -> Self {
        timing.sanitize();
        Self {
            sensor: collaborators.sensor,
            store: collaborators.store,
            clock: collaborators.clock,
            connectivity: collaborators.connectivity,
            services: NetworkServices {
                weather: collaborators.weather,
                telemetry: collaborators.telemetry,
            },
            power: PowerGate::new(collaborators.power_rail, timing.power_debounce_ms),
            open_servo: ServoActuator::new(ServoRole::PullOpen, collaborators.open_servo),
            close_servo: ServoActuator::new(ServoRole::PullClose, collaborators.close_servo),
            history: TemperatureHistory::new(),
            weather: WeatherHistory::new(),
            network: NetworkQueue::new(),
            warnings: WarningSet::default(),
            state: AppState::default(),
            timing,
            servo_sequence: 0,
            boot_started_ms: 0,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    pub fn history(&self) -> &TemperatureHistory {
        &self.history
    }

    pub fn weather_history(&self) -> &WeatherHistory {
        &self.weather
    }

    pub fn network(&self) -> &NetworkQueue {
        &self.network
    }

    pub fn warnings(&self) -> &WarningSet {
        &self.warnings
    }

    pub fn power(&self) -> &PowerGate {
        &self.power
    }

    pub fn actuator(&self, role: ServoRole) -> &ServoActuator {
        match role {
            ServoRole::PullOpen => &self.open_servo,
            ServoRole::PullClose => &self.close_servo,
        }
    }

    fn actuator_mut(&mut self, role: ServoRole) -> &mut ServoActuator {
        match role {
            ServoRole::PullOpen => &mut self.open_servo,
            ServoRole::PullClose => &mut self.close_servo,
        }
    }

    pub fn config(&self) -> ControllerConfig {
        ControllerConfig::load(&*self.store)
    }

    pub fn set_mode(&mut self, mode: AppMode) {
        if self.state.mode != mode {
            info!(mode = mode.as_str(), "mode changed");
        }
        self.state.mode = mode;
    }

    /// Runs the controller on the evaluation task's next turn regardless of
    /// mode.
    pub fn request_evaluation(&mut self) {
        debug!("evaluation requested");
        self.state.force_evaluation = true;
    }

    pub fn clear_warnings(&mut self) {
        info!("warnings cleared");
        self.warnings.clear();
    }

    pub fn calibrate(
        &mut self,
        role: ServoRole,
        bound: CalibrationBound,
        angle: u8,
    ) -> Result<(), StoreError> {
        let store = &mut *self.store;
        match role {
            ServoRole::PullOpen => self.open_servo.set_calibration(bound, angle, store),
            ServoRole::PullClose => self.close_servo.set_calibration(bound, angle, store),
        }
    }

    /// Validates and persists one setting given in real units. Calibration
    /// keys take effect on the servos immediately; controller keys on the
    /// next evaluation.
    pub fn update_setting(&mut self, key: SettingKey, value: f64) -> Result<(), StoreError> {
        let raw = key.validate(key.encode(value))?;
        self.store.write(key, raw)?;
        info!(key = %key, value, "setting updated");

        self.open_servo.load_calibration(&*self.store);
        self.close_servo.load_calibration(&*self.store);
        Ok(())
    }

    /// Every setting in real units, with defaults for keys never written.
    pub fn settings(&self) -> BTreeMap<SettingKey, f64> {
        let config = self.config();
        SettingKey::ALL
            .into_iter()
            .map(|key| {
                let value = if self.store.is_set(key) {
                    key.decode(self.store.read(key))
                } else {
                    config
                        .get(key)
                        .unwrap_or_else(|| self.calibration_setting(key))
                };
                (key, value)
            })
            .collect()
    }

    fn calibration_setting(&self, key: SettingKey) -> f64 {
        let state = match key {
            SettingKey::OpenServoMin | SettingKey::OpenServoMax => self.open_servo.state(),
            _ => self.close_servo.state(),
        };
        match key {
            SettingKey::OpenServoMin | SettingKey::CloseServoMin => {
                f64::from(state.calibrated_min_angle)
            }
            _ => f64::from(state.calibrated_max_angle),
        }
    }

    pub fn logs(&self) -> Vec<Log> {
        self.history.iter().copied().collect()
    }

    pub fn status(&self) -> ControllerStatus {
        let config = self.config();
        let last = self.history.last();

        ControllerStatus {
            mode: self.state.mode.as_str(),
            window_opening: last.map_or(BOOTSTRAP_OPENING, |log| log.window_opening),
            last_inside_temperature: last.map_or(config.optimal_temperature, |log| {
                log.inside_temperature
            }),
            wifi_connected: self.state.link.connected,
            power_energized: self.power.is_energized(),
            pending_network_requests: self.network.len(),
            open_servo_ramping: self.open_servo.is_ramping(),
            close_servo_ramping: self.close_servo.is_ramping(),
            fresh_weather: self
                .weather
                .latest_fresh(self.clock.now_utc(), config.weather_max_age())
                .cloned(),
            warnings: self.warnings.iter().map(|warning| warning.as_str()).collect(),
        }
    }

    /// Gives both servos the same ramp target, the trailing one after the
    /// stagger delay. Opening leads with the pull-close servo so it gives
    /// slack before the pull-open servo pulls; closing is the reverse.
    fn start_servo_ramps(&mut self, previous: u8, target: u8, scheduler: &mut Scheduler<App>) {
        let (leading, trailing) = if target > previous {
            (ServoRole::PullClose, ServoRole::PullOpen)
        } else {
            (ServoRole::PullOpen, ServoRole::PullClose)
        };

        debug!(
            leading = leading.as_str(),
            trailing = trailing.as_str(),
            target,
            "sequencing servos"
        );
        self.servo_sequence = self.servo_sequence.wrapping_add(1);
        let sequence = self.servo_sequence;
        self.actuator_mut(leading).set_ramp_target(target);
        scheduler.schedule(
            "servo-stagger",
            self.timing.servo_stagger_ms,
            move |app: &mut App, _: &mut Scheduler<App>| {
                if app.servo_sequence != sequence {
                    debug!(trailing = trailing.as_str(), target, "stale servo stagger skipped");
                    return;
                }
                app.actuator_mut(trailing).set_ramp_target(target);
            },
        );
    }

    /// An entry evicted from a full queue counts as a failed request.
    fn queue_request(&mut self, entry: NetworkQueueEntry) {
        if let Some(evicted) = self.network.enqueue(entry) {
            self.warnings
                .add_warning(evicted.kind().failure_warning());
        }
    }

    fn seed_history(&mut self, now_ms: u64, temperature: f64) {
        self.history.add(now_ms, temperature, BOOTSTRAP_OPENING, 0);
        info!(temperature, opening = BOOTSTRAP_OPENING, "controller started");
    }

    fn apply_outcome(&mut self, outcome: RequestOutcome) {
        match outcome {
            RequestOutcome::WeatherRefreshed(report) => {
                if let Some(now) = self.clock.now_utc() {
                    check_wind_warning(
                        &report.forecast,
                        now,
                        self.timing.wind_warning_speed,
                        self.timing.wind_warning_hours_ahead,
                        &mut self.warnings,
                    );
                }
                info!(
                    outside_temperature = report.snapshot.outside_temperature,
                    pm2_5 = report.snapshot.pm2_5,
                    pm10 = report.snapshot.pm10,
                    "weather snapshot stored"
                );
                self.weather.add(report.snapshot);
            }
            RequestOutcome::TelemetryUploaded
            | RequestOutcome::TelemetryFailed(_)
            | RequestOutcome::WeatherFailed(_) => {}
        }
    }
}

/// The scheduler together with the context its tasks run against.
pub struct Runtime {
    scheduler: Scheduler<App>,
    app: App,
}

impl Runtime {
    pub fn new(collaborators: Collaborators, timing: TimingConfig) -> Self {
        Self {
            scheduler: Scheduler::default(),
            app: App::new(collaborators, timing),
        }
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut App {
        &mut self.app
    }

    pub fn scheduler(&self) -> &Scheduler<App> {
        &self.scheduler
    }

    /// Boot sequence: seed settings, center both servos and start the
    /// recurring tasks. Evaluation starts once the history holds its first
    /// sample; without a reading at boot, seeding is retried until
    /// `boot_sensor_wait_ms` runs out and then falls back to the optimal
    /// temperature.
    pub fn start(&mut self, now_ms: u64) -> Result<(), StoreError> {
        let app = &mut self.app;
        seed_defaults(&mut *app.store)?;

        app.open_servo.load_calibration(&*app.store);
        app.close_servo.load_calibration(&*app.store);
        app.open_servo
            .move_to(BOOTSTRAP_OPENING, &mut app.power, now_ms);
        app.close_servo
            .move_to(BOOTSTRAP_OPENING, &mut app.power, now_ms);
        app.boot_started_ms = now_ms;

        self.scheduler = Scheduler::new(now_ms);
        self.scheduler.schedule("weather-refresh", 0, weather_refresh_task);
        self.scheduler.schedule("network", 0, network_task);
        match app.sensor.read_temperature() {
            Ok(temperature) => {
                app.seed_history(now_ms, temperature);
                self.scheduler.schedule("evaluation", 0, evaluation_task);
            }
            Err(err) => {
                warn!(
                    error = %err,
                    retry_ms = app.timing.sensor_retry_ms,
                    "boot temperature unavailable"
                );
                self.scheduler
                    .schedule("bootstrap", app.timing.sensor_retry_ms, bootstrap_task);
            }
        }
        self.scheduler.schedule("ramp", 0, ramp_task);
        Ok(())
    }

    /// One turn of the main loop: at most one due task, then the power gate.
    pub fn poll(&mut self, now_ms: u64) -> Option<&'static str> {
        let ran = self.scheduler.poll(&mut self.app, now_ms);
        self.app.power.tick(now_ms);
        ran
    }

    /// Moves the window smoothly to `position`, outside of the controller.
    pub fn command_position(&mut self, position: u8) {
        let position = position.min(controller::MAX_OPENING);
        let previous = self.app.open_servo.current_position();
        info!(from = previous, to = position, "manual move");
        self.app
            .start_servo_ramps(previous, position, &mut self.scheduler);
    }
}

fn bootstrap_task(app: &mut App, scheduler: &mut Scheduler<App>) {
    let now_ms = scheduler.now_ms();
    let temperature = match app.sensor.read_temperature() {
        Ok(temperature) => temperature,
        Err(err) => {
            if now_ms.saturating_sub(app.boot_started_ms) < app.timing.boot_sensor_wait_ms {
                debug!(error = %err, "still waiting for boot temperature");
                scheduler.schedule("bootstrap", app.timing.sensor_retry_ms, bootstrap_task);
                return;
            }
            let fallback = app.config().optimal_temperature;
            warn!(error = %err, fallback, "no boot temperature; seeding with optimal");
            fallback
        }
    };
    app.seed_history(now_ms, temperature);
    scheduler.schedule("evaluation", 0, evaluation_task);
}

fn evaluation_task(app: &mut App, scheduler: &mut Scheduler<App>) {
    if app.state.mode != AppMode::Auto && !app.state.force_evaluation {
        scheduler.schedule("evaluation", app.timing.mode_recheck_ms, evaluation_task);
        return;
    }

    let now_ms = scheduler.now_ms();
    let temperature = match app.sensor.read_temperature() {
        Ok(temperature) => temperature,
        Err(err) => {
            warn!(error = %err, retry_ms = app.timing.sensor_retry_ms, "temperature read failed");
            scheduler.schedule("evaluation", app.timing.sensor_retry_ms, evaluation_task);
            return;
        }
    };
    app.state.force_evaluation = false;

    let config = app.config();
    let weather = app
        .weather
        .latest_fresh(app.clock.now_utc(), config.weather_max_age())
        .cloned();

    match controller::evaluate(
        temperature,
        &mut app.history,
        weather.as_ref(),
        &config,
        now_ms,
    ) {
        Ok(evaluation) => {
            if evaluation.opening_changed() {
                info!(
                    from = evaluation.previous_opening,
                    to = evaluation.new_opening,
                    "window opening changed"
                );
                app.start_servo_ramps(
                    evaluation.previous_opening,
                    evaluation.new_opening,
                    scheduler,
                );
            }
            app.queue_request(NetworkQueueEntry::telemetry(evaluation.diagnostics));
        }
        Err(err) => warn!(error = %err, "evaluation skipped"),
    }

    scheduler.schedule("evaluation", config.evaluation_interval_ms(), evaluation_task);
}

fn ramp_task(app: &mut App, scheduler: &mut Scheduler<App>) {
    let now_ms = scheduler.now_ms();
    app.open_servo.tick_ramp(&mut app.power, now_ms);
    app.close_servo.tick_ramp(&mut app.power, now_ms);
    scheduler.schedule("ramp", app.timing.ramp_step_interval_ms, ramp_task);
}

fn network_task(app: &mut App, scheduler: &mut Scheduler<App>) {
    let now_ms = scheduler.now_ms();
    let connected = app.state.link.refresh(
        &mut *app.connectivity,
        now_ms,
        app.timing.connect_timeout_ms,
        &mut app.warnings,
    );

    let delay_ms = match app
        .network
        .process_next(connected, &mut app.services, &mut app.warnings)
    {
        PollResult::Idle => app.timing.network_idle_poll_ms,
        PollResult::AwaitingLink => app.timing.connect_retry_ms,
        PollResult::Busy => app.timing.network_busy_poll_ms,
        PollResult::Completed(outcome) => {
            app.apply_outcome(outcome);
            app.timing.network_busy_poll_ms
        }
    };
    scheduler.schedule("network", delay_ms, network_task);
}

fn weather_refresh_task(app: &mut App, scheduler: &mut Scheduler<App>) {
    app.queue_request(NetworkQueueEntry::WeatherRefresh);
    scheduler.schedule(
        "weather-refresh",
        app.timing.weather_refresh_interval_ms,
        weather_refresh_task,
    );
}
