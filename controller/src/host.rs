use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{info, warn};

use window_opener_common::{
    AppMode, CalibrationBound, Collaborators, Runtime, RuntimeConfig, ServoRole, SettingKey,
    StoreError, WeatherReport, TOPIC_CONTROLLER_STATE, TOPIC_SENSOR_TEMP, TOPIC_WEATHER_REPORT,
};

use crate::adapters::{
    parse_temperature, BrokerLink, FileSettingsStore, LoggingRail, LoggingServo, MqttSensor,
    MqttTelemetry, MqttWeather, Readings, SystemClock, TEMPERATURE_MAX_AGE,
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 16 * 1024;
const CONTROL_TICK: Duration = Duration::from_millis(10);
const MAX_TASKS_PER_TICK: usize = 16;

#[derive(Clone)]
struct AppState {
    runtime: Arc<Mutex<Runtime>>,
    mqtt: AsyncClient,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_dir = std::env::var("WINDOW_OPENER_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| RuntimeConfig::default().data_dir);
    let mut runtime_config = load_runtime_config(&config_dir.join("runtime.json"))
        .await
        .unwrap_or_else(|err| {
            warn!("failed to load runtime config: {err:#}");
            RuntimeConfig::default()
        });
    if std::env::var("WINDOW_OPENER_DATA_DIR").is_ok() {
        runtime_config.data_dir = config_dir;
    }
    runtime_config.timing.sanitize();

    let mqtt_host =
        std::env::var("MQTT_HOST").unwrap_or(runtime_config.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime_config.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("window-opener-controller", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime_config.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime_config.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    let readings = Readings::default();
    subscribe_topics(&mqtt).await?;
    spawn_mqtt_loop(readings.clone(), eventloop);

    let store = FileSettingsStore::open(runtime_config.data_dir.join("settings.json")).await?;
    info!("settings stored in {}", store.path().display());

    let mut runtime = Runtime::new(
        Collaborators {
            sensor: Box::new(MqttSensor::new(readings.clone(), TEMPERATURE_MAX_AGE)),
            store: Box::new(store),
            clock: Box::new(SystemClock),
            connectivity: Box::new(BrokerLink::new(readings.clone())),
            weather: Box::new(MqttWeather::new(readings.clone())),
            telemetry: Box::new(MqttTelemetry::new(mqtt.clone())),
            power_rail: Box::new(LoggingRail),
            open_servo: Box::new(LoggingServo::new("pull-open")),
            close_servo: Box::new(LoggingServo::new("pull-close")),
        },
        runtime_config.timing.clone(),
    );
    runtime
        .start(monotonic_ms())
        .context("failed to seed controller settings")?;

    let app_state = AppState {
        runtime: Arc::new(Mutex::new(runtime)),
        mqtt,
    };

    spawn_control_loop(app_state.clone());
    spawn_state_publish_loop(app_state.clone());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/evaluate", post(handle_evaluate))
        .route("/api/move", post(handle_move))
        .route("/api/history", get(handle_get_history))
        .route(
            "/api/settings",
            get(handle_get_settings).post(handle_set_setting),
        )
        .route("/api/calibration", post(handle_calibration))
        .route("/api/warnings/clear", post(handle_clear_warnings))
        .with_state(app_state);

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn load_runtime_config(path: &std::path::Path) -> anyhow::Result<RuntimeConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err.into()),
    }
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    for topic in [TOPIC_SENSOR_TEMP, TOPIC_WEATHER_REPORT] {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(readings: Readings, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) = handle_mqtt_message(&readings, &message.topic, &message.payload)
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    readings.set_connected(true);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    readings.set_connected(false);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn handle_mqtt_message(readings: &Readings, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    match topic {
        TOPIC_SENSOR_TEMP => {
            let message = std::str::from_utf8(payload).context("non utf8 mqtt payload")?;
            let temperature = parse_temperature(message)?;
            readings.set_temperature(temperature);
        }
        TOPIC_WEATHER_REPORT => {
            let report = serde_json::from_slice::<WeatherReport>(payload)
                .context("invalid weather report payload")?;
            readings.set_weather(report);
        }
        _ => {}
    }
    Ok(())
}

fn spawn_control_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CONTROL_TICK);
        loop {
            interval.tick().await;
            let now_ms = monotonic_ms();
            let mut runtime = app_state.runtime.lock().await;
            for _ in 0..MAX_TASKS_PER_TICK {
                if runtime.poll(now_ms).is_none() {
                    break;
                }
            }
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;

            let payload = {
                let runtime = app_state.runtime.lock().await;
                serde_json::to_vec(&runtime.app().status())
            };

            match payload {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("controller state publish failed: {err}");
                    }
                }
                Err(err) => warn!("controller state serialization failed: {err}"),
            }
        }
    });
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.runtime.lock().await.app().status();
    Json(status)
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(mode) = AppMode::parse(value) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid mode. Use 'AUTO' or 'MANUAL'",
        );
    };

    state.runtime.lock().await.app_mut().set_mode(mode);
    handle_get_status(State(state)).await.into_response()
}

async fn handle_evaluate(State(state): State<AppState>) -> impl IntoResponse {
    state.runtime.lock().await.app_mut().request_evaluation();
    handle_get_status(State(state)).await.into_response()
}

async fn handle_move(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(position) = value.parse::<u8>().ok().filter(|position| *position <= 100) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid position value (0-100)");
    };

    state.runtime.lock().await.command_position(position);
    handle_get_status(State(state)).await.into_response()
}

async fn handle_get_history(State(state): State<AppState>) -> impl IntoResponse {
    let logs = state.runtime.lock().await.app().logs();
    Json(logs)
}

async fn handle_get_settings(State(state): State<AppState>) -> impl IntoResponse {
    let settings = state.runtime.lock().await.app().settings();
    Json(settings)
}

async fn handle_set_setting(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let (Some(key), Some(value)) = (params.get("key"), params.get("value")) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing 'key' or 'value' parameter",
        );
    };
    let key = match SettingKey::parse(key) {
        Ok(key) => key,
        Err(err) => return store_error_response(&err),
    };
    let Some(value) = value.parse::<f64>().ok().filter(|value| value.is_finite()) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid setting value");
    };

    let result = state.runtime.lock().await.app_mut().update_setting(key, value);
    if let Err(err) = result {
        warn!("failed to update setting {key}: {err}");
        return store_error_response(&err);
    }
    handle_get_settings(State(state)).await.into_response()
}

async fn handle_calibration(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(role) = params.get("servo").and_then(|value| ServoRole::parse(value)) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid servo. Use 'open' or 'close'");
    };
    let Some(bound) = params
        .get("bound")
        .and_then(|value| CalibrationBound::parse(value))
    else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid bound. Use 'min' or 'max'");
    };
    let Some(angle) = params.get("value").and_then(|value| value.parse::<u8>().ok()) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid angle value (0-180)");
    };

    let result = state
        .runtime
        .lock()
        .await
        .app_mut()
        .calibrate(role, bound, angle);
    if let Err(err) = result {
        warn!("failed to update calibration: {err}");
        return store_error_response(&err);
    }
    handle_get_settings(State(state)).await.into_response()
}

async fn handle_clear_warnings(State(state): State<AppState>) -> impl IntoResponse {
    state.runtime.lock().await.app_mut().clear_warnings();
    handle_get_status(State(state)).await.into_response()
}

fn store_error_response(err: &StoreError) -> axum::response::Response {
    let status = match err {
        StoreError::UnknownKey(_) | StoreError::OutOfRange { .. } => StatusCode::BAD_REQUEST,
        StoreError::Persist(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, &err.to_string())
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
