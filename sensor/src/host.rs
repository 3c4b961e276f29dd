use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::{info, warn};

use window_opener_common::{
    ForecastPoint, NetworkConfig, WeatherReport, WeatherSnapshot, TOPIC_SENSOR_TEMP,
    TOPIC_WEATHER_REPORT,
};

const PUBLISH_INTERVAL: Duration = Duration::from_secs(30);
/// Weather is published every this many temperature ticks.
const WEATHER_EVERY_TICKS: u64 = 10;
const FORECAST_HOURS: i64 = 12;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let defaults = NetworkConfig::default();
    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(defaults.mqtt_host);
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(defaults.mqtt_port);

    let mut mqtt_options = MqttOptions::new("window-opener-sensor", mqtt_host, mqtt_port);

    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                warn!("sensor mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    info!("sensor publisher started");

    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(PUBLISH_INTERVAL);

    loop {
        interval.tick().await;

        // Hardware integration point: replace with the BME280 driver and the
        // weather/air-quality HTTP clients on the device.
        let temperature = simulated_temperature(tick);
        mqtt.publish(
            TOPIC_SENSOR_TEMP,
            QoS::AtLeastOnce,
            true,
            format!("{temperature:.2}"),
        )
        .await
        .context("failed to publish sensor temperature")?;

        if tick % WEATHER_EVERY_TICKS == 0 {
            let report = simulated_report(tick, Utc::now());
            let body = serde_json::to_vec(&report).context("failed to encode weather report")?;
            mqtt.publish(TOPIC_WEATHER_REPORT, QoS::AtLeastOnce, true, body)
                .await
                .context("failed to publish weather report")?;
            info!(
                outside_temperature = report.snapshot.outside_temperature,
                "weather report published"
            );
        }

        tick = tick.saturating_add(1);
    }
}

/// Slow triangle wave between 20 and 24 °C.
fn simulated_temperature(tick: u64) -> f64 {
    let phase = (tick % 40) as f64;
    let offset = if phase < 20.0 { phase } else { 40.0 - phase };
    20.0 + offset / 5.0
}

fn simulated_report(tick: u64, now: DateTime<Utc>) -> WeatherReport {
    let outside_temperature = 8.0 + (tick % 12) as f64;
    let forecast = (1..=FORECAST_HOURS)
        .map(|hour| ForecastPoint {
            timestamp: now + chrono::Duration::hours(hour),
            temperature: outside_temperature - hour as f64 * 0.5,
            wind_speed: 2.0 + (hour % 4) as f64,
        })
        .collect();

    WeatherReport {
        snapshot: WeatherSnapshot {
            forecast_timestamp: now,
            outside_temperature,
            wind_speed: 3.0,
            pm2_5: 12.0 + (tick % 5) as f64,
            pm2_5_timestamp: now,
            pm10: 20.0 + (tick % 7) as f64,
            pm10_timestamp: now,
        },
        forecast,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn simulated_temperature_stays_in_band() {
        for tick in 0..200 {
            let value = simulated_temperature(tick);
            assert!((20.0..=24.0).contains(&value), "tick {tick}: {value}");
        }
        assert_eq!(simulated_temperature(0), 20.0);
        assert_eq!(simulated_temperature(20), 24.0);
    }

    #[test]
    fn simulated_report_is_fresh_and_calm() {
        let now = Utc.with_ymd_and_hms(2026, 9, 1, 8, 0, 0).unwrap();
        let report = simulated_report(3, now);

        assert!(report.snapshot.is_fresh(now, chrono::Duration::hours(3)));
        assert_eq!(report.forecast.len(), FORECAST_HOURS as usize);
        assert!(report.forecast.iter().all(|point| point.wind_speed <= 8.0));

        let json = serde_json::to_string(&report).unwrap();
        let parsed: WeatherReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }
}
