//! Heuristic weighted-sum controller turning inside temperature, recent
//! history and the latest fresh weather snapshot into a window opening.

use tracing::debug;

use crate::{
    config::ControllerConfig,
    error::ControlError,
    history::TemperatureHistory,
    types::{DiagnosticRecord, TermBreakdown, WeatherSnapshot},
};

pub const MIN_OPENING: u8 = 0;
pub const MAX_OPENING: u8 = 100;

/// Opening used for the bootstrap sample seeded before the first evaluation.
pub const BOOTSTRAP_OPENING: u8 = 50;

/// Opening value reported for the outside term whenever it is at least as
/// warm outside as the optimal temperature.
pub const OUTSIDE_WARM_TERM: f64 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub previous_opening: u8,
    pub new_opening: u8,
    pub diagnostics: DiagnosticRecord,
}

impl Evaluation {
    pub fn opening_changed(&self) -> bool {
        self.previous_opening != self.new_opening
    }
}

pub fn proportional_term(current_temperature: f64, config: &ControllerConfig) -> f64 {
    let diff = current_temperature - config.optimal_temperature;
    let gain = if diff >= 0.0 {
        config.p_term_positive
    } else {
        config.p_term_negative
    };
    diff * gain
}

/// Sum of every retained sample's distance from optimal. Samples evicted from
/// the history no longer contribute.
pub fn integral_term(history: &TemperatureHistory, config: &ControllerConfig) -> f64 {
    let accumulated: f64 = history
        .iter()
        .map(|log| log.inside_temperature - config.optimal_temperature)
        .sum();
    accumulated * config.i_term
}

pub fn derivative_term(
    current_temperature: f64,
    last_temperature: f64,
    config: &ControllerConfig,
) -> f64 {
    let diff = current_temperature - last_temperature;
    let gain = if diff >= 0.0 {
        config.d_term_positive
    } else {
        config.d_term_negative
    };
    diff * gain
}

/// Pushes towards opening far above optimal and, with `1 / diff`, grows without
/// bound as the temperature approaches optimal from below.
pub fn opening_term(current_temperature: f64, config: &ControllerConfig) -> f64 {
    let diff = current_temperature - config.optimal_temperature;
    if diff < 0.0 {
        (1.0 / diff) * config.o_term_negative * -1.0
    } else {
        (diff + config.opening_term_positive_temperature_increase) * config.o_term_positive
    }
}

pub fn outside_temperature_term(outside_temperature: f64, config: &ControllerConfig) -> f64 {
    if outside_temperature >= config.optimal_temperature {
        return OUTSIDE_WARM_TERM;
    }

    let distance = (config.optimal_temperature - outside_temperature).abs();
    (config.outside_temperature_closing_threshold * distance) / config.max_outside_temperature_diff
}

/// Quadratic penalty on the weighted pollution ratio: zero up to the combined
/// norm, then `-(p^2 - 1)`. Never positive.
pub fn air_quality_term(pm2_5: f64, pm10: f64, config: &ControllerConfig) -> f64 {
    let total_weight = config.pm2_5_weight + config.pm10_weight;
    if total_weight <= 0.0 {
        return 0.0;
    }

    let ratio = (pm2_5 / config.pm2_5_norm * config.pm2_5_weight
        + pm10 / config.pm10_norm * config.pm10_weight)
        / total_weight;

    let penalty = (ratio * ratio - 1.0).max(0.0);
    if penalty.is_finite() {
        -penalty
    } else {
        0.0
    }
}

fn clamp_opening(opening: f64) -> u8 {
    opening.clamp(f64::from(MIN_OPENING), f64::from(MAX_OPENING)) as u8
}

/// Computes the new opening, appends it to `history` and returns the full
/// breakdown. `weather` must already be filtered for freshness.
pub fn evaluate(
    current_temperature: f64,
    history: &mut TemperatureHistory,
    weather: Option<&WeatherSnapshot>,
    config: &ControllerConfig,
    now_ms: u64,
) -> Result<Evaluation, ControlError> {
    let last = *history.last().ok_or(ControlError::EmptyHistory)?;

    let terms = TermBreakdown {
        proportional: proportional_term(current_temperature, config),
        integral: integral_term(history, config),
        derivative: derivative_term(current_temperature, last.inside_temperature, config),
        opening: opening_term(current_temperature, config),
        outside_temperature: weather
            .map(|snapshot| outside_temperature_term(snapshot.outside_temperature, config)),
        air_quality: weather.map(|snapshot| air_quality_term(snapshot.pm2_5, snapshot.pm10, config)),
    };

    let raw_delta = terms.sum();
    let applied_delta = if raw_delta.abs() < config.change_diff_threshold {
        0.0
    } else {
        raw_delta
    };

    let new_opening = if applied_delta == 0.0 {
        last.window_opening
    } else {
        clamp_opening(f64::from(last.window_opening) + applied_delta)
    };

    let delta_before_threshold = raw_delta as i32;
    history.add(now_ms, current_temperature, new_opening, delta_before_threshold);

    debug!(
        current_temperature,
        proportional = terms.proportional,
        integral = terms.integral,
        derivative = terms.derivative,
        opening = terms.opening,
        outside = ?terms.outside_temperature,
        air_quality = ?terms.air_quality,
        raw_delta,
        new_opening,
        "window opening evaluated"
    );

    Ok(Evaluation {
        previous_opening: last.window_opening,
        new_opening,
        diagnostics: DiagnosticRecord {
            inside_temperature: current_temperature,
            window_opening: new_opening,
            delta_before_threshold,
            delta_after_threshold: applied_delta as i32,
            outside_temperature: weather.map(|snapshot| snapshot.outside_temperature),
            pm2_5: weather.map(|snapshot| snapshot.pm2_5),
            pm10: weather.map(|snapshot| snapshot.pm10),
            config: config.clone(),
            terms,
        },
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;

    fn history_with(samples: &[(f64, u8)]) -> TemperatureHistory {
        let mut history = TemperatureHistory::new();
        for (index, (temp, opening)) in samples.iter().enumerate() {
            history.add(index as u64, *temp, *opening, 0);
        }
        history
    }

    fn weather(outside: f64, pm2_5: f64, pm10: f64) -> WeatherSnapshot {
        let at = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
        WeatherSnapshot {
            forecast_timestamp: at,
            outside_temperature: outside,
            wind_speed: 1.0,
            pm2_5,
            pm2_5_timestamp: at,
            pm10,
            pm10_timestamp: at,
        }
    }

    #[test]
    fn empty_history_is_rejected() {
        let mut history = TemperatureHistory::new();
        let result = evaluate(22.0, &mut history, None, &ControllerConfig::default(), 0);
        assert_eq!(result, Err(ControlError::EmptyHistory));
        assert!(history.is_empty());
    }

    #[test]
    fn hot_room_opens_fully() {
        let config = ControllerConfig::default();
        let mut history = history_with(&[(22.0, 50)]);

        let evaluation = evaluate(30.0, &mut history, None, &config, 1_000).unwrap();

        assert_eq!(evaluation.diagnostics.terms.proportional, 200.0);
        assert_eq!(evaluation.diagnostics.terms.integral, 0.0);
        assert_eq!(evaluation.diagnostics.terms.derivative, 400.0);
        assert_eq!(evaluation.diagnostics.terms.opening, 65.0);
        assert_eq!(evaluation.new_opening, 100);
        assert_eq!(evaluation.diagnostics.delta_before_threshold, 665);
        assert_eq!(evaluation.diagnostics.delta_after_threshold, 665);
        assert_eq!(history.len(), 2);
        assert_eq!(history.last().unwrap().window_opening, 100);
        assert_eq!(history.last().unwrap().delta_before_threshold, 665);
    }

    #[test]
    fn small_drift_stays_inside_dead_band() {
        let config = ControllerConfig {
            o_term_positive: 0.0,
            ..ControllerConfig::default()
        };
        let mut history = history_with(&[(22.0, 50)]);

        let evaluation = evaluate(22.05, &mut history, None, &config, 1_000).unwrap();

        // 0.05 * 25 + 0.05 * 50 = 3.75, well below the threshold of 20.
        assert!(evaluation.diagnostics.delta_before_threshold.abs() < 20);
        assert_eq!(evaluation.diagnostics.delta_after_threshold, 0);
        assert_eq!(evaluation.new_opening, 50);
        assert!(!evaluation.opening_changed());
    }

    #[test]
    fn dead_band_keeps_previous_position_exactly() {
        let config = ControllerConfig {
            change_diff_threshold: 1_000.0,
            ..ControllerConfig::default()
        };
        for (current, previous_opening) in [(30.0, 37), (10.0, 3), (22.5, 99)] {
            let mut history = history_with(&[(21.0, previous_opening)]);
            let evaluation = evaluate(current, &mut history, None, &config, 5).unwrap();
            assert_eq!(evaluation.new_opening, previous_opening);
        }
    }

    #[test]
    fn position_is_always_clamped() {
        let config = ControllerConfig::default();
        let temperatures = [-20.0, 0.0, 15.0, 21.999, 22.0, 22.001, 25.0, 40.0, 80.0];
        for current in temperatures {
            for previous in [0u8, 50, 100] {
                let mut history = history_with(&[(current - 3.0, previous), (current + 1.0, previous)]);
                let evaluation = evaluate(current, &mut history, None, &config, 0).unwrap();
                assert!(evaluation.new_opening <= MAX_OPENING);
            }
        }
    }

    #[test]
    fn cold_room_closes() {
        let config = ControllerConfig::default();
        let mut history = history_with(&[(19.0, 60)]);

        let evaluation = evaluate(18.0, &mut history, None, &config, 0).unwrap();

        // P = -4 * 15, I = -3 * 4, D = -1 * 45, O = (1 / -4) * 0.2 * -1
        let terms = evaluation.diagnostics.terms;
        assert_eq!(terms.proportional, -60.0);
        assert_eq!(terms.integral, -12.0);
        assert_eq!(terms.derivative, -45.0);
        assert!((terms.opening - 0.05).abs() < 1e-12);
        assert_eq!(evaluation.new_opening, 0);
    }

    #[test]
    fn integral_sums_only_retained_samples() {
        let config = ControllerConfig::default();
        let mut history = TemperatureHistory::new();
        // Twelve samples at +1 degree: only ten survive.
        for step in 0..12 {
            history.add(step, 23.0, 50, 0);
        }
        assert_eq!(integral_term(&history, &config), 10.0 * 4.0);
    }

    #[test]
    fn opening_term_diverges_just_below_optimal() {
        let config = ControllerConfig::default();
        let near = opening_term(21.999, &config);
        let far = opening_term(17.0, &config);

        assert!(near > 100.0);
        assert!(far > 0.0 && far < 0.1);
        assert_eq!(opening_term(22.0, &config), 25.0);
    }

    #[test]
    fn outside_term_pulls_closed_when_cold() {
        let config = ControllerConfig::default();
        let term = outside_temperature_term(5.0, &config);
        assert!((term - (-80.0 * 17.0 / 45.0)).abs() < 1e-9);
        assert!((term + 30.22).abs() < 0.01);
    }

    #[test]
    fn outside_term_is_full_when_warm() {
        let config = ControllerConfig::default();
        assert_eq!(outside_temperature_term(22.0, &config), 100.0);
        assert_eq!(outside_temperature_term(35.0, &config), 100.0);
    }

    #[test]
    fn air_quality_term_never_positive() {
        let config = ControllerConfig::default();
        assert_eq!(air_quality_term(0.0, 0.0, &config), 0.0);
        assert_eq!(air_quality_term(25.0, 50.0, &config), 0.0);
        for (pm2_5, pm10) in [(10.0, 5.0), (50.0, 100.0), (200.0, 20.0), (1e6, 1e6)] {
            assert!(air_quality_term(pm2_5, pm10, &config) <= 0.0);
        }
        // p = (2 + 2) / 2 = 2 -> -(4 - 1)
        assert_eq!(air_quality_term(50.0, 100.0, &config), -3.0);
    }

    #[test]
    fn air_quality_term_ignores_zero_weights() {
        let config = ControllerConfig {
            pm2_5_weight: 0.0,
            pm10_weight: 0.0,
            ..ControllerConfig::default()
        };
        assert_eq!(air_quality_term(500.0, 500.0, &config), 0.0);
    }

    #[test]
    fn weather_terms_are_included_when_present() {
        let config = ControllerConfig::default();
        let mut history = history_with(&[(24.0, 40)]);
        let snapshot = weather(5.0, 50.0, 100.0);

        let evaluation = evaluate(24.0, &mut history, Some(&snapshot), &config, 0).unwrap();
        let record = &evaluation.diagnostics;

        assert_eq!(record.outside_temperature, Some(5.0));
        assert_eq!(record.pm2_5, Some(50.0));
        assert_eq!(record.pm10, Some(100.0));
        assert_eq!(record.terms.air_quality, Some(-3.0));
        assert!(record.terms.outside_temperature.unwrap() < -30.0);

        // P 50 + I 8 + D 0 + O 35 - 30.22 - 3
        let expected = 50.0 + 8.0 + 35.0 + (-80.0 * 17.0 / 45.0) - 3.0;
        assert_eq!(record.delta_before_threshold, expected as i32);
        assert_eq!(evaluation.new_opening, (40.0 + expected) as u8);
    }

    #[test]
    fn missing_weather_leaves_optional_terms_empty() {
        let config = ControllerConfig::default();
        let mut history = history_with(&[(22.0, 50)]);
        let evaluation = evaluate(23.0, &mut history, None, &config, 0).unwrap();

        assert_eq!(evaluation.diagnostics.terms.outside_temperature, None);
        assert_eq!(evaluation.diagnostics.terms.air_quality, None);
        assert_eq!(evaluation.diagnostics.outside_temperature, None);
        assert_eq!(evaluation.diagnostics.config, config);
    }
}
