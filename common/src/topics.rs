pub const TOPIC_SENSOR_TEMP: &str = "window/sensor/temperature";
pub const TOPIC_WEATHER_REPORT: &str = "window/weather/report";

pub const TOPIC_CONTROLLER_TELEMETRY: &str = "window/controller/telemetry";
pub const TOPIC_CONTROLLER_STATE: &str = "window/controller/state";
