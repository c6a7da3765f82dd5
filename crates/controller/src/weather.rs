//! Current-weather lookup by city.
//!
//! The control loop only sees [`WeatherOutcome`]: a fetch never fails the
//! cycle.  Transport errors and malformed bodies collapse into
//! `Unavailable`, which the decision engine treats as "no rain signal".

use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::convert::celsius_to_fahrenheit;
use crate::error::WeatherError;

/// OpenWeatherMap current-weather endpoint.
pub const DEFAULT_BASE_URL: &str = "http://api.openweathermap.org/data/2.5/weather";

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSnapshot {
    pub city: String,
    pub temperature_celsius: f64,
    pub temperature_fahrenheit: f64,
    pub description: String,
    /// At or below 0 °C.
    pub freezing: bool,
}

impl WeatherSnapshot {
    pub fn new(city: impl Into<String>, temperature_celsius: f64, description: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            temperature_celsius,
            temperature_fahrenheit: celsius_to_fahrenheit(temperature_celsius),
            description: description.into(),
            freezing: temperature_celsius <= 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WeatherOutcome {
    Available(WeatherSnapshot),
    /// The service does not know the configured city.
    NotFound,
    /// Transport failure or unusable response.
    Unavailable(String),
}

impl WeatherOutcome {
    pub fn snapshot(&self) -> Option<&WeatherSnapshot> {
        match self {
            Self::Available(s) => Some(s),
            Self::NotFound | Self::Unavailable(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

pub trait WeatherSource {
    async fn fetch(&self, city: &str) -> WeatherOutcome;
}

// ---------------------------------------------------------------------------
// OpenWeatherMap adapter
// ---------------------------------------------------------------------------

pub struct OpenWeather {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenWeather {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, WeatherError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn request(&self, city: &str) -> Result<Value, WeatherError> {
        // Non-2xx bodies still carry `cod`, so the status is not checked here.
        let body = self
            .http
            .get(&self.base_url)
            .query(&[("q", city), ("appid", self.api_key.as_str()), ("units", "metric")])
            .send()
            .await?
            .json::<Value>()
            .await?;
        Ok(body)
    }
}

impl WeatherSource for OpenWeather {
    async fn fetch(&self, city: &str) -> WeatherOutcome {
        match self.request(city).await.and_then(|body| parse_response(&body)) {
            Ok(outcome) => {
                if outcome == WeatherOutcome::NotFound {
                    warn!(city, "weather: city not found");
                }
                outcome
            }
            Err(e) => {
                warn!(city, "weather unavailable: {e}");
                WeatherOutcome::Unavailable(e.to_string())
            }
        }
    }
}

/// Interpret a current-weather response body.
///
/// Only the string `"404"` in `cod` means not-found; the service reports
/// success as the number `200`.
pub fn parse_response(body: &Value) -> Result<WeatherOutcome, WeatherError> {
    if body.get("cod").and_then(Value::as_str) == Some("404") {
        return Ok(WeatherOutcome::NotFound);
    }

    let city = body
        .get("name")
        .and_then(Value::as_str)
        .ok_or(WeatherError::Malformed("name"))?;
    let celsius = body
        .pointer("/main/temp")
        .and_then(Value::as_f64)
        .ok_or(WeatherError::Malformed("main.temp"))?;
    let description = body
        .pointer("/weather/0/description")
        .and_then(Value::as_str)
        .ok_or(WeatherError::Malformed("weather[0].description"))?;

    Ok(WeatherOutcome::Available(WeatherSnapshot::new(
        city,
        celsius,
        description,
    )))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok_body(temp: f64, description: &str) -> Value {
        json!({
            "cod": 200,
            "name": "New York",
            "main": { "temp": temp, "humidity": 60 },
            "weather": [{ "id": 500, "main": "Rain", "description": description }]
        })
    }

    // -- WeatherSnapshot ------------------------------------------------------

    #[test]
    fn snapshot_derives_fahrenheit() {
        let s = WeatherSnapshot::new("Oslo", 100.0, "clear sky");
        assert_eq!(s.temperature_fahrenheit, 212.0);
    }

    #[test]
    fn zero_celsius_is_freezing() {
        assert!(WeatherSnapshot::new("Oslo", 0.0, "snow").freezing);
        assert!(WeatherSnapshot::new("Oslo", -3.5, "snow").freezing);
    }

    #[test]
    fn above_zero_is_not_freezing() {
        assert!(!WeatherSnapshot::new("Oslo", 0.01, "mist").freezing);
    }

    #[test]
    fn snapshot_accessor() {
        let s = WeatherSnapshot::new("Oslo", 5.0, "mist");
        assert_eq!(WeatherOutcome::Available(s.clone()).snapshot(), Some(&s));
        assert_eq!(WeatherOutcome::NotFound.snapshot(), None);
        assert_eq!(WeatherOutcome::Unavailable("x".into()).snapshot(), None);
    }

    // -- parse_response -------------------------------------------------------

    #[test]
    fn parse_success() {
        let outcome = parse_response(&ok_body(21.5, "light rain")).unwrap();
        let WeatherOutcome::Available(s) = &outcome else {
            panic!("expected snapshot, got {outcome:?}");
        };
        assert_eq!(s.city, "New York");
        assert_eq!(s.temperature_celsius, 21.5);
        assert_eq!(s.description, "light rain");
        assert!(!s.freezing);
    }

    #[test]
    fn parse_integer_temperature() {
        let body = json!({
            "cod": 200, "name": "X", "main": { "temp": -2 },
            "weather": [{ "description": "snow" }]
        });
        let outcome = parse_response(&body).unwrap();
        assert!(outcome.snapshot().unwrap().freezing);
    }

    #[test]
    fn parse_not_found() {
        let body = json!({ "cod": "404", "message": "city not found" });
        assert_eq!(parse_response(&body).unwrap(), WeatherOutcome::NotFound);
    }

    #[test]
    fn numeric_404_is_not_the_not_found_marker() {
        let body = json!({ "cod": 404, "message": "city not found" });
        assert!(matches!(
            parse_response(&body),
            Err(WeatherError::Malformed("name"))
        ));
    }

    #[test]
    fn parse_unauthorised_body_is_malformed() {
        let body = json!({ "cod": 401, "message": "Invalid API key." });
        assert!(parse_response(&body).is_err());
    }

    #[test]
    fn parse_missing_temperature() {
        let body = json!({ "cod": 200, "name": "X", "main": {}, "weather": [{ "description": "fog" }] });
        let err = parse_response(&body).unwrap_err();
        assert!(err.to_string().contains("main.temp"), "got: {err}");
    }

    #[test]
    fn parse_empty_weather_array() {
        let body = json!({ "cod": 200, "name": "X", "main": { "temp": 3.0 }, "weather": [] });
        let err = parse_response(&body).unwrap_err();
        assert!(err.to_string().contains("weather[0].description"), "got: {err}");
    }

    // -- OpenWeather adapter --------------------------------------------------

    #[tokio::test]
    async fn transport_failure_is_unavailable() {
        // Bind then release a loopback port so nothing listens on it.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = format!("http://127.0.0.1:{port}/weather");
        let client = OpenWeather::new(&url, "key", Duration::from_secs(2)).unwrap();
        let outcome = client.fetch("Anywhere").await;
        assert!(
            matches!(outcome, WeatherOutcome::Unavailable(_)),
            "got {outcome:?}"
        );
    }
}
