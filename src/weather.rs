//! Typed client for the WeatherAPI `current.json` / `forecast.json`
//! endpoints (spec.md §6). Out of scope per §1 beyond this interface.

use crate::error::AppError;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Clone)]
pub struct WeatherClient {
    http: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentWeather {
    pub temp_c: f64,
    pub humidity: f64,
    pub wind_kph: f64,
    pub wind_degree: f64,
    pub wind_dir: String,
    pub condition_text: String,
    pub vis_km: f64,
    pub air_quality: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HourlyForecast {
    pub time_epoch: i64,
    pub temp_c: f64,
    pub humidity: f64,
    pub wind_kph: f64,
}

#[derive(Debug, Deserialize)]
struct ApiCondition {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiCurrent {
    temp_c: f64,
    humidity: f64,
    wind_kph: f64,
    wind_degree: f64,
    wind_dir: String,
    condition: ApiCondition,
    vis_km: f64,
    air_quality: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    current: ApiCurrent,
}

#[derive(Debug, Deserialize)]
struct ForecastHour {
    time_epoch: i64,
    temp_c: f64,
    humidity: f64,
    wind_kph: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastDay {
    hour: Vec<ForecastHour>,
}

#[derive(Debug, Deserialize)]
struct ForecastDayWrapper {
    forecastday: Vec<ForecastDay>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    forecast: ForecastDayWrapper,
}

impl WeatherClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("AERIS/1.0 Pollution-Aware Navigation Backend")
            .build()
            .expect("failed to build weather HTTP client");
        Self { http, base_url, api_key }
    }

    pub async fn current(&self, lat: f64, lon: f64) -> Result<CurrentWeather, AppError> {
        let url = format!("{}/current.json", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("q", &format!("{lat},{lon}")),
                ("aqi", "yes"),
            ])
            .send()
            .await
            .map_err(|e| AppError::upstream_transient("weather", e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::upstream_fatal(
                "weather",
                format!("status {}", response.status()),
            ));
        }

        let parsed: CurrentResponse = response
            .json()
            .await
            .map_err(|e| AppError::upstream_fatal("weather", e.to_string()))?;

        Ok(CurrentWeather {
            temp_c: parsed.current.temp_c,
            humidity: parsed.current.humidity,
            wind_kph: parsed.current.wind_kph,
            wind_degree: parsed.current.wind_degree,
            wind_dir: parsed.current.wind_dir,
            condition_text: parsed.current.condition.text,
            vis_km: parsed.current.vis_km,
            air_quality: parsed.current.air_quality,
        })
    }

    /// Hourly forecast for the next 3 hours, used for short-term prediction.
    pub async fn next_three_hours(&self, lat: f64, lon: f64) -> Result<Vec<HourlyForecast>, AppError> {
        let url = format!("{}/forecast.json", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("q", &format!("{lat},{lon}")),
                ("days", "1"),
                ("aqi", "yes"),
            ])
            .send()
            .await
            .map_err(|e| AppError::upstream_transient("weather", e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::upstream_fatal(
                "weather",
                format!("status {}", response.status()),
            ));
        }

        let parsed: ForecastResponse = response
            .json()
            .await
            .map_err(|e| AppError::upstream_fatal("weather", e.to_string()))?;

        let now = chrono::Utc::now().timestamp();
        let hours: Vec<HourlyForecast> = parsed
            .forecast
            .forecastday
            .into_iter()
            .flat_map(|day| day.hour)
            .filter(|h| h.time_epoch >= now)
            .take(3)
            .map(|h| HourlyForecast {
                time_epoch: h.time_epoch,
                temp_c: h.temp_c,
                humidity: h.humidity,
                wind_kph: h.wind_kph,
            })
            .collect();

        Ok(hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn current_parses_weatherapi_response() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "current": {
                "temp_c": 21.5,
                "humidity": 40.0,
                "wind_kph": 12.0,
                "wind_degree": 270.0,
                "wind_dir": "W",
                "condition": { "text": "Clear" },
                "vis_km": 10.0,
                "air_quality": null,
            }
        });
        Mock::given(method("GET"))
            .and(path("/current.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = WeatherClient::new(server.uri(), "test-key".to_string());
        let current = client.current(34.05, -118.25).await.expect("mock response should parse");

        assert_eq!(current.temp_c, 21.5);
        assert_eq!(current.wind_dir, "W");
        assert_eq!(current.condition_text, "Clear");
    }

    #[tokio::test]
    async fn current_surfaces_upstream_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/current.json"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = WeatherClient::new(server.uri(), "test-key".to_string());
        let result = client.current(0.0, 0.0).await;
        assert!(result.is_err());
    }
}
