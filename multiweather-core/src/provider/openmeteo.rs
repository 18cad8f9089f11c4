use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::model::Temperature;

use super::{HTTP_TIMEOUT, WeatherProvider};

/// Open-Meteo adapter. Keyless, but needs two round trips: the geocoding API
/// resolves the city name to coordinates, then the forecast API yields the
/// current temperature in celsius.
#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    http: Client,
}

impl OpenMeteoProvider {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to build HTTP client for Open-Meteo")?;

        Ok(Self { http })
    }

    async fn geocode(&self, city: &str) -> Result<(f64, f64)> {
        let url = "https://geocoding-api.open-meteo.com/v1/search";

        let res = self
            .http
            .get(url)
            .query(&[("name", city), ("count", "1")])
            .send()
            .await
            .context("Failed to send request to Open-Meteo geocoding")?;

        let status = res.status();
        let body = res.text().await.context("Failed to read Open-Meteo geocoding response body")?;

        if !status.is_success() {
            return Err(anyhow!(
                "Open-Meteo geocoding request failed with status {}: {}",
                status,
                truncate_body(&body),
            ));
        }

        let parsed: OmGeocodeResponse =
            serde_json::from_str(&body).context("Failed to parse Open-Meteo geocoding JSON")?;

        let hit = parsed
            .results
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Open-Meteo geocoding found no match for '{city}'"))?;

        Ok((hit.latitude, hit.longitude))
    }
}

#[derive(Debug, Deserialize)]
struct OmGeocodeHit {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct OmGeocodeResponse {
    results: Option<Vec<OmGeocodeHit>>,
}

#[derive(Debug, Deserialize)]
struct OmCurrent {
    temperature_2m: f64,
}

#[derive(Debug, Deserialize)]
struct OmForecastResponse {
    current: OmCurrent,
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    async fn temperature(&self, city: &str) -> Result<Temperature> {
        let (latitude, longitude) = self.geocode(city).await?;

        let url = "https://api.open-meteo.com/v1/forecast";

        let res = self
            .http
            .get(url)
            .query(&[
                ("latitude", latitude.to_string().as_str()),
                ("longitude", longitude.to_string().as_str()),
                ("current", "temperature_2m"),
            ])
            .send()
            .await
            .context("Failed to send request to Open-Meteo forecast")?;

        let status = res.status();
        let body = res.text().await.context("Failed to read Open-Meteo forecast response body")?;

        if !status.is_success() {
            return Err(anyhow!(
                "Open-Meteo forecast request failed with status {}: {}",
                status,
                truncate_body(&body),
            ));
        }

        let parsed: OmForecastResponse =
            serde_json::from_str(&body).context("Failed to parse Open-Meteo forecast JSON")?;

        Ok(Temperature::from_celsius(parsed.current.temperature_2m))
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        // Back off to a char boundary; MAX may land inside a multi-byte char.
        let mut cut = MAX;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::truncate_body;

    #[test]
    fn truncate_body_respects_char_boundaries() {
        let body = format!("{}é and more", "a".repeat(199));
        let truncated = truncate_body(&body);
        assert_eq!(truncated, format!("{}...", "a".repeat(199)));
    }
}
