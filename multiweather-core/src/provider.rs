use crate::{
    Config, Temperature,
    provider::{
        openmeteo::OpenMeteoProvider, openweather::OpenWeatherProvider,
        weatherapi::WeatherApiProvider,
    },
};
use async_trait::async_trait;
use std::{convert::TryFrom, fmt::Debug, sync::Arc, time::Duration};

pub mod openmeteo;
pub mod openweather;
pub mod weatherapi;

/// Request timeout applied to every adapter's HTTP client. The aggregator
/// enforces its own per-attempt deadline on top of this.
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenWeather,
    WeatherApi,
    OpenMeteo,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
            ProviderId::OpenMeteo => "openmeteo",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenWeather, ProviderId::WeatherApi, ProviderId::OpenMeteo]
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            "openmeteo" => Ok(ProviderId::OpenMeteo),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, weatherapi, openmeteo."
            )),
        }
    }
}

/// One weather data source.
///
/// Implementations hold only immutable credentials and an HTTP client, so a
/// single instance can serve any number of concurrent calls. The current
/// temperature is always reported in kelvin, whatever unit the remote API
/// speaks. Parse and transport failures come back as descriptive errors, never
/// as a zero reading.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    async fn temperature(&self, city: &str) -> anyhow::Result<Temperature>;
}

/// Construct a provider from config and explicit ProviderId.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    let provider: Arc<dyn WeatherProvider> = match id {
        ProviderId::OpenWeather => {
            Arc::new(OpenWeatherProvider::new(required_api_key(id, config)?)?)
        }
        ProviderId::WeatherApi => {
            Arc::new(WeatherApiProvider::new(required_api_key(id, config)?)?)
        }
        ProviderId::OpenMeteo => Arc::new(OpenMeteoProvider::new()?),
    };

    Ok(provider)
}

fn required_api_key(id: ProviderId, config: &Config) -> anyhow::Result<String> {
    let api_key = config.provider_api_key(id).ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured for provider '{id}'.\n\
                 Hint: add `api_key` under `[providers.{id}]` in the config file."
        )
    })?;

    Ok(api_key.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn provider_id_as_str_roundtrip() {
        for id in ProviderId::all() {
            let s = id.as_str();
            let parsed = ProviderId::try_from(s).expect("roundtrip should succeed");
            assert_eq!(*id, parsed);
        }
    }

    #[test]
    fn unknown_provider_error() {
        let err = ProviderId::try_from("doesnotexist").unwrap_err();
        assert!(err.to_string().contains("Unknown provider"));
    }

    #[test]
    fn provider_from_config_errors_when_missing_api_key() {
        let cfg = Config::default();
        let err = provider_from_config(ProviderId::OpenWeather, &cfg).unwrap_err();
        assert!(err.to_string().contains("No API key configured for provider"));
    }

    #[test]
    fn keyless_provider_needs_no_api_key() {
        let cfg = Config::default();
        let provider = provider_from_config(ProviderId::OpenMeteo, &cfg);
        assert!(provider.is_ok());
    }

    #[test]
    fn provider_from_config_works_when_key_present() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, Some("KEY".to_string()));

        let provider = provider_from_config(ProviderId::WeatherApi, &cfg);
        assert!(provider.is_ok());
    }
}
