use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    Config, Temperature,
    provider::{ProviderId, WeatherProvider, provider_from_config},
};

/// Error returned by [`Aggregator::temperature`].
#[derive(Debug, Error)]
pub enum AggregateError {
    /// A source failed; the underlying adapter error is passed through
    /// unchanged.
    #[error(transparent)]
    Source(#[from] anyhow::Error),

    /// Every source timed out, so there is no data to average.
    #[error("no weather source answered for '{city}' before the deadline")]
    NoReadings { city: String },
}

/// What one spawned lookup reports back to the fan-in loop.
enum Outcome {
    Reading { source: ProviderId, temperature: Temperature, elapsed: Duration },
    Failed { source: ProviderId, error: anyhow::Error, elapsed: Duration },
}

/// Fans a city lookup out to every configured provider and reduces the
/// responses to a single averaged temperature.
///
/// The provider set is fixed at construction and shared read-only across
/// calls; construct one `Aggregator`, wrap it in an `Arc`, and hand it to
/// whatever serves requests.
#[derive(Debug)]
pub struct Aggregator {
    providers: Vec<(ProviderId, Arc<dyn WeatherProvider>)>,
    attempt_timeout: Duration,
}

impl Aggregator {
    /// Build from an explicit provider list. The list must be non-empty.
    pub fn new(
        providers: Vec<(ProviderId, Arc<dyn WeatherProvider>)>,
        attempt_timeout: Duration,
    ) -> anyhow::Result<Self> {
        if providers.is_empty() {
            return Err(anyhow::anyhow!(
                "No weather providers configured.\n\
                 Hint: add at least one `[providers.<name>]` section to the config file."
            ));
        }

        Ok(Self { providers, attempt_timeout })
    }

    /// Build one adapter per provider named in the config, in
    /// [`ProviderId::all`] order so the collection is deterministic.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut providers = Vec::new();
        for id in config.configured_provider_ids() {
            providers.push((id, provider_from_config(id, config)?));
        }

        Self::new(providers, config.attempt_timeout())
    }

    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|(id, _)| *id).collect()
    }

    /// Query every provider concurrently and average the readings.
    ///
    /// Each of the N lookups runs in its own task and reports exactly one
    /// [`Outcome`]. The fan-in loop then makes exactly N consumption attempts,
    /// each bounded by the per-attempt deadline (the deadline resets per
    /// attempt, so the worst case is N times the deadline, never an unbounded
    /// hang). The first source failure aborts the whole call with that error;
    /// a timed-out attempt merely drops that source from the sum.
    ///
    /// The divisor of the final average is the configured provider count, not
    /// the number of readings actually received, matching the long-standing
    /// behavior of this service: a timed-out source dilutes the average rather
    /// than shrinking the sample. If no reading arrives at all the call fails
    /// with [`AggregateError::NoReadings`] instead of reporting 0K.
    pub async fn temperature(&self, city: &str) -> Result<Temperature, AggregateError> {
        let n = self.providers.len();
        let (tx, mut rx) = mpsc::channel::<Outcome>(n);

        // Lookups still in flight when this call returns are abandoned; the
        // token stops them instead of letting them run to completion unread.
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();

        for (id, provider) in &self.providers {
            let source = *id;
            let provider = Arc::clone(provider);
            let city = city.to_owned();
            let tx = tx.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let begin = Instant::now();
                tokio::select! {
                    () = cancel.cancelled() => {}
                    result = provider.temperature(&city) => {
                        let elapsed = begin.elapsed();
                        let outcome = match result {
                            Ok(temperature) => Outcome::Reading { source, temperature, elapsed },
                            Err(error) => Outcome::Failed { source, error, elapsed },
                        };
                        // The consumer may already be gone; nothing to do then.
                        let _ = tx.send(outcome).await;
                    }
                }
            });
        }
        drop(tx);

        let mut sum = 0.0;
        let mut readings = 0usize;

        for attempt in 0..n {
            match tokio::time::timeout(self.attempt_timeout, rx.recv()).await {
                Ok(Some(Outcome::Reading { source, temperature, elapsed })) => {
                    info!(
                        %source,
                        city,
                        latency_ms = elapsed.as_millis() as u64,
                        kelvin = temperature.kelvin(),
                        "source responded"
                    );
                    sum += temperature.kelvin();
                    readings += 1;
                }
                Ok(Some(Outcome::Failed { source, error, elapsed })) => {
                    warn!(
                        %source,
                        city,
                        latency_ms = elapsed.as_millis() as u64,
                        error = %error,
                        "source failed, aborting aggregation"
                    );
                    return Err(AggregateError::Source(error));
                }
                // Every producer is done and drained; no point waiting out
                // the remaining attempts.
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        city,
                        attempt,
                        deadline_ms = self.attempt_timeout.as_millis() as u64,
                        "source timed out"
                    );
                }
            }
        }

        if readings == 0 {
            return Err(AggregateError::NoReadings { city: city.to_owned() });
        }

        Ok(Temperature::from_kelvin(sum / n as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    const ATTEMPT_TIMEOUT: Duration = Duration::from_millis(1500);

    /// Responds immediately with a fixed reading.
    #[derive(Debug)]
    struct StaticProvider(f64);

    #[async_trait]
    impl WeatherProvider for StaticProvider {
        async fn temperature(&self, _city: &str) -> anyhow::Result<Temperature> {
            Ok(Temperature::from_kelvin(self.0))
        }
    }

    /// Sleeps before responding, to simulate a slow source.
    #[derive(Debug)]
    struct SlowProvider {
        kelvin: f64,
        delay: Duration,
    }

    #[async_trait]
    impl WeatherProvider for SlowProvider {
        async fn temperature(&self, _city: &str) -> anyhow::Result<Temperature> {
            tokio::time::sleep(self.delay).await;
            Ok(Temperature::from_kelvin(self.kelvin))
        }
    }

    /// Fails after an optional delay.
    #[derive(Debug)]
    struct FailingProvider {
        message: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl WeatherProvider for FailingProvider {
        async fn temperature(&self, _city: &str) -> anyhow::Result<Temperature> {
            tokio::time::sleep(self.delay).await;
            Err(anyhow::anyhow!("{}", self.message))
        }
    }

    /// Reading depends on the city, to detect cross-call interference.
    #[derive(Debug)]
    struct PerCityProvider;

    #[async_trait]
    impl WeatherProvider for PerCityProvider {
        async fn temperature(&self, city: &str) -> anyhow::Result<Temperature> {
            Ok(Temperature::from_kelvin(city.len() as f64 * 100.0))
        }
    }

    fn aggregator(providers: Vec<Arc<dyn WeatherProvider>>) -> Aggregator {
        let providers = providers
            .into_iter()
            .map(|p| (ProviderId::OpenWeather, p))
            .collect();
        Aggregator::new(providers, ATTEMPT_TIMEOUT).expect("non-empty provider set")
    }

    #[tokio::test]
    async fn averages_all_successful_sources() {
        let agg = aggregator(vec![
            Arc::new(StaticProvider(300.0)),
            Arc::new(StaticProvider(301.5)),
            Arc::new(StaticProvider(298.5)),
        ]);

        let temp = agg.temperature("Kyiv").await.expect("all sources succeed");
        assert!((temp.kelvin() - 300.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn average_is_independent_of_completion_order() {
        let agg = aggregator(vec![
            Arc::new(SlowProvider { kelvin: 300.0, delay: Duration::from_millis(300) }),
            Arc::new(SlowProvider { kelvin: 301.5, delay: Duration::from_millis(100) }),
            Arc::new(SlowProvider { kelvin: 298.5, delay: Duration::from_millis(200) }),
        ]);

        let temp = agg.temperature("Kyiv").await.expect("all sources succeed");
        assert!((temp.kelvin() - 300.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn single_provider_passes_through() {
        let agg = aggregator(vec![Arc::new(StaticProvider(287.0))]);

        let temp = agg.temperature("Lviv").await.expect("source succeeds");
        assert!((temp.kelvin() - 287.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn first_error_aborts_the_call() {
        let agg = aggregator(vec![
            Arc::new(FailingProvider { message: "upstream exploded", delay: Duration::ZERO }),
            Arc::new(SlowProvider { kelvin: 300.0, delay: Duration::from_millis(500) }),
            Arc::new(SlowProvider { kelvin: 301.0, delay: Duration::from_millis(900) }),
        ]);

        let err = agg.temperature("Odesa").await.unwrap_err();
        assert!(matches!(err, AggregateError::Source(_)));
        assert!(err.to_string().contains("upstream exploded"));
    }

    #[tokio::test]
    async fn late_error_still_aborts_after_successes() {
        let agg = aggregator(vec![
            Arc::new(StaticProvider(300.0)),
            Arc::new(FailingProvider {
                message: "bad json",
                delay: Duration::from_millis(10),
            }),
        ]);

        let err = agg.temperature("Odesa").await.unwrap_err();
        assert!(err.to_string().contains("bad json"));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_source_still_dilutes_the_average() {
        let agg = aggregator(vec![
            Arc::new(StaticProvider(300.0)),
            Arc::new(StaticProvider(302.0)),
            Arc::new(SlowProvider { kelvin: 999.0, delay: Duration::from_secs(60) }),
        ]);

        let temp = agg.temperature("Kharkiv").await.expect("two sources answered");
        // The slow source is excluded from the sum but still counted in the
        // divisor.
        assert!((temp.kelvin() - (300.0 + 302.0) / 3.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn all_sources_timing_out_is_an_error_not_zero() {
        let agg = aggregator(vec![
            Arc::new(SlowProvider { kelvin: 300.0, delay: Duration::from_secs(60) }),
            Arc::new(SlowProvider { kelvin: 301.0, delay: Duration::from_secs(60) }),
        ]);

        let err = agg.temperature("Dnipro").await.unwrap_err();
        assert!(matches!(err, AggregateError::NoReadings { .. }));
        assert!(err.to_string().contains("Dnipro"));
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_is_bounded_by_per_attempt_deadlines() {
        let agg = aggregator(vec![
            Arc::new(StaticProvider(300.0)),
            Arc::new(SlowProvider { kelvin: 999.0, delay: Duration::from_secs(60) }),
            Arc::new(SlowProvider { kelvin: 999.0, delay: Duration::from_secs(60) }),
        ]);

        let begin = tokio::time::Instant::now();
        let temp = agg.temperature("Poltava").await.expect("one source answered");
        let took = begin.elapsed();

        assert!((temp.kelvin() - 300.0 / 3.0).abs() < 1e-9);
        // One instant reading plus two timed-out attempts of 1500ms each.
        assert!(took >= ATTEMPT_TIMEOUT * 2);
        assert!(took < ATTEMPT_TIMEOUT * 2 + Duration::from_millis(100));
    }

    #[tokio::test]
    async fn concurrent_calls_for_different_cities_do_not_interfere() {
        let agg = Arc::new(aggregator(vec![Arc::new(PerCityProvider)]));

        let (a, b) = tokio::join!(agg.temperature("aa"), agg.temperature("bbb"));

        assert!((a.expect("call for 'aa' succeeds").kelvin() - 200.0).abs() < 1e-9);
        assert!((b.expect("call for 'bbb' succeeds").kelvin() - 300.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn repeated_calls_with_deterministic_sources_are_identical() {
        let agg = aggregator(vec![
            Arc::new(StaticProvider(280.25)),
            Arc::new(StaticProvider(281.75)),
        ]);

        let first = agg.temperature("Kyiv").await.expect("sources succeed");
        let second = agg.temperature("Kyiv").await.expect("sources succeed");
        assert_eq!(first.kelvin().to_bits(), second.kelvin().to_bits());
    }

    #[test]
    fn empty_provider_set_is_rejected() {
        let err = Aggregator::new(Vec::new(), ATTEMPT_TIMEOUT).unwrap_err();
        assert!(err.to_string().contains("No weather providers configured"));
    }

    #[test]
    fn from_config_builds_configured_providers_in_order() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::OpenMeteo, None);
        cfg.upsert_provider_api_key(ProviderId::OpenWeather, Some("KEY".into()));

        let agg = Aggregator::from_config(&cfg).expect("two providers configured");
        assert_eq!(agg.provider_ids(), vec![ProviderId::OpenWeather, ProviderId::OpenMeteo]);
    }

    #[test]
    fn from_config_with_no_providers_errors() {
        let err = Aggregator::from_config(&Config::default()).unwrap_err();
        assert!(err.to_string().contains("No weather providers configured"));
    }
}
