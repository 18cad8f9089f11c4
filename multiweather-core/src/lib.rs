//! Core library for the `multiweather` service.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Abstraction over weather providers
//! - The aggregator that fans a lookup out to every provider concurrently
//!   and reduces the responses to one temperature
//!
//! It is used by `multiweather-server`, but can also be reused by other
//! binaries or services.

pub mod aggregate;
pub mod config;
pub mod model;
pub mod provider;

pub use aggregate::{AggregateError, Aggregator};
pub use config::{Config, ProviderConfig};
pub use model::Temperature;
pub use provider::{ProviderId, WeatherProvider};
