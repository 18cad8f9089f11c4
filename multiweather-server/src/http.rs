use std::{sync::Arc, time::Instant};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use multiweather_core::Aggregator;
use serde::Serialize;

pub fn router(aggregator: Arc<Aggregator>) -> Router {
    Router::new().route("/weather/:city", get(weather)).with_state(aggregator)
}

#[derive(Debug, Serialize)]
struct WeatherBody {
    city: String,
    /// Averaged temperature in kelvin.
    temp: f64,
    /// Wall-clock time for the whole aggregation call.
    took: String,
}

async fn weather(
    State(aggregator): State<Arc<Aggregator>>,
    Path(city): Path<String>,
) -> Response {
    let begin = Instant::now();

    match aggregator.temperature(&city).await {
        Ok(temp) => Json(WeatherBody {
            city,
            temp: temp.kelvin(),
            took: format!("{:?}", begin.elapsed()),
        })
        .into_response(),
        // The raw adapter error text is the whole story; pass it through.
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
