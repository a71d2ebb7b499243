//! Meteostat client and cache-aside alignment against a mock HTTP provider.

use chrono::NaiveDate;
use household_load_forecast::config::WeatherConfig;
use household_load_forecast::domain::{WeatherField, WeatherFrame};
use household_load_forecast::forecast::{MeteostatClient, WeatherAligner, WeatherError, WeatherSource};
use household_load_forecast::storage::CsvSeriesCache;
use serde_json::json;
use std::path::Path;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn config(server: &MockServer) -> WeatherConfig {
    WeatherConfig {
        base_url: server.uri(),
        api_key: Some("secret".into()),
        max_retries: 0,
        timeout_seconds: 5,
        ..WeatherConfig::default()
    }
}

fn body(day: u32, hours: u32) -> serde_json::Value {
    let data: Vec<_> = (0..hours)
        .map(|h| {
            json!({
                "time": format!("2010-01-{day:02} {h:02}:00:00"),
                "temp": 1.0 + f64::from(h),
                "dwpt": -2.0,
                "rhum": 90,
                "prcp": null,
                "wspd": 11.2,
            })
        })
        .collect();
    json!({ "meta": { "generated": "2024-01-01 00:00:00" }, "data": data })
}

#[tokio::test]
async fn fetches_in_chunks_and_maps_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/point/hourly"))
        .and(query_param("start", "2010-01-01"))
        .and(query_param("end", "2010-01-02"))
        .and(query_param("lat", "48.8566"))
        .and(header("x-rapidapi-key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(1, 3)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/point/hourly"))
        .and(query_param("start", "2010-01-03"))
        .and(query_param("end", "2010-01-03"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(3, 2)))
        .expect(1)
        .mount(&server)
        .await;

    let client = MeteostatClient::new(&WeatherConfig {
        chunk_days: 2,
        ..config(&server)
    })
    .unwrap();
    let raw = client.fetch_hourly(day(2010, 1, 1), day(2010, 1, 3)).await.unwrap();
    assert_eq!(raw.len(), 5);

    let frame = household_load_forecast::forecast::align(&raw).unwrap();
    assert_eq!(
        frame.fields(),
        &[WeatherField::TempC, WeatherField::RelHumidity, WeatherField::WindSpeed]
    );
    assert_eq!(frame.series().rows()[2], vec![Some(3.0), Some(90.0), Some(11.2)]);
}

async fn load_through_cache(server: &MockServer, cache_path: &Path, end: NaiveDate) -> WeatherFrame {
    let source = MeteostatClient::new(&config(server)).unwrap();
    WeatherAligner::new(source, CsvSeriesCache::new(cache_path))
        .load(day(2010, 1, 1), end)
        .await
        .unwrap()
}

#[tokio::test]
async fn cached_weather_is_not_fetched_twice() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/point/hourly"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(1, 24)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("weather.csv");
    let first = load_through_cache(&server, &cache_path, day(2010, 1, 1)).await;
    let second = load_through_cache(&server, &cache_path, day(2010, 1, 1)).await;

    assert_eq!(first, second);
    assert_eq!(first.len(), 24);
    assert!(cache_path.exists());
}

#[tokio::test]
async fn wider_span_than_cached_is_refetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/point/hourly"))
        .and(query_param("end", "2010-01-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(1, 24)))
        .expect(1)
        .mount(&server)
        .await;
    let mut two_days = body(1, 24);
    let day_two = body(2, 24)["data"].as_array().unwrap().clone();
    two_days["data"].as_array_mut().unwrap().extend(day_two);
    Mock::given(method("GET"))
        .and(path("/point/hourly"))
        .and(query_param("end", "2010-01-02"))
        .respond_with(ResponseTemplate::new(200).set_body_json(two_days))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("weather.csv");
    let one_day = load_through_cache(&server, &cache_path, day(2010, 1, 1)).await;
    let widened = load_through_cache(&server, &cache_path, day(2010, 1, 2)).await;
    // The widened cache now serves the original span without another request.
    let narrowed = load_through_cache(&server, &cache_path, day(2010, 1, 1)).await;

    assert_eq!(one_day.len(), 24);
    assert_eq!(widened.len(), 48);
    assert_eq!(
        widened.series().last_timestamp(),
        NaiveDate::from_ymd_opt(2010, 1, 2).unwrap().and_hms_opt(23, 0, 0)
    );
    assert_eq!(narrowed, widened);
}

#[tokio::test]
async fn client_errors_are_not_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = MeteostatClient::new(&config(&server)).unwrap();
    let err = WeatherAligner::new(source, CsvSeriesCache::new(dir.path().join("w.csv")))
        .load(day(2010, 1, 1), day(2010, 1, 1))
        .await
        .unwrap_err();

    assert!(matches!(err, WeatherError::Fetch(_)));
    assert!(!err.is_retryable());
    assert!(!dir.path().join("w.csv").exists());
}

#[tokio::test]
async fn undecodable_body_is_a_data_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let client = MeteostatClient::new(&config(&server)).unwrap();
    let err = client
        .fetch_hourly(day(2010, 1, 1), day(2010, 1, 1))
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("could not decode"));
}
