//! Geocoding abstraction layer
//!
//! Two backends behind one trait:
//! - MockGeocoder for tests and development (deterministic, no network)
//! - RateLimitedNominatimGeocoder for production (rate limit + circuit
//!   breaker so the public endpoint never blocks us)
//!
//! Selected via the GEOCODER_BACKEND env variable ("mock" | "nominatim").

use anyhow::Result;
use async_trait::async_trait;

/// Latitude/longitude pair
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Result of a geocoding lookup
#[derive(Debug, Clone)]
pub struct GeocodingResult {
    pub coordinates: Coordinates,
    /// Confidence score 0.0-1.0
    pub confidence: f64,
    pub display_name: String,
}

/// Geocoder trait - abstraction over all geocoding backends
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve an address to coordinates. Returns None when the address
    /// cannot be located (a miss, not an error).
    async fn geocode(
        &self,
        address: &str,
        locality: &str,
        postcode: &str,
    ) -> Result<Option<GeocodingResult>>;

    fn name(&self) -> &'static str;
}

// ==========================================================================
// MockGeocoder
// ==========================================================================

/// Deterministic fake coordinates derived from the address hash
pub struct MockGeocoder;

impl MockGeocoder {
    pub fn new() -> Self {
        Self
    }

    /// Coordinates are kept inside Malaysian bounds so downstream map views
    /// stay sane.
    fn hash_to_coordinates(address: &str, locality: &str, postcode: &str) -> Coordinates {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        address.hash(&mut hasher);
        locality.hash(&mut hasher);
        postcode.hash(&mut hasher);
        let hash = hasher.finish();

        // Malaysia bounds: lat 0.8-7.5, lng 99.5-119.5
        const LAT_MIN: f64 = 1.0;
        const LAT_MAX: f64 = 7.0;
        const LNG_MIN: f64 = 100.0;
        const LNG_MAX: f64 = 119.0;

        let lat_normalized = ((hash >> 32) as f64) / (u32::MAX as f64);
        let lng_normalized = ((hash & 0xFFFFFFFF) as f64) / (u32::MAX as f64);

        Coordinates {
            lat: LAT_MIN + lat_normalized * (LAT_MAX - LAT_MIN),
            lng: LNG_MIN + lng_normalized * (LNG_MAX - LNG_MIN),
        }
    }
}

impl Default for MockGeocoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Geocoder for MockGeocoder {
    async fn geocode(
        &self,
        address: &str,
        locality: &str,
        postcode: &str,
    ) -> Result<Option<GeocodingResult>> {
        let coordinates = Self::hash_to_coordinates(address, locality, postcode);

        Ok(Some(GeocodingResult {
            coordinates,
            confidence: 0.95,
            display_name: format!("{}, {} {}, Malaysia", address, postcode, locality),
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ==========================================================================
// RateLimiter
// ==========================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Enforces a minimum interval between calls
pub struct RateLimiter {
    last_call: Arc<Mutex<Option<Instant>>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_call: Arc::new(Mutex::new(None)),
            min_interval,
        }
    }

    /// Wait until it's safe to make another call
    pub async fn wait(&self) {
        let mut last = self.last_call.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                drop(last); // Release lock while sleeping
                tokio::time::sleep(wait_time).await;
                last = self.last_call.lock().await;
            }
        }

        *last = Some(Instant::now());
    }
}

// ==========================================================================
// CircuitBreaker
// ==========================================================================

use std::sync::atomic::{AtomicU32, Ordering};

/// Stops hammering a failing upstream after repeated errors
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    threshold: u32,
    last_failure: Arc<Mutex<Option<Instant>>>,
    recovery_time: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, recovery_time: Duration) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            threshold,
            last_failure: Arc::new(Mutex::new(None)),
            recovery_time,
        }
    }

    /// Check if circuit is open (blocking calls)
    pub fn is_open(&self) -> bool {
        let count = self.failure_count.load(Ordering::Relaxed);
        if count >= self.threshold {
            if let Ok(last) = self.last_failure.try_lock() {
                if let Some(last_time) = *last {
                    if last_time.elapsed() >= self.recovery_time {
                        return false; // Allow retry (half-open)
                    }
                }
            }
            return true;
        }
        false
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_failure.try_lock() {
            *last = Some(Instant::now());
        }
    }

    /// Resets the failure count
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }
}

// ==========================================================================
// RateLimitedNominatimGeocoder
// ==========================================================================

use crate::services::nominatim::NominatimClient;

/// Nominatim allows 1 req/s; stay comfortably under it
const DEFAULT_RATE_LIMIT_MS: u64 = 1500;
const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 3;
const DEFAULT_CIRCUIT_BREAKER_RECOVERY_SECS: u64 = 300;

/// Nominatim geocoder wrapped with rate limiting and a circuit breaker
pub struct RateLimitedNominatimGeocoder {
    client: NominatimClient,
    rate_limiter: RateLimiter,
    pub(crate) circuit_breaker: CircuitBreaker,
}

impl RateLimitedNominatimGeocoder {
    pub fn new() -> Self {
        Self::with_config(
            "https://nominatim.openstreetmap.org",
            Duration::from_millis(DEFAULT_RATE_LIMIT_MS),
            DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            Duration::from_secs(DEFAULT_CIRCUIT_BREAKER_RECOVERY_SECS),
        )
    }

    pub fn with_config(
        base_url: &str,
        rate_limit_interval: Duration,
        circuit_breaker_threshold: u32,
        circuit_breaker_recovery: Duration,
    ) -> Self {
        Self {
            client: NominatimClient::new(base_url),
            rate_limiter: RateLimiter::new(rate_limit_interval),
            circuit_breaker: CircuitBreaker::new(circuit_breaker_threshold, circuit_breaker_recovery),
        }
    }

    /// Create from environment variables
    ///
    /// - `NOMINATIM_URL`: API base URL (default: public OSM)
    /// - `NOMINATIM_RATE_LIMIT_MS`: minimum interval between requests
    /// - `NOMINATIM_CB_THRESHOLD`: failures before the breaker opens
    /// - `NOMINATIM_CB_RECOVERY_SECS`: breaker recovery time
    pub fn from_env() -> Self {
        let base_url = std::env::var("NOMINATIM_URL")
            .unwrap_or_else(|_| "https://nominatim.openstreetmap.org".to_string());

        let rate_limit_ms = std::env::var("NOMINATIM_RATE_LIMIT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_MS);

        let cb_threshold = std::env::var("NOMINATIM_CB_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CIRCUIT_BREAKER_THRESHOLD);

        let cb_recovery_secs = std::env::var("NOMINATIM_CB_RECOVERY_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CIRCUIT_BREAKER_RECOVERY_SECS);

        Self::with_config(
            &base_url,
            Duration::from_millis(rate_limit_ms),
            cb_threshold,
            Duration::from_secs(cb_recovery_secs),
        )
    }
}

impl Default for RateLimitedNominatimGeocoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Geocoder for RateLimitedNominatimGeocoder {
    async fn geocode(
        &self,
        address: &str,
        locality: &str,
        postcode: &str,
    ) -> Result<Option<GeocodingResult>> {
        if self.circuit_breaker.is_open() {
            tracing::warn!("Circuit breaker is open, rejecting geocoding request");
            return Err(anyhow::anyhow!(
                "Geocoding service temporarily unavailable (circuit breaker open)"
            ));
        }

        self.rate_limiter.wait().await;

        match self.client.geocode(address, locality, postcode).await {
            Ok(Some(coords)) => {
                self.circuit_breaker.record_success();
                Ok(Some(GeocodingResult {
                    coordinates: coords,
                    // Nominatim doesn't report confidence
                    confidence: 0.8,
                    display_name: format!("{}, {} {}, Malaysia", address, postcode, locality),
                }))
            }
            Ok(None) => {
                // A miss is not an upstream failure
                self.circuit_breaker.record_success();
                Ok(None)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                tracing::error!("Geocoding failed: {}", e);
                Err(e)
            }
        }
    }

    fn name(&self) -> &'static str {
        "nominatim"
    }
}

// ==========================================================================
// Factory
// ==========================================================================

/// Create geocoder based on the GEOCODER_BACKEND environment variable
pub fn create_geocoder() -> Box<dyn Geocoder> {
    let backend = std::env::var("GEOCODER_BACKEND").unwrap_or_else(|_| "mock".to_string());

    match backend.as_str() {
        "mock" => {
            tracing::info!("Using MockGeocoder");
            Box::new(MockGeocoder::new())
        }
        "nominatim" => {
            tracing::info!("Using RateLimitedNominatimGeocoder");
            Box::new(RateLimitedNominatimGeocoder::from_env())
        }
        _ => {
            tracing::warn!("Unknown GEOCODER_BACKEND '{}', using mock", backend);
            Box::new(MockGeocoder::new())
        }
    }
}

// ==========================================================================
// Tests
// ==========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_geocoder_always_returns_coordinates() {
        let geocoder = MockGeocoder::new();
        let result = geocoder.geocode("LOT 12 JALAN MERPATI", "KG LIKAS", "88400").await;
        assert!(result.unwrap().is_some());
    }

    #[tokio::test]
    async fn mock_geocoder_is_deterministic() {
        let geocoder = MockGeocoder::new();
        let a = geocoder.geocode("LOT 12", "KG LIKAS", "88400").await.unwrap().unwrap();
        let b = geocoder.geocode("LOT 12", "KG LIKAS", "88400").await.unwrap().unwrap();
        assert_eq!(a.coordinates.lat, b.coordinates.lat);
        assert_eq!(a.coordinates.lng, b.coordinates.lng);
    }

    #[tokio::test]
    async fn mock_geocoder_varies_by_address() {
        let geocoder = MockGeocoder::new();
        let likas = geocoder.geocode("LOT 1", "KG LIKAS", "88400").await.unwrap().unwrap();
        let inanam = geocoder.geocode("LOT 9", "INANAM", "88450").await.unwrap().unwrap();
        assert_ne!(likas.coordinates.lat, inanam.coordinates.lat);
    }

    #[tokio::test]
    async fn mock_geocoder_stays_within_malaysia() {
        let geocoder = MockGeocoder::new();
        let addresses = [
            ("LOT 1 JALAN UTAMA", "KG LIKAS", "88400"),
            ("NO 5 LORONG 2", "INANAM", "88450"),
            ("BATU 7", "MENGGATAL", "88450"),
        ];
        for (address, locality, postcode) in addresses {
            let result = geocoder.geocode(address, locality, postcode).await.unwrap().unwrap();
            assert!(
                (1.0..=7.0).contains(&result.coordinates.lat),
                "lat {} out of bounds for {}",
                result.coordinates.lat,
                address
            );
            assert!(
                (100.0..=119.0).contains(&result.coordinates.lng),
                "lng {} out of bounds for {}",
                result.coordinates.lng,
                address
            );
        }
    }

    #[tokio::test]
    async fn rate_limiter_enforces_minimum_interval() {
        let limiter = RateLimiter::new(Duration::from_millis(100));

        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_millis(50), "first call should be immediate");

        limiter.wait().await;
        assert!(
            start.elapsed() >= Duration::from_millis(100),
            "second call should wait, took {:?}",
            start.elapsed()
        );
    }

    #[test]
    fn circuit_breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());

        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn circuit_breaker_resets_on_success() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();

        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }

    #[tokio::test]
    async fn circuit_breaker_half_opens_after_recovery() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(50));

        breaker.record_failure();
        assert!(breaker.is_open());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!breaker.is_open());
    }

    #[tokio::test]
    async fn nominatim_geocoder_rejects_when_breaker_open() {
        let geocoder = RateLimitedNominatimGeocoder::with_config(
            "https://nominatim.openstreetmap.org",
            Duration::from_millis(100),
            1,
            Duration::from_secs(300),
        );

        geocoder.circuit_breaker.record_failure();
        assert!(geocoder.circuit_breaker.is_open());

        let result = geocoder.geocode("LOT 1", "KG LIKAS", "88400").await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("circuit breaker"));
    }
}
