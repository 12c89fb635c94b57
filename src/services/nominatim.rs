//! Nominatim geocoding client

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::services::geocoding::Coordinates;

/// Nominatim API response
#[derive(Debug, Deserialize)]
pub struct NominatimResult {
    pub lat: String,
    pub lon: String,
    pub display_name: String,
}

/// Nominatim geocoding client
pub struct NominatimClient {
    base_url: String,
    client: reqwest::Client,
}

impl NominatimClient {
    /// Create a new client
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("AdunWorker/1.0 (constituency platform)")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.to_string(),
            client,
        }
    }

    /// Geocode an address to coordinates
    pub async fn geocode(
        &self,
        address: &str,
        locality: &str,
        postcode: &str,
    ) -> Result<Option<Coordinates>> {
        let full_address = format!("{}, {} {}, Malaysia", address, postcode, locality);

        let url = format!(
            "{}/search?q={}&format=json&countrycodes=my&limit=1",
            self.base_url,
            urlencoding::encode(&full_address)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send geocoding request")?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let results: Vec<NominatimResult> = response
            .json()
            .await
            .context("Failed to parse geocoding response")?;

        if let Some(result) = results.first() {
            let lat: f64 = result.lat.parse().context("Invalid latitude")?;
            let lng: f64 = result.lon.parse().context("Invalid longitude")?;

            Ok(Some(Coordinates { lat, lng }))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Hits the public Nominatim API; ignored by default.

    #[tokio::test]
    #[ignore]
    async fn test_geocode_kota_kinabalu() {
        let client = NominatimClient::new("https://nominatim.openstreetmap.org");

        let result = client
            .geocode("Jalan Tun Razak", "Kota Kinabalu", "88000")
            .await
            .unwrap();

        assert!(result.is_some());
        let coords = result.unwrap();

        // Kota Kinabalu is around 5.98°N, 116.07°E
        assert!((coords.lat - 5.98).abs() < 0.3);
        assert!((coords.lng - 116.07).abs() < 0.3);
    }
}
