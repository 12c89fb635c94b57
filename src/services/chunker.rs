//! Chunked voter CSV import client
//!
//! Parses an SPR CSV locally, validates the header, splits data rows into
//! fixed-size chunks and submits them strictly sequentially through a
//! `ChunkSink`. Each chunk is retried with exponential backoff; a chunk
//! that exhausts its retries contributes one aggregated error naming its
//! row range and the import continues with the next chunk.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::{
    ErrorResponse, Request, SuccessResponse, VoterChunkRequest, VoterChunkResponse, VoterImportRow,
    VoterImportSummary,
};

/// Data rows per network request
pub const CHUNK_SIZE: usize = 250;

/// Attempts per chunk before giving up on it
pub const MAX_ATTEMPTS: u32 = 3;

/// Backoff base; doubles per failed attempt
pub const BASE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Errors shown to the user are capped at this many entries
pub const MAX_DISPLAY_ERRORS: usize = 100;

/// CSV validation errors, surfaced before any network call
#[derive(Debug, Error, PartialEq)]
pub enum CsvValidationError {
    #[error("required column '{0}' missing from header")]
    MissingColumn(&'static str),
    #[error("file contains no data rows")]
    Empty,
    #[error("CSV parse error: {0}")]
    Malformed(String),
}

/// Destination for import chunks. Production uses NATS request/reply;
/// tests use an in-memory mock.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn submit(&self, chunk: VoterChunkRequest) -> Result<VoterChunkResponse>;
}

/// Chunk sink that submits over NATS request/reply
pub struct NatsChunkSink {
    client: async_nats::Client,
    subject: String,
    user_id: Uuid,
}

impl NatsChunkSink {
    pub fn new(client: async_nats::Client, user_id: Uuid) -> Self {
        Self {
            client,
            subject: "adun.import.voters.chunk".to_string(),
            user_id,
        }
    }
}

#[async_trait]
impl ChunkSink for NatsChunkSink {
    async fn submit(&self, chunk: VoterChunkRequest) -> Result<VoterChunkResponse> {
        let request = Request::for_user(self.user_id, chunk);
        let payload = serde_json::to_vec(&request)?;
        let reply = self
            .client
            .request(self.subject.clone(), payload.into())
            .await?;

        if let Ok(success) = serde_json::from_slice::<SuccessResponse<VoterChunkResponse>>(&reply.payload) {
            return Ok(success.payload);
        }

        let error: ErrorResponse = serde_json::from_slice(&reply.payload)?;
        anyhow::bail!("{}: {}", error.error.code, error.error.message)
    }
}

/// Parse SPR CSV text into import rows.
///
/// The header must contain `Nama`; `No KP`, `Alamat`, `Lokaliti` and
/// `Poskod` are picked up when present. Quoted fields with embedded commas
/// are handled by the reader.
pub fn parse_voter_csv(content: &str) -> std::result::Result<Vec<VoterImportRow>, CsvValidationError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| CsvValidationError::Malformed(e.to_string()))?
        .clone();

    let column = |name: &str| -> Option<usize> {
        headers.iter().position(|h| h.eq_ignore_ascii_case(name))
    };

    let name_idx = column("Nama").ok_or(CsvValidationError::MissingColumn("Nama"))?;
    let identity_idx = column("No KP").or_else(|| column("No. KP")).or_else(|| column("KP"));
    let address_idx = column("Alamat");
    let locality_idx = column("Lokaliti");
    let postcode_idx = column("Poskod");
    let parliament_idx = column("Parlimen");
    let dun_idx = column("DUN");
    let district_idx = column("Daerah");
    let station_idx = column("Tempat Mengundi");

    let field = |record: &csv::StringRecord, idx: Option<usize>| -> Option<String> {
        idx.and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| CsvValidationError::Malformed(e.to_string()))?;
        rows.push(VoterImportRow {
            name: field(&record, Some(name_idx)).unwrap_or_default(),
            identity_no: field(&record, identity_idx).unwrap_or_default(),
            address: field(&record, address_idx),
            locality: field(&record, locality_idx),
            postcode: field(&record, postcode_idx),
            parliament: field(&record, parliament_idx),
            dun: field(&record, dun_idx),
            district: field(&record, district_idx),
            polling_station: field(&record, station_idx),
        });
    }

    if rows.is_empty() {
        return Err(CsvValidationError::Empty);
    }

    Ok(rows)
}

/// Client-side chunked importer
pub struct ChunkedVoterImporter<S: ChunkSink> {
    sink: S,
    chunk_size: usize,
    max_attempts: u32,
    base_delay: Duration,
}

impl<S: ChunkSink> ChunkedVoterImporter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            chunk_size: CHUNK_SIZE,
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_RETRY_DELAY,
        }
    }

    /// Override chunking and retry parameters (tests use tiny delays)
    pub fn with_tuning(sink: S, chunk_size: usize, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            sink,
            chunk_size,
            max_attempts,
            base_delay,
        }
    }

    /// Import parsed rows, reporting progress after every chunk.
    ///
    /// `progress` receives (rows processed so far, total rows).
    pub async fn import_rows(
        &self,
        version_id: Uuid,
        rows: Vec<VoterImportRow>,
        mut progress: impl FnMut(u32, u32) + Send,
    ) -> VoterImportSummary {
        let total_rows = rows.len() as u32;
        let mut imported = 0u32;
        let mut updated = 0u32;
        let mut matched = 0u32;
        let mut chunks_sent = 0u32;
        let mut errors: Vec<String> = Vec::new();

        let mut processed = 0u32;

        for (chunk_index, chunk) in rows.chunks(self.chunk_size).enumerate() {
            let start_row = (chunk_index * self.chunk_size + 1) as u32;
            let end_row = start_row + chunk.len() as u32 - 1;

            let request = VoterChunkRequest {
                version_id,
                start_row,
                // The version-existence check is redundant after the first
                // chunk succeeds or fails for good.
                verify_version: chunk_index == 0,
                rows: chunk.to_vec(),
            };

            match self.submit_with_retry(request).await {
                Ok(response) => {
                    imported += response.imported;
                    updated += response.updated;
                    matched += response.matched;
                    errors.extend(response.errors);
                }
                Err(e) => {
                    errors.push(format!("rows {}-{}: {}", start_row, end_row, e));
                }
            }

            chunks_sent += 1;
            processed += chunk.len() as u32;
            progress(processed, total_rows);
        }

        info!(
            "Voter import finished: {}/{} rows imported over {} chunks, {} errors",
            imported,
            total_rows,
            chunks_sent,
            errors.len()
        );

        VoterImportSummary {
            total_rows,
            imported,
            updated,
            matched,
            chunks_sent,
            errors: cap_errors(errors),
        }
    }

    /// Parse CSV text and import it. Header validation failures return
    /// before any chunk is sent.
    pub async fn import_csv(
        &self,
        version_id: Uuid,
        csv_text: &str,
        progress: impl FnMut(u32, u32) + Send,
    ) -> std::result::Result<VoterImportSummary, CsvValidationError> {
        let rows = parse_voter_csv(csv_text)?;
        Ok(self.import_rows(version_id, rows, progress).await)
    }

    async fn submit_with_retry(&self, request: VoterChunkRequest) -> Result<VoterChunkResponse> {
        let mut delay = self.base_delay;
        let mut attempt = 1;

        loop {
            match self.sink.submit(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        "Chunk at row {} failed (attempt {}/{}): {} - retrying in {:?}",
                        request.start_row, attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Cap an error list for display, appending a truncation marker
pub fn cap_errors(errors: Vec<String>) -> Vec<String> {
    if errors.len() <= MAX_DISPLAY_ERRORS {
        return errors;
    }
    let hidden = errors.len() - MAX_DISPLAY_ERRORS;
    let mut capped: Vec<String> = errors.into_iter().take(MAX_DISPLAY_ERRORS).collect();
    capped.push(format!("... and {} more errors", hidden));
    capped
}

// ==========================================================================
// Tests
// ==========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Mock sink: scripted failure counts per chunk index, records calls
    struct MockSink {
        /// start_row -> number of times this chunk should fail before
        /// succeeding (u32::MAX = always fail)
        failures: Mutex<HashMap<u32, u32>>,
        calls: Mutex<Vec<VoterChunkRequest>>,
        row_errors: Mutex<Vec<String>>,
    }

    impl MockSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                row_errors: Mutex::new(Vec::new()),
            })
        }

        fn fail_chunk_at(&self, start_row: u32, times: u32) {
            self.failures.lock().insert(start_row, times);
        }
    }

    #[async_trait]
    impl ChunkSink for Arc<MockSink> {
        async fn submit(&self, chunk: VoterChunkRequest) -> Result<VoterChunkResponse> {
            self.calls.lock().push(chunk.clone());

            let mut failures = self.failures.lock();
            if let Some(remaining) = failures.get_mut(&chunk.start_row) {
                if *remaining > 0 {
                    *remaining = remaining.saturating_sub(1);
                    anyhow::bail!("transient network error");
                }
            }
            drop(failures);

            Ok(VoterChunkResponse {
                imported: chunk.rows.len() as u32,
                updated: 0,
                matched: 0,
                errors: self.row_errors.lock().drain(..).collect(),
            })
        }
    }

    fn sample_rows(count: usize) -> Vec<VoterImportRow> {
        (0..count)
            .map(|i| VoterImportRow {
                name: format!("VOTER {}", i),
                identity_no: format!("85010101{:04}", i),
                address: Some(format!("LOT {} JALAN UTAMA", i)),
                locality: Some("KG LIKAS".to_string()),
                postcode: Some("88400".to_string()),
                parliament: Some("P171 SEPANGGAR".to_string()),
                dun: Some("N13 INANAM".to_string()),
                district: Some("KOTA KINABALU".to_string()),
                polling_station: Some("SK LIKAS".to_string()),
            })
            .collect()
    }

    fn importer(sink: Arc<MockSink>) -> ChunkedVoterImporter<Arc<MockSink>> {
        ChunkedVoterImporter::with_tuning(sink, 250, 3, Duration::from_millis(1))
    }

    #[test]
    fn test_parse_rejects_missing_nama_header() {
        let csv = "No KP,Alamat\n850101011234,LOT 1\n";
        let err = parse_voter_csv(csv).unwrap_err();
        assert_eq!(err, CsvValidationError::MissingColumn("Nama"));
    }

    #[test]
    fn test_parse_rejects_empty_file() {
        let csv = "Nama,No KP\n";
        assert_eq!(parse_voter_csv(csv).unwrap_err(), CsvValidationError::Empty);
    }

    #[test]
    fn test_parse_handles_quoted_commas() {
        let csv = "Nama,No KP,Alamat\nAMINAH,850101011234,\"LOT 1, JALAN MERPATI\"\n";
        let rows = parse_voter_csv(csv).unwrap();
        assert_eq!(rows[0].address.as_deref(), Some("LOT 1, JALAN MERPATI"));
    }

    #[test]
    fn test_parse_header_is_case_insensitive() {
        let csv = "NAMA,NO KP\nAMINAH,850101011234\n";
        let rows = parse_voter_csv(csv).unwrap();
        assert_eq!(rows[0].name, "AMINAH");
        assert_eq!(rows[0].identity_no, "850101011234");
    }

    #[tokio::test]
    async fn test_600_rows_split_into_250_250_100() {
        let sink = MockSink::new();
        let summary = importer(Arc::clone(&sink))
            .import_rows(Uuid::new_v4(), sample_rows(600), |_, _| {})
            .await;

        let calls = sink.calls.lock();
        assert_eq!(summary.chunks_sent, 3);
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].rows.len(), 250);
        assert_eq!(calls[1].rows.len(), 250);
        assert_eq!(calls[2].rows.len(), 100);
        assert_eq!(summary.imported, 600);
    }

    #[tokio::test]
    async fn test_imported_total_is_sum_of_chunk_counts() {
        let sink = MockSink::new();
        let summary = importer(Arc::clone(&sink))
            .import_rows(Uuid::new_v4(), sample_rows(510), |_, _| {})
            .await;

        let per_chunk: u32 = sink.calls.lock().iter().map(|c| c.rows.len() as u32).sum();
        assert_eq!(summary.imported, per_chunk);
        assert_eq!(summary.imported, 510);
    }

    #[tokio::test]
    async fn test_chunk_failing_twice_then_succeeding_is_imported() {
        let sink = MockSink::new();
        sink.fail_chunk_at(1, 2);

        let summary = importer(Arc::clone(&sink))
            .import_rows(Uuid::new_v4(), sample_rows(100), |_, _| {})
            .await;

        assert_eq!(summary.imported, 100);
        assert!(summary.errors.is_empty());
        // 2 failed attempts + 1 success
        assert_eq!(sink.calls.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_chunk_reports_row_range_and_continues() {
        let sink = MockSink::new();
        // Chunk 2 covers rows 251-500; make it fail on all attempts.
        sink.fail_chunk_at(251, u32::MAX);

        let summary = importer(Arc::clone(&sink))
            .import_rows(Uuid::new_v4(), sample_rows(600), |_, _| {})
            .await;

        assert_eq!(summary.imported, 350);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("rows 251-500:"), "{}", summary.errors[0]);
        // Chunk 3 was still sent after chunk 2 gave up.
        assert_eq!(summary.chunks_sent, 3);
    }

    #[tokio::test]
    async fn test_only_first_chunk_verifies_version() {
        let sink = MockSink::new();
        importer(Arc::clone(&sink))
            .import_rows(Uuid::new_v4(), sample_rows(600), |_, _| {})
            .await;

        let calls = sink.calls.lock();
        assert!(calls[0].verify_version);
        assert!(calls.iter().skip(1).all(|c| !c.verify_version));
    }

    #[tokio::test]
    async fn test_progress_reported_after_every_chunk() {
        let sink = MockSink::new();
        let mut seen = Vec::new();
        importer(Arc::clone(&sink))
            .import_rows(Uuid::new_v4(), sample_rows(600), |done, total| {
                seen.push((done, total));
            })
            .await;

        assert_eq!(seen, vec![(250, 600), (500, 600), (600, 600)]);
    }

    #[tokio::test]
    async fn test_error_list_capped_at_100_with_marker() {
        let sink = MockSink::new();
        {
            let mut row_errors = sink.row_errors.lock();
            for i in 0..130 {
                row_errors.push(format!("row {}: empty name", i + 1));
            }
        }

        let summary = importer(Arc::clone(&sink))
            .import_rows(Uuid::new_v4(), sample_rows(10), |_, _| {})
            .await;

        assert_eq!(summary.errors.len(), MAX_DISPLAY_ERRORS + 1);
        assert_eq!(summary.errors.last().unwrap(), "... and 30 more errors");
    }

    #[tokio::test]
    async fn test_csv_validation_happens_before_any_submit() {
        let sink = MockSink::new();
        let result = importer(Arc::clone(&sink))
            .import_csv(Uuid::new_v4(), "No KP\n850101011234\n", |_, _| {})
            .await;

        assert!(result.is_err());
        assert!(sink.calls.lock().is_empty());
    }
}
