//! Voter CSV export handler

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::db::queries;
use crate::types::{ErrorResponse, Request, SuccessResponse, Voter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterExportRequest {
    pub version_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterExportResponse {
    pub filename: String,
    pub csv_content: String,
    pub row_count: u32,
}

/// Handle voters.export - SPR-style CSV for one version
pub async fn handle_voter_export(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<VoterExportRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse voter export request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let version_id = request.payload.version_id;
        match queries::voter::voters_for_export(&pool, version_id).await {
            Ok(voters) => match render_csv(&voters) {
                Ok(csv_content) => {
                    let response = VoterExportResponse {
                        filename: format!("voters-{}.csv", version_id),
                        row_count: voters.len() as u32,
                        csv_content,
                    };
                    let success = SuccessResponse::new(request.id, response);
                    let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
                }
                Err(e) => {
                    error!("Failed to render voter CSV: {}", e);
                    let error = ErrorResponse::new(request.id, "EXPORT_ERROR", e.to_string());
                    let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                }
            },
            Err(e) => {
                error!("Failed to load voters for export: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Fixed SPR-style header; the writer doubles embedded quotes
fn render_csv(voters: &[Voter]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "Nama", "No KP", "Alamat", "Lokaliti", "Poskod", "Parlimen", "DUN", "Latitud", "Longitud",
    ])?;

    for voter in voters {
        let lat = voter.lat.map(|v| v.to_string()).unwrap_or_default();
        let lng = voter.lng.map(|v| v.to_string()).unwrap_or_default();
        writer.write_record([
            voter.name.as_str(),
            voter.identity_no.as_str(),
            voter.address.as_deref().unwrap_or(""),
            voter.locality.as_deref().unwrap_or(""),
            voter.postcode.as_deref().unwrap_or(""),
            voter.parliament.as_deref().unwrap_or(""),
            voter.dun.as_deref().unwrap_or(""),
            lat.as_str(),
            lng.as_str(),
        ])?;
    }

    Ok(String::from_utf8(writer.into_inner()?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn voter(name: &str, address: Option<&str>) -> Voter {
        Voter {
            id: Uuid::new_v4(),
            version_id: Uuid::new_v4(),
            identity_no: "850101-01-1234".to_string(),
            identity_no_norm: "850101011234".to_string(),
            name: name.to_string(),
            address: address.map(str::to_string),
            locality: Some("KG LIKAS".to_string()),
            postcode: Some("88400".to_string()),
            parliament: Some("P171 SEPANGGAR".to_string()),
            dun: Some("N13 INANAM".to_string()),
            district: None,
            polling_station: None,
            lat: Some(5.9804),
            lng: Some(116.0735),
            geocode_status: "success".to_string(),
            household_member_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_render_csv_has_fixed_header() {
        let csv = render_csv(&[voter("AMINAH", None)]).unwrap();
        let header = csv.lines().next().unwrap();
        assert_eq!(header, "Nama,No KP,Alamat,Lokaliti,Poskod,Parlimen,DUN,Latitud,Longitud");
    }

    #[test]
    fn test_render_csv_quotes_fields_with_commas() {
        let csv = render_csv(&[voter("AMINAH", Some("LOT 1, JALAN MERPATI"))]).unwrap();
        assert!(csv.contains("\"LOT 1, JALAN MERPATI\""));
    }

    #[test]
    fn test_render_csv_row_per_voter() {
        let csv = render_csv(&[voter("A", None), voter("B", None)]).unwrap();
        assert_eq!(csv.lines().count(), 3); // header + 2 rows
    }
}
