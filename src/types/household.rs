//! Household types
//!
//! Households are owned by the household-management subsystem; the worker
//! reads members as the join target for voter matching.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Household {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdMember {
    pub id: Uuid,
    pub household_id: Uuid,
    pub full_name: String,
    pub identity_no: String,
    pub identity_no_norm: String,
    pub created_at: DateTime<Utc>,
}
