use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::EventOrigin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeEventType {
    Created,
    Updated,
    TaxRateUpdated,
}

impl NodeEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::TaxRateUpdated => "tax_rate_updated",
        }
    }
}

/// Node lifecycle event (PostgreSQL)
///
/// Primary Key: (transaction_hash, log_index)
///
/// `metadata` keeps the decoded event fields as JSON for the query API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEvent {
    pub address: Address,
    pub event_type: NodeEventType,
    pub metadata: serde_json::Value,
    #[serde(flatten)]
    pub origin: EventOrigin,
}

/// Canonical node row, materialized from finalized events only (PostgreSQL)
///
/// Primary Key: address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub address: Address,
    pub id: U256,
    pub name: String,
    pub description: String,
    pub tax_rate_basis_points: u64,
    pub is_public_good: bool,
    pub alpha: bool,
    pub created_at_block: u64,
    pub created_at: DateTime<Utc>,
}

/// Field patch applied to an existing [`Node`]; `None` leaves a field as is.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub address: Address,
    pub name: Option<String>,
    pub description: Option<String>,
    pub tax_rate_basis_points: Option<u64>,
}

impl NodeUpdate {
    pub fn apply(&self, node: &mut Node) {
        if let Some(name) = &self.name {
            node.name = name.clone();
        }
        if let Some(description) = &self.description {
            node.description = description.clone();
        }
        if let Some(tax_rate) = self.tax_rate_basis_points {
            node.tax_rate_basis_points = tax_rate;
        }
    }
}
