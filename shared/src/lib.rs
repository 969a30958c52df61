use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub saga_id: Uuid,
    pub command_type: CommandType,
    pub payload: serde_json::Value,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandType {
    ReserveStock,
    ConfirmReservation,
    ReleaseReservation,
    AdjustStock,
    CheckStock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReply {
    pub id: Uuid,
    pub command_id: Uuid,
    pub saga_id: Uuid,
    pub status: CommandStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub error_kind: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveItem {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveStockData {
    pub order_id: String,
    pub items: Vec<ReserveItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRef {
    pub reservation_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustStockData {
    pub product_id: String,
    pub adjustment_type: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockCheckItem {
    pub product_id: String,
    #[serde(default)]
    pub quantity: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckStockData {
    pub items: Vec<StockCheckItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAvailability {
    pub product_id: String,
    pub is_available: bool,
    pub available_quantity: u32,
    pub requested_quantity: u32,
}

impl StockAvailability {
    pub fn missing(product_id: impl Into<String>, requested_quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            is_available: false,
            available_quantity: 0,
            requested_quantity,
        }
    }
}

impl Command {
    pub fn new(saga_id: Uuid, command_type: CommandType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            saga_id,
            command_type,
            payload,
            idempotency_key: format!("{}_{}", saga_id, Uuid::new_v4()),
            created_at: Utc::now(),
        }
    }
}

impl CommandReply {
    pub fn success(command_id: Uuid, saga_id: Uuid, result: Option<serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            command_id,
            saga_id,
            status: CommandStatus::Success,
            result,
            error: None,
            error_kind: None,
            created_at: Utc::now(),
        }
    }

    pub fn failed(command_id: Uuid, saga_id: Uuid, error: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            command_id,
            saga_id,
            status: CommandStatus::Failed,
            result: None,
            error: Some(error),
            error_kind: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_error_kind(mut self, kind: impl Into<String>) -> Self {
        self.error_kind = Some(kind.into());
        self
    }

    /// Re-addresses a stored reply to a redelivered command.
    pub fn replayed_for(&self, command: &Command) -> Self {
        Self {
            id: Uuid::new_v4(),
            command_id: command.id,
            saga_id: command.saga_id,
            created_at: Utc::now(),
            ..self.clone()
        }
    }
}
