use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use shared::*;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, StockError, StockResult};
use crate::service::InventoryService;
use crate::store::{ProcessedCommand, ResolveOutcome, StockStore};

/// Turns saga commands into service calls and their outcome into a reply.
///
/// Replies are remembered by idempotency key, so a redelivered command gets
/// the original answer instead of running twice. Retryable storage failures
/// are not remembered.
pub struct CommandDispatcher<S: StockStore> {
    service: Arc<InventoryService<S>>,
}

impl<S: StockStore> CommandDispatcher<S> {
    pub fn new(service: Arc<InventoryService<S>>) -> Self {
        Self { service }
    }

    pub async fn dispatch(&self, command: &Command) -> CommandReply {
        match self
            .service
            .store()
            .find_processed_command(&command.idempotency_key)
            .await
        {
            Ok(Some(processed)) => {
                info!(
                    idempotency_key = %command.idempotency_key,
                    "Command already processed, returning cached result"
                );
                return replay(&processed, command);
            }
            Ok(None) => {}
            Err(e) => return failure(command, &e),
        }

        let reply = match self.execute(command).await {
            Ok(result) => CommandReply::success(command.id, command.saga_id, Some(result)),
            Err(e) => {
                warn!(
                    command_id = %command.id,
                    command_type = ?command.command_type,
                    error = %e,
                    kind = %e.kind(),
                    "Command failed"
                );
                failure(command, &e)
            }
        };

        if reply.error_kind.as_deref() != Some(ErrorKind::StorageFailure.as_str()) {
            self.remember(command, &reply).await;
        }
        reply
    }

    async fn execute(&self, command: &Command) -> StockResult<serde_json::Value> {
        match command.command_type {
            CommandType::ReserveStock => {
                let data: ReserveStockData = payload(command)?;
                let reservation = self.service.reserve(&data.order_id, &data.items).await?;
                encode(&reservation)
            }
            CommandType::ConfirmReservation => {
                let data: ReservationRef = payload(command)?;
                let outcome = self.service.confirm(data.reservation_id).await?;
                Ok(resolution_result(&outcome))
            }
            CommandType::ReleaseReservation => {
                let data: ReservationRef = payload(command)?;
                let outcome = self.service.release(data.reservation_id).await?;
                Ok(resolution_result(&outcome))
            }
            CommandType::AdjustStock => {
                let data: AdjustStockData = payload(command)?;
                let record = self
                    .service
                    .adjust_stock(&data.product_id, &data.adjustment_type, data.quantity)
                    .await?;
                encode(&record)
            }
            CommandType::CheckStock => {
                let data: CheckStockData = payload(command)?;
                let availability = self.service.bulk_check_stock(&data.items).await?;
                encode(&availability)
            }
        }
    }

    async fn remember(&self, command: &Command, reply: &CommandReply) {
        let processed = ProcessedCommand {
            idempotency_key: command.idempotency_key.clone(),
            command_id: command.id,
            result: serde_json::to_value(reply).ok(),
            processed_at: self.service.now(),
        };

        match self.service.store().record_processed_command(processed).await {
            Ok(()) => {}
            Err(StockError::AlreadyExists(_)) => {
                debug!(idempotency_key = %command.idempotency_key, "Command recorded concurrently");
            }
            Err(e) => warn!(
                idempotency_key = %command.idempotency_key,
                error = %e,
                "Failed to record processed command"
            ),
        }
    }
}

fn payload<T: DeserializeOwned>(command: &Command) -> StockResult<T> {
    serde_json::from_value(command.payload.clone())
        .map_err(|e| StockError::Validation(format!("Invalid {:?} payload: {}", command.command_type, e)))
}

fn encode<T: Serialize>(value: &T) -> StockResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| StockError::Storage(format!("failed to encode result: {}", e)))
}

fn resolution_result(outcome: &ResolveOutcome) -> serde_json::Value {
    let reservation = outcome.reservation();
    serde_json::json!({
        "reservation_id": reservation.id,
        "status": reservation.status.as_str(),
        "applied": outcome.was_applied(),
    })
}

fn failure(command: &Command, error: &StockError) -> CommandReply {
    CommandReply::failed(command.id, command.saga_id, error.to_string()).with_error_kind(error.kind().as_str())
}

/// Older rows hold only the result value, newer ones the whole reply.
fn replay(processed: &ProcessedCommand, command: &Command) -> CommandReply {
    match processed
        .result
        .clone()
        .and_then(|value| serde_json::from_value::<CommandReply>(value).ok())
    {
        Some(stored) => stored.replayed_for(command),
        None => CommandReply::success(command.id, command.saga_id, processed.result.clone()),
    }
}
