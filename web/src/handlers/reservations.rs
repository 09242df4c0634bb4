//! Reservation endpoints.
//!
//! - `POST /reserve/:resource/:qty/:holder` - place a time-bounded hold
//! - `POST /confirm-payment/:resource/:qty/:holder` - turn a hold into a sale
//! - `GET /holds/:resource/:qty/:holder` - inspect an active hold
//! - `GET /stock/:resource` - counter and active holds of a resource
//!
//! The quantity segment is taken as raw text so that a non-numeric value is
//! reported as a validation error (422) like any other malformed input,
//! instead of Axum's generic path rejection.

use crate::WebResult;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use stockhold_core::{HoldKey, ResourceId};

/// Path segments identifying a hold.
type HoldPath = Path<(String, String, String)>;

fn hold_from_path((resource, quantity, holder): (String, String, String)) -> Result<HoldKey, AppError> {
    let quantity: i64 = quantity
        .trim()
        .parse()
        .map_err(|_| AppError::validation(format!("Quantity must be an integer, got {quantity:?}")))?;
    Ok(HoldKey::from_parts(&resource, quantity, &holder)?)
}

/// Successful reserve.
#[derive(Debug, Serialize)]
pub struct ReserveResponse {
    /// Always `"success"`
    pub status: &'static str,
    /// Reserved resource
    pub resource_id: String,
    /// Reserved units
    pub quantity: u64,
    /// Holder of the reservation
    pub holder_id: String,
    /// Counter value after the decrement
    pub remaining_stock: u64,
    /// When the hold lapses if payment is not confirmed
    pub expires_at: DateTime<Utc>,
}

/// Reserve units for a holder.
///
/// # Errors
///
/// 422 for malformed input, 409 for a duplicate hold or insufficient stock,
/// 404 for a resource unknown to the catalog, 503 when the catalog is
/// unavailable, 500 on store failure.
pub async fn reserve(
    State(state): State<AppState>,
    Path(segments): HoldPath,
) -> WebResult<Json<ReserveResponse>> {
    let hold = hold_from_path(segments)?;
    let reservation = state.coordinator.reserve(&hold).await?;

    Ok(Json(ReserveResponse {
        status: "success",
        resource_id: hold.resource_id.to_string(),
        quantity: hold.quantity.get(),
        holder_id: hold.holder_id.to_string(),
        remaining_stock: reservation.remaining_stock,
        expires_at: reservation.expires_at,
    }))
}

/// Successful confirmation.
#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    /// Always `"success"`
    pub status: &'static str,
    /// Human-readable outcome
    pub message: String,
    /// Confirmed resource
    pub resource_id: String,
    /// Confirmed units
    pub quantity: u64,
    /// Holder whose hold was confirmed
    pub holder_id: String,
}

/// Confirm payment for an active hold.
///
/// # Errors
///
/// 422 for malformed input, 410 when the hold expired, was already
/// confirmed, or never existed, 500 on store failure.
pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(segments): HoldPath,
) -> WebResult<Json<ConfirmResponse>> {
    let hold = hold_from_path(segments)?;
    state.coordinator.confirm(&hold).await?;

    Ok(Json(ConfirmResponse {
        status: "success",
        message: format!(
            "Payment confirmed for {} unit(s) of {}",
            hold.quantity, hold.resource_id
        ),
        resource_id: hold.resource_id.to_string(),
        quantity: hold.quantity.get(),
        holder_id: hold.holder_id.to_string(),
    }))
}

/// An active hold.
#[derive(Debug, Serialize)]
pub struct HoldResponse {
    /// Store key of the hold
    pub hold_key: String,
    /// Held resource
    pub resource_id: String,
    /// Held units
    pub quantity: u64,
    /// Holder
    pub holder_id: String,
    /// Milliseconds until expiry; `null` if the entry has no TTL
    pub ttl_ms: Option<u64>,
}

/// Look up an active hold.
///
/// # Errors
///
/// 422 for malformed input, 404 when no such hold is active, 500 on store
/// failure.
pub async fn get_hold(
    State(state): State<AppState>,
    Path(segments): HoldPath,
) -> WebResult<Json<HoldResponse>> {
    let hold = hold_from_path(segments)?;
    let active = state
        .coordinator
        .hold_status(&hold)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Hold {hold}")))?;

    Ok(Json(HoldResponse {
        hold_key: active.hold.store_key(),
        resource_id: active.hold.resource_id.to_string(),
        quantity: active.hold.quantity.get(),
        holder_id: active.hold.holder_id.to_string(),
        ttl_ms: active
            .remaining
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
    }))
}

/// Inventory view of a resource.
#[derive(Debug, Serialize)]
pub struct StockResponse {
    /// Resource
    pub resource_id: String,
    /// Counter value; `null` until the first reserve initializes it
    pub available: Option<u64>,
    /// Units under active holds
    pub held: u64,
    /// Number of active holds
    pub active_holds: usize,
    /// `available + held`
    pub accounted: Option<u64>,
}

/// Report the counter and active holds of a resource. Never contacts the
/// catalog.
///
/// # Errors
///
/// 422 for a malformed resource id, 500 on store failure.
pub async fn get_stock(
    State(state): State<AppState>,
    Path(resource): Path<String>,
) -> WebResult<Json<StockResponse>> {
    let resource_id = ResourceId::new(resource)?;
    let snapshot = state.coordinator.snapshot(&resource_id).await?;

    Ok(Json(StockResponse {
        accounted: snapshot.accounted(),
        resource_id: snapshot.resource_id.to_string(),
        available: snapshot.available,
        held: snapshot.held,
        active_holds: snapshot.active_holds,
    }))
}
