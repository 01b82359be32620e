use anyhow::Context;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use diesel::{OptionalExtension, QueryDsl};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::warn;
use uuid::Uuid;

use crate::{
    app_error::AppError,
    app_state::AppState,
    auth::{self, AuthError, Principal, Role},
    schema::{customers, delivery_staff, vendors},
};

/// Verifies the bearer token and attaches the acting [`Principal`] to the request.
pub async fn authorization(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let claims = auth::bearer_token(header)
        .and_then(|token| auth::verify_token(&state.jwt_secret, token))
        .inspect_err(|err| warn!("Rejected request to {}: {}", req.uri().path(), err))?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let principal = resolve_principal(conn, claims.sub)
        .await?
        .ok_or(AuthError::UnknownPrincipal)?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// Looks the subject up in customers, vendors, then delivery staff.
async fn resolve_principal(
    conn: &mut AsyncPgConnection,
    id: Uuid,
) -> Result<Option<Principal>, AppError> {
    let customer: Option<Uuid> = customers::table
        .find(id)
        .select(customers::id)
        .first(conn)
        .await
        .optional()
        .context("Failed to look up customer")?;
    if customer.is_some() {
        return Ok(Some(Principal {
            id,
            role: Role::Customer,
        }));
    }

    let vendor: Option<Uuid> = vendors::table
        .find(id)
        .select(vendors::id)
        .first(conn)
        .await
        .optional()
        .context("Failed to look up vendor")?;
    if vendor.is_some() {
        return Ok(Some(Principal {
            id,
            role: Role::Vendor,
        }));
    }

    let staff: Option<Uuid> = delivery_staff::table
        .find(id)
        .select(delivery_staff::id)
        .first(conn)
        .await
        .optional()
        .context("Failed to look up delivery staff")?;

    Ok(staff.map(|id| Principal {
        id,
        role: Role::DeliveryStaff,
    }))
}
