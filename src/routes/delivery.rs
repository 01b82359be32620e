use anyhow::Context;
use axum::{
    Extension,
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{
    BoolExpressionMethods, ExpressionMethods, OptionalExtension, PgExpressionMethods, QueryDsl,
    SelectableHelper,
};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppJson, StdResponse},
    app_state::AppState,
    auth::Principal,
    lifecycle::{Actor, OrderStatus},
    middleware,
    models::{DeliveryStaffEntity, OrderEntity},
    routes::orders::{OrderView, with_items},
    schema::{delivery_staff, orders},
};

/// Delivery staff routes. Every route requires a bearer token.
pub fn routes_with_openapi(state: AppState) -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/api/orders/delivery",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_delivery_orders))
            .routes(utoipa_axum::routes!(accept_order))
            .routes(utoipa_axum::routes!(update_delivery_order_status))
            .route_layer(axum::middleware::from_fn_with_state(
                state,
                middleware::authorization,
            )),
    )
}

/// Points the staff member's single current-order slot at `order_id`.
pub(crate) async fn set_current_order(
    conn: &mut AsyncPgConnection,
    staff_id: Uuid,
    order_id: Uuid,
) -> Result<(), AppError> {
    let updated = diesel::update(delivery_staff::table.find(staff_id))
        .set(delivery_staff::current_order_id.eq(order_id))
        .execute(conn)
        .await
        .context("Failed to update delivery staff")?;

    if updated == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

/// Clears the staff member's current order, but only while it still points at `order_id`.
pub(crate) async fn release_current_order(
    conn: &mut AsyncPgConnection,
    staff_id: Uuid,
    order_id: Uuid,
) -> Result<(), AppError> {
    diesel::update(
        delivery_staff::table
            .find(staff_id)
            .filter(delivery_staff::current_order_id.eq(order_id)),
    )
    .set(delivery_staff::current_order_id.eq(None::<Uuid>))
    .execute(conn)
    .await
    .context("Failed to release delivery staff")?;

    Ok(())
}

/// Loads the calling staff member, refusing accounts that are not active.
async fn active_staff(
    conn: &mut AsyncPgConnection,
    staff_id: Uuid,
) -> Result<DeliveryStaffEntity, AppError> {
    let staff: DeliveryStaffEntity = delivery_staff::table
        .find(staff_id)
        .select(DeliveryStaffEntity::as_select())
        .first(conn)
        .await?;

    if !staff.is_active() {
        return Err(AppError::ForbiddenResource(format!(
            "Delivery staff account is {}, not active",
            staff.status
        )));
    }
    Ok(staff)
}

/// An order can be claimed while it is ready and either unassigned or already
/// handed to this staff member by the vendor.
fn check_claimable(order: &OrderEntity, staff_id: Uuid) -> Result<(), AppError> {
    if order.status != OrderStatus::Ready.as_str() {
        return Err(AppError::BadRequest("Order is not ready for pickup".into()));
    }
    if order
        .delivery_staff_id
        .is_some_and(|assignee| assignee != staff_id)
    {
        return Err(AppError::BadRequest(
            "Order is already assigned to a delivery partner".into(),
        ));
    }
    Ok(())
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct DeliveryOrdersRes {
    /// Ready orders nobody has picked up yet.
    available_orders: Vec<OrderView>,
    /// Orders assigned to the caller.
    assigned_orders: Vec<OrderView>,
}

/// List the open delivery pool alongside the caller's own deliveries.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Delivery"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Delivery orders", body = StdResponse<DeliveryOrdersRes, String>),
        (status = 403, description = "Caller is not delivery staff")
    )
)]
async fn get_delivery_orders(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, AppError> {
    let staff_id = principal.require_delivery_staff()?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let available: Vec<OrderEntity> = orders::table
        .filter(orders::status.eq(OrderStatus::Ready.as_str()))
        .filter(orders::delivery_staff_id.is_null())
        .order_by(orders::created_at.asc())
        .select(OrderEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get available orders")?;

    let assigned: Vec<OrderEntity> = orders::table
        .filter(orders::delivery_staff_id.eq(staff_id))
        .order_by(orders::updated_at.desc())
        .select(OrderEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get assigned orders")?;

    Ok(StdResponse {
        data: Some(DeliveryOrdersRes {
            available_orders: with_items(conn, available).await?,
            assigned_orders: with_items(conn, assigned).await?,
        }),
        message: Some("Get delivery orders successfully"),
    })
}

/// Claim a ready order that is unassigned or was assigned to the caller by the vendor.
///
/// The claim is a single conditional update, so of two staff racing for the same
/// order exactly one wins; the other gets 400.
#[utoipa::path(
    post,
    path = "/accept/{order_id}",
    tags = ["Delivery"],
    security(("bearerAuth" = [])),
    params(
        ("order_id" = Uuid, Path, description = "Order ID to accept")
    ),
    responses(
        (status = 200, description = "Order accepted", body = StdResponse<OrderEntity, String>),
        (status = 400, description = "Order not ready or already assigned"),
        (status = 403, description = "Caller is not active delivery staff"),
        (status = 404, description = "Order not found")
    )
)]
async fn accept_order(
    Path(order_id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, AppError> {
    let staff_id = principal.require_delivery_staff()?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    active_staff(conn, staff_id).await?;

    let order: OrderEntity = orders::table
        .find(order_id)
        .select(OrderEntity::as_select())
        .first(conn)
        .await?;

    check_claimable(&order, staff_id)?;
    let next = OrderStatus::Ready.transition(OrderStatus::OutForDelivery, Actor::DeliveryStaff)?;

    let accepted_order = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let accepted_order: OrderEntity = diesel::update(
                    orders::table
                        .find(order_id)
                        .filter(orders::status.eq(OrderStatus::Ready.as_str()))
                        .filter(
                            orders::delivery_staff_id
                                .is_null()
                                .or(orders::delivery_staff_id.is_not_distinct_from(staff_id)),
                        ),
                )
                .set((
                    orders::delivery_staff_id.eq(staff_id),
                    orders::status.eq(next.as_str()),
                ))
                .returning(OrderEntity::as_returning())
                .get_result(conn)
                .await
                .optional()?
                .ok_or_else(|| {
                    AppError::BadRequest("Order is already assigned to a delivery partner".into())
                })?;

                set_current_order(conn, staff_id, order_id).await?;

                Ok::<OrderEntity, AppError>(accepted_order)
            })
        })
        .await?;

    info!("Order {} accepted by delivery staff {}", order_id, staff_id);

    Ok(StdResponse {
        data: Some(accepted_order),
        message: Some("Order accepted successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct UpdateDeliveryStatusReq {
    /// One of `picked_up`, `on_the_way`, `delivered`.
    status: String,
}

/// Advance a delivery. Only the assigned staff member may do this; `delivered`
/// frees their current-order slot.
#[utoipa::path(
    put,
    path = "/status/{order_id}",
    tags = ["Delivery"],
    security(("bearerAuth" = [])),
    params(
        ("order_id" = Uuid, Path, description = "Order ID to update")
    ),
    request_body = UpdateDeliveryStatusReq,
    responses(
        (status = 200, description = "Delivery status updated", body = StdResponse<OrderEntity, String>),
        (status = 400, description = "Unknown status or illegal transition"),
        (status = 403, description = "Caller is not the assigned staff"),
        (status = 409, description = "Order changed concurrently")
    )
)]
async fn update_delivery_order_status(
    Path(order_id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(body): AppJson<UpdateDeliveryStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let staff_id = principal.require_delivery_staff()?;
    let next = OrderStatus::parse_one_of(&body.status, &OrderStatus::DELIVERY_SETTABLE)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order: OrderEntity = orders::table
        .find(order_id)
        .select(OrderEntity::as_select())
        .first(conn)
        .await?;

    if order.delivery_staff_id != Some(staff_id) {
        return Err(AppError::ForbiddenResource(
            "You are not assigned to this order".into(),
        ));
    }

    let current: OrderStatus = order.status.parse()?;
    current.transition(next, Actor::DeliveryStaff)?;

    let updated_order = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let updated_order: OrderEntity = diesel::update(
                    orders::table
                        .find(order_id)
                        .filter(orders::status.eq(current.as_str()))
                        .filter(orders::delivery_staff_id.eq(staff_id)),
                )
                .set(orders::status.eq(next.as_str()))
                .returning(OrderEntity::as_returning())
                .get_result(conn)
                .await
                .optional()?
                .ok_or_else(|| {
                    AppError::Conflict("Order changed concurrently, please retry".into())
                })?;

                if next == OrderStatus::Delivered {
                    release_current_order(conn, staff_id, order_id).await?;
                }

                Ok::<OrderEntity, AppError>(updated_order)
            })
        })
        .await?;

    info!(
        "Order {} moved from {} to {} by delivery staff {}",
        order_id, current, next, staff_id
    );

    Ok(StdResponse {
        data: Some(updated_order),
        message: Some("Delivery status updated successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn order(status: OrderStatus, delivery_staff_id: Option<Uuid>) -> OrderEntity {
        OrderEntity {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            total_amount: 100.0,
            status: status.as_str().into(),
            payment_method: "upi".into(),
            payment_status: "completed".into(),
            transaction_id: Some("TXN-1".into()),
            delivery_address: serde_json::json!({ "line1": "4 Park Street" }),
            special_instructions: None,
            delivery_staff_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn unassigned_ready_order_is_claimable_by_anyone() {
        assert!(check_claimable(&order(OrderStatus::Ready, None), Uuid::new_v4()).is_ok());
    }

    #[test]
    fn vendor_assignee_can_claim_their_own_order() {
        let staff_id = Uuid::new_v4();
        let assigned = order(OrderStatus::Ready, Some(staff_id));

        assert!(check_claimable(&assigned, staff_id).is_ok());
        assert!(matches!(
            check_claimable(&assigned, Uuid::new_v4()),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn orders_outside_ready_cannot_be_claimed() {
        for status in [
            OrderStatus::Preparing,
            OrderStatus::OutForDelivery,
            OrderStatus::Delivered,
        ] {
            let err = check_claimable(&order(status, None), Uuid::new_v4()).unwrap_err();
            assert_eq!(err.to_string(), "Order is not ready for pickup");
        }
    }

    #[test]
    fn only_active_staff_take_deliveries() {
        let mut staff = DeliveryStaffEntity {
            id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            name: "Ravi".into(),
            phone: None,
            status: "active".into(),
            current_order_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(staff.is_active());

        for status in ["pending", "inactive"] {
            staff.status = status.into();
            assert!(!staff.is_active());
        }
    }
}
