use std::collections::HashMap;

use anyhow::Context;
use axum::{
    Extension,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use diesel::{
    ExpressionMethods, OptionalExtension, PgExpressionMethods, QueryDsl, SelectableHelper,
};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppJson, StdResponse},
    app_state::AppState,
    auth::{Principal, Role},
    checkout::{self, CartLine},
    lifecycle::{Actor, OrderStatus},
    middleware,
    models::{
        CreateOrderEntity, CreateOrderItemEntity, DeliveryStaffEntity, MenuItemEntity,
        OrderEntity, OrderItemEntity,
    },
    payment::{PaymentMethod, PaymentReceipt},
    routes::delivery::{release_current_order, set_current_order},
    schema::{delivery_staff, menu_items, order_items, orders},
};

/// Customer and vendor order routes. Every route requires a bearer token.
pub fn routes_with_openapi(state: AppState) -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/api/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(create_order, get_orders))
            .routes(utoipa_axum::routes!(get_order))
            .routes(utoipa_axum::routes!(get_vendor_orders))
            .routes(utoipa_axum::routes!(update_order_status))
            .routes(utoipa_axum::routes!(assign_delivery_staff))
            .route_layer(axum::middleware::from_fn_with_state(
                state,
                middleware::authorization,
            )),
    )
}

/// An order together with its frozen line items.
#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: OrderEntity,
    pub items: Vec<OrderItemEntity>,
}

/// Loads the line items of `orders` in one query and pairs them up, keeping order.
pub(crate) async fn with_items(
    conn: &mut AsyncPgConnection,
    orders: Vec<OrderEntity>,
) -> Result<Vec<OrderView>, AppError> {
    let order_ids: Vec<Uuid> = orders.iter().map(|order| order.id).collect();
    let items: Vec<OrderItemEntity> = order_items::table
        .filter(order_items::order_id.eq_any(&order_ids))
        .order_by((order_items::order_id, order_items::position))
        .select(OrderItemEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get order items")?;

    let mut group: HashMap<Uuid, Vec<OrderItemEntity>> = HashMap::new();
    for item in items {
        group.entry(item.order_id).or_default().push(item);
    }

    Ok(orders
        .into_iter()
        .map(|order| {
            let items = group.remove(&order.id).unwrap_or_default();
            OrderView { order, items }
        })
        .collect())
}

async fn find_order(conn: &mut AsyncPgConnection, id: Uuid) -> Result<OrderEntity, AppError> {
    let order: OrderEntity = orders::table
        .find(id)
        .select(OrderEntity::as_select())
        .first(conn)
        .await?;
    Ok(order)
}

/// Only the ordering customer and the serving vendor may read an order.
fn can_view(principal: &Principal, order: &OrderEntity) -> bool {
    match principal.role {
        Role::Customer => order.customer_id == principal.id,
        Role::Vendor => order.vendor_id == principal.id,
        Role::DeliveryStaff => false,
    }
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct CreateOrderReq {
    #[serde(default)]
    items: Vec<CartLine>,
    vendor_id: Option<Uuid>,
    delivery_address: Option<Value>,
    /// One of `cash`, `card`, `upi`.
    payment_method: Option<String>,
    special_instructions: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct CreateOrderRes {
    order: OrderView,
    payment_info: PaymentReceipt,
}

/// Place an order for the authenticated customer.
///
/// Every cart line must carry the `versionHash` of the menu item it was built from;
/// a line whose item changed or went unavailable fails the whole order with 409.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    request_body = CreateOrderReq,
    responses(
        (status = 201, description = "Order placed", body = StdResponse<CreateOrderRes, String>),
        (status = 400, description = "Missing or invalid fields"),
        (status = 402, description = "Payment failed"),
        (status = 409, description = "Cart is stale, refresh it")
    )
)]
async fn create_order(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(body): AppJson<CreateOrderReq>,
) -> Result<impl IntoResponse, AppError> {
    let customer_id = principal.require_customer()?;

    let vendor_id = body
        .vendor_id
        .ok_or_else(|| AppError::BadRequest("vendorId is required".into()))?;
    let payment_method: PaymentMethod = body
        .payment_method
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("paymentMethod is required".into()))?
        .parse()
        .map_err(AppError::BadRequest)?;
    let delivery_address = body
        .delivery_address
        .filter(|address| !address.is_null())
        .ok_or_else(|| AppError::BadRequest("deliveryAddress is required".into()))?;

    let cart = {
        let conn = &mut state
            .db_pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        let item_ids: Vec<Uuid> = body.items.iter().map(|line| line.item_id).collect();
        let menu: HashMap<Uuid, MenuItemEntity> = menu_items::table
            .filter(menu_items::id.eq_any(&item_ids))
            .select(MenuItemEntity::as_select())
            .load::<MenuItemEntity>(conn)
            .await
            .context("Failed to get menu items")?
            .into_iter()
            .map(|item| (item.id, item))
            .collect();

        checkout::freeze_cart(&body.items, vendor_id, &menu)?
    };

    let receipt =
        checkout::charge(state.payments.as_ref(), cart.total_amount, payment_method).await?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let transaction_id = receipt.transaction_id.clone();
    let special_instructions = body.special_instructions;
    let order = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let order: OrderEntity = diesel::insert_into(orders::table)
                    .values(CreateOrderEntity {
                        customer_id,
                        vendor_id,
                        total_amount: cart.total_amount,
                        status: OrderStatus::Pending.as_str().into(),
                        payment_method: payment_method.as_str().into(),
                        payment_status: "completed".into(),
                        transaction_id: Some(transaction_id),
                        delivery_address,
                        special_instructions,
                    })
                    .returning(OrderEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to create order")?;

                let new_items: Vec<CreateOrderItemEntity> = cart
                    .lines
                    .into_iter()
                    .enumerate()
                    .map(|(position, line)| CreateOrderItemEntity {
                        order_id: order.id,
                        position: position as i32,
                        name: line.name,
                        price: line.price,
                        quantity: line.quantity,
                        is_veg: line.is_veg,
                    })
                    .collect();

                let items: Vec<OrderItemEntity> = diesel::insert_into(order_items::table)
                    .values(&new_items)
                    .returning(OrderItemEntity::as_returning())
                    .get_results(conn)
                    .await
                    .context("Failed to create order items")?;

                Ok::<OrderView, AppError>(OrderView { order, items })
            })
        })
        .await?;

    info!(
        "Order {} placed by customer {} at vendor {} for {:.2}",
        order.order.id, customer_id, vendor_id, order.order.total_amount
    );

    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(CreateOrderRes {
                order,
                payment_info: receipt,
            }),
            message: Some("Order placed successfully"),
        },
    ))
}

/// Fetch all orders placed by the authenticated customer.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List my orders", body = StdResponse<Vec<OrderView>, String>)
    )
)]
async fn get_orders(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, AppError> {
    let customer_id = principal.require_customer()?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let orders: Vec<OrderEntity> = orders::table
        .filter(orders::customer_id.eq(customer_id))
        .order_by(orders::created_at.desc())
        .select(OrderEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get orders")?;

    Ok(StdResponse {
        data: Some(with_items(conn, orders).await?),
        message: Some("Get orders successfully"),
    })
}

/// Fetch a single order. Only its customer or its vendor may read it.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Order ID to fetch")
    ),
    responses(
        (status = 200, description = "Get order successfully", body = StdResponse<OrderView, String>),
        (status = 403, description = "Not the order's customer or vendor"),
        (status = 404, description = "Order not found")
    )
)]
async fn get_order(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order = find_order(conn, id).await?;
    if !can_view(&principal, &order) {
        return Err(AppError::ForbiddenResource(
            "You are not allowed to view this order".into(),
        ));
    }

    let order = with_items(conn, vec![order])
        .await?
        .pop()
        .ok_or(AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(order),
        message: Some("Get order successfully"),
    })
}

/// Fetch every order placed with a vendor. Vendors may only list their own.
#[utoipa::path(
    get,
    path = "/vendor/{vendor_id}",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("vendor_id" = Uuid, Path, description = "Vendor whose orders to list")
    ),
    responses(
        (status = 200, description = "List vendor orders", body = StdResponse<Vec<OrderView>, String>),
        (status = 403, description = "Not this vendor")
    )
)]
async fn get_vendor_orders(
    Path(vendor_id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, AppError> {
    if principal.require_vendor()? != vendor_id {
        return Err(AppError::ForbiddenResource(
            "Vendors can only list their own orders".into(),
        ));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let orders: Vec<OrderEntity> = orders::table
        .filter(orders::vendor_id.eq(vendor_id))
        .order_by(orders::created_at.desc())
        .select(OrderEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get vendor orders")?;

    Ok(StdResponse {
        data: Some(with_items(conn, orders).await?),
        message: Some("Get vendor orders successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct UpdateOrderStatusReq {
    /// One of `accepted`, `preparing`, `ready`, `delivered`, `cancelled`.
    status: String,
}

/// Move an order along the kitchen path. Only the owning vendor may do this.
#[utoipa::path(
    put,
    path = "/{id}/status",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Order ID to update")
    ),
    request_body = UpdateOrderStatusReq,
    responses(
        (status = 200, description = "Status updated", body = StdResponse<OrderEntity, String>),
        (status = 400, description = "Unknown status or illegal transition"),
        (status = 403, description = "Not the order's vendor"),
        (status = 409, description = "Order changed concurrently")
    )
)]
async fn update_order_status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(body): AppJson<UpdateOrderStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let vendor_id = principal.require_vendor()?;
    let next = OrderStatus::parse_one_of(&body.status, &OrderStatus::VENDOR_SETTABLE)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order = find_order(conn, id).await?;
    if order.vendor_id != vendor_id {
        return Err(AppError::ForbiddenResource(
            "You can only update your own orders".into(),
        ));
    }

    let current: OrderStatus = order.status.parse()?;
    current.transition(next, Actor::Vendor)?;

    let updated_order = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let updated_order: OrderEntity = diesel::update(
                    orders::table
                        .find(id)
                        .filter(orders::status.eq(current.as_str())),
                )
                .set(orders::status.eq(next.as_str()))
                .returning(OrderEntity::as_returning())
                .get_result(conn)
                .await
                .optional()?
                .ok_or_else(|| {
                    AppError::Conflict("Order status changed concurrently, please retry".into())
                })?;

                if next.is_terminal() {
                    if let Some(staff_id) = updated_order.delivery_staff_id {
                        release_current_order(conn, staff_id, updated_order.id).await?;
                    }
                }

                Ok::<OrderEntity, AppError>(updated_order)
            })
        })
        .await?;

    info!("Order {} moved from {} to {} by vendor", id, current, next);

    Ok(StdResponse {
        data: Some(updated_order),
        message: Some("Order status updated successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct AssignDeliveryStaffReq {
    delivery_staff_id: Option<Uuid>,
}

/// Hand an order to one of the vendor's active delivery staff.
///
/// A previously assigned staff member has their current order cleared in the same
/// transaction that sets the new assignee. The write only lands if the order still
/// has the status and assignee that were read; otherwise 409.
#[utoipa::path(
    put,
    path = "/{id}/delivery-staff",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Order ID to assign")
    ),
    request_body = AssignDeliveryStaffReq,
    responses(
        (status = 200, description = "Delivery staff assigned", body = StdResponse<OrderEntity, String>),
        (status = 400, description = "Missing deliveryStaffId, inactive staff or order already finished"),
        (status = 403, description = "Order or staff belongs to another vendor"),
        (status = 404, description = "Order or staff not found"),
        (status = 409, description = "Order changed concurrently")
    )
)]
async fn assign_delivery_staff(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(body): AppJson<AssignDeliveryStaffReq>,
) -> Result<impl IntoResponse, AppError> {
    let vendor_id = principal.require_vendor()?;
    let staff_id = body
        .delivery_staff_id
        .ok_or_else(|| AppError::BadRequest("deliveryStaffId is required".into()))?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order = find_order(conn, id).await?;
    if order.vendor_id != vendor_id {
        return Err(AppError::ForbiddenResource(
            "You can only assign delivery staff to your own orders".into(),
        ));
    }

    let status: OrderStatus = order.status.parse()?;
    if status.is_terminal() {
        return Err(AppError::BadRequest(format!(
            "Cannot assign delivery staff to a {} order",
            status
        )));
    }

    let staff: DeliveryStaffEntity = delivery_staff::table
        .find(staff_id)
        .select(DeliveryStaffEntity::as_select())
        .first(conn)
        .await?;
    if staff.vendor_id != vendor_id {
        return Err(AppError::ForbiddenResource(
            "Delivery staff does not work for this vendor".into(),
        ));
    }
    if !staff.is_active() {
        return Err(AppError::BadRequest(format!(
            "Delivery staff is {}, not active",
            staff.status
        )));
    }

    let previous_staff_id = order.delivery_staff_id;
    let updated_order = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let updated_order: OrderEntity = diesel::update(
                    orders::table
                        .find(id)
                        .filter(orders::status.eq(status.as_str()))
                        .filter(orders::delivery_staff_id.is_not_distinct_from(previous_staff_id)),
                )
                .set(orders::delivery_staff_id.eq(staff_id))
                .returning(OrderEntity::as_returning())
                .get_result(conn)
                .await
                .optional()?
                .ok_or_else(|| {
                    AppError::Conflict("Order changed concurrently, please retry".into())
                })?;

                if let Some(previous) = previous_staff_id.filter(|previous| *previous != staff_id)
                {
                    release_current_order(conn, previous, id).await?;
                }

                set_current_order(conn, staff_id, id).await?;

                Ok::<OrderEntity, AppError>(updated_order)
            })
        })
        .await?;

    info!("Order {} assigned to delivery staff {}", id, staff_id);

    Ok(StdResponse {
        data: Some(updated_order),
        message: Some("Delivery staff assigned successfully"),
    })
}
