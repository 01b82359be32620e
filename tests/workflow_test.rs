//! Drives the order workflow against a real PostgreSQL database.
//!
//! Set `TEST_DATABASE_URL` to run these; without it every test returns early.
//! Each test seeds its own vendor, customer and staff, so they share one database.

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header::AUTHORIZATION},
};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde_json::{Value, json};
use tiffin_orderservice::{
    app_state::{AppState, DbPool},
    auth::sign_token,
    db,
    models::MenuItemEntity,
    payment::MockPaymentGateway,
    routes,
    schema::{customers, delivery_staff, menu_items, orders, vendors},
    snapshot::hash_item_snapshot,
};
use tokio::sync::OnceCell;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "workflow-test-secret";

static MIGRATED: OnceCell<usize> = OnceCell::const_new();

struct Harness {
    app: Router,
    pool: DbPool,
}

async fn harness() -> Option<Harness> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return None;
    };

    MIGRATED
        .get_or_try_init(|| db::run_migrations_blocking(db::MIGRATIONS, &url))
        .await
        .unwrap();

    let pool = db::create_pool(&url).await.unwrap();
    let state = AppState {
        db_pool: pool.clone(),
        jwt_secret: SECRET.into(),
        payments: Arc::new(MockPaymentGateway::new(Duration::ZERO)),
    };

    Some(Harness {
        app: routes::app(state).0,
        pool,
    })
}

/// One vendor selling a 50-rupee item, with a customer and two active staff.
struct Shop {
    vendor: Uuid,
    customer: Uuid,
    rider_a: Uuid,
    rider_b: Uuid,
    item: MenuItemEntity,
}

async fn insert_staff(pool: &DbPool, vendor: Uuid, status: &str) -> Uuid {
    let conn = &mut pool.get().await.unwrap();
    let id = Uuid::new_v4();
    diesel::insert_into(delivery_staff::table)
        .values((
            delivery_staff::id.eq(id),
            delivery_staff::vendor_id.eq(vendor),
            delivery_staff::name.eq("Rider"),
            delivery_staff::status.eq(status),
        ))
        .execute(conn)
        .await
        .unwrap();
    id
}

async fn open_shop(pool: &DbPool) -> Shop {
    let vendor = Uuid::new_v4();
    let customer = Uuid::new_v4();
    {
        let conn = &mut pool.get().await.unwrap();
        diesel::insert_into(vendors::table)
            .values((
                vendors::id.eq(vendor),
                vendors::name.eq("Dosa Corner"),
                vendors::email.eq(format!("{vendor}@vendors.test")),
            ))
            .execute(conn)
            .await
            .unwrap();
        diesel::insert_into(customers::table)
            .values((
                customers::id.eq(customer),
                customers::name.eq("Asha"),
                customers::email.eq(format!("{customer}@customers.test")),
            ))
            .execute(conn)
            .await
            .unwrap();
    }

    let item = {
        let conn = &mut pool.get().await.unwrap();
        diesel::insert_into(menu_items::table)
            .values((
                menu_items::vendor_id.eq(vendor),
                menu_items::name.eq("Masala Dosa"),
                menu_items::price.eq(50.0),
                menu_items::is_veg.eq(true),
            ))
            .returning(MenuItemEntity::as_returning())
            .get_result(conn)
            .await
            .unwrap()
    };

    Shop {
        vendor,
        customer,
        rider_a: insert_staff(pool, vendor, "active").await,
        rider_b: insert_staff(pool, vendor, "active").await,
        item,
    }
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    caller: Uuid,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let token = sign_token(SECRET, caller, 3600);
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(AUTHORIZATION, format!("Bearer {token}"));
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn order_body(shop: &Shop, version_hash: &str) -> Value {
    json!({
        "vendorId": shop.vendor,
        "paymentMethod": "upi",
        "deliveryAddress": { "line1": "12 MG Road", "city": "Bengaluru" },
        "items": [{ "itemId": shop.item.id, "quantity": 2, "versionHash": version_hash }],
    })
}

async fn place_order(h: &Harness, shop: &Shop, version_hash: &str) -> (StatusCode, Value) {
    let body = order_body(shop, version_hash);
    call(&h.app, "POST", "/api/orders", shop.customer, Some(body)).await
}

async fn accept(h: &Harness, staff: Uuid, order: Uuid) -> (StatusCode, Value) {
    let uri = format!("/api/orders/delivery/accept/{order}");
    call(&h.app, "POST", &uri, staff, None).await
}

async fn assign(h: &Harness, shop: &Shop, order: Uuid, staff: Uuid) -> (StatusCode, Value) {
    let uri = format!("/api/orders/{order}/delivery-staff");
    let body = json!({ "deliveryStaffId": staff });
    call(&h.app, "PUT", &uri, shop.vendor, Some(body)).await
}

/// Places an order and moves it to `ready`, returning its id.
async fn ready_order(h: &Harness, shop: &Shop) -> Uuid {
    let hash = hash_item_snapshot(&shop.item);
    let (status, body) = place_order(h, shop, &hash).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id: Uuid = body["data"]["order"]["id"].as_str().unwrap().parse().unwrap();

    let (status, body) = call(
        &h.app,
        "PUT",
        &format!("/api/orders/{id}/status"),
        shop.vendor,
        Some(json!({ "status": "ready" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    id
}

async fn current_order(pool: &DbPool, staff: Uuid) -> Option<Uuid> {
    let conn = &mut pool.get().await.unwrap();
    delivery_staff::table
        .find(staff)
        .select(delivery_staff::current_order_id)
        .first(conn)
        .await
        .unwrap()
}

async fn assignee(pool: &DbPool, order: Uuid) -> Option<Uuid> {
    let conn = &mut pool.get().await.unwrap();
    orders::table
        .find(order)
        .select(orders::delivery_staff_id)
        .first(conn)
        .await
        .unwrap()
}

#[tokio::test]
async fn order_travels_from_cart_to_doorstep() {
    let Some(h) = harness().await else { return };
    let shop = open_shop(&h.pool).await;

    let hash = hash_item_snapshot(&shop.item);
    let (status, body) = place_order(&h, &shop, &hash).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let order = &body["data"]["order"];
    assert_eq!(order["totalAmount"], 100.0);
    assert_eq!(order["status"], "pending");
    assert_eq!(order["paymentStatus"], "completed");
    assert_eq!(order["items"][0]["name"], "Masala Dosa");
    assert_eq!(body["data"]["paymentInfo"]["success"], true);
    let id: Uuid = order["id"].as_str().unwrap().parse().unwrap();

    let (status, body) = call(
        &h.app,
        "PUT",
        &format!("/api/orders/{id}/status"),
        shop.vendor,
        Some(json!({ "status": "ready" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "ready");

    let (status, body) = call(&h.app, "GET", "/api/orders/delivery", shop.rider_a, None).await;
    assert_eq!(status, StatusCode::OK);
    let available = body["data"]["availableOrders"].as_array().unwrap();
    assert!(available.iter().any(|o| o["id"] == id.to_string()));

    let (status, body) = accept(&h, shop.rider_a, id).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "out_for_delivery");
    assert_eq!(body["data"]["deliveryStaffId"], shop.rider_a.to_string());
    assert_eq!(current_order(&h.pool, shop.rider_a).await, Some(id));

    let (status, body) = call(
        &h.app,
        "PUT",
        &format!("/api/orders/delivery/status/{id}"),
        shop.rider_a,
        Some(json!({ "status": "delivered" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "delivered");
    assert_eq!(current_order(&h.pool, shop.rider_a).await, None);
}

#[tokio::test]
async fn stale_cart_places_no_order() {
    let Some(h) = harness().await else { return };
    let shop = open_shop(&h.pool).await;
    let hash = hash_item_snapshot(&shop.item);

    {
        let conn = &mut h.pool.get().await.unwrap();
        diesel::update(menu_items::table.find(shop.item.id))
            .set(menu_items::price.eq(60.0))
            .execute(conn)
            .await
            .unwrap();
    }

    let (status, body) = place_order(&h, &shop, &hash).await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert!(body["message"].as_str().unwrap().starts_with("Menu has changed"));

    let conn = &mut h.pool.get().await.unwrap();
    let placed: i64 = orders::table
        .filter(orders::customer_id.eq(shop.customer))
        .count()
        .get_result(conn)
        .await
        .unwrap();
    assert_eq!(placed, 0);
}

#[tokio::test]
async fn malformed_cart_line_is_a_bad_request() {
    let Some(h) = harness().await else { return };
    let shop = open_shop(&h.pool).await;

    let body = json!({
        "vendorId": shop.vendor,
        "paymentMethod": "cash",
        "deliveryAddress": { "line1": "12 MG Road" },
        "items": [{ "itemId": "A", "quantity": 2 }],
    });
    let (status, body) = call(&h.app, "POST", "/api/orders", shop.customer, Some(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["data"], Value::Null);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn racing_staff_accept_an_order_exactly_once() {
    let Some(h) = harness().await else { return };
    let shop = open_shop(&h.pool).await;
    let id = ready_order(&h, &shop).await;

    let ((status_a, _), (status_b, _)) = tokio::join!(
        accept(&h, shop.rider_a, id),
        accept(&h, shop.rider_b, id),
    );

    let mut statuses = [status_a.as_u16(), status_b.as_u16()];
    statuses.sort();
    assert_eq!(statuses, [200, 400]);

    let winner = if status_a == StatusCode::OK { shop.rider_a } else { shop.rider_b };
    let loser = if winner == shop.rider_a { shop.rider_b } else { shop.rider_a };
    assert_eq!(assignee(&h.pool, id).await, Some(winner));
    assert_eq!(current_order(&h.pool, winner).await, Some(id));
    assert_eq!(current_order(&h.pool, loser).await, None);
}

#[tokio::test]
async fn reassignment_moves_the_slot_and_the_assignee_delivers() {
    let Some(h) = harness().await else { return };
    let shop = open_shop(&h.pool).await;
    let id = ready_order(&h, &shop).await;

    let (status, _) = assign(&h, &shop, id, shop.rider_a).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(current_order(&h.pool, shop.rider_a).await, Some(id));

    let (status, _) = assign(&h, &shop, id, shop.rider_b).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(current_order(&h.pool, shop.rider_a).await, None);
    assert_eq!(current_order(&h.pool, shop.rider_b).await, Some(id));

    let (status, _) = accept(&h, shop.rider_a, id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = accept(&h, shop.rider_b, id).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "out_for_delivery");

    let (status, body) = call(
        &h.app,
        "PUT",
        &format!("/api/orders/delivery/status/{id}"),
        shop.rider_b,
        Some(json!({ "status": "delivered" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(current_order(&h.pool, shop.rider_b).await, None);
}

#[tokio::test]
async fn vendor_finishing_an_assigned_order_frees_the_staff() {
    let Some(h) = harness().await else { return };
    let shop = open_shop(&h.pool).await;
    let id = ready_order(&h, &shop).await;

    let (status, _) = assign(&h, &shop, id, shop.rider_a).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &h.app,
        "PUT",
        &format!("/api/orders/{id}/status"),
        shop.vendor,
        Some(json!({ "status": "delivered" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(current_order(&h.pool, shop.rider_a).await, None);

    let (status, _) = assign(&h, &shop, id, shop.rider_b).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn concurrent_assign_and_accept_keep_the_mirror_consistent() {
    let Some(h) = harness().await else { return };
    let shop = open_shop(&h.pool).await;
    let id = ready_order(&h, &shop).await;

    let ((assigned, _), (accepted, _)) = tokio::join!(
        assign(&h, &shop, id, shop.rider_a),
        accept(&h, shop.rider_b, id),
    );
    assert!(assigned == StatusCode::OK || assigned == StatusCode::CONFLICT, "{assigned}");
    assert!(accepted == StatusCode::OK || accepted == StatusCode::BAD_REQUEST, "{accepted}");

    let owner = assignee(&h.pool, id).await.unwrap();
    for rider in [shop.rider_a, shop.rider_b] {
        let expected = (rider == owner).then_some(id);
        assert_eq!(current_order(&h.pool, rider).await, expected, "{rider}");
    }
}

#[tokio::test]
async fn inactive_staff_take_no_deliveries() {
    let Some(h) = harness().await else { return };
    let shop = open_shop(&h.pool).await;
    let trainee = insert_staff(&h.pool, shop.vendor, "pending").await;
    let id = ready_order(&h, &shop).await;

    let (status, _) = accept(&h, trainee, id).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = assign(&h, &shop, id, trainee).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(assignee(&h.pool, id).await, None);
}
