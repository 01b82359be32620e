use anyhow::Context;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    models::MenuItemEntity,
    schema::{menu_items, vendors},
    snapshot::hash_item_snapshot,
};

/// Public menu routes.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/api/vendors",
        OpenApiRouter::new().routes(utoipa_axum::routes!(get_menu)),
    )
}

/// A menu item with the snapshot hash clients must echo back when ordering it.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MenuItemView {
    #[serde(flatten)]
    pub item: MenuItemEntity,
    pub version_hash: String,
}

impl From<MenuItemEntity> for MenuItemView {
    fn from(item: MenuItemEntity) -> Self {
        Self {
            version_hash: hash_item_snapshot(&item),
            item,
        }
    }
}

/// Fetch a vendor's menu with a `versionHash` per item.
#[utoipa::path(
    get,
    path = "/{vendor_id}/menu",
    tags = ["Menu"],
    params(
        ("vendor_id" = Uuid, Path, description = "Vendor whose menu to fetch")
    ),
    responses(
        (status = 200, description = "Get menu successfully", body = StdResponse<Vec<MenuItemView>, String>),
        (status = 404, description = "Vendor not found")
    )
)]
async fn get_menu(
    Path(vendor_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let _vendor: Uuid = vendors::table
        .find(vendor_id)
        .select(vendors::id)
        .first(conn)
        .await?;

    let items: Vec<MenuItemEntity> = menu_items::table
        .filter(menu_items::vendor_id.eq(vendor_id))
        .order_by((menu_items::category.asc(), menu_items::name.asc()))
        .select(MenuItemEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get menu items")?;

    Ok(StdResponse {
        data: Some(
            items
                .into_iter()
                .map(MenuItemView::from)
                .collect::<Vec<_>>(),
        ),
        message: Some("Get menu successfully"),
    })
}
