use axum::Router;
use utoipa::openapi::{InfoBuilder, OpenApi};
use utoipa_axum::router::OpenApiRouter;

use crate::{app_state::AppState, swagger};

pub mod delivery;
pub mod menu;
pub mod orders;

pub fn routes_with_openapi(state: &AppState) -> OpenApiRouter<AppState> {
    menu::routes_with_openapi()
        .merge(orders::routes_with_openapi(state.clone()))
        .merge(delivery::routes_with_openapi(state.clone()))
}

/// Builds the complete application: API routes plus Swagger UI.
pub fn app(state: AppState) -> (Router, OpenApi) {
    let (router, mut openapi) = routes_with_openapi(&state).split_for_parts();
    openapi.info = InfoBuilder::new()
        .title("Tiffin OrderService API")
        .version("1.0.0")
        .build();

    let router = router
        .merge(swagger::create_swagger_ui(openapi.clone()))
        .with_state(state);

    (router, openapi)
}
