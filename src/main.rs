use std::sync::Arc;

use anyhow::Result;
use tiffin_orderservice::{
    app_state::AppState,
    bootstrap::{self, serve},
    config, db,
    payment::MockPaymentGateway,
    routes,
};

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_tracing();
    bootstrap::init_env();

    let config = config::load()?;

    tracing::info!("Running migrations...");
    let migrations_count = db::run_migrations_blocking(db::MIGRATIONS, &config.database.url).await?;
    tracing::info!("Run {} new migrations successfully", migrations_count);

    let state = AppState {
        db_pool: db::create_pool(&config.database.url).await?,
        jwt_secret: config.auth.jwt_secret.as_str().into(),
        payments: Arc::new(MockPaymentGateway::new(config.payment.delay)),
    };

    let (app, _openapi) = routes::app(state);

    tracing::info!("Bootstrapping...");
    serve("OrderService", app, config.server.port).await
}
