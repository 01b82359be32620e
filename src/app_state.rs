use std::sync::Arc;

use diesel_async::{AsyncPgConnection, pooled_connection::bb8::Pool};

use crate::payment::PaymentGateway;

pub type DbPool = Pool<AsyncPgConnection>;

/// Shared handles cloned into every request.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub jwt_secret: Arc<str>,
    pub payments: Arc<dyn PaymentGateway>,
}
