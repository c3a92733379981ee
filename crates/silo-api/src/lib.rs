//! HTTP dispatch layer for Silo.
//!
//! Maps `GET`/`PUT` on `/cas/{key}` and `/ac/{key}` onto the cache
//! contract: 200 with a streaming body on hit, 404 on miss, 500 on backend
//! error, 405 for other methods.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
