pub mod bulk_move;
pub mod cleanup;
pub mod handlers;
pub mod ignore;
pub mod jobs;
pub mod middleware;
pub mod records;
pub mod routes;

pub use routes::create_router;
