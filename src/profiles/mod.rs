pub mod handlers;
pub mod model;
pub mod services;

pub use handlers::routes as router;
