pub mod auth;
pub mod error;
pub mod extract;
pub mod files;
pub mod messages;
pub mod middleware;
pub mod ngos;
pub mod routes;
pub mod users;
pub mod volunteers;

pub use routes::router;
