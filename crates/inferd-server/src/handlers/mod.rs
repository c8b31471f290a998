//! Request handlers for the inference API

pub mod generate;
pub mod hardware;
pub mod health;
pub mod index;

pub use generate::generate_router;
pub use hardware::hardware_router;
pub use health::health_router;
pub use index::index_router;
