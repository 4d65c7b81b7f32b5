//! Inventory API: transport-agnostic façade, request/response mapping and admin tooling.

pub mod app;

pub use app::InventoryApp;
pub use app::dto;
pub use app::errors::ApiError;
pub use app::queries::InventoryQueryApi;
