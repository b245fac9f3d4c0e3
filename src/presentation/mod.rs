// Presentation layer - HTTP rendering boundary
pub mod app_state;
pub mod handlers;
