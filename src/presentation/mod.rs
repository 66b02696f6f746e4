// Presentation layer - HTTP shim that triggers pipeline stages
pub mod app_state;
pub mod handlers;
