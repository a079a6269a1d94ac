pub mod auth;
pub mod health;

// Re-export common types
pub use auth::ErrorResponse;
