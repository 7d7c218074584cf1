use serde::{Deserialize, Serialize};

pub mod alert_models;
pub mod monitor_models;

// JWT Claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (username)
    pub user_id: i32,
    pub exp: usize, // Expiration time (timestamp)
}

/// Struct to hold authenticated user details, to be passed as a request extension.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: i32,
    pub username: String,
}
