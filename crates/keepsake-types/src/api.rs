use serde::{Deserialize, Serialize};

// -- JWT Claims --

/// JWT claims shared by the auth endpoints (token issuance) and the REST
/// middleware (validation). Canonical definition lives here in keepsake-types
/// to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Numeric user id of the authenticated caller.
    pub sub: i64,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: i64,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: i64,
    pub username: String,
    pub token: String,
}

// -- Memories --

#[derive(Debug, Serialize, Deserialize)]
pub struct MemoryImageResponse {
    pub id: i64,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MemoryResponse {
    pub id: i64,
    pub title: String,
    pub note: Option<String>,
    pub images: Vec<MemoryImageResponse>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub message: String,
}
