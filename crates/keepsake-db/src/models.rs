/// Database row types — these map directly to SQLite rows.
/// Distinct from the keepsake-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct MemoryRow {
    pub id: i64,
    pub title: String,
    pub note: Option<String>,
    pub owner_id: i64,
    pub created_at: String,
}

pub struct MemoryImageRow {
    pub id: i64,
    pub memory_id: i64,
    pub url: String,
}
