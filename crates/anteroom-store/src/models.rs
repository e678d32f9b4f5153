//! Raw row types. Timestamps stay as their stored RFC 3339 text here;
//! parsing into domain types happens in the backend layer.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub role: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct RequestRow {
    pub user_id: String,
    pub status: String,
    pub rejection_reason: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub attachment_url: Option<String>,
    pub created_at: String,
}
