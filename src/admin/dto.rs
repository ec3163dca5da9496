use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Raw body; both fields are checked by hand so that any bad shape is a 400.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCreditsRequest {
    #[serde(default)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub credits: Option<Value>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub credits: i32,
    pub is_admin: bool,
    pub total_generated: i64,
}

#[derive(Debug, Serialize)]
pub struct AdminUsersResponse {
    pub users: Vec<AdminUserRow>,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}
