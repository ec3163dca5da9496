use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsResponse {
    pub credits: i32,
    pub total_generated: i64,
    pub is_admin: bool,
}
