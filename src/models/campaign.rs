use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CampaignStats {
    pub id: i64,
    pub name: String,
    pub created_at: i64,
    pub total: i64,
    pub sent: i64,
    pub opened: i64,
    pub replied: i64,
}

#[derive(Debug, Clone, Default, Serialize, sqlx::FromRow)]
pub struct OverallStats {
    pub total: i64,
    pub sent: i64,
    pub opened: i64,
    pub replied: i64,
}
