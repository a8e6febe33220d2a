use serde::{Deserialize, Serialize};

/// Paging parameters of the refund listing route.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RefundListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}
