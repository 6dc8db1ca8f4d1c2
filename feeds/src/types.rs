use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type FeedId = String;

/// A registered feed. The feed id (its endpoint URL) is the storage key and
/// is kept outside of this struct.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    /// Opaque payload sent once right after connecting, usually a JSON
    /// subscription or authentication request. Empty means nothing is sent.
    pub auth: String,
    pub group_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    /// Index of the replica that owns this feed's handler.
    pub replica: u32,
}

impl Feed {
    pub fn initial_request(&self) -> Option<&str> {
        let trimmed = self.auth.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    pub group_id: String,
    /// When set, only feeds owned by both `group_id` and `user_id` match.
    pub user_id: String,
    /// Regular expression matched against the feed id.
    pub pattern: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Asc,
    Desc,
}
