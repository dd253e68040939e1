//! Custom domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A custom domain attached to a website
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: String,

    /// Fully qualified domain name
    pub name: String,

    pub website_id: String,

    pub verified: bool,

    #[serde(default)]
    pub verified_at: Option<DateTime<Utc>>,
}
