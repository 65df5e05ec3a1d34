use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A movie as handed to us by the upstream catalog. Only `id` and `title` are
/// interpreted, everything else is carried along untouched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Movie {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub movie: Movie,
    pub viewed_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub favorite_genres: Vec<u64>,
    pub preferred_languages: Vec<String>,
    pub min_rating: f64,
    pub adult_content: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            favorite_genres: Vec::new(),
            preferred_languages: vec!["en".to_owned()],
            min_rating: 6.0,
            adult_content: false,
        }
    }
}

/// Whatever the reviewer submitted. `id` and `createdAt` are assigned by the
/// store and dropped from the draft if present.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ReviewDraft(pub Map<String, Value>);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Review {
    pub fn author(&self) -> Option<&str> {
        self.fields.get("author").and_then(Value::as_str)
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Write time, milliseconds since the epoch.
    pub timestamp: i64,
    /// Milliseconds.
    pub ttl: i64,
}

/// What a user gets to see about themselves and others. Never carries the
/// password hash.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub watchlist_count: usize,
    pub history_count: usize,
    pub reviews_count: usize,
}
