//! Records mirrored from the system of record.

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostRecord {
    pub id: Uuid,
    pub title: String,
    pub body: String,
}

/// Engagement totals for one post. Always the durable values, possibly served
/// from the counter mirror.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PostStats {
    pub likes: i64,
    pub views: i64,
}

/// Counted engagement field; its name is part of the counter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterField {
    Likes,
    Views,
}

impl CounterField {
    pub fn as_str(self) -> &'static str {
        match self {
            CounterField::Likes => "likes",
            CounterField::Views => "views",
        }
    }
}
