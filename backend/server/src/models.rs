//! # Todo Records
//!
//! The single entity this backend manages.
//!
//! ## Schema
//! - `_id`: ObjectId, assigned on creation, never changes
//! - `title`: trimmed, never empty
//! - `description`: trimmed, defaults to an empty string
//! - `createdAt`/`updatedAt`: set by the store on insert and update
//!
//! Flat collection, no references between records.
use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Serialize, Serializer};

use crate::{error::AppError, utils::normalize};

pub const TODO_COLLECTION: &str = "todos";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TodoId(ObjectId);

impl TodoId {
    pub fn generate() -> Self {
        Self(ObjectId::new())
    }

    pub fn object_id(&self) -> ObjectId {
        self.0
    }
}

impl From<ObjectId> for TodoId {
    fn from(id: ObjectId) -> Self {
        Self(id)
    }
}

impl FromStr for TodoId {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        ObjectId::parse_str(raw)
            .map(Self)
            .map_err(|_| AppError::InvalidId)
    }
}

impl fmt::Display for TodoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_hex())
    }
}

impl Serialize for TodoId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    #[serde(rename = "_id")]
    pub id: TodoId,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated title and description, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoFields {
    pub title: String,
    pub description: String,
}

impl TodoFields {
    pub fn new(title: Option<&str>, description: Option<&str>) -> Result<Self, AppError> {
        let title = normalize(title);

        if title.is_empty() {
            return Err(AppError::Validation("title required"));
        }

        Ok(Self {
            title,
            description: normalize(description),
        })
    }
}
