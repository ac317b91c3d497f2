//! # Todo Repository
//!
//! Translates CRUD intents into store calls. The only business rules here are
//! field trimming and the checks that must run before storage is touched:
//!
//! 1. Malformed ids fail with `InvalidId`
//! 2. Blank titles fail with `Validation`
//! 3. Missing records fail with `NotFound`
//!
//! Ordering, id generation and durability belong to the store.
//!
//! ## Concurrency
//! Every operation is one atomic store call. Concurrent updates of the same
//! record are last-write-wins, there is no version check.
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    error::AppError,
    models::{Todo, TodoFields, TodoId},
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait TodoStore: Send + Sync {
    /// All records, newest first.
    async fn list(&self) -> Result<Vec<Todo>, StoreError>;

    async fn insert(&self, fields: TodoFields) -> Result<Todo, StoreError>;

    /// `None` when no record has this id.
    async fn update(&self, id: TodoId, fields: TodoFields) -> Result<Option<Todo>, StoreError>;

    /// Returns the removed record, `None` when no record has this id.
    async fn delete(&self, id: TodoId) -> Result<Option<Todo>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn close(&self) {}
}

/// Produces a connected store. Invoked by the connection manager on every attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn TodoStore>, StoreError>;
}

pub struct TodoRepository {
    store: Arc<dyn TodoStore>,
}

impl TodoRepository {
    pub fn new(store: Arc<dyn TodoStore>) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> Result<Vec<Todo>, AppError> {
        Ok(self.store.list().await?)
    }

    pub async fn create(
        &self,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<Todo, AppError> {
        let fields = TodoFields::new(title, description)?;

        Ok(self.store.insert(fields).await?)
    }

    /// Replaces title and description wholesale.
    pub async fn update(
        &self,
        id: &str,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<Todo, AppError> {
        let id: TodoId = id.parse()?;
        let fields = TodoFields::new(title, description)?;

        self.store
            .update(id, fields)
            .await?
            .ok_or(AppError::NotFound)
    }

    pub async fn delete(&self, id: &str) -> Result<Todo, AppError> {
        let id: TodoId = id.parse()?;

        self.store.delete(id).await?.ok_or(AppError::NotFound)
    }
}
