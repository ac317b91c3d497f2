//! # MongoDB
//!
//! Document database holding the `todos` collection.
//!
//! ## Requirements
//!
//! - Durable storage of todo records
//! - Id generation (ObjectId)
//! - Newest-first listing by `createdAt`
//!
//! ## Implementation
//!
//! - One driver [`Client`] per successful connection, shared by every request
//! - The driver owns a bounded pool (`DB_MAX_POOL_SIZE`/`DB_MIN_POOL_SIZE`)
//! - Each CRUD intent is a single atomic call: `find`, `insert_one`,
//!   `find_one_and_update`, `find_one_and_delete`
//! - Listing sorts on `createdAt` then `_id`, both descending, so records
//!   created in the same millisecond still come back in a stable order
//! - A `ping` command doubles as connection check and heartbeat
//!
//! ## Errors
//!
//! Server selection, I/O and pool-cleared errors mean the database is out of
//! reach and map to [`StoreError::Unavailable`]. Everything else is a
//! [`StoreError::Backend`].
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime as ChronoDateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection, Database,
    bson::{DateTime, doc, oid::ObjectId},
    error::{Error as MongoError, ErrorKind},
    options::{ClientOptions, ReturnDocument},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::DatabaseConfig,
    models::{TODO_COLLECTION, Todo, TodoFields, TodoId},
    repository::{Connector, StoreError, TodoStore},
};

pub const APP_NAME: &str = "todo-backend";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TodoDocument {
    #[serde(rename = "_id")]
    id: ObjectId,
    title: String,
    #[serde(default)]
    description: String,
    created_at: DateTime,
    updated_at: DateTime,
}

impl TryFrom<TodoDocument> for Todo {
    type Error = StoreError;

    fn try_from(document: TodoDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: TodoId::from(document.id),
            created_at: to_chrono(document.id, "createdAt", document.created_at)?,
            updated_at: to_chrono(document.id, "updatedAt", document.updated_at)?,
            title: document.title,
            description: document.description,
        })
    }
}

fn to_chrono(
    id: ObjectId,
    field: &str,
    timestamp: DateTime,
) -> Result<ChronoDateTime<Utc>, StoreError> {
    ChronoDateTime::from_timestamp_millis(timestamp.timestamp_millis()).ok_or_else(|| {
        StoreError::Backend(format!("todo {id} has an out-of-range {field}: {timestamp}"))
    })
}

fn classify(error: MongoError) -> StoreError {
    match *error.kind {
        ErrorKind::ServerSelection { .. }
        | ErrorKind::Io(_)
        | ErrorKind::ConnectionPoolCleared { .. } => StoreError::Unavailable(error.to_string()),
        _ => StoreError::Backend(error.to_string()),
    }
}

pub struct MongoConnector {
    config: DatabaseConfig,
}

impl MongoConnector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(&self) -> Result<Arc<dyn TodoStore>, StoreError> {
        let connection_string = self.config.connection_string();

        let mut options = ClientOptions::parse(&connection_string)
            .await
            .map_err(classify)?;

        options.app_name = Some(APP_NAME.to_string());
        options.max_pool_size = Some(self.config.max_pool_size);
        options.min_pool_size = Some(self.config.min_pool_size);
        options.server_selection_timeout = Some(self.config.server_selection_timeout);
        options.connect_timeout = Some(self.config.server_selection_timeout);
        options.max_idle_time = Some(self.config.idle_timeout);

        let client = Client::with_options(options).map_err(classify)?;
        let store = MongoStore::new(client, &self.config.database);

        store.ping().await?;

        let store: Arc<dyn TodoStore> = Arc::new(store);

        Ok(store)
    }
}

pub struct MongoStore {
    client: Client,
    database: Database,
    todos: Collection<TodoDocument>,
}

impl MongoStore {
    pub fn new(client: Client, database_name: &str) -> Self {
        let database = client.database(database_name);
        let todos = database.collection(TODO_COLLECTION);

        Self {
            client,
            database,
            todos,
        }
    }
}

#[async_trait]
impl TodoStore for MongoStore {
    async fn list(&self) -> Result<Vec<Todo>, StoreError> {
        let cursor = self
            .todos
            .find(doc! {})
            .sort(doc! { "createdAt": -1, "_id": -1 })
            .await
            .map_err(classify)?;

        let documents: Vec<TodoDocument> = cursor.try_collect().await.map_err(classify)?;

        documents.into_iter().map(Todo::try_from).collect()
    }

    async fn insert(&self, fields: TodoFields) -> Result<Todo, StoreError> {
        let now = DateTime::now();
        let document = TodoDocument {
            id: ObjectId::new(),
            title: fields.title,
            description: fields.description,
            created_at: now,
            updated_at: now,
        };

        self.todos.insert_one(&document).await.map_err(classify)?;
        debug!("Inserted todo {}", document.id);

        document.try_into()
    }

    async fn update(&self, id: TodoId, fields: TodoFields) -> Result<Option<Todo>, StoreError> {
        let updated = self
            .todos
            .find_one_and_update(
                doc! { "_id": id.object_id() },
                doc! {
                    "$set": {
                        "title": fields.title,
                        "description": fields.description,
                        "updatedAt": DateTime::now(),
                    }
                },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(classify)?;

        updated.map(Todo::try_from).transpose()
    }

    async fn delete(&self, id: TodoId) -> Result<Option<Todo>, StoreError> {
        let deleted = self
            .todos
            .find_one_and_delete(doc! { "_id": id.object_id() })
            .await
            .map_err(classify)?;

        deleted.map(Todo::try_from).transpose()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(classify)?;

        Ok(())
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}
