//! # In-Memory Store
//!
//! Process-local [`TodoStore`] with switches to simulate outages and faults.
//! Used by the test suites, which never need a running database.
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::{sync::Mutex, time::sleep};

use crate::{
    models::{Todo, TodoFields, TodoId},
    repository::{Connector, StoreError, TodoStore},
};

#[derive(Default)]
pub struct MemoryStore {
    todos: Mutex<Vec<Todo>>,
    unavailable: AtomicBool,
    faulty: AtomicBool,
    operations: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    /// Makes every CRUD call fail with [`StoreError::Backend`]; pings still succeed.
    pub fn set_faulty(&self, faulty: bool) {
        self.faulty.store(faulty, Ordering::SeqCst);
    }

    /// Number of CRUD calls that reached the store.
    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Vec<Todo> {
        self.todos.lock().await.clone()
    }

    fn begin(&self) -> Result<(), StoreError> {
        self.operations.fetch_add(1, Ordering::SeqCst);

        if !self.is_available() {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }

        if self.faulty.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("simulated storage fault".to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl TodoStore for MemoryStore {
    async fn list(&self) -> Result<Vec<Todo>, StoreError> {
        self.begin()?;

        let mut todos = self.todos.lock().await.clone();
        todos.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        Ok(todos)
    }

    async fn insert(&self, fields: TodoFields) -> Result<Todo, StoreError> {
        self.begin()?;

        let now = Utc::now();
        let todo = Todo {
            id: TodoId::generate(),
            title: fields.title,
            description: fields.description,
            created_at: now,
            updated_at: now,
        };

        self.todos.lock().await.push(todo.clone());

        Ok(todo)
    }

    async fn update(&self, id: TodoId, fields: TodoFields) -> Result<Option<Todo>, StoreError> {
        self.begin()?;

        let mut todos = self.todos.lock().await;
        let Some(todo) = todos.iter_mut().find(|todo| todo.id == id) else {
            return Ok(None);
        };

        todo.title = fields.title;
        todo.description = fields.description;
        todo.updated_at = Utc::now();

        Ok(Some(todo.clone()))
    }

    async fn delete(&self, id: TodoId) -> Result<Option<Todo>, StoreError> {
        self.begin()?;

        let mut todos = self.todos.lock().await;
        let removed = todos
            .iter()
            .position(|todo| todo.id == id)
            .map(|index| todos.remove(index));

        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        }
    }
}

/// Hands out one shared [`MemoryStore`], failing while it is offline.
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
    latency: Duration,
    stalled: bool,
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            latency: Duration::ZERO,
            stalled: false,
            failures_remaining: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        }
    }

    /// Fails the first `failures` attempts before connecting.
    pub fn failing(self, failures: u32) -> Self {
        self.failures_remaining.store(failures, Ordering::SeqCst);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Attempts never complete, the manager stays in `connecting`.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn TodoStore>, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.stalled {
            futures::future::pending::<()>().await;
        }

        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();

        if failing || !self.store.is_available() {
            return Err(StoreError::Unavailable(
                "connection refused by memory store".to_string(),
            ));
        }

        let store: Arc<dyn TodoStore> = self.store.clone();

        Ok(store)
    }
}
