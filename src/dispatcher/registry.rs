//! Event name to handler routing table.

use std::collections::HashMap;
use std::sync::Arc;

use crate::handlers::{CreditHistoryHandler, ProjectionSyncHandler, SyncAction, SyncHandler};
use crate::ledger::tx;
use crate::models::{Novel, UserCredit};
use crate::storage::ProjectionStore;

/// Maps event names to the handler that applies them.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn SyncHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers for every event the ledger emits.
    pub fn standard(store: &ProjectionStore) -> Self {
        let mut registry = Self::new();

        let novel = |action| -> Arc<dyn SyncHandler> {
            Arc::new(ProjectionSyncHandler::<Novel>::new("novel", action, store.clone()))
        };
        let credit = |action| -> Arc<dyn SyncHandler> {
            Arc::new(ProjectionSyncHandler::<UserCredit>::new(
                "user-credit",
                action,
                store.clone(),
            ))
        };

        registry.register(tx::CREATE_NOVEL, novel(SyncAction::Create));
        registry.register(tx::UPDATE_NOVEL, novel(SyncAction::Update));
        registry.register(tx::DELETE_NOVEL, novel(SyncAction::Delete));
        registry.register(tx::CREATE_USER_CREDIT, credit(SyncAction::Create));
        registry.register(tx::UPDATE_USER_CREDIT, credit(SyncAction::Update));
        registry.register(tx::DELETE_USER_CREDIT, credit(SyncAction::Delete));
        // Token consumption carries the full post-spend credit record.
        registry.register(tx::CONSUME_USER_TOKEN, credit(SyncAction::Update));
        registry.register(
            tx::CREATE_CREDIT_HISTORY,
            Arc::new(CreditHistoryHandler::new(store.clone())),
        );

        registry
    }

    /// Route `event_name` to `handler`, replacing any previous route.
    pub fn register(&mut self, event_name: impl Into<String>, handler: Arc<dyn SyncHandler>) {
        self.handlers.insert(event_name.into(), handler);
    }

    pub fn get(&self, event_name: &str) -> Option<&Arc<dyn SyncHandler>> {
        self.handlers.get(event_name)
    }

    /// Registered event names, sorted.
    pub fn event_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
