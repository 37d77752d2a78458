use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::OrmResult;
use crate::metadata::{EntityMetadata, EntityObject, MetadataRegistry};
use crate::value::Value;

/// Entity lifecycle points at which listeners and subscribers run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    BeforeInsert,
    AfterInsert,
    BeforeUpdate,
    AfterUpdate,
    BeforeRemove,
    AfterRemove,
    BeforeSoftRemove,
    AfterSoftRemove,
    BeforeRecover,
    AfterRecover,
    AfterLoad,
}

/// A statement about to run, or one that just ran.
#[derive(Debug, Clone)]
pub struct QueryEvent {
    pub runner_id: u64,
    pub sql: String,
    pub parameters: Vec<Value>,
    /// Set on after-query events.
    pub duration: Option<Duration>,
    /// Error message of a failed statement (after-query only).
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionEvent {
    pub runner_id: u64,
    /// Depth of the level being started, committed or rolled back (1 = outermost).
    pub depth: usize,
}

/// One entity passing through a write or a load.
#[derive(Debug, Clone)]
pub struct EntityEvent {
    pub runner_id: u64,
    pub metadata: Arc<EntityMetadata>,
    /// Values being written, the loaded entity, or the criteria of a remove.
    pub entity: EntityObject,
    /// Property paths changed by an update.
    pub updated_columns: Vec<String>,
}

impl EntityEvent {
    pub fn new(runner_id: u64, metadata: Arc<EntityMetadata>, entity: EntityObject) -> Self {
        Self {
            runner_id,
            metadata,
            entity,
            updated_columns: Vec::new(),
        }
    }
}

/// Observer of queries, transactions and entity lifecycle events.
///
/// Every method defaults to a no-op. Subscribers run one after another in
/// registration order; the first error stops the chain and fails the operation.
#[async_trait]
pub trait EntitySubscriber: Send + Sync {
    /// Entity name this subscriber is limited to (subtypes included). `None` receives everything.
    fn listen_to(&self) -> Option<&str> {
        None
    }

    async fn before_query(&self, _event: &QueryEvent) -> OrmResult<()> {
        Ok(())
    }
    async fn after_query(&self, _event: &QueryEvent) -> OrmResult<()> {
        Ok(())
    }

    async fn before_transaction_start(&self, _event: &TransactionEvent) -> OrmResult<()> {
        Ok(())
    }
    async fn after_transaction_start(&self, _event: &TransactionEvent) -> OrmResult<()> {
        Ok(())
    }
    async fn before_transaction_commit(&self, _event: &TransactionEvent) -> OrmResult<()> {
        Ok(())
    }
    async fn after_transaction_commit(&self, _event: &TransactionEvent) -> OrmResult<()> {
        Ok(())
    }
    async fn before_transaction_rollback(&self, _event: &TransactionEvent) -> OrmResult<()> {
        Ok(())
    }
    async fn after_transaction_rollback(&self, _event: &TransactionEvent) -> OrmResult<()> {
        Ok(())
    }

    async fn before_insert(&self, _event: &mut EntityEvent) -> OrmResult<()> {
        Ok(())
    }
    async fn after_insert(&self, _event: &mut EntityEvent) -> OrmResult<()> {
        Ok(())
    }
    async fn before_update(&self, _event: &mut EntityEvent) -> OrmResult<()> {
        Ok(())
    }
    async fn after_update(&self, _event: &mut EntityEvent) -> OrmResult<()> {
        Ok(())
    }
    async fn before_remove(&self, _event: &mut EntityEvent) -> OrmResult<()> {
        Ok(())
    }
    async fn after_remove(&self, _event: &mut EntityEvent) -> OrmResult<()> {
        Ok(())
    }
    async fn before_soft_remove(&self, _event: &mut EntityEvent) -> OrmResult<()> {
        Ok(())
    }
    async fn after_soft_remove(&self, _event: &mut EntityEvent) -> OrmResult<()> {
        Ok(())
    }
    async fn before_recover(&self, _event: &mut EntityEvent) -> OrmResult<()> {
        Ok(())
    }
    async fn after_recover(&self, _event: &mut EntityEvent) -> OrmResult<()> {
        Ok(())
    }
    async fn after_load(&self, _event: &mut EntityEvent) -> OrmResult<()> {
        Ok(())
    }
}

/// Synchronous per-entity callback, the programmatic form of a lifecycle method.
pub type EntityListener = Arc<dyn Fn(&mut EntityObject) -> OrmResult<()> + Send + Sync>;

/// Dispatches lifecycle events to entity listeners and subscribers.
///
/// Listeners registered for an entity also fire for its inheritance children.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<MetadataRegistry>,
    subscribers: Vec<Arc<dyn EntitySubscriber>>,
    /// (entity, kind, callback) in registration order
    listeners: Vec<(String, ListenerKind, EntityListener)>,
}

impl Broadcaster {
    pub fn new(registry: Arc<MetadataRegistry>) -> Self {
        Self {
            registry,
            subscribers: Vec::new(),
            listeners: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn EntitySubscriber>) {
        self.subscribers.push(subscriber);
    }

    pub fn listen<F>(&mut self, entity: impl Into<String>, kind: ListenerKind, listener: F)
    where
        F: Fn(&mut EntityObject) -> OrmResult<()> + Send + Sync + 'static,
    {
        self.listeners.push((entity.into(), kind, Arc::new(listener)));
    }

    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    pub async fn before_query(&self, event: &QueryEvent) -> OrmResult<()> {
        for subscriber in &self.subscribers {
            subscriber.before_query(event).await?;
        }
        Ok(())
    }

    pub async fn after_query(&self, event: &QueryEvent) -> OrmResult<()> {
        for subscriber in &self.subscribers {
            subscriber.after_query(event).await?;
        }
        Ok(())
    }

    pub async fn before_transaction_start(&self, event: &TransactionEvent) -> OrmResult<()> {
        for subscriber in &self.subscribers {
            subscriber.before_transaction_start(event).await?;
        }
        Ok(())
    }

    pub async fn after_transaction_start(&self, event: &TransactionEvent) -> OrmResult<()> {
        for subscriber in &self.subscribers {
            subscriber.after_transaction_start(event).await?;
        }
        Ok(())
    }

    pub async fn before_transaction_commit(&self, event: &TransactionEvent) -> OrmResult<()> {
        for subscriber in &self.subscribers {
            subscriber.before_transaction_commit(event).await?;
        }
        Ok(())
    }

    pub async fn after_transaction_commit(&self, event: &TransactionEvent) -> OrmResult<()> {
        for subscriber in &self.subscribers {
            subscriber.after_transaction_commit(event).await?;
        }
        Ok(())
    }

    pub async fn before_transaction_rollback(&self, event: &TransactionEvent) -> OrmResult<()> {
        for subscriber in &self.subscribers {
            subscriber.before_transaction_rollback(event).await?;
        }
        Ok(())
    }

    pub async fn after_transaction_rollback(&self, event: &TransactionEvent) -> OrmResult<()> {
        for subscriber in &self.subscribers {
            subscriber.after_transaction_rollback(event).await?;
        }
        Ok(())
    }

    /// Run entity listeners, then subscribers, for one entity event.
    pub async fn broadcast(&self, kind: ListenerKind, event: &mut EntityEvent) -> OrmResult<()> {
        let entity_name = event.metadata.name.clone();

        for (owner, listener_kind, listener) in &self.listeners {
            if *listener_kind == kind && self.registry.is_subtype_of(&entity_name, owner) {
                listener(&mut event.entity)?;
            }
        }

        for subscriber in &self.subscribers {
            if let Some(target) = subscriber.listen_to() {
                if !self.registry.is_subtype_of(&entity_name, target) {
                    continue;
                }
            }
            match kind {
                ListenerKind::BeforeInsert => subscriber.before_insert(event).await?,
                ListenerKind::AfterInsert => subscriber.after_insert(event).await?,
                ListenerKind::BeforeUpdate => subscriber.before_update(event).await?,
                ListenerKind::AfterUpdate => subscriber.after_update(event).await?,
                ListenerKind::BeforeRemove => subscriber.before_remove(event).await?,
                ListenerKind::AfterRemove => subscriber.after_remove(event).await?,
                ListenerKind::BeforeSoftRemove => subscriber.before_soft_remove(event).await?,
                ListenerKind::AfterSoftRemove => subscriber.after_soft_remove(event).await?,
                ListenerKind::BeforeRecover => subscriber.before_recover(event).await?,
                ListenerKind::AfterRecover => subscriber.after_recover(event).await?,
                ListenerKind::AfterLoad => subscriber.after_load(event).await?,
            }
        }
        Ok(())
    }

    /// Broadcast one event per entity, writing listener changes back in place.
    pub async fn broadcast_all(
        &self,
        kind: ListenerKind,
        runner_id: u64,
        metadata: &Arc<EntityMetadata>,
        entities: &mut [EntityObject],
    ) -> OrmResult<()> {
        for entity in entities.iter_mut() {
            let mut event = EntityEvent::new(runner_id, metadata.clone(), std::mem::take(entity));
            let result = self.broadcast(kind, &mut event).await;
            *entity = event.entity;
            result?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("subscribers", &self.subscribers.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
