//! Lead resolution and message append.
//!
//! Resolution for one contact is serialized in-process through [`ContactLocks`].
//! Deployments with several replicas rely on the store's uniqueness constraint
//! instead: a conflicting insert re-reads the active lead and adopts the winner.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::{
    error::{StoreError, WorkflowError},
    store::LeadStore,
    types::{LeadId, Message, MessageId, NewLead, NewMessage, Sender},
};

#[derive(Default)]
pub struct ContactLocks {
    inner: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

pub struct ContactGuard<'a> {
    locks: &'a ContactLocks,
    contact: String,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ContactLocks {
    pub async fn acquire(&self, contact: &str) -> ContactGuard<'_> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            // A waiter cancelled after the lock was handed to it leaves an entry
            // nobody references; sweep those here.
            map.retain(|key, lock| key == contact || Arc::strong_count(lock) > 1);
            map.entry(contact.to_string()).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        ContactGuard {
            locks: self,
            contact: contact.to_string(),
            lock,
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ContactGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locks.inner.lock().unwrap_or_else(|p| p.into_inner());
        // One reference lives in the map and one in this guard; anything more is a waiter.
        if Arc::strong_count(&self.lock) <= 2 {
            map.remove(&self.contact);
        }
    }
}

/// Result of recording one inbound client message.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub lead_id: LeadId,
    pub lead_created: bool,
    pub message: Message,
}

pub struct LeadService {
    store: Arc<dyn LeadStore>,
    partner_id: i64,
    timeout: Duration,
    locks: ContactLocks,
}

impl LeadService {
    pub fn new(store: Arc<dyn LeadStore>, partner_id: i64, timeout: Duration) -> Self {
        Self {
            store,
            partner_id,
            timeout,
            locks: ContactLocks::default(),
        }
    }

    pub fn pending_contacts(&self) -> usize {
        self.locks.len()
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }

    /// Returns the active lead for `contact`, creating one when none is open.
    /// Closed leads are never reused.
    pub async fn resolve_lead(&self, contact: &str) -> Result<LeadId, StoreError> {
        let contact = normalize_contact(contact)?;
        let _guard = self.locks.acquire(contact).await;
        self.resolve_unlocked(contact).await.map(|(id, _)| id)
    }

    pub async fn append_message(
        &self,
        lead_id: &LeadId,
        body: &str,
    ) -> Result<MessageId, StoreError> {
        self.insert_client_message(lead_id, body).await.map(|m| m.id)
    }

    /// Resolves the lead and appends the message while holding the contact's lock,
    /// so back-to-back messages from one contact land in arrival order.
    pub async fn record_inbound(
        &self,
        contact: &str,
        body: &str,
    ) -> Result<Recorded, WorkflowError> {
        let contact = normalize_contact(contact).map_err(WorkflowError::Resolve)?;
        let _guard = self.locks.acquire(contact).await;

        let (lead_id, lead_created) = self
            .resolve_unlocked(contact)
            .await
            .map_err(WorkflowError::Resolve)?;
        let message = self
            .insert_client_message(&lead_id, body)
            .await
            .map_err(WorkflowError::Append)?;

        Ok(Recorded {
            lead_id,
            lead_created,
            message,
        })
    }

    async fn resolve_unlocked(&self, contact: &str) -> Result<(LeadId, bool), StoreError> {
        if let Some(lead) = self.bounded(self.store.find_active_lead(contact)).await? {
            debug!(contact, lead_id = %lead.id, "active lead found");
            return Ok((lead.id, false));
        }

        match self.bounded(self.store.find_inactive_lead(contact)).await {
            Ok(Some(previous)) => {
                debug!(contact, previous_lead_id = %previous.id, "contact only has closed leads")
            }
            Ok(None) => {}
            Err(err) => debug!(contact, error = %err, "closed lead lookup failed"),
        }

        let new_lead = NewLead {
            partner_id: self.partner_id,
            contact: contact.to_string(),
            active: true,
        };
        match self.bounded(self.store.insert_lead(new_lead)).await {
            Ok(lead) => {
                info!(contact, lead_id = %lead.id, "lead created");
                Ok((lead.id, true))
            }
            Err(StoreError::Conflict(detail)) => {
                warn!(contact, %detail, "concurrent lead creation, adopting the existing lead");
                match self.bounded(self.store.find_active_lead(contact)).await? {
                    Some(lead) => Ok((lead.id, false)),
                    None => Err(StoreError::Conflict(detail)),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn insert_client_message(
        &self,
        lead_id: &LeadId,
        body: &str,
    ) -> Result<Message, StoreError> {
        let message = self
            .bounded(self.store.insert_message(NewMessage {
                lead_id: lead_id.clone(),
                sender: Sender::Client,
                body: body.to_string(),
            }))
            .await?;
        debug!(lead_id = %lead_id, message_id = %message.id, "message stored");
        Ok(message)
    }
}

fn normalize_contact(contact: &str) -> Result<&str, StoreError> {
    let contact = contact.trim();
    if contact.is_empty() {
        return Err(StoreError::Decode("empty contact".to_string()));
    }
    Ok(contact)
}

#[cfg(test)]
mod tests {
    use futures_util::FutureExt;

    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn lock_entries_are_pruned_after_release() {
        let locks = ContactLocks::default();
        {
            let _a = locks.acquire("5511").await;
            let _b = locks.acquire("5522").await;
            assert_eq!(locks.len(), 2);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn waiter_keeps_the_entry_alive() {
        let locks = Arc::new(ContactLocks::default());
        let first = locks.acquire("5511").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("5511").await;
            })
        };
        tokio::task::yield_now().await;
        drop(first);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn abandoned_waiter_entry_is_swept_on_next_acquire() {
        let locks = ContactLocks::default();
        let first = locks.acquire("5511").await;

        let mut waiter = Box::pin(locks.acquire("5511"));
        assert!(waiter.as_mut().now_or_never().is_none());
        drop(first);
        drop(waiter);
        assert_eq!(locks.len(), 1);

        {
            let _other = locks.acquire("5522").await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());

        let _again = locks.acquire("5511").await;
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn blank_contact_is_rejected_before_touching_the_store() {
        let store = Arc::new(MemoryStore::new());
        let service = LeadService::new(store.clone(), 1, Duration::from_secs(1));

        let err = service.resolve_lead("   ").await.unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
        assert!(store.leads_for("").await.is_empty());
    }

    #[tokio::test]
    async fn contact_is_trimmed() {
        let store = Arc::new(MemoryStore::new());
        let service = LeadService::new(store.clone(), 1, Duration::from_secs(1));

        let a = service.resolve_lead(" 5511 ").await.unwrap();
        let b = service.resolve_lead("5511").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.leads_for("5511").await.len(), 1);
    }
}
