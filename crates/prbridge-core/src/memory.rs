//! In-memory implementation of NotifyStore for testing and local runs

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::models::{email_key, Event, NewEvent, Repo, Subscription, SubscriptionKind, User};
use crate::store::{validate_repo_names, validate_user_ids, GcPolicy, InsertOutcome, NotifyStore};

#[derive(Default)]
struct State {
    next_id: i64,
    repos: BTreeMap<i64, Repo>,
    users: BTreeMap<i64, User>,
    subscriptions: BTreeMap<i64, Subscription>,
    events: BTreeMap<i64, Event>,
    event_hashes: HashMap<String, i64>,
    kvs: HashMap<String, String>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory implementation of NotifyStore
///
/// Provides the same semantics as the PostgreSQL implementation: unique
/// event hashes, unique (project, name) repos and one subscription per
/// (user, repo) pair.
///
/// # Example
///
/// ```
/// use prbridge_core::InMemoryStore;
///
/// let store = InMemoryStore::new();
/// assert_eq!(store.event_count(), 0);
/// ```
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of recorded events
    pub fn event_count(&self) -> usize {
        self.state.read().events.len()
    }

    /// Snapshot of all recorded events, ordered by ID
    pub fn events(&self) -> Vec<Event> {
        self.state.read().events.values().cloned().collect()
    }

    /// Activate a user (done by an operator in production)
    pub fn activate_user(&self, user_id: i64) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let user = state.users.get_mut(&user_id).ok_or(StoreError::NotFound {
            entity: "user",
            id: user_id,
        })?;
        user.active = true;
        Ok(())
    }
}

#[async_trait]
impl NotifyStore for InMemoryStore {
    async fn create_repo(&self, project: &str, name: &str) -> Result<(), StoreError> {
        validate_repo_names(project, name)?;

        let mut state = self.state.write();
        if state
            .repos
            .values()
            .any(|r| r.project == project && r.name == name)
        {
            return Ok(());
        }

        let id = state.next_id();
        state.repos.insert(
            id,
            Repo {
                id,
                project: project.to_string(),
                name: name.to_string(),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_repo(&self, project: &str, name: &str) -> Result<Option<Repo>, StoreError> {
        Ok(self
            .state
            .read()
            .repos
            .values()
            .find(|r| r.project == project && r.name == name)
            .cloned())
    }

    async fn list_repos(&self) -> Result<Vec<Repo>, StoreError> {
        Ok(self.state.read().repos.values().cloned().collect())
    }

    async fn create_user(
        &self,
        tg_id: i64,
        tg_chat_id: i64,
        tg_login: &str,
    ) -> Result<User, StoreError> {
        validate_user_ids(tg_id, tg_chat_id)?;

        let mut state = self.state.write();
        if state.users.values().any(|u| u.tg_id == tg_id) {
            return Err(StoreError::database(format!(
                "user with telegram ID {tg_id} already exists"
            )));
        }

        let id = state.next_id();
        let user = User {
            id,
            tg_id,
            tg_login: tg_login.to_string(),
            tg_chat_id,
            bb_email: String::new(),
            active: false,
            created_at: Utc::now(),
        };
        state.users.insert(id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.state.read().users.get(&id).cloned())
    }

    async fn get_user_by_tg_id(&self, tg_id: i64) -> Result<Option<User>, StoreError> {
        Ok(self
            .state
            .read()
            .users
            .values()
            .find(|u| u.tg_id == tg_id)
            .cloned())
    }

    async fn get_user_by_bb_email(&self, bb_email: &str) -> Result<Option<User>, StoreError> {
        let key = email_key(bb_email);
        Ok(self
            .state
            .read()
            .users
            .values()
            .find(|u| !u.bb_email.is_empty() && u.email_key() == key)
            .cloned())
    }

    async fn set_user_bb_email(&self, user_id: i64, bb_email: &str) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if let Some(user) = state.users.get_mut(&user_id) {
            user.bb_email = bb_email.to_string();
        }
        Ok(())
    }

    async fn list_subscriptions_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<Subscription>, StoreError> {
        Ok(self
            .state
            .read()
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_subscriptions_for_repo(
        &self,
        repo_id: i64,
    ) -> Result<Vec<Subscription>, StoreError> {
        Ok(self
            .state
            .read()
            .subscriptions
            .values()
            .filter(|s| s.repo_id == repo_id)
            .cloned()
            .collect())
    }

    async fn set_subscription(
        &self,
        user_id: i64,
        repo_id: i64,
        kind: SubscriptionKind,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if !state.users.contains_key(&user_id) {
            return Err(StoreError::NotFound {
                entity: "user",
                id: user_id,
            });
        }
        if !state.repos.contains_key(&repo_id) {
            return Err(StoreError::NotFound {
                entity: "repo",
                id: repo_id,
            });
        }

        let now = Utc::now();
        if let Some(sub) = state
            .subscriptions
            .values_mut()
            .find(|s| s.user_id == user_id && s.repo_id == repo_id)
        {
            sub.kind = kind;
            sub.updated_at = now;
            return Ok(());
        }

        let id = state.next_id();
        state.subscriptions.insert(
            id,
            Subscription {
                id,
                user_id,
                repo_id,
                kind,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn delete_subscription(&self, user_id: i64, repo_id: i64) -> Result<(), StoreError> {
        self.state
            .write()
            .subscriptions
            .retain(|_, s| !(s.user_id == user_id && s.repo_id == repo_id));
        Ok(())
    }

    async fn create_event_if_absent(&self, event: NewEvent) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state.write();
        if state.event_hashes.contains_key(&event.hash) {
            return Ok(InsertOutcome::AlreadyExists);
        }

        let id = state.next_id();
        let stored = Event::from_new(id, event);
        state.event_hashes.insert(stored.hash.clone(), id);
        state.events.insert(id, stored.clone());
        Ok(InsertOutcome::Created(stored))
    }

    async fn set_event_sent(
        &self,
        event_id: i64,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if let Some(event) = state.events.get_mut(&event_id) {
            event.send_ack = true;
            event.send_at.get_or_insert(sent_at);
        }
        Ok(())
    }

    async fn list_unsent_events(&self) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .state
            .read()
            .events
            .values()
            .filter(|e| !e.send_ack)
            .cloned()
            .collect())
    }

    async fn list_outdated_event_ids(
        &self,
        cutoff: DateTime<Utc>,
        policy: GcPolicy,
    ) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .state
            .read()
            .events
            .values()
            .filter(|e| policy.is_outdated(e, cutoff))
            .map(|e| e.id)
            .collect())
    }

    async fn delete_events(&self, ids: &[i64]) -> Result<u64, StoreError> {
        let mut state = self.state.write();
        let mut deleted = 0;
        for id in ids {
            if let Some(event) = state.events.remove(id) {
                state.event_hashes.remove(&event.hash);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.state.read().kvs.get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.state
            .write()
            .kvs
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventType;
    use chrono::Duration;

    fn candidate(pr_id: i64, created_at: DateTime<Utc>) -> NewEvent {
        NewEvent {
            hash: String::new(),
            event_type: EventType::Comment,
            recipient_tg_id: 1,
            recipient_chat_id: 1,
            sender_name: "Bob".to_string(),
            repo_project: "TEAM".to_string(),
            repo_name: "app".to_string(),
            pr_id,
            pr_title: "Title".to_string(),
            pr_url: "https://bb/pr".to_string(),
            created_at,
        }
        .sealed()
    }

    #[tokio::test]
    async fn test_create_repo_is_idempotent() {
        let store = InMemoryStore::new();
        store.create_repo("TEAM", "app").await.unwrap();
        store.create_repo("TEAM", "app").await.unwrap();
        store.create_repo("TEAM", "api").await.unwrap();

        assert_eq!(store.list_repos().await.unwrap().len(), 2);
        assert!(store.get_repo("TEAM", "app").await.unwrap().is_some());
        assert!(store.get_repo("TEAM", "web").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_repo_rejects_empty_names() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.create_repo("", "app").await,
            Err(StoreError::InvalidInput(_))
        ));
        assert!(matches!(
            store.create_repo("TEAM", "").await,
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_create_user_starts_inactive() {
        let store = InMemoryStore::new();
        let user = store.create_user(10, 20, "alice").await.unwrap();
        assert!(!user.active);
        assert!(user.bb_email.is_empty());

        assert!(store.create_user(0, 20, "x").await.is_err());
        assert!(store.create_user(11, 0, "x").await.is_err());
        assert!(store.create_user(10, 20, "dup").await.is_err());
    }

    #[tokio::test]
    async fn test_set_subscription_upserts() {
        let store = InMemoryStore::new();
        let user = store.create_user(10, 20, "alice").await.unwrap();
        store.create_repo("TEAM", "app").await.unwrap();
        let repo = store.get_repo("TEAM", "app").await.unwrap().unwrap();

        store
            .set_subscription(user.id, repo.id, SubscriptionKind::All)
            .await
            .unwrap();
        store
            .set_subscription(user.id, repo.id, SubscriptionKind::ReviewerOnly)
            .await
            .unwrap();

        let subs = store.list_subscriptions_for_repo(repo.id).await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].kind, SubscriptionKind::ReviewerOnly);

        store.delete_subscription(user.id, repo.id).await.unwrap();
        assert!(store
            .list_subscriptions_for_user(user.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_create_event_if_absent_dedups_by_hash() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        let first = store.create_event_if_absent(candidate(1, now)).await.unwrap();
        let second = store.create_event_if_absent(candidate(1, now)).await.unwrap();
        let other = store.create_event_if_absent(candidate(2, now)).await.unwrap();

        assert!(first.is_created());
        assert_eq!(second, InsertOutcome::AlreadyExists);
        assert!(other.is_created());
        assert_eq!(store.event_count(), 2);
    }

    #[tokio::test]
    async fn test_set_event_sent_keeps_first_timestamp() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let InsertOutcome::Created(event) =
            store.create_event_if_absent(candidate(1, now)).await.unwrap()
        else {
            panic!("expected created");
        };

        let first_ack = now + Duration::seconds(5);
        store.set_event_sent(event.id, first_ack).await.unwrap();
        store
            .set_event_sent(event.id, first_ack + Duration::seconds(30))
            .await
            .unwrap();

        let stored = &store.events()[0];
        assert!(stored.send_ack);
        assert_eq!(stored.send_at, Some(first_ack));
        assert!(store.list_unsent_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_outdated_events_by_policy() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let old = now - Duration::days(10);

        let InsertOutcome::Created(acked) =
            store.create_event_if_absent(candidate(1, old)).await.unwrap()
        else {
            panic!("expected created");
        };
        store.create_event_if_absent(candidate(2, old)).await.unwrap();
        store.set_event_sent(acked.id, old).await.unwrap();

        let cutoff = now - Duration::days(7);
        let by_ack = store
            .list_outdated_event_ids(cutoff, GcPolicy::AckedBySentAt)
            .await
            .unwrap();
        assert_eq!(by_ack, vec![acked.id]);

        let by_created = store
            .list_outdated_event_ids(cutoff, GcPolicy::ByCreatedAt)
            .await
            .unwrap();
        assert_eq!(by_created.len(), 2);

        assert_eq!(store.delete_events(&by_created).await.unwrap(), 2);
        assert_eq!(store.event_count(), 0);

        // Deleted hashes may be recorded again
        assert!(store
            .create_event_if_absent(candidate(1, old))
            .await
            .unwrap()
            .is_created());
    }

    #[tokio::test]
    async fn test_key_value_upsert() {
        let store = InMemoryStore::new();
        assert_eq!(store.get_value("tg_last_update_id").await.unwrap(), None);
        store.set_value("tg_last_update_id", "10").await.unwrap();
        store.set_value("tg_last_update_id", "11").await.unwrap();
        assert_eq!(
            store.get_value("tg_last_update_id").await.unwrap().as_deref(),
            Some("11")
        );
    }
}
