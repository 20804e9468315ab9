// Subscriber resolution
//
// Maps a repository to the users who want its notifications, bucketed by
// subscription kind. Recipients are keyed by normalized Bitbucket email so
// they can be matched against PR reviewers.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::StoreError;
use crate::models::{email_key, SubscriptionKind, User};
use crate::store::NotifyStore;
use crate::upstream::PullRequest;

/// Recipients keyed by normalized Bitbucket email
pub type UserSet = BTreeMap<String, User>;

/// Resolved recipients of one repository
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscribers {
    /// Notified about every PR
    pub all: UserSet,
    /// Notified only about PRs they review
    pub reviewer_only: UserSet,
}

impl Subscribers {
    pub fn is_empty(&self) -> bool {
        self.all.is_empty() && self.reviewer_only.is_empty()
    }

    /// Recipients of a given PR: `all ∪ (reviewer_only ∩ reviewers)`
    pub fn effective_for(&self, pr: &PullRequest) -> UserSet {
        let mut recipients = self.all.clone();
        for reviewer in &pr.reviewers {
            let key = email_key(&reviewer.user.email);
            if let Some(user) = self.reviewer_only.get(&key) {
                recipients.entry(key).or_insert_with(|| user.clone());
            }
        }
        recipients
    }
}

/// Resolve the subscribers of a repository
///
/// Subscriptions pointing at a missing user, a user without a Bitbucket email
/// or an inactive user are skipped with a warning. No subscriptions yields an
/// empty result, not an error.
pub async fn resolve_subscribers(
    store: &dyn NotifyStore,
    repo_id: i64,
) -> Result<Subscribers, StoreError> {
    let mut subscribers = Subscribers::default();

    for sub in store.list_subscriptions_for_repo(repo_id).await? {
        let Some(user) = store.get_user(sub.user_id).await? else {
            warn!(user_id = sub.user_id, repo_id, "Subscribed user not found");
            continue;
        };

        if user.bb_email.trim().is_empty() {
            warn!(user_id = user.id, repo_id, "Subscribed user has no Bitbucket email");
            continue;
        }

        if !user.active {
            warn!(user_id = user.id, repo_id, "Subscribed user is inactive");
            continue;
        }

        let bucket = match sub.kind {
            SubscriptionKind::All => &mut subscribers.all,
            SubscriptionKind::ReviewerOnly => &mut subscribers.reviewer_only,
        };
        let user_id = user.id;
        if let Some(replaced) = bucket.insert(user.email_key(), user) {
            warn!(
                user_id,
                replaced_user_id = replaced.id,
                repo_id,
                "Subscribed users share a Bitbucket email, keeping the later one"
            );
        }
    }

    Ok(subscribers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::upstream::{Participant, Reviewer};
    use chrono::Utc;

    async fn user(store: &InMemoryStore, tg_id: i64, email: &str, active: bool) -> User {
        let user = store.create_user(tg_id, tg_id, "login").await.unwrap();
        store.set_user_bb_email(user.id, email).await.unwrap();
        if active {
            store.activate_user(user.id).unwrap();
        }
        store.get_user(user.id).await.unwrap().unwrap()
    }

    fn pr_with_reviewers(emails: &[&str]) -> PullRequest {
        PullRequest {
            id: 1,
            title: "t".to_string(),
            created_at: Utc::now(),
            author: Participant::default(),
            reviewers: emails
                .iter()
                .map(|email| Reviewer {
                    user: Participant {
                        email: email.to_string(),
                        display_name: String::new(),
                    },
                    approved: false,
                    status: "UNAPPROVED".to_string(),
                })
                .collect(),
            url: "https://bb/pr/1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_resolve_buckets_by_kind_and_skips_ineligible_users() {
        let store = InMemoryStore::new();
        store.create_repo("TEAM", "app").await.unwrap();
        let repo = store.get_repo("TEAM", "app").await.unwrap().unwrap();

        let all = user(&store, 1, "a@x.io", true).await;
        let reviewer = user(&store, 2, "R@X.io", true).await;
        let no_email = user(&store, 3, "", true).await;
        let inactive = user(&store, 4, "i@x.io", false).await;

        for (u, kind) in [
            (&all, SubscriptionKind::All),
            (&reviewer, SubscriptionKind::ReviewerOnly),
            (&no_email, SubscriptionKind::All),
            (&inactive, SubscriptionKind::All),
        ] {
            store.set_subscription(u.id, repo.id, kind).await.unwrap();
        }

        let subs = resolve_subscribers(&store, repo.id).await.unwrap();
        assert_eq!(subs.all.keys().collect::<Vec<_>>(), vec!["a@x.io"]);
        assert_eq!(subs.reviewer_only.keys().collect::<Vec<_>>(), vec!["r@x.io"]);
    }

    #[tokio::test]
    async fn test_resolve_without_subscriptions_is_empty() {
        let store = InMemoryStore::new();
        store.create_repo("TEAM", "app").await.unwrap();
        let repo = store.get_repo("TEAM", "app").await.unwrap().unwrap();

        let subs = resolve_subscribers(&store, repo.id).await.unwrap();
        assert!(subs.is_empty());
    }

    #[tokio::test]
    async fn test_shared_email_keeps_one_recipient() {
        let store = InMemoryStore::new();
        store.create_repo("TEAM", "app").await.unwrap();
        let repo = store.get_repo("TEAM", "app").await.unwrap().unwrap();
        let first = user(&store, 1, "same@x.io", true).await;
        let second = user(&store, 2, " SAME@x.io", true).await;
        for u in [&first, &second] {
            store
                .set_subscription(u.id, repo.id, SubscriptionKind::All)
                .await
                .unwrap();
        }

        let subs = resolve_subscribers(&store, repo.id).await.unwrap();
        assert_eq!(subs.all.len(), 1);
        assert_eq!(subs.all["same@x.io"].id, second.id);
    }

    #[tokio::test]
    async fn test_effective_recipients_union_with_reviewer_intersection() {
        let store = InMemoryStore::new();
        let a = user(&store, 1, "a@x.io", true).await;
        let b1 = user(&store, 2, "b1@x.io", true).await;
        let b2 = user(&store, 3, "b2@x.io", true).await;

        let subs = Subscribers {
            all: BTreeMap::from([(a.email_key(), a)]),
            reviewer_only: BTreeMap::from([(b1.email_key(), b1), (b2.email_key(), b2)]),
        };

        let pr = pr_with_reviewers(&["B1@x.io", "outsider@x.io"]);
        let recipients = subs.effective_for(&pr);
        assert_eq!(
            recipients.keys().collect::<Vec<_>>(),
            vec!["a@x.io", "b1@x.io"]
        );

        let nobody_reviews = pr_with_reviewers(&[]);
        assert_eq!(subs.effective_for(&nobody_reviews).len(), 1);
    }
}
