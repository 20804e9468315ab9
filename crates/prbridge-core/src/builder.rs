// Event construction
//
// Candidates are rebuilt from scratch on every poll. Deduplication happens at
// the storage layer through the content hash, so building is a pure function
// of the upstream records and the resolved recipients.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{EventType, NewEvent, Repo, User};
use crate::resolver::Subscribers;
use crate::upstream::{Activity, PullRequest};

fn candidate(
    event_type: EventType,
    recipient: &User,
    sender_name: &str,
    repo: &Repo,
    pr: &PullRequest,
    created_at: DateTime<Utc>,
) -> NewEvent {
    NewEvent {
        hash: String::new(),
        event_type,
        recipient_tg_id: recipient.tg_id,
        recipient_chat_id: recipient.tg_chat_id,
        sender_name: sender_name.to_string(),
        repo_project: repo.project.clone(),
        repo_name: repo.name.clone(),
        pr_id: pr.id,
        pr_title: pr.title.clone(),
        pr_url: pr.url.clone(),
        created_at,
    }
    .sealed()
}

/// "PR opened" candidate for one recipient, timestamped at PR creation
pub fn pr_opened_event(repo: &Repo, pr: &PullRequest, recipient: &User) -> NewEvent {
    candidate(
        EventType::PrOpened,
        recipient,
        &pr.author.display_name,
        repo,
        pr,
        pr.created_at,
    )
}

/// Candidate for one activity and recipient, `None` for unmapped actions
pub fn activity_event(
    repo: &Repo,
    pr: &PullRequest,
    activity: &Activity,
    recipient: &User,
) -> Option<NewEvent> {
    let event_type = activity.action.event_type()?;
    Some(candidate(
        event_type,
        recipient,
        &activity.actor.display_name,
        repo,
        pr,
        activity.created_at,
    ))
}

/// All candidates for one PR
///
/// Emits one "PR opened" candidate per effective recipient, then one candidate
/// per (mapped activity, recipient) pair, in activity order.
pub fn build_pr_events(
    repo: &Repo,
    pr: &PullRequest,
    activities: &[Activity],
    subscribers: &Subscribers,
) -> Vec<NewEvent> {
    let recipients = subscribers.effective_for(pr);
    if recipients.is_empty() {
        return Vec::new();
    }

    let mut events: Vec<NewEvent> = recipients
        .values()
        .map(|user| pr_opened_event(repo, pr, user))
        .collect();

    for activity in activities {
        if activity.action.event_type().is_none() {
            debug!(
                repo = %repo,
                pr_id = pr.id,
                activity_id = activity.id,
                action = ?activity.action,
                "Skipping unmapped activity"
            );
            continue;
        }
        events.extend(
            recipients
                .values()
                .filter_map(|user| activity_event(repo, pr, activity, user)),
        );
    }

    events
}
