//! # prbridge core
//!
//! Turns Bitbucket pull-request activity into Telegram notifications.
//!
//! ```text
//! poll loop ─► resolver ─► builder ─► NotifyStore (dedup by hash) ─► EventSender ─► ack
//! retry loop ─► NotifyStore (unacked) ─► EventSender ─► ack
//! gc loop ─► NotifyStore (outdated ids) ─► delete
//! ```
//!
//! Storage, the upstream source and the chat transport are traits so the
//! pipeline can run against the in-memory store and fakes in tests.

pub mod builder;
pub mod chat;
pub mod error;
pub mod fetcher;
pub mod memory;
pub mod models;
pub mod resolver;
pub mod scheduler;
pub mod sender;
pub mod store;
pub mod upstream;

pub use builder::{activity_event, build_pr_events, pr_opened_event};
pub use chat::{escape_html, ChatTransport, InlineButton, InlineKeyboard};
pub use error::{ConfigError, SourceError, StoreError, TransportError};
pub use fetcher::{Fetcher, PollReport, RetryReport, SyncError};
pub use memory::InMemoryStore;
pub use models::{
    email_key, Event, EventType, NewEvent, Repo, Subscription, SubscriptionKind, User,
};
pub use resolver::{resolve_subscribers, Subscribers, UserSet};
pub use scheduler::{spawn_periodic, spawn_workers, LoopConfig};
pub use sender::{event_label, render_event, EventSender};
pub use store::{validate_repo_names, validate_user_ids, GcPolicy, InsertOutcome, NotifyStore};
pub use upstream::{
    Activity, ActivityAction, Participant, PullRequest, PullRequestSource, Reviewer,
    UpstreamRepo,
};
