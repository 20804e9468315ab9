// Inbound update handling
//
// Long-polls getUpdates and dispatches commands and button callbacks. The
// update cursor lives in the shared key-value table; each update ID is stored
// before the update is handled, so a crash never replays a handled update.

use std::sync::Arc;
use std::time::Duration;

use prbridge_core::{
    escape_html, InlineButton, InlineKeyboard, NotifyStore, StoreError, SubscriptionKind,
    TransportError, User,
};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::api::{CallbackQuery, Message, Update};
use crate::client::TelegramClient;
use crate::commands::{CallbackAction, Command, SubscriptionCallback, SET_BB_EMAIL_FORMAT};

/// Key-value key of the last stored update ID
pub const LAST_UPDATE_ID_KEY: &str = "tg_last_update_id";

const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Dispatches Telegram updates to command and callback handlers
pub struct UpdateHandler {
    store: Arc<dyn NotifyStore>,
    client: TelegramClient,
    /// Bitbucket project shown in the help text
    project: String,
}

/// Who sent an update and where to answer
struct Caller {
    tg_id: i64,
    chat_id: i64,
    login: String,
}

impl UpdateHandler {
    pub fn new(store: Arc<dyn NotifyStore>, client: TelegramClient, project: impl Into<String>) -> Self {
        Self {
            store,
            client,
            project: project.into(),
        }
    }

    /// Poll for updates until shutdown is signalled
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Update handler started");

        let mut offset = match self.last_update_id().await {
            Ok(id) => id.map(|id| id + 1),
            Err(e) => {
                error!(error = %e, "Reading update cursor failed, starting from the queue head");
                None
            }
        };

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let result = tokio::select! {
                result = self.poll_once(offset) => result,
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match result {
                Ok(next) => offset = next,
                Err(e) => {
                    warn!(error = %e, "Fetching updates failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        info!("Update handler stopped");
    }

    /// Fetch and handle one batch of updates, returns the next offset
    pub async fn poll_once(&self, offset: Option<i64>) -> Result<Option<i64>, TransportError> {
        let updates = self.client.get_updates(offset).await?;

        let mut next = offset;
        for update in updates {
            next = Some(update.update_id + 1);
            self.handle_update(update).await;
        }
        Ok(next)
    }

    async fn last_update_id(&self) -> Result<Option<i64>, StoreError> {
        let Some(value) = self.store.get_value(LAST_UPDATE_ID_KEY).await? else {
            return Ok(None);
        };
        value
            .parse()
            .map(Some)
            .map_err(|e| StoreError::Serialization(format!("{LAST_UPDATE_ID_KEY} ({value}): {e}")))
    }

    /// Store the cursor, then handle the update
    pub async fn handle_update(&self, update: Update) {
        let correlation_id = Uuid::now_v7();
        let span = info_span!(
            "update",
            update_id = update.update_id,
            correlation_id = %correlation_id
        );
        let handling = async move {
            if let Err(e) = self
                .store
                .set_value(LAST_UPDATE_ID_KEY, &update.update_id.to_string())
                .await
            {
                error!(error = %e, "Storing update cursor failed");
            }

            if let Some(message) = update.message {
                self.handle_message(message).await;
            } else if let Some(callback) = update.callback_query {
                self.handle_callback(callback).await;
            }
        };
        CORRELATION_ID
            .scope(correlation_id, handling.instrument(span))
            .await
    }

    /// Resolve the caller; unknown users are created inactive, inactive users are ignored
    async fn authorize(&self, caller: &Caller) -> Result<Option<User>, StoreError> {
        let user = match self.store.get_user_by_tg_id(caller.tg_id).await? {
            Some(user) => user,
            None => {
                let user = self
                    .store
                    .create_user(caller.tg_id, caller.chat_id, &caller.login)
                    .await?;
                info!(tg_id = caller.tg_id, tg_user = %caller.login, "Inactive user created");
                user
            }
        };

        if !user.active {
            info!(tg_id = caller.tg_id, tg_user = %caller.login, "User not authorized");
            return Ok(None);
        }
        Ok(Some(user))
    }

    async fn handle_message(&self, message: Message) {
        let Some(command) = message.text.as_deref().and_then(Command::parse) else {
            debug!("Message is not a command, skipping");
            return;
        };
        let Some(from) = message.from else {
            debug!("Message without sender, skipping");
            return;
        };

        let caller = Caller {
            tg_id: from.id,
            chat_id: message.chat.id,
            login: from.username.unwrap_or_default(),
        };
        let user = match self.authorize(&caller).await {
            Ok(Some(user)) => user,
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "Authorizing user failed");
                self.send_error(caller.chat_id).await;
                return;
            }
        };

        info!(command = command.name(), user_id = user.id, "Handling command");
        match command {
            Command::Repos => self.handle_repos(&user, caller.chat_id).await,
            Command::SetBbEmail(Some(email)) => {
                self.handle_set_bb_email(&user, caller.chat_id, &email).await
            }
            Command::SetBbEmail(None) => {
                let text = format!(
                    "🤷‍♂️ Invalid command format, expected:\n{}",
                    escape_html(SET_BB_EMAIL_FORMAT)
                );
                self.send(caller.chat_id, &text, None).await;
            }
            Command::Help => self.handle_help(&user, caller.chat_id).await,
        }
    }

    async fn handle_repos(&self, user: &User, chat_id: i64) {
        let repos = match self.store.list_repos().await {
            Ok(repos) => repos,
            Err(e) => {
                error!(error = %e, "Listing repos failed");
                self.send_error(chat_id).await;
                return;
            }
        };
        let subscriptions = match self.store.list_subscriptions_for_user(user.id).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                error!(error = %e, "Listing subscriptions failed");
                self.send_error(chat_id).await;
                return;
            }
        };

        if repos.is_empty() {
            self.send(chat_id, "No repositories are tracked yet", None).await;
            return;
        }

        for repo in repos {
            let current = subscriptions
                .iter()
                .find(|s| s.repo_id == repo.id)
                .map(|s| s.kind);
            let keyboard = InlineKeyboard::single_row(subscription_buttons(user.id, repo.id, current));
            let text = format!("➡️ {}", escape_html(&repo.to_string()));
            self.send(chat_id, &text, Some(&keyboard)).await;
        }
    }

    async fn handle_set_bb_email(&self, user: &User, chat_id: i64, email: &str) {
        if let Err(e) = self.store.set_user_bb_email(user.id, email).await {
            error!(error = %e, "Updating Bitbucket email failed");
            self.send_error(chat_id).await;
            return;
        }

        info!(user_id = user.id, "Bitbucket email updated");
        self.send(chat_id, "👌 Bitbucket email updated", None).await;
    }

    async fn handle_help(&self, user: &User, chat_id: i64) {
        let text = format!(
            "Hello, @{}!\nThe current Bitbucket project is: {}.",
            escape_html(&user.tg_login),
            escape_html(&self.project)
        );
        self.send(chat_id, &text, None).await;
    }

    async fn handle_callback(&self, callback: CallbackQuery) {
        let caller = Caller {
            tg_id: callback.from.id,
            chat_id: callback
                .message
                .as_ref()
                .map(|m| m.chat.id)
                .unwrap_or(callback.from.id),
            login: callback.from.username.clone().unwrap_or_default(),
        };
        let user = match self.authorize(&caller).await {
            Ok(Some(user)) => user,
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "Authorizing user failed");
                self.send_error(caller.chat_id).await;
                return;
            }
        };

        let data = callback.data.as_deref().unwrap_or_default();
        info!(callback = %data, user_id = user.id, "Handling callback");

        let parsed = match SubscriptionCallback::parse(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(error = %e, "Invalid callback data");
                self.send_error(caller.chat_id).await;
                return;
            }
        };
        if parsed.user_id != user.id {
            warn!(
                user_id = user.id,
                callback_user_id = parsed.user_id,
                "Callback belongs to another user"
            );
            self.send_error(caller.chat_id).await;
            return;
        }

        match parsed.action {
            CallbackAction::Subscribe(kind) => {
                self.answer(&callback.id, "Updating subscription...").await;
                if let Err(e) = self
                    .store
                    .set_subscription(user.id, parsed.repo_id, kind)
                    .await
                {
                    error!(error = %e, repo_id = parsed.repo_id, "Updating subscription failed");
                    self.send_error(caller.chat_id).await;
                    return;
                }

                info!(user_id = user.id, repo_id = parsed.repo_id, kind = %kind, "Subscription updated");
                let comment = match kind {
                    SubscriptionKind::All => "to all events",
                    SubscriptionKind::ReviewerOnly => "only for PRs I'm reviewing",
                };
                let text = format!("👌 Subscription updated: {comment}");
                self.send(caller.chat_id, &escape_html(&text), None).await;
            }
            CallbackAction::Unsubscribe => {
                self.answer(&callback.id, "Removing subscription...").await;
                if let Err(e) = self
                    .store
                    .delete_subscription(user.id, parsed.repo_id)
                    .await
                {
                    error!(error = %e, repo_id = parsed.repo_id, "Deleting subscription failed");
                    self.send_error(caller.chat_id).await;
                    return;
                }

                info!(user_id = user.id, repo_id = parsed.repo_id, "Subscription removed");
                self.send(caller.chat_id, "👌 Subscription removed", None).await;
            }
        }
    }

    async fn send(&self, chat_id: i64, text: &str, keyboard: Option<&InlineKeyboard>) -> bool {
        match self.client.send_html(chat_id, text, keyboard).await {
            Ok(_) => true,
            Err(e) => {
                error!(chat_id, error = %e, "Sending message failed");
                false
            }
        }
    }

    /// Generic apology carrying the correlation ID of the update being handled
    async fn send_error(&self, chat_id: i64) -> bool {
        let correlation_id = current_correlation_id();
        let text = format!("❌ Something went wrong, your correlation ID: {correlation_id}");
        self.send(chat_id, &text, None).await
    }

    async fn answer(&self, callback_id: &str, text: &str) {
        if let Err(e) = self.client.answer_callback_query(callback_id, Some(text)).await {
            error!(error = %e, "Answering callback failed");
        }
    }
}

tokio::task_local! {
    static CORRELATION_ID: Uuid;
}

fn current_correlation_id() -> Uuid {
    CORRELATION_ID.try_with(|id| *id).unwrap_or_else(|_| Uuid::now_v7())
}

/// Buttons offered for a repo given the user's current subscription
pub fn subscription_buttons(
    user_id: i64,
    repo_id: i64,
    current: Option<SubscriptionKind>,
) -> Vec<InlineButton> {
    let button = |text: &str, action: CallbackAction| {
        InlineButton::callback(text, SubscriptionCallback::new(action, user_id, repo_id).to_string())
    };
    let all = || button("✅ Subscribe (all)", CallbackAction::Subscribe(SubscriptionKind::All));
    let reviewer = || {
        button(
            "✅ Subscribe (reviewer)",
            CallbackAction::Subscribe(SubscriptionKind::ReviewerOnly),
        )
    };
    let unsubscribe = || button("❌ Unsubscribe", CallbackAction::Unsubscribe);

    match current {
        None => vec![all(), reviewer()],
        Some(SubscriptionKind::All) => vec![unsubscribe(), reviewer()],
        Some(SubscriptionKind::ReviewerOnly) => vec![unsubscribe(), all()],
    }
}
