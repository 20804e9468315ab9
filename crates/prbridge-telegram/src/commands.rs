// Bot commands and callback data
//
// Callback data format: `{action}/{user_id}/{repo_id}`.

use std::fmt;

use prbridge_core::SubscriptionKind;

pub const SET_BB_EMAIL_FORMAT: &str = "/set_bb_email <email>";

/// A parsed bot command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/repos`: list tracked repos with subscription buttons
    Repos,
    /// `/set_bb_email <email>`, `None` when the arguments don't match
    SetBbEmail(Option<String>),
    /// Anything else, answered with help
    Help,
}

impl Command {
    /// Parse a message text, `None` when it is not a command
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let head = parts.next()?.strip_prefix('/')?;
        // Commands in group chats carry the bot name: /repos@my_bot
        let name = head.split('@').next().unwrap_or(head);

        let command = match name {
            "repos" => Self::Repos,
            "set_bb_email" => {
                let args: Vec<&str> = parts.collect();
                match args.as_slice() {
                    [email] => Self::SetBbEmail(Some(email.to_string())),
                    _ => Self::SetBbEmail(None),
                }
            }
            _ => Self::Help,
        };
        Some(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Repos => "repos",
            Self::SetBbEmail(_) => "set_bb_email",
            Self::Help => "help",
        }
    }
}

/// What a subscription button does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Subscribe(SubscriptionKind),
    Unsubscribe,
}

impl CallbackAction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe(SubscriptionKind::All) => "subscribe_all",
            Self::Subscribe(SubscriptionKind::ReviewerOnly) => "subscribe_reviewer_only",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Data attached to a subscription button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionCallback {
    pub action: CallbackAction,
    pub user_id: i64,
    pub repo_id: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CallbackParseError {
    #[error("unknown callback action: {0}")]
    UnknownAction(String),
    #[error("invalid callback data: {0}")]
    InvalidFormat(String),
}

impl SubscriptionCallback {
    pub fn new(action: CallbackAction, user_id: i64, repo_id: i64) -> Self {
        Self {
            action,
            user_id,
            repo_id,
        }
    }

    pub fn parse(data: &str) -> Result<Self, CallbackParseError> {
        let parts: Vec<&str> = data.split('/').collect();
        let [action, user_id, repo_id] = parts.as_slice() else {
            return Err(CallbackParseError::InvalidFormat(data.to_string()));
        };

        let action = match *action {
            "subscribe_all" => CallbackAction::Subscribe(SubscriptionKind::All),
            "subscribe_reviewer_only" => CallbackAction::Subscribe(SubscriptionKind::ReviewerOnly),
            "unsubscribe" => CallbackAction::Unsubscribe,
            other => return Err(CallbackParseError::UnknownAction(other.to_string())),
        };
        let user_id = user_id
            .parse()
            .map_err(|_| CallbackParseError::InvalidFormat(data.to_string()))?;
        let repo_id = repo_id
            .parse()
            .map_err(|_| CallbackParseError::InvalidFormat(data.to_string()))?;

        Ok(Self::new(action, user_id, repo_id))
    }
}

impl fmt::Display for SubscriptionCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.action.as_str(), self.user_id, self.repo_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/repos"), Some(Command::Repos));
        assert_eq!(Command::parse("/repos@prbridge_bot"), Some(Command::Repos));
        assert_eq!(
            Command::parse("/set_bb_email alice@example.com"),
            Some(Command::SetBbEmail(Some("alice@example.com".to_string())))
        );
        assert_eq!(
            Command::parse("/set_bb_email"),
            Some(Command::SetBbEmail(None))
        );
        assert_eq!(
            Command::parse("/set_bb_email a@x.io b@x.io"),
            Some(Command::SetBbEmail(None))
        );
        assert_eq!(Command::parse("/start"), Some(Command::Help));
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn test_callback_data_round_trip() {
        let cb = SubscriptionCallback::new(
            CallbackAction::Subscribe(SubscriptionKind::ReviewerOnly),
            3,
            14,
        );
        assert_eq!(cb.to_string(), "subscribe_reviewer_only/3/14");
        assert_eq!(SubscriptionCallback::parse(&cb.to_string()), Ok(cb));
    }

    #[test]
    fn test_callback_data_rejects_garbage() {
        assert!(matches!(
            SubscriptionCallback::parse("subscribe_all/1"),
            Err(CallbackParseError::InvalidFormat(_))
        ));
        assert!(matches!(
            SubscriptionCallback::parse("subscribe_all/x/2"),
            Err(CallbackParseError::InvalidFormat(_))
        ));
        assert!(matches!(
            SubscriptionCallback::parse("mute/1/2"),
            Err(CallbackParseError::UnknownAction(_))
        ));
    }
}
