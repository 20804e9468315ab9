// Telegram Bot API wire types
//
// Only the fields the bot reads or writes are modelled.

use prbridge_core::{InlineButton, InlineKeyboard};
use serde::{Deserialize, Serialize};

/// Response envelope shared by every Bot API method
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BotUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<BotUser>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: BotUser,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

impl From<&InlineKeyboard> for InlineKeyboardMarkup {
    fn from(keyboard: &InlineKeyboard) -> Self {
        let inline_keyboard = keyboard
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|button| match button {
                        InlineButton::Url { text, url } => InlineKeyboardButton {
                            text: text.clone(),
                            url: Some(url.clone()),
                            callback_data: None,
                        },
                        InlineButton::Callback { text, data } => InlineKeyboardButton {
                            text: text.clone(),
                            url: None,
                            callback_data: Some(data.clone()),
                        },
                    })
                    .collect()
            })
            .collect();
        Self { inline_keyboard }
    }
}

#[derive(Debug, Serialize)]
pub struct SendMessageRequest<'a> {
    pub chat_id: i64,
    pub text: &'a str,
    pub parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
pub struct GetUpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    /// Long-poll timeout in seconds
    pub timeout: u64,
    pub allowed_updates: &'static [&'static str],
}

#[derive(Debug, Serialize)]
pub struct AnswerCallbackQueryRequest<'a> {
    pub callback_query_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keyboard_serialization() {
        let keyboard = InlineKeyboard::single_row(vec![
            InlineButton::url("Open PR", "https://bb/pr/7"),
            InlineButton::callback("❌ Unsubscribe", "unsubscribe/1/2"),
        ]);
        let markup = InlineKeyboardMarkup::from(&keyboard);

        assert_eq!(
            serde_json::to_value(&markup).unwrap(),
            json!({
                "inline_keyboard": [[
                    {"text": "Open PR", "url": "https://bb/pr/7"},
                    {"text": "❌ Unsubscribe", "callback_data": "unsubscribe/1/2"}
                ]]
            })
        );
    }

    #[test]
    fn test_update_deserialization() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 10,
            "callback_query": {
                "id": "cb-1",
                "from": {"id": 1001, "is_bot": false, "first_name": "U", "username": "u"},
                "message": {"message_id": 5, "chat": {"id": 42, "type": "private"}, "date": 0},
                "data": "subscribe_all/1/2"
            }
        }))
        .unwrap();

        let cb = update.callback_query.unwrap();
        assert_eq!(cb.from.id, 1001);
        assert_eq!(cb.message.unwrap().chat.id, 42);
        assert!(update.message.is_none());
    }
}
