use chrono::{DateTime, Utc};
use uuid::Uuid;

const GREETING: &str = "Hi! I am your health assistant. I am not a doctor, but I am happy to \
answer questions about diet, diabetes and a healthy lifestyle. What would you like to ask?";

const CANNED_REPLY: &str = "That is a good question. For diabetes prevention the key is a diet \
with a low glycaemic index. Would you like a sample meal plan?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender: Sender,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            text: text.into(),
            sent_at: Utc::now(),
        }
    }
}

/// Local assistant conversation. Replies are canned; there is no chat backend.
#[derive(Debug, Clone)]
pub struct ChatSession {
    messages: Vec<ChatMessage>,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            messages: vec![ChatMessage::new(Sender::Assistant, GREETING)],
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Appends the user's message and the assistant's reply.
    ///
    /// Blank input is ignored and returns `None`.
    pub fn send(&mut self, text: &str) -> Option<&ChatMessage> {
        if text.trim().is_empty() {
            return None;
        }
        self.messages.push(ChatMessage::new(Sender::User, text));
        self.messages
            .push(ChatMessage::new(Sender::Assistant, CANNED_REPLY));
        self.messages.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_greeting() {
        let chat = ChatSession::new();
        assert_eq!(chat.messages().len(), 1);
        assert_eq!(chat.messages()[0].sender, Sender::Assistant);
        assert!(chat.messages()[0].text.starts_with("Hi!"));
    }

    #[test]
    fn blank_input_is_ignored() {
        let mut chat = ChatSession::new();
        assert!(chat.send("   ").is_none());
        assert!(chat.send("").is_none());
        assert_eq!(chat.messages().len(), 1);
    }

    #[test]
    fn send_appends_message_and_reply() {
        let mut chat = ChatSession::new();
        let reply = chat.send("Is bread ok?").unwrap();
        assert_eq!(reply.sender, Sender::Assistant);

        let messages = chat.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].sender, Sender::User);
        assert_eq!(messages[1].text, "Is bread ok?");
        assert_ne!(messages[1].id, messages[2].id);
        assert!(messages[1].sent_at <= messages[2].sent_at);
    }
}
