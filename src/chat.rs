//! Chat panel state: an ordered transcript with per-request thinking placeholders.

use crate::error::RelayError;
use crate::relay::{Assistant, ChatMessage, Role, CHAT_FALLBACK};

pub const SYSTEM_PROMPT: &str = "You are NEON, an AI assistant who speaks in a cyberpunk style. \
You provide technical support to users. You can respond in any language the user uses, including Turkish.";

pub const GREETING: &str = "Neural Link v2.0 active. NEON online. How can I assist you, netrunner?";

/// placeholder text shown while a reply is outstanding
pub const THINKING: &str = "thinking...";

/// whether a message is a transient placeholder that must never reach the assistant
pub fn is_placeholder(message: &ChatMessage) -> bool {
    message.role == Role::Assistant && message.content == THINKING
}

/// history as sent upstream: placeholders stripped
pub fn request_history(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter(|m| !is_placeholder(m))
        .cloned()
        .collect()
}

#[derive(Debug, Clone)]
struct Entry {
    message: ChatMessage,
    /// set on placeholders, identifies the request they belong to
    pending: Option<u64>,
}

/// an outstanding request started by [`ChatSession::begin`]
#[derive(Debug)]
pub struct PendingReply {
    tag: u64,
    pub history: Vec<ChatMessage>,
}

#[derive(Debug, Clone)]
pub struct ChatSession {
    entries: Vec<Entry>,
    next_tag: u64,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new(SYSTEM_PROMPT, GREETING)
    }
}

impl ChatSession {
    pub fn new(system_prompt: &str, greeting: &str) -> Self {
        let seed = [ChatMessage::system(system_prompt), ChatMessage::assistant(greeting)];
        Self {
            entries: seed
                .into_iter()
                .map(|message| Entry {
                    message,
                    pending: None,
                })
                .collect(),
            next_tag: 0,
        }
    }

    /// Appends the user message and a placeholder tagged for this request.
    ///
    /// Returns `None` for blank input.
    pub fn begin(&mut self, text: &str) -> Option<PendingReply> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        self.entries.push(Entry {
            message: ChatMessage::user(text),
            pending: None,
        });
        let history = self
            .entries
            .iter()
            .filter(|e| e.pending.is_none())
            .map(|e| e.message.clone())
            .collect();

        let tag = self.next_tag;
        self.next_tag += 1;
        self.entries.push(Entry {
            message: ChatMessage::assistant(THINKING),
            pending: Some(tag),
        });
        Some(PendingReply { tag, history })
    }

    /// Replaces this request's placeholder with the reply, or the fallback on error.
    pub fn finish(&mut self, pending: PendingReply, result: Result<String, RelayError>) -> String {
        self.entries.retain(|e| e.pending != Some(pending.tag));
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("Chat relay failed: {}", e);
                CHAT_FALLBACK.to_string()
            }
        };
        self.entries.push(Entry {
            message: ChatMessage::assistant(reply.clone()),
            pending: None,
        });
        reply
    }

    /// begin, ask the assistant, finish
    pub async fn submit(&mut self, text: &str, assistant: &dyn Assistant) -> Option<String> {
        let pending = self.begin(text)?;
        let result = assistant.complete(&pending.history).await;
        Some(self.finish(pending, result))
    }

    pub fn is_waiting(&self) -> bool {
        self.entries.iter().any(|e| e.pending.is_some())
    }

    /// full transcript including system prompt and placeholders
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    /// what the panel renders: everything but the system prompt
    pub fn visible(&self) -> Vec<ChatMessage> {
        self.entries
            .iter()
            .filter(|e| e.message.role != Role::System)
            .map(|e| e.message.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Assistant for Echo {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, RelayError> {
            assert!(messages.iter().all(|m| !is_placeholder(m)));
            Ok(format!("echo: {}", messages.last().map(|m| m.content.as_str()).unwrap_or("")))
        }
    }

    struct Down;

    #[async_trait]
    impl Assistant for Down {
        async fn complete(&self, _: &[ChatMessage]) -> Result<String, RelayError> {
            Err(RelayError::Upstream {
                status: 500,
                body: "boom".into(),
            })
        }
    }

    #[test]
    fn session_is_seeded() {
        let chat = ChatSession::default();
        assert_eq!(chat.messages().len(), 2);
        assert_eq!(chat.visible(), vec![ChatMessage::assistant(GREETING)]);
    }

    #[tokio::test]
    async fn reply_replaces_placeholder() {
        let mut chat = ChatSession::default();
        let reply = chat.submit("  ping ", &Echo).await.unwrap();
        assert_eq!(reply, "echo: ping");
        assert!(!chat.is_waiting());
        assert_eq!(chat.visible().last().unwrap().content, "echo: ping");
    }

    #[tokio::test]
    async fn failure_never_leaves_placeholder() {
        let mut chat = ChatSession::default();
        let reply = chat.submit("ping", &Down).await.unwrap();
        assert_eq!(reply, CHAT_FALLBACK);
        assert!(chat.messages().iter().all(|m| !is_placeholder(m)));
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let mut chat = ChatSession::default();
        assert!(chat.submit("   ", &Echo).await.is_none());
        assert_eq!(chat.messages().len(), 2);
    }

    #[test]
    fn overlapping_requests_remove_only_their_own_placeholder() {
        let mut chat = ChatSession::default();
        let first = chat.begin("one").unwrap();
        let second = chat.begin("two").unwrap();
        assert!(second.history.iter().all(|m| !is_placeholder(m)));
        assert_eq!(chat.messages().iter().filter(|m| is_placeholder(m)).count(), 2);

        chat.finish(second, Ok("second".into()));
        assert!(chat.is_waiting());
        assert_eq!(chat.messages().iter().filter(|m| is_placeholder(m)).count(), 1);

        chat.finish(first, Err(RelayError::EmptyConversation));
        assert!(!chat.is_waiting());
        let visible: Vec<String> = chat.visible().into_iter().map(|m| m.content).collect();
        assert_eq!(visible, vec![GREETING, "one", "two", "second", CHAT_FALLBACK]);
    }

    #[test]
    fn request_history_drops_placeholders() {
        let messages = vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant(THINKING),
            ChatMessage::user(THINKING),
        ];
        assert_eq!(request_history(&messages).len(), 2);
    }
}
