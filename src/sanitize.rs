//! Text-only rewriting of messages for backends that reject non-text parts

use crate::types::{ContentPart, Message, MessageContent};

/// Rewrite a message so its content is a single string.
///
/// Multi-part content keeps only its non-empty text parts, joined with `\n`
/// in their original order. Scalar text content and the role are untouched.
pub fn sanitize_message(message: &Message) -> Message {
    match &message.content {
        MessageContent::Text(_) => message.clone(),
        MessageContent::Parts(parts) => {
            let text = parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } if !text.is_empty() => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");

            Message {
                role: message.role,
                content: MessageContent::Text(text),
            }
        }
    }
}

/// Sanitize every message, preserving order.
pub fn sanitize_messages(messages: &[Message]) -> Vec<Message> {
    messages.iter().map(sanitize_message).collect()
}
