use bytes::Bytes;
use std::borrow::Cow;
use std::sync::Arc;

/// An immutable message: a topic name plus a payload of raw bytes.
///
/// Messages are cheap to clone; the topic and payload are shared, never
/// copied. Delivered messages carry the fully qualified topic (including
/// the source gateway), while gateways see localized topics.
#[derive(Debug, Clone)]
pub struct Message {
    topic: Arc<str>,
    payload: Bytes,
}

impl Message {
    /// Creates a message with the given topic and payload bytes.
    pub fn new(topic: impl AsRef<str>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: Arc::from(topic.as_ref()),
            payload: payload.into(),
        }
    }

    /// Creates a message with a UTF-8 text payload.
    pub fn text(topic: impl AsRef<str>, payload: impl AsRef<str>) -> Self {
        Self {
            topic: Arc::from(topic.as_ref()),
            payload: Bytes::copy_from_slice(payload.as_ref().as_bytes()),
        }
    }

    /// Creates a message with an empty payload.
    pub fn empty(topic: impl AsRef<str>) -> Self {
        Self {
            topic: Arc::from(topic.as_ref()),
            payload: Bytes::new(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The payload decoded as UTF-8, with invalid sequences replaced.
    pub fn content(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// The same payload under the topic with its head (the gateway id)
    /// removed. `split_at` is the byte index of the separating `/`.
    pub(crate) fn localized(&self, split_at: usize) -> Message {
        Self {
            topic: Arc::from(&self.topic[split_at + 1..]),
            payload: self.payload.clone(),
        }
    }

    /// The same payload under `head/<topic>`, used when handing a received
    /// message to subscribers.
    pub(crate) fn prefixed(&self, head: &str) -> Message {
        Self {
            topic: Arc::from(format!("{}/{}", head, self.topic).as_str()),
            payload: self.payload.clone(),
        }
    }
}

/// The listener half of a subscription, invoked on the dispatch thread for
/// every matching message. Any `Fn(&Message)` closure qualifies.
///
/// Listeners must not block; they run inside the dispatch loop. A panic in
/// a listener is fail-fast and takes the dispatch thread down.
pub trait MessageListener: Send + Sync + 'static {
    fn on_message(&self, message: &Message);
}

impl<F> MessageListener for F
where
    F: Fn(&Message) + Send + Sync + 'static,
{
    fn on_message(&self, message: &Message) {
        self(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_content_round_trip() {
        let message = Message::text("gw/t", "hello");
        assert_eq!(message.topic(), "gw/t");
        assert_eq!(message.payload(), b"hello");
        assert_eq!(message.content(), "hello");
    }

    #[test]
    fn empty_payload() {
        let message = Message::empty("gw/t");
        assert!(message.payload().is_empty());
        assert_eq!(message.content(), "");
    }

    #[test]
    fn localize_and_prefix() {
        let message = Message::text("gw/a/b", "x");
        let local = message.localized(2);
        assert_eq!(local.topic(), "a/b");
        assert_eq!(local.payload(), b"x");
        let prefixed = local.prefixed("gw");
        assert_eq!(prefixed.topic(), "gw/a/b");
    }
}
