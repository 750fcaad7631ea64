//! Gateways: adapters between external message sources and the topic
//! namespace of an application.
//!
//! All lifecycle hooks (`on_*`) run exclusively on the dispatch thread,
//! strictly between `on_start` and `on_stop`. Implementations never call
//! the hooks themselves; they only consume them. Received messages travel
//! the other way, through [`GatewayCtx::push_received`], which is safe from
//! any thread.

mod data;
mod echo;
mod mailbox;
mod system;

pub(crate) use data::DataTable;
pub use data::DataGateway;
pub use echo::EchoGateway;
pub(crate) use mailbox::MailboxGateway;
pub(crate) use system::SystemGateway;

use crate::app::{AppShared, Application};
use crate::bundle::BundleMap;
use crate::message::Message;
use std::fmt;
use std::sync::{Arc, Weak};

/// Selection tag for built-in gateway behavior: start order, data-item
/// capability. Assigned by the registration path, never derived from the
/// concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GatewayKind {
    System,
    Mailbox,
    Messaging,
    Data,
}

impl GatewayKind {
    /// Start rank: `$SYS` first, then plain messaging gateways, data
    /// gateways last (their subscriptions may depend on other gateways
    /// being up). Stop order is the exact reverse.
    pub(crate) fn start_rank(self) -> u8 {
        match self {
            GatewayKind::System => 0,
            GatewayKind::Mailbox | GatewayKind::Messaging => 1,
            GatewayKind::Data => 2,
        }
    }
}

/// Thread-safe check for publication topics, captured from the gateway at
/// registration so the publish path can validate on the caller thread while
/// the gateway itself is owned by the dispatch thread.
#[derive(Clone)]
pub enum TopicValidator {
    /// Every valid topic name is accepted.
    AcceptAll,
    /// The gateway accepts no publications at all.
    RejectAll,
    /// Gateway-specific predicate over the localized topic.
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl TopicValidator {
    pub fn custom(check: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        TopicValidator::Custom(Arc::new(check))
    }

    pub fn accepts(&self, topic: &str) -> bool {
        match self {
            TopicValidator::AcceptAll => true,
            TopicValidator::RejectAll => false,
            TopicValidator::Custom(check) => check(topic),
        }
    }
}

impl fmt::Debug for TopicValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicValidator::AcceptAll => write!(f, "TopicValidator::AcceptAll"),
            TopicValidator::RejectAll => write!(f, "TopicValidator::RejectAll"),
            TopicValidator::Custom(_) => write!(f, "TopicValidator::Custom(..)"),
        }
    }
}

/// Handle given to a gateway at start time. Carries the gateway identity
/// and the way back into the application: [`push_received`] funnels a
/// message from any thread into the dispatch loop.
///
/// [`push_received`]: GatewayCtx::push_received
#[derive(Clone)]
pub struct GatewayCtx {
    pub(crate) id: Arc<str>,
    pub(crate) index: usize,
    pub(crate) app: Weak<AppShared>,
}

impl GatewayCtx {
    /// The identifier under which the gateway is attached.
    pub fn gateway_id(&self) -> &str {
        &self.id
    }

    /// The owning application, unless it is already shutting down.
    pub fn application(&self) -> Option<Application> {
        self.app.upgrade().map(Application::from_shared)
    }

    /// Hands a received message (with a localized topic) to the application
    /// for routing. Callable from any thread.
    pub fn push_received(&self, message: Message) {
        if let Some(shared) = self.app.upgrade() {
            shared.push_received(self.index, message);
        }
    }
}

impl fmt::Debug for GatewayCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayCtx").field("id", &self.id).finish()
    }
}

/// The gateway contract. See the module docs for the threading rules.
pub trait Gateway: Send + 'static {
    /// Called once when the application starts the gateway on the dispatch
    /// thread. `bundles` holds this gateway's saved state, keyed by
    /// `"gatewayId/subkey"`. An error aborts the whole startup.
    fn on_start(&mut self, ctx: &GatewayCtx, bundles: &BundleMap) -> anyhow::Result<()>;

    /// A first subscription for this (localized) topic filter appeared.
    fn on_add_topic_filter(&mut self, filter: &str) {
        let _ = filter;
    }

    /// The last subscription for this (localized) topic filter was closed.
    fn on_remove_topic_filter(&mut self, filter: &str) {
        let _ = filter;
    }

    /// Publishes a message whose topic was accepted by the validator. An
    /// error is logged by the dispatch loop and otherwise ignored.
    fn on_publish(&mut self, message: Message) -> anyhow::Result<()>;

    /// Writes the gateway state as named bundles. Keys must be prefixed
    /// with the gateway id.
    fn on_save_state(&mut self, out: &mut BundleMap) -> anyhow::Result<()> {
        let _ = out;
        Ok(())
    }

    /// Called when the application stops the gateway, in reverse start
    /// order.
    fn on_stop(&mut self) {}

    /// The publication-topic check for this gateway. Must accept exactly
    /// the topics `on_publish` can handle; evaluated on caller threads.
    fn topic_validator(&self) -> TopicValidator {
        TopicValidator::AcceptAll
    }
}

/// Returns whether the identifier is a valid public gateway id:
/// `[A-Za-z][A-Za-z0-9]*`. The reserved `$`-prefixed ids of the built-in
/// gateways intentionally fail this check.
pub fn is_valid_gateway_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_id_validation() {
        assert!(is_valid_gateway_id("local"));
        assert!(is_valid_gateway_id("gw2"));
        assert!(!is_valid_gateway_id(""));
        assert!(!is_valid_gateway_id("2gw"));
        assert!(!is_valid_gateway_id("$SYS"));
        assert!(!is_valid_gateway_id("a-b"));
    }

    #[test]
    fn validators() {
        assert!(TopicValidator::AcceptAll.accepts("anything"));
        assert!(!TopicValidator::RejectAll.accepts("anything"));
        let custom = TopicValidator::custom(|t| t.starts_with("mb-"));
        assert!(custom.accepts("mb-1"));
        assert!(!custom.accepts("xb-1"));
    }
}
