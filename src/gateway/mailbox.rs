use crate::bundle::BundleMap;
use crate::gateway::{Gateway, GatewayCtx, TopicValidator};
use crate::message::Message;

/// The built-in `$MAILBOX` gateway for in-process point-to-point messaging.
///
/// Accepts any single-level topic of the form `mb-<...>` and echoes every
/// published message back to its subscribers. Fresh mailbox topics come
/// from [`Application::create_mailbox_topic`](crate::app::Application::create_mailbox_topic).
pub(crate) struct MailboxGateway {
    ctx: Option<GatewayCtx>,
}

impl MailboxGateway {
    pub(crate) fn new() -> Self {
        Self { ctx: None }
    }
}

impl Gateway for MailboxGateway {
    fn on_start(&mut self, ctx: &GatewayCtx, _bundles: &BundleMap) -> anyhow::Result<()> {
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    fn on_publish(&mut self, message: Message) -> anyhow::Result<()> {
        if let Some(ctx) = &self.ctx {
            ctx.push_received(message);
        }
        Ok(())
    }

    fn topic_validator(&self) -> TopicValidator {
        TopicValidator::custom(|topic| topic.starts_with("mb-") && !topic.contains('/'))
    }
}
