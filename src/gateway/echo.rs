use crate::bundle::BundleMap;
use crate::gateway::{Gateway, GatewayCtx, TopicValidator};
use crate::message::Message;

/// A local gateway that echoes each published message back to its
/// subscribers. Conventionally attached as `local`.
#[derive(Default)]
pub struct EchoGateway {
    ctx: Option<GatewayCtx>,
}

impl EchoGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Gateway for EchoGateway {
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
        TopicValidator::AcceptAll
    }
}
