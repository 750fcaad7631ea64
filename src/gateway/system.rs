use crate::bundle::BundleMap;
use crate::gateway::{Gateway, GatewayCtx, TopicValidator};
use crate::message::Message;

/// The built-in `$SYS` gateway.
///
/// Accepts exactly two publication topics (case-insensitive): `exit`
/// requests application exit, `save` requests a state save. It emits
/// `start` once the application is up and `state-saved` after every save.
pub(crate) struct SystemGateway {
    ctx: Option<GatewayCtx>,
}

impl SystemGateway {
    pub(crate) fn new() -> Self {
        Self { ctx: None }
    }
}

impl Gateway for SystemGateway {
    fn on_start(&mut self, ctx: &GatewayCtx, _bundles: &BundleMap) -> anyhow::Result<()> {
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    fn on_publish(&mut self, message: Message) -> anyhow::Result<()> {
        let Some(app) = self.ctx.as_ref().and_then(GatewayCtx::application) else {
            return Ok(());
        };

        if message.topic().eq_ignore_ascii_case("exit") {
            tracing::info!("[SystemGateway] exit requested");
            app.request_exit();
        } else if message.topic().eq_ignore_ascii_case("save") {
            app.shared().request_save();
        }
        Ok(())
    }

    fn topic_validator(&self) -> TopicValidator {
        TopicValidator::custom(|topic| {
            topic.eq_ignore_ascii_case("exit") || topic.eq_ignore_ascii_case("save")
        })
    }
}
