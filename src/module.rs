use crate::app::Application;

/// A reusable collection of gateways, data items and message handlers.
///
/// Modules added via [`Application::add_module`] are initialized in
/// registration order at the beginning of [`Application::launch`], on the
/// launching thread. A failed initialization aborts the launch.
pub trait Module: Send + 'static {
    fn on_initialize(&mut self, app: &Application) -> anyhow::Result<()>;
}
