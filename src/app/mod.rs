//! The application facade and the shared state behind it.
//!
//! An [`Application`] is a cheap handle over the shared core. Everything a
//! caller does from outside the dispatch thread either validates and
//! enqueues an action, or touches a dedicated lock (router, properties,
//! life-cycle setup); no gateway or data-item code ever runs inline.

pub(crate) mod action;
mod dispatch;
mod queues;
mod router;

pub use action::ScheduleHandle;

use crate::config::AppConfig;
use crate::error::{MessagingError, SetupError};
use crate::gateway::{
    self, DataGateway, DataTable, EchoGateway, Gateway, GatewayKind, MailboxGateway, SystemGateway,
};
use crate::item::{self, AnyDataItem, DataItem, DataItemSpec, ItemNode, ItemValue};
use crate::message::{Message, MessageListener};
use crate::module::Module;
use crate::storage::PersistentStorage;
use crate::topic;
use crate::utils::time::MonotonicClock;
use action::{Action, Schedule};
use ahash::AHashMap;
use parking_lot::Mutex;
use queues::ActionQueues;
use router::{Router, SubscriptionKey};
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::iterator::Signals;
use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// Identifier of the built-in system gateway.
pub const SYSTEM_GATEWAY: &str = "$SYS";

/// Identifier of the built-in mailbox gateway.
pub const MAILBOX_GATEWAY: &str = "$MAILBOX";

/// Recommended identifier for a gateway with data items.
pub const DATA_GATEWAY: &str = "data";

/// Recommended identifier for a local (echo) gateway.
pub const LOCAL_GATEWAY: &str = "local";

const SYSTEM_GATEWAY_INDEX: usize = 0;

/// Pre-launch construction state plus everything the dispatch thread takes
/// ownership of at startup.
pub(crate) struct LifeState {
    pub(crate) gateways: Vec<Box<dyn Gateway>>,
    pub(crate) modules: Vec<Box<dyn Module>>,
    pub(crate) modules_frozen: bool,
    pub(crate) storage: Option<Box<dyn PersistentStorage>>,
    pub(crate) autosave_period: Duration,
    pub(crate) shutdown_hooks: Vec<Box<dyn FnOnce(&Application) + Send>>,
}

/// State shared between all [`Application`] handles, the dispatch thread
/// and every gateway/data-item back-reference.
pub(crate) struct AppShared {
    pub(crate) clock: MonotonicClock,
    pub(crate) queues: ActionQueues,
    pub(crate) router: Mutex<Router>,
    pub(crate) life: Mutex<LifeState>,
    pub(crate) config: AppConfig,
    launched: AtomicBool,
    pub(crate) exit_requested: AtomicBool,
    pub(crate) save_requested: AtomicBool,
    storage_configured: AtomicBool,
    properties: Mutex<AHashMap<String, Arc<dyn Any + Send + Sync>>>,
    pub(crate) data_tables: Mutex<AHashMap<Arc<str>, Arc<DataTable>>>,
    pub(crate) dispatch_thread: OnceLock<ThreadId>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
    mailbox_counter: AtomicU64,
}

impl AppShared {
    pub(crate) fn enqueue(&self, action: Action) {
        self.queues.push(action);
    }

    /// Enqueues a message received on the gateway with the given index.
    /// Callable from any thread.
    pub(crate) fn push_received(&self, gateway: usize, message: Message) {
        self.enqueue(Action::Received { gateway, message });
    }

    /// Emits a message on the `$SYS` gateway.
    pub(crate) fn emit_system(&self, topic_name: &str) {
        self.push_received(SYSTEM_GATEWAY_INDEX, Message::empty(topic_name));
    }

    /// Asks the dispatch loop to save state after the current action.
    pub(crate) fn request_save(&self) {
        self.save_requested.store(true, Ordering::Relaxed);
    }

    pub(crate) fn request_exit(&self) {
        self.exit_requested.store(true, Ordering::SeqCst);
        self.queues.notify();
    }
}

/// The in-process application core.
///
/// Unifies message sources (gateways) under one MQTT-style topic
/// namespace, serializes all event handling on a single dispatch thread
/// and projects remote or derived values as observable data items.
///
/// Handles are cheap clones of the same application; all configuration
/// methods reject once [`launch`](Application::launch) has been called.
#[derive(Clone)]
pub struct Application {
    shared: Arc<AppShared>,
}

impl Application {
    /// Creates an application with default configuration. The built-in
    /// `$SYS` and `$MAILBOX` gateways are attached from the start.
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    /// Creates an application with the given configuration.
    pub fn with_config(config: AppConfig) -> Self {
        let autosave_period = config.autosave_period();
        let app = Self {
            shared: Arc::new(AppShared {
                clock: MonotonicClock::new(),
                queues: ActionQueues::new(),
                router: Mutex::new(Router::new()),
                life: Mutex::new(LifeState {
                    gateways: Vec::new(),
                    modules: Vec::new(),
                    modules_frozen: false,
                    storage: None,
                    autosave_period,
                    shutdown_hooks: Vec::new(),
                }),
                config,
                launched: AtomicBool::new(false),
                exit_requested: AtomicBool::new(false),
                save_requested: AtomicBool::new(false),
                storage_configured: AtomicBool::new(false),
                properties: Mutex::new(AHashMap::new()),
                data_tables: Mutex::new(AHashMap::new()),
                dispatch_thread: OnceLock::new(),
                join_handle: Mutex::new(None),
                mailbox_counter: AtomicU64::new(0),
            }),
        };

        app.attach_gateway(
            SYSTEM_GATEWAY,
            GatewayKind::System,
            Box::new(SystemGateway::new()),
        )
        .and_then(|_| {
            app.attach_gateway(
                MAILBOX_GATEWAY,
                GatewayKind::Mailbox,
                Box::new(MailboxGateway::new()),
            )
        })
        .unwrap_or_else(|_| unreachable!("built-in gateway registration cannot fail"));

        app
    }

    /// Creates an application with a `data` data gateway and a `local`
    /// echo gateway already attached under their recommended names.
    pub fn create_simple() -> Self {
        let app = Self::new();
        app.add_data_gateway(DATA_GATEWAY)
            .and_then(|_| app.add_gateway(LOCAL_GATEWAY, EchoGateway::new()))
            .unwrap_or_else(|_| unreachable!("default gateway registration cannot fail"));
        app
    }

    pub(crate) fn from_shared(shared: Arc<AppShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &AppShared {
        &self.shared
    }

    // ---- gateways & data items -------------------------------------------

    /// Attaches a gateway under the given identifier. Rejected after
    /// launch; identifiers must match `[A-Za-z][A-Za-z0-9]*` and be unique.
    pub fn add_gateway(&self, id: &str, gateway: impl Gateway) -> Result<(), SetupError> {
        if !gateway::is_valid_gateway_id(id) {
            return Err(SetupError::InvalidGatewayId(id.to_owned()));
        }
        self.attach_gateway(id, GatewayKind::Messaging, Box::new(gateway))
    }

    /// Attaches a gateway managing data items. Data gateways accept no
    /// publications and start after all other gateways.
    pub fn add_data_gateway(&self, id: &str) -> Result<(), SetupError> {
        if !gateway::is_valid_gateway_id(id) {
            return Err(SetupError::InvalidGatewayId(id.to_owned()));
        }

        let table = DataTable::new(Arc::from(id));
        self.attach_gateway(
            id,
            GatewayKind::Data,
            Box::new(DataGateway::new(table.clone())),
        )?;
        self.shared
            .data_tables
            .lock()
            .insert(table.gateway_id().clone(), table);
        Ok(())
    }

    fn attach_gateway(
        &self,
        id: &str,
        kind: GatewayKind,
        gateway: Box<dyn Gateway>,
    ) -> Result<(), SetupError> {
        let mut router = self.shared.router.lock();
        let mut life = self.shared.life.lock();
        if self.is_launched() {
            return Err(SetupError::AlreadyLaunched);
        }
        if router.gateway_index(id).is_some() {
            return Err(SetupError::DuplicateGatewayId(id.to_owned()));
        }

        let validator = gateway.topic_validator();
        router.register_gateway(Arc::from(id), kind, validator);
        life.gateways.push(gateway);
        Ok(())
    }

    /// Adds a data item to a data gateway and returns its typed handle.
    /// The item's full identifier becomes `"gatewayId/itemId"`.
    pub fn add_data_item<T, S>(
        &self,
        gateway_id: &str,
        item_id: &str,
        spec: S,
    ) -> Result<DataItem<T>, SetupError>
    where
        T: ItemValue,
        S: DataItemSpec<T>,
    {
        if self.is_launched() {
            return Err(SetupError::AlreadyLaunched);
        }
        if !item::is_valid_item_id(item_id) {
            return Err(SetupError::InvalidDataItemId(item_id.to_owned()));
        }

        let tables = self.shared.data_tables.lock();
        let Some(table) = tables.get(gateway_id) else {
            return Err(if self.shared.router.lock().gateway_index(gateway_id).is_some() {
                SetupError::NotDataGateway(gateway_id.to_owned())
            } else {
                SetupError::UnknownGateway(gateway_id.to_owned())
            });
        };

        let full_id: Arc<str> = Arc::from(format!("{gateway_id}/{item_id}").as_str());
        let local_id: Arc<str> = Arc::from(item_id);
        let node = ItemNode::attach(
            full_id.clone(),
            local_id.clone(),
            Box::new(spec),
            Arc::downgrade(&self.shared),
            Arc::downgrade(table),
        );
        if !table.insert(local_id, node.clone()) {
            return Err(SetupError::DuplicateDataItem(full_id.to_string()));
        }
        Ok(DataItem { node })
    }

    /// Looks up a data item by its full identifier (`"gatewayId/itemId"`)
    /// and re-derives the typed handle. `Ok(None)` when no such item
    /// exists; an error when the stored value type differs from `T`.
    pub fn get_data_item<T: ItemValue>(&self, id: &str) -> Result<Option<DataItem<T>>, SetupError> {
        let Some(slash) = id.find('/') else {
            return Ok(None);
        };
        let (gateway_id, item_id) = (&id[..slash], &id[slash + 1..]);

        let node: Option<Arc<dyn AnyDataItem>> = {
            let tables = self.shared.data_tables.lock();
            tables.get(gateway_id).and_then(|table| table.get(item_id))
        };
        let Some(node) = node else {
            return Ok(None);
        };

        if node.value_type() != TypeId::of::<T>() {
            return Err(SetupError::DataItemTypeMismatch {
                id: id.to_owned(),
                requested: std::any::type_name::<T>(),
                actual: node.value_type_name(),
            });
        }
        Ok(node
            .as_any()
            .downcast::<ItemNode<T>>()
            .ok()
            .map(|node| DataItem { node }))
    }

    /// Adds a module; modules are initialized in order at launch time.
    pub fn add_module(&self, module: impl Module) -> Result<(), SetupError> {
        let mut life = self.shared.life.lock();
        if self.is_launched() || life.modules_frozen {
            return Err(SetupError::AlreadyLaunched);
        }
        life.modules.push(Box::new(module));
        Ok(())
    }

    // ---- messaging -------------------------------------------------------

    /// Subscribes a listener to a topic filter with default priority 0.
    pub fn subscribe(
        &self,
        filter: &str,
        listener: impl MessageListener,
    ) -> Result<Subscription, MessagingError> {
        self.subscribe_with_priority(filter, listener, 0)
    }

    /// Subscribes a listener to a topic filter. For one message, listeners
    /// with greater priority run before listeners with smaller priority.
    pub fn subscribe_with_priority(
        &self,
        filter: &str,
        listener: impl MessageListener,
        priority: i32,
    ) -> Result<Subscription, MessagingError> {
        let listener: Arc<dyn MessageListener> = Arc::new(listener);
        let (key, actions) = self
            .shared
            .router
            .lock()
            .subscribe(filter, listener, priority)?;
        for action in actions {
            self.shared.enqueue(action);
        }
        Ok(Subscription {
            app: Arc::downgrade(&self.shared),
            key,
            closed: AtomicBool::new(false),
        })
    }

    /// Publishes a message. The topic is validated on this thread; the
    /// gateway's `on_publish` runs later on the dispatch thread. After an
    /// exit request the message is silently dropped.
    pub fn publish(&self, message: Message) -> Result<(), MessagingError> {
        let action = self.create_publish_action(&message)?;
        if self.shared.exit_requested.load(Ordering::Relaxed) {
            tracing::debug!(
                "[Application] dropping publication to \"{}\" after exit request",
                message.topic()
            );
            return Ok(());
        }
        self.shared.enqueue(action);
        Ok(())
    }

    /// Publishes a message once after `delay`.
    pub fn publish_later(
        &self,
        message: Message,
        delay: Duration,
    ) -> Result<ScheduleHandle, MessagingError> {
        let action = self.create_publish_action(&message)?;
        Ok(self.schedule(action, Schedule::once(delay)))
    }

    /// Publishes a message periodically; the next execution time is
    /// derived from the planned one, so delays do not accumulate.
    pub fn publish_at_fixed_rate(
        &self,
        message: Message,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduleHandle, MessagingError> {
        let action = self.create_publish_action(&message)?;
        Ok(self.schedule(action, Schedule::fixed_rate(initial_delay, period)))
    }

    /// Publishes a message periodically; each period starts when the
    /// previous publication was handed to the dispatch loop.
    pub fn publish_with_fixed_delay(
        &self,
        message: Message,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduleHandle, MessagingError> {
        let action = self.create_publish_action(&message)?;
        Ok(self.schedule(action, Schedule::fixed_delay(initial_delay, period)))
    }

    /// Runs a callback on the dispatch thread after `delay`.
    pub fn invoke_later(
        &self,
        callback: impl Fn(&Application) + Send + Sync + 'static,
        delay: Duration,
    ) -> ScheduleHandle {
        self.schedule(
            Action::Run {
                callback: Arc::new(callback),
            },
            Schedule::once(delay),
        )
    }

    /// Runs a callback on the dispatch thread at a fixed rate.
    pub fn invoke_at_fixed_rate(
        &self,
        callback: impl Fn(&Application) + Send + Sync + 'static,
        initial_delay: Duration,
        period: Duration,
    ) -> ScheduleHandle {
        self.schedule(
            Action::Run {
                callback: Arc::new(callback),
            },
            Schedule::fixed_rate(initial_delay, period),
        )
    }

    /// Runs a callback on the dispatch thread with a fixed delay between
    /// executions.
    pub fn invoke_with_fixed_delay(
        &self,
        callback: impl Fn(&Application) + Send + Sync + 'static,
        initial_delay: Duration,
        period: Duration,
    ) -> ScheduleHandle {
        self.schedule(
            Action::Run {
                callback: Arc::new(callback),
            },
            Schedule::fixed_delay(initial_delay, period),
        )
    }

    fn schedule(&self, action: Action, schedule: Arc<Schedule>) -> ScheduleHandle {
        self.shared
            .queues
            .push_scheduled(action, schedule.clone(), self.shared.clock.now_nanos());
        ScheduleHandle {
            schedule,
            app: Arc::downgrade(&self.shared),
        }
    }

    fn create_publish_action(&self, message: &Message) -> Result<Action, MessagingError> {
        let topic_name = message.topic();
        if !topic::is_valid_topic_name(topic_name)
            || topic_name.contains('+')
            || topic_name.contains('#')
        {
            return Err(MessagingError::InvalidTopic(topic_name.to_owned()));
        }
        let Some(slash) = topic_name.find('/') else {
            return Err(MessagingError::MissingSubtopic(topic_name.to_owned()));
        };
        let gateway_id = &topic_name[..slash];
        let localized = &topic_name[slash + 1..];

        let router = self.shared.router.lock();
        let Some(index) = router.gateway_index(gateway_id) else {
            return Err(MessagingError::UnknownGateway(gateway_id.to_owned()));
        };
        if !router.entry(index).validator.accepts(localized) {
            return Err(MessagingError::TopicRejected {
                gateway: gateway_id.to_owned(),
                topic: localized.to_owned(),
            });
        }
        drop(router);

        Ok(Action::Publish {
            gateway: index,
            message: message.localized(slash),
        })
    }

    /// Returns a fresh, process-unique mailbox topic under `$MAILBOX`.
    pub fn create_mailbox_topic(&self) -> String {
        let uid = self.shared.mailbox_counter.fetch_add(1, Ordering::Relaxed);
        format!("{MAILBOX_GATEWAY}/mb-uid.{uid:x}")
    }

    // ---- persistence & properties ----------------------------------------

    /// Sets the storage used to restore and save data-item state. Rejected
    /// after launch.
    pub fn set_persistent_storage(
        &self,
        storage: impl PersistentStorage,
    ) -> Result<(), SetupError> {
        let mut life = self.shared.life.lock();
        if self.is_launched() {
            return Err(SetupError::AlreadyLaunched);
        }
        life.storage = Some(Box::new(storage));
        self.shared.storage_configured.store(true, Ordering::Relaxed);
        Ok(())
    }

    pub fn has_persistent_storage(&self) -> bool {
        self.shared.storage_configured.load(Ordering::Relaxed)
    }

    /// Sets the autosave period; `Duration::ZERO` disables autosave.
    /// Rejected after launch.
    pub fn set_autosave_period(&self, period: Duration) -> Result<(), SetupError> {
        let mut life = self.shared.life.lock();
        if self.is_launched() {
            return Err(SetupError::AlreadyLaunched);
        }
        life.autosave_period = period;
        Ok(())
    }

    pub fn autosave_period(&self) -> Duration {
        self.shared.life.lock().autosave_period
    }

    /// Stores a named application property. Properties are freely mutable
    /// from any thread, also after launch.
    pub fn set_property<V: Any + Send + Sync>(&self, name: impl Into<String>, value: V) {
        self.shared
            .properties
            .lock()
            .insert(name.into(), Arc::new(value));
    }

    /// A typed snapshot of a property; `None` when the property is absent
    /// or has a different type.
    pub fn property<V: Any + Send + Sync + Clone>(&self, name: &str) -> Option<V> {
        self.shared
            .properties
            .lock()
            .get(name)
            .and_then(|value| value.downcast_ref::<V>().cloned())
    }

    pub fn property_or<V: Any + Send + Sync + Clone>(&self, name: &str, default: V) -> V {
        self.property(name).unwrap_or(default)
    }

    // ---- lifecycle -------------------------------------------------------

    /// Registers a callback executed on the dispatch thread when the loop
    /// exits, before the final state save.
    pub fn add_shutdown_hook(&self, hook: impl FnOnce(&Application) + Send + 'static) {
        self.shared.life.lock().shutdown_hooks.push(Box::new(hook));
    }

    /// Initializes all modules, then starts the dispatch thread: gateways
    /// are started in order (`$SYS` first, data gateways last) and the
    /// event loop begins. Most configuration is rejected from here on.
    pub fn launch(&self) -> Result<(), SetupError> {
        let modules = {
            let mut life = self.shared.life.lock();
            if self.is_launched() || life.modules_frozen {
                return Err(SetupError::AlreadyLaunched);
            }
            life.modules_frozen = true;
            std::mem::take(&mut life.modules)
        };

        if !modules.is_empty() {
            tracing::info!("[Application] initializing {} module(s)", modules.len());
        }
        for mut module in modules {
            module
                .on_initialize(self)
                .map_err(|e| SetupError::ModuleInitFailed(format!("{e:#}")))?;
        }

        if self.shared.launched.swap(true, Ordering::SeqCst) {
            return Err(SetupError::AlreadyLaunched);
        }

        if self.shared.config.handle_signals {
            spawn_signal_watcher(Arc::downgrade(&self.shared));
        }

        let app = self.clone();
        let handle = thread::Builder::new()
            .name("hubrt-dispatch".into())
            .spawn(move || dispatch::run(app))
            .map_err(|e| SetupError::LaunchFailed(e.to_string()))?;
        *self.shared.join_handle.lock() = Some(handle);
        Ok(())
    }

    /// Blocks until the dispatch loop has terminated and the gateways are
    /// stopped.
    pub fn join(&self) -> Result<(), SetupError> {
        let handle = self.shared.join_handle.lock().take();
        match handle {
            Some(handle) => {
                let _ = handle.join();
                Ok(())
            }
            None => Err(SetupError::NotLaunched),
        }
    }

    /// Requests application exit: the loop finishes its current action,
    /// runs the shutdown hooks, saves state and stops the gateways.
    /// Callable from any thread.
    pub fn request_exit(&self) {
        self.shared.request_exit();
    }

    pub fn is_launched(&self) -> bool {
        self.shared.launched.load(Ordering::SeqCst)
    }

    /// Whether the caller is running on this application's dispatch thread.
    pub fn is_in_application_thread(&self) -> bool {
        self.shared.dispatch_thread.get() == Some(&thread::current().id())
    }
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

/// A live binding of (topic filter, listener, priority).
///
/// Closing is explicit and idempotent; dropping the subscription without
/// closing keeps the listener attached for the lifetime of the
/// application.
pub struct Subscription {
    app: Weak<AppShared>,
    key: SubscriptionKey,
    closed: AtomicBool,
}

impl Subscription {
    /// The original topic filter, including the gateway head.
    pub fn topic_filter(&self) -> &str {
        &self.key.filter
    }

    /// Detaches the listener. When the last subscription of a filter is
    /// closed, the affected gateways are told to drop the filter.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(shared) = self.app.upgrade() {
            let actions = shared.router.lock().unsubscribe(&self.key);
            for action in actions {
                shared.enqueue(action);
            }
        }
    }
}

fn spawn_signal_watcher(shared: Weak<AppShared>) {
    let mut signals = match Signals::new(TERM_SIGNALS) {
        Ok(signals) => signals,
        Err(e) => {
            tracing::warn!("[Application] cannot install termination signal handlers: {e}");
            return;
        }
    };

    let spawned = thread::Builder::new()
        .name("hubrt-signals".into())
        .spawn(move || {
            if signals.forever().next().is_some() {
                tracing::info!("[Application] termination signal received");
                if let Some(shared) = shared.upgrade() {
                    shared.request_exit();
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("[Application] cannot spawn signal watcher: {e}");
    }
}
