//! Data items: observable, typed values managed by a data gateway.
//!
//! A data item couples a value cell with a user-supplied behavior (a
//! [`DataItemSpec`]) and an optional dependency graph over other items.
//! All mutation happens on the dispatch thread; external callers interact
//! through the cheap, clonable [`DataItem`] handle, which only reads the
//! value or enqueues actions.

mod accumulating;
mod alias;
mod local;

pub use accumulating::AccumulatingDataItem;
pub use alias::AliasDataItem;
pub use local::LocalDataItem;

use crate::app::AppShared;
use crate::app::Application;
use crate::app::action::Action;
use crate::bundle::Bundle;
use crate::error::SetupError;
use crate::gateway::DataTable;
use crate::topic;
use anyhow::bail;
use parking_lot::{Mutex, RwLock};
use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Bounds every data-item value type must satisfy. Blanket-implemented.
pub trait ItemValue: Clone + PartialEq + Send + Sync + 'static {}

impl<T: Clone + PartialEq + Send + Sync + 'static> ItemValue for T {}

/// Lifecycle state of a data item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ItemState {
    Created = 0,
    Attached = 1,
    Activating = 2,
    Active = 3,
    Deactivating = 4,
    Deactivated = 5,
}

impl ItemState {
    fn from_u8(raw: u8) -> ItemState {
        match raw {
            1 => ItemState::Attached,
            2 => ItemState::Activating,
            3 => ItemState::Active,
            4 => ItemState::Deactivating,
            5 => ItemState::Deactivated,
            _ => ItemState::Created,
        }
    }
}

/// What a behavior wants to happen after handling a change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// The change affected the local source; resynchronize immediately.
    Synchronize,
    /// The change was forwarded or ignored; the value is untouched for now.
    Deferred,
}

/// The behavior contract of a data item. All methods run on the dispatch
/// thread, between activation and deactivation.
pub trait DataItemSpec<T: ItemValue>: Send + 'static {
    /// Whether change requests are rejected for this item.
    fn read_only(&self) -> bool {
        false
    }

    /// Called once when the owning gateway starts. Dependencies on other
    /// items and an immediate recomputation can be requested through the
    /// context; `saved` carries the state from the previous run (possibly
    /// empty).
    fn on_activate(&mut self, ctx: &mut ActivationCtx<'_>, saved: &Bundle) -> anyhow::Result<()> {
        let _ = (ctx, saved);
        Ok(())
    }

    /// Pure recomputation of the value from the item's sources. Must be
    /// idempotent; `None` means "no valid value".
    fn on_synchronize(&mut self) -> anyhow::Result<Option<T>>;

    /// Handles a queued change request.
    fn on_change_requested(&mut self, new_value: T) -> anyhow::Result<ChangeOutcome> {
        let _ = new_value;
        Ok(ChangeOutcome::Deferred)
    }

    /// Writes serializable state into the item's bundle.
    fn on_save_state(&mut self, out: &mut Bundle) -> anyhow::Result<()> {
        let _ = out;
        Ok(())
    }

    /// Called when the owning gateway stops.
    fn on_deactivate(&mut self) {}
}

/// Context handed to [`DataItemSpec::on_activate`]. It exists only during
/// activation, so declaring dependencies anywhere else is unrepresentable.
pub struct ActivationCtx<'a> {
    app: &'a Application,
    dependencies: Vec<ItemRef>,
    update_requested: bool,
}

impl ActivationCtx<'_> {
    pub fn application(&self) -> &Application {
        self.app
    }

    /// Declares the upstream items this item recomputes from. Duplicates
    /// are ignored; self-references, items of other applications and
    /// dependency cycles abort the activation.
    pub fn set_dependencies(&mut self, dependencies: &[ItemRef]) {
        self.dependencies = dependencies.to_vec();
    }

    /// Requests one recomputation right after `on_activate` returns, still
    /// within the activation step.
    pub fn request_update(&mut self) {
        self.update_requested = true;
    }
}

/// Type-erased reference to a data item, used to declare dependencies.
#[derive(Clone)]
pub struct ItemRef {
    pub(crate) node: Arc<dyn AnyDataItem>,
}

/// The type-erased interface the engine drives data items through. Every
/// method is dispatch-thread only unless noted.
pub(crate) trait AnyDataItem: Send + Sync + 'static {
    fn id(&self) -> &str;
    fn local_id(&self) -> &str;
    fn read_only(&self) -> bool;
    fn value_type(&self) -> TypeId;
    fn value_type_name(&self) -> &'static str;
    fn state(&self) -> ItemState;
    fn belongs_to(&self, app: &Weak<AppShared>) -> bool;

    fn activate(&self, app: &Application, saved: &Bundle) -> anyhow::Result<()>;
    fn deactivate(&self);
    fn synchronize(&self);
    fn apply_change(&self, value: &(dyn Any + Send + Sync));
    fn save_state(&self, out: &mut Bundle) -> anyhow::Result<()>;

    fn add_dependant(&self, dependant: Weak<dyn AnyDataItem>);
    fn remove_dependant(&self, id: &str);
    /// Whether this item (transitively) depends on `target`.
    fn depends_on(&self, target: &Arc<dyn AnyDataItem>) -> bool;

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// The engine-side node of a data item: value cell, state machine, behavior
/// and graph links. Owned by the data gateway's table; handles and
/// dependants hold `Arc`/`Weak` references to it.
pub(crate) struct ItemNode<T: ItemValue> {
    id: Arc<str>,
    local_id: Arc<str>,
    read_only: bool,
    app: Weak<AppShared>,
    table: Weak<DataTable>,
    value: RwLock<Option<T>>,
    state: AtomicU8,
    sync_pending: AtomicBool,
    spec: Mutex<Box<dyn DataItemSpec<T>>>,
    dependencies: Mutex<Vec<Arc<dyn AnyDataItem>>>,
    dependants: Mutex<Vec<Weak<dyn AnyDataItem>>>,
    self_ref: OnceLock<Weak<dyn AnyDataItem>>,
}

impl<T: ItemValue> ItemNode<T> {
    /// Creates the node and wires up its self-reference; used by
    /// `Application::add_data_item`.
    pub(crate) fn attach(
        id: Arc<str>,
        local_id: Arc<str>,
        spec: Box<dyn DataItemSpec<T>>,
        app: Weak<AppShared>,
        table: Weak<DataTable>,
    ) -> Arc<Self> {
        let read_only = spec.read_only();
        let node = Arc::new(Self {
            id,
            local_id,
            read_only,
            app,
            table,
            value: RwLock::new(None),
            state: AtomicU8::new(ItemState::Attached as u8),
            sync_pending: AtomicBool::new(false),
            spec: Mutex::new(spec),
            dependencies: Mutex::new(Vec::new()),
            dependants: Mutex::new(Vec::new()),
            self_ref: OnceLock::new(),
        });
        let any: Arc<dyn AnyDataItem> = node.clone();
        let _ = node.self_ref.set(Arc::downgrade(&any));
        node
    }

    fn set_state(&self, state: ItemState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    fn any_self(&self) -> Option<Arc<dyn AnyDataItem>> {
        self.self_ref.get().and_then(Weak::upgrade)
    }

    pub(crate) fn current_value(&self) -> Option<T> {
        self.value.read().clone()
    }

    fn install_dependencies(&self, declared: Vec<ItemRef>) -> anyhow::Result<()> {
        if declared.is_empty() {
            return Ok(());
        }
        let Some(self_arc) = self.any_self() else {
            bail!("data item \"{}\" is no longer attached", self.id);
        };

        let mut unique: Vec<Arc<dyn AnyDataItem>> = Vec::new();
        for dependency in declared {
            let node = dependency.node;
            if unique.iter().any(|known| Arc::ptr_eq(known, &node)) {
                continue;
            }
            if Arc::ptr_eq(&node, &self_arc) {
                bail!("data item \"{}\" cannot depend on itself", self.id);
            }
            if !node.belongs_to(&self.app) {
                bail!(
                    "dependency \"{}\" of \"{}\" belongs to another application",
                    node.id(),
                    self.id
                );
            }
            unique.push(node);
        }

        for dependency in &unique {
            if dependency.depends_on(&self_arc) {
                bail!("circular dependency of data item \"{}\"", self.id);
            }
        }

        for dependency in &unique {
            dependency.add_dependant(Arc::downgrade(&self_arc));
        }
        *self.dependencies.lock() = unique;
        Ok(())
    }
}

impl<T: ItemValue> AnyDataItem for ItemNode<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn local_id(&self) -> &str {
        &self.local_id
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn value_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn value_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn state(&self) -> ItemState {
        ItemState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn belongs_to(&self, app: &Weak<AppShared>) -> bool {
        Weak::ptr_eq(&self.app, app)
    }

    fn activate(&self, app: &Application, saved: &Bundle) -> anyhow::Result<()> {
        self.set_state(ItemState::Activating);
        let mut ctx = ActivationCtx {
            app,
            dependencies: Vec::new(),
            update_requested: false,
        };
        self.spec.lock().on_activate(&mut ctx, saved)?;
        let ActivationCtx {
            dependencies,
            update_requested,
            ..
        } = ctx;

        self.install_dependencies(dependencies)?;
        if update_requested {
            self.synchronize();
        }
        self.set_state(ItemState::Active);
        Ok(())
    }

    fn deactivate(&self) {
        self.set_state(ItemState::Deactivating);
        let dependencies = std::mem::take(&mut *self.dependencies.lock());
        for dependency in dependencies {
            dependency.remove_dependant(&self.id);
        }
        self.spec.lock().on_deactivate();
        self.set_state(ItemState::Deactivated);
    }

    fn synchronize(&self) {
        self.sync_pending.store(false, Ordering::Relaxed);

        let new_value = match self.spec.lock().on_synchronize() {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(
                    "[DataItem] value synchronization of \"{}\" failed: {e:#}",
                    self.id
                );
                return;
            }
        };

        {
            let current = self.value.read();
            if *current == new_value {
                return;
            }
        }
        *self.value.write() = new_value;

        if let Some(table) = self.table.upgrade() {
            table.notify_value_changed(&self.local_id);
        }

        let dependants: Vec<Arc<dyn AnyDataItem>> = self
            .dependants
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for dependant in dependants {
            dependant.synchronize();
        }
    }

    fn apply_change(&self, value: &(dyn Any + Send + Sync)) {
        let Some(new_value) = value.downcast_ref::<T>() else {
            tracing::error!(
                "[DataItem] change request for \"{}\" carried a value of an unexpected type",
                self.id
            );
            return;
        };

        // the outcome is matched outside the statement so the behavior lock
        // is released before a resynchronization takes it again
        let outcome = self.spec.lock().on_change_requested(new_value.clone());
        match outcome {
            Ok(ChangeOutcome::Synchronize) => self.synchronize(),
            Ok(ChangeOutcome::Deferred) => {}
            Err(e) => {
                tracing::error!("[DataItem] change request for \"{}\" failed: {e:#}", self.id)
            }
        }
    }

    fn save_state(&self, out: &mut Bundle) -> anyhow::Result<()> {
        self.spec.lock().on_save_state(out)
    }

    fn add_dependant(&self, dependant: Weak<dyn AnyDataItem>) {
        self.dependants.lock().push(dependant);
    }

    fn remove_dependant(&self, id: &str) {
        self.dependants
            .lock()
            .retain(|weak| weak.upgrade().is_some_and(|item| item.id() != id));
    }

    fn depends_on(&self, target: &Arc<dyn AnyDataItem>) -> bool {
        self.dependencies
            .lock()
            .iter()
            .any(|dep| Arc::ptr_eq(dep, target) || dep.depends_on(target))
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Public, typed handle to a data item. Clonable and usable from any
/// thread; reads are lock-protected snapshots, writes go through the
/// action queue.
pub struct DataItem<T: ItemValue> {
    pub(crate) node: Arc<ItemNode<T>>,
}

impl<T: ItemValue> Clone for DataItem<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
        }
    }
}

impl<T: ItemValue> DataItem<T> {
    /// The full identifier, `"gatewayId/localId"`.
    pub fn id(&self) -> &str {
        self.node.id()
    }

    pub fn is_read_only(&self) -> bool {
        self.node.read_only
    }

    pub fn state(&self) -> ItemState {
        self.node.state()
    }

    /// The current value, or `None` while no valid value exists.
    pub fn value(&self) -> Option<T> {
        self.node.current_value()
    }

    pub fn has_valid_value(&self) -> bool {
        self.node.value.read().is_some()
    }

    /// Requests a value change. Read-only items reject synchronously; for
    /// writable items the behavior's `on_change_requested` runs later on
    /// the dispatch thread.
    pub fn request_change(&self, value: T) -> Result<(), SetupError> {
        if self.node.read_only {
            return Err(SetupError::ReadOnlyDataItem(self.node.id.to_string()));
        }
        if let Some(shared) = self.node.app.upgrade() {
            let item: Arc<dyn AnyDataItem> = self.node.clone();
            shared.enqueue(Action::RequestChange {
                item,
                value: Arc::new(value),
            });
        }
        Ok(())
    }

    /// Schedules a recomputation of the value on the dispatch thread.
    /// Idempotent while a synchronization is already pending.
    pub fn invalidate(&self) {
        if self.node.sync_pending.swap(true, Ordering::Relaxed) {
            return;
        }
        if let Some(shared) = self.node.app.upgrade() {
            let item: Arc<dyn AnyDataItem> = self.node.clone();
            shared.enqueue(Action::Synchronize { item });
        }
    }

    /// A type-erased reference for dependency declarations.
    pub fn item_ref(&self) -> ItemRef {
        ItemRef {
            node: self.node.clone(),
        }
    }
}

/// Returns whether the identifier is a valid data-item identifier:
/// `/`-separated levels of `[.A-Za-z0-9_]+`.
pub fn is_valid_item_id(id: &str) -> bool {
    topic::is_valid_topic_name(id)
        && topic::parse_hierarchy(id).iter().all(|level| {
            !level.is_empty()
                && level
                    .chars()
                    .all(|c| c == '.' || c == '_' || c.is_ascii_alphanumeric())
        })
}
