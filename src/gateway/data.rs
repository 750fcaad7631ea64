use crate::bundle::{Bundle, BundleMap};
use crate::gateway::{Gateway, GatewayCtx, TopicValidator};
use crate::item::AnyDataItem;
use crate::message::Message;
use crate::topic::TopicFilter;
use ahash::{AHashMap, AHashSet};
use anyhow::Context;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};

/// One managed data item plus its parsed identifier (for filter matching).
struct ItemSlot {
    node: Arc<dyn AnyDataItem>,
    parsed_id: Vec<String>,
}

/// Registry and subscription bookkeeping of one data gateway, shared
/// between the gateway object (dispatch thread) and the application facade
/// (item registration and lookup on any thread).
pub(crate) struct DataTable {
    gateway_id: Arc<str>,
    inner: Mutex<TableInner>,
    ctx: OnceLock<GatewayCtx>,
}

struct TableInner {
    order: Vec<Arc<str>>,
    slots: AHashMap<Arc<str>, ItemSlot>,
    /// Number of live topic filters matching each item; an item emits
    /// value-change messages only while its count is positive.
    subscription_counts: AHashMap<Arc<str>, usize>,
    subscribed_filters: AHashSet<Arc<str>>,
}

impl DataTable {
    pub(crate) fn new(gateway_id: Arc<str>) -> Arc<Self> {
        Arc::new(Self {
            gateway_id,
            inner: Mutex::new(TableInner {
                order: Vec::new(),
                slots: AHashMap::new(),
                subscription_counts: AHashMap::new(),
                subscribed_filters: AHashSet::new(),
            }),
            ctx: OnceLock::new(),
        })
    }

    pub(crate) fn gateway_id(&self) -> &Arc<str> {
        &self.gateway_id
    }

    /// Registers an item; the id must be unused within this gateway.
    pub(crate) fn insert(&self, local_id: Arc<str>, node: Arc<dyn AnyDataItem>) -> bool {
        let mut inner = self.inner.lock();
        if inner.slots.contains_key(&local_id) {
            return false;
        }
        let parsed_id = crate::topic::parse_hierarchy(&local_id)
            .into_iter()
            .map(str::to_owned)
            .collect();
        inner.order.push(local_id.clone());
        inner.slots.insert(local_id, ItemSlot { node, parsed_id });
        true
    }

    pub(crate) fn get(&self, local_id: &str) -> Option<Arc<dyn AnyDataItem>> {
        self.inner.lock().slots.get(local_id).map(|s| s.node.clone())
    }

    fn items_in_order(&self) -> Vec<Arc<dyn AnyDataItem>> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.slots.get(id).map(|s| s.node.clone()))
            .collect()
    }

    /// Emits a received message carrying the item's local id as topic, but
    /// only while at least one topic filter matches the item. Invoked by
    /// item nodes on the dispatch thread.
    pub(crate) fn notify_value_changed(&self, local_id: &str) {
        let subscribed = self
            .inner
            .lock()
            .subscription_counts
            .contains_key(local_id);
        if !subscribed {
            return;
        }
        if let Some(ctx) = self.ctx.get() {
            ctx.push_received(Message::empty(local_id));
        }
    }

    fn matching_item_ids(inner: &TableInner, filter: &TopicFilter) -> Vec<Arc<str>> {
        inner
            .slots
            .iter()
            .filter(|(_, slot)| {
                let levels: Vec<&str> = slot.parsed_id.iter().map(String::as_str).collect();
                filter.matches(&levels)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Gateway managing a collection of data items. Constructed internally by
/// [`Application::add_data_gateway`](crate::app::Application::add_data_gateway);
/// it accepts no publications, its messages are the value-change
/// notifications of its items.
pub struct DataGateway {
    table: Arc<DataTable>,
}

impl DataGateway {
    pub(crate) fn new(table: Arc<DataTable>) -> Self {
        Self { table }
    }
}

impl Gateway for DataGateway {
    fn on_start(&mut self, ctx: &GatewayCtx, bundles: &BundleMap) -> anyhow::Result<()> {
        let _ = self.table.ctx.set(ctx.clone());

        let Some(app) = ctx.application() else {
            anyhow::bail!("application is gone");
        };
        let empty = Bundle::new();
        for item in self.table.items_in_order() {
            let saved = bundles.get(item.id()).unwrap_or(&empty);
            item.activate(&app, saved)
                .with_context(|| format!("activation of data item \"{}\" failed", item.id()))?;
        }
        Ok(())
    }

    fn on_add_topic_filter(&mut self, filter: &str) {
        let mut inner = self.table.inner.lock();
        if !inner.subscribed_filters.insert(Arc::from(filter)) {
            tracing::error!(
                "[DataGateway] duplicate topic filter \"{filter}\" in gateway \"{}\"",
                self.table.gateway_id
            );
            return;
        }

        let parsed = TopicFilter::parse(filter);
        for id in DataTable::matching_item_ids(&inner, &parsed) {
            *inner.subscription_counts.entry(id).or_insert(0) += 1;
        }
    }

    fn on_remove_topic_filter(&mut self, filter: &str) {
        let mut inner = self.table.inner.lock();
        if !inner.subscribed_filters.remove(filter) {
            tracing::error!(
                "[DataGateway] unknown topic filter \"{filter}\" removed from gateway \"{}\"",
                self.table.gateway_id
            );
            return;
        }

        let parsed = TopicFilter::parse(filter);
        for id in DataTable::matching_item_ids(&inner, &parsed) {
            if let Some(count) = inner.subscription_counts.get_mut(&id) {
                *count -= 1;
                if *count == 0 {
                    inner.subscription_counts.remove(&id);
                }
            }
        }
    }

    fn on_publish(&mut self, _message: Message) -> anyhow::Result<()> {
        // unreachable: the validator rejects every publication topic
        Ok(())
    }

    fn on_save_state(&mut self, out: &mut BundleMap) -> anyhow::Result<()> {
        for item in self.table.items_in_order() {
            let mut bundle = Bundle::new();
            if let Err(e) = item.save_state(&mut bundle) {
                tracing::error!(
                    "[DataGateway] saving state of data item \"{}\" failed: {e:#}",
                    item.id()
                );
                continue;
            }
            if !bundle.is_empty() {
                out.insert(item.id().to_owned(), bundle);
            }
        }
        Ok(())
    }

    fn on_stop(&mut self) {
        {
            let mut inner = self.table.inner.lock();
            inner.subscription_counts.clear();
            inner.subscribed_filters.clear();
        }
        for item in self.table.items_in_order() {
            item.deactivate();
        }
    }

    fn topic_validator(&self) -> TopicValidator {
        TopicValidator::RejectAll
    }
}
