use crate::app::action::Action;
use crate::error::MessagingError;
use crate::gateway::{GatewayKind, TopicValidator};
use crate::message::MessageListener;
use crate::topic::{self, TopicFilter};
use ahash::AHashMap;
use std::sync::Arc;

/// One subscriber attached to a topic filter.
struct SubscriptionEntry {
    token: u64,
    listener: Arc<dyn MessageListener>,
    priority: i32,
}

/// A registered topic filter with its subscribers, keyed in the owning
/// table by the localized filter string.
struct FilterEntry {
    parsed: TopicFilter,
    subscriptions: Vec<SubscriptionEntry>,
}

/// A listener selected for delivery of one message.
pub(crate) struct ListenerMatch {
    pub(crate) priority: i32,
    pub(crate) listener: Arc<dyn MessageListener>,
}

/// Topic filters of one scope (a gateway, or global), partitioned into
/// simple filters (exact-lookup by topic string) and wildcard filters
/// (matched level by level).
#[derive(Default)]
struct FilterTable {
    simple: AHashMap<Arc<str>, FilterEntry>,
    wildcard: AHashMap<Arc<str>, FilterEntry>,
}

impl FilterTable {
    fn bucket_for(&mut self, parsed: &TopicFilter) -> &mut AHashMap<Arc<str>, FilterEntry> {
        if parsed.is_simple() {
            &mut self.simple
        } else {
            &mut self.wildcard
        }
    }

    fn collect(&self, topic: &str, levels: &[&str], out: &mut Vec<ListenerMatch>) {
        if let Some(entry) = self.simple.get(topic) {
            Self::push_all(entry, out);
        }
        for entry in self.wildcard.values() {
            if entry.parsed.matches(levels) {
                Self::push_all(entry, out);
            }
        }
    }

    fn push_all(entry: &FilterEntry, out: &mut Vec<ListenerMatch>) {
        for sub in &entry.subscriptions {
            out.push(ListenerMatch {
                priority: sub.priority,
                listener: sub.listener.clone(),
            });
        }
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.simple.is_empty() && self.wildcard.is_empty()
    }
}

/// A gateway as the router sees it: identity, start-order tag, the
/// publication-topic validator captured at registration, and the filters
/// subscribed against it.
pub(crate) struct GatewayEntry {
    pub(crate) id: Arc<str>,
    pub(crate) kind: GatewayKind,
    pub(crate) validator: TopicValidator,
    filters: FilterTable,
}

/// Identifies one subscription for removal: the original filter string
/// (including the gateway head) plus a unique token.
pub(crate) struct SubscriptionKey {
    pub(crate) filter: Arc<str>,
    pub(crate) token: u64,
}

/// Routing scope of a filter: one gateway, or all of them.
enum Scope {
    Gateway(usize),
    Global,
}

/// The subscription router. Holds per-gateway and global filter tables and
/// produces the `SubscriptionChange` actions that keep gateways informed
/// about which localized filters are live.
pub(crate) struct Router {
    entries: Vec<GatewayEntry>,
    index_by_id: AHashMap<Arc<str>, usize>,
    global: FilterTable,
    next_token: u64,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            index_by_id: AHashMap::new(),
            global: FilterTable::default(),
            next_token: 0,
        }
    }

    /// Registers a gateway; the caller guarantees the id is unused.
    pub(crate) fn register_gateway(
        &mut self,
        id: Arc<str>,
        kind: GatewayKind,
        validator: TopicValidator,
    ) -> usize {
        let index = self.entries.len();
        self.index_by_id.insert(id.clone(), index);
        self.entries.push(GatewayEntry {
            id,
            kind,
            validator,
            filters: FilterTable::default(),
        });
        index
    }

    pub(crate) fn gateway_index(&self, id: &str) -> Option<usize> {
        self.index_by_id.get(id).copied()
    }

    pub(crate) fn entry(&self, index: usize) -> &GatewayEntry {
        &self.entries[index]
    }

    pub(crate) fn gateway_count(&self) -> usize {
        self.entries.len()
    }

    /// Identity and start-order tags of all gateways, in registration
    /// order (which is also the action-index order).
    pub(crate) fn gateway_meta(&self) -> Vec<(Arc<str>, GatewayKind)> {
        self.entries.iter().map(|e| (e.id.clone(), e.kind)).collect()
    }

    fn scope_of(&self, filter: &str, head: &str) -> Result<Scope, MessagingError> {
        if head == topic::SINGLE_LEVEL_WILDCARD || filter == topic::MULTI_LEVEL_WILDCARD {
            Ok(Scope::Global)
        } else {
            self.gateway_index(head)
                .map(Scope::Gateway)
                .ok_or_else(|| MessagingError::UnknownGateway(head.to_owned()))
        }
    }

    /// Adds a subscription. Returns its key plus the subscription-change
    /// actions to enqueue (non-empty only when the localized filter is new
    /// in its table).
    pub(crate) fn subscribe(
        &mut self,
        filter: &str,
        listener: Arc<dyn MessageListener>,
        priority: i32,
    ) -> Result<(SubscriptionKey, Vec<Action>), MessagingError> {
        if !topic::is_valid_topic_filter(filter) {
            return Err(MessagingError::InvalidTopicFilter(filter.to_owned()));
        }

        let head = topic::head(filter);
        let localized = topic::without_head(filter)
            .ok_or_else(|| MessagingError::MissingSubtopic(filter.to_owned()))?;
        let scope = self.scope_of(filter, head)?;

        let token = self.next_token;
        self.next_token += 1;

        let parsed = TopicFilter::parse(localized);
        let key: Arc<str> = Arc::from(localized);
        let table = match &scope {
            Scope::Gateway(index) => &mut self.entries[*index].filters,
            Scope::Global => &mut self.global,
        };
        let bucket = table.bucket_for(&parsed);
        let created = !bucket.contains_key(localized);
        bucket
            .entry(key.clone())
            .or_insert_with(|| FilterEntry {
                parsed,
                subscriptions: Vec::new(),
            })
            .subscriptions
            .push(SubscriptionEntry {
                token,
                listener,
                priority,
            });

        let actions = if created {
            self.subscription_change_actions(&scope, key, true)
        } else {
            Vec::new()
        };

        Ok((
            SubscriptionKey {
                filter: Arc::from(filter),
                token,
            },
            actions,
        ))
    }

    /// Removes a subscription. Returns the subscription-change actions to
    /// enqueue when the last subscriber of a filter is gone. Idempotent.
    pub(crate) fn unsubscribe(&mut self, key: &SubscriptionKey) -> Vec<Action> {
        let head = topic::head(&key.filter);
        let Some(localized) = topic::without_head(&key.filter) else {
            return Vec::new();
        };
        let Ok(scope) = self.scope_of(&key.filter, head) else {
            return Vec::new();
        };

        let parsed = TopicFilter::parse(localized);
        let table = match &scope {
            Scope::Gateway(index) => &mut self.entries[*index].filters,
            Scope::Global => &mut self.global,
        };
        let bucket = table.bucket_for(&parsed);
        let Some(entry) = bucket.get_mut(localized) else {
            return Vec::new();
        };

        let before = entry.subscriptions.len();
        entry.subscriptions.retain(|sub| sub.token != key.token);
        if entry.subscriptions.len() == before || !entry.subscriptions.is_empty() {
            return Vec::new();
        }

        bucket.remove(localized);
        self.subscription_change_actions(&scope, Arc::from(localized), false)
    }

    fn subscription_change_actions(
        &self,
        scope: &Scope,
        filter: Arc<str>,
        subscribe: bool,
    ) -> Vec<Action> {
        match scope {
            Scope::Gateway(index) => vec![Action::SubscriptionChange {
                gateway: *index,
                filter,
                subscribe,
            }],
            Scope::Global => (0..self.entries.len())
                .map(|gateway| Action::SubscriptionChange {
                    gateway,
                    filter: filter.clone(),
                    subscribe,
                })
                .collect(),
        }
    }

    /// Collects the listeners matching a message received on a gateway,
    /// from that gateway's tables and the global tables. The caller sorts
    /// by priority and delivers.
    pub(crate) fn collect_matches(
        &self,
        gateway: usize,
        topic_name: &str,
    ) -> (Arc<str>, Vec<ListenerMatch>) {
        let levels = topic::parse_hierarchy(topic_name);
        let mut matches = Vec::new();
        let entry = &self.entries[gateway];
        entry.filters.collect(topic_name, &levels, &mut matches);
        self.global.collect(topic_name, &levels, &mut matches);
        (entry.id.clone(), matches)
    }

    /// Whether any filter table still references the gateway; used by the
    /// tests to assert unsubscribe bookkeeping.
    #[cfg(test)]
    fn has_filters(&self, gateway: usize) -> bool {
        !self.entries[gateway].filters.is_empty()
    }
}
