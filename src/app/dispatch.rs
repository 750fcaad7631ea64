//! The dispatch thread: gateway startup, the event loop, state saving and
//! shutdown, all strictly serialized on one thread.

use crate::app::Application;
use crate::app::action::Action;
use crate::bundle::BundleMap;
use crate::gateway::{Gateway, GatewayCtx, GatewayKind};
use crate::storage::PersistentStorage;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

/// A gateway as the dispatch thread owns it: the boxed instance plus the
/// identity and context captured at registration. The vector index equals
/// the gateway index used by actions and the router.
struct GatewayHolder {
    id: Arc<str>,
    kind: GatewayKind,
    ctx: GatewayCtx,
    gateway: Box<dyn Gateway>,
}

/// Entry point of the dispatch thread.
pub(crate) fn run(app: Application) {
    let shared = app.shared();
    let _ = shared.dispatch_thread.set(thread::current().id());

    let (gateways, mut storage, autosave_period) = {
        let mut life = shared.life.lock();
        (
            std::mem::take(&mut life.gateways),
            life.storage.take(),
            life.autosave_period,
        )
    };
    let meta = shared.router.lock().gateway_meta();

    let mut holders: Vec<GatewayHolder> = gateways
        .into_iter()
        .zip(meta)
        .enumerate()
        .map(|(index, (gateway, (id, kind)))| GatewayHolder {
            ctx: GatewayCtx {
                id: id.clone(),
                index,
                app: Arc::downgrade(&app.shared),
            },
            id,
            kind,
            gateway,
        })
        .collect();

    let started = start_gateways(&mut holders, storage.as_mut());
    let all_started = started.len() == holders.len();

    let mut loop_ran = false;
    if all_started {
        shared.emit_system("start");
        loop_ran = true;
        tracing::info!("[Application] dispatch loop started");
        run_loop(&app, &mut holders, &mut storage, autosave_period);
        tracing::info!("[Application] dispatch loop stopped");
    } else {
        tracing::error!("[Application] startup aborted, not all gateways started");
    }

    let hooks = std::mem::take(&mut shared.life.lock().shutdown_hooks);
    for hook in hooks {
        hook(&app);
    }

    if loop_ran {
        save_state(&app, &mut holders, &mut storage);
    }

    for &index in started.iter().rev() {
        let holder = &mut holders[index];
        holder.gateway.on_stop();
        tracing::info!("[Application] gateway \"{}\" stopped", holder.id);
    }

    tracing::info!("[Application] stopped");
}

/// Starts all gateways in activation order (`$SYS` first, data gateways
/// last) and returns the indices of the started ones, in start order. The
/// bundle map loaded from storage is partitioned by gateway-id prefix.
fn start_gateways(
    holders: &mut [GatewayHolder],
    storage: Option<&mut Box<dyn PersistentStorage>>,
) -> Vec<usize> {
    let mut bundles: BundleMap = match storage {
        Some(storage) => match storage.load_bundles() {
            Ok(bundles) => bundles,
            Err(e) => {
                tracing::error!("[Application] loading persistent state failed: {e:#}");
                BundleMap::new()
            }
        },
        None => BundleMap::new(),
    };

    let mut order: Vec<usize> = (0..holders.len()).collect();
    order.sort_by_key(|&index| holders[index].kind.start_rank());

    let mut started = Vec::with_capacity(holders.len());
    for index in order {
        let holder = &mut holders[index];
        let prefix = format!("{}/", holder.id);
        let keys: Vec<String> = bundles
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();
        let mut gateway_bundles = BundleMap::new();
        for key in keys {
            if let Some(bundle) = bundles.remove(&key) {
                gateway_bundles.insert(key, bundle);
            }
        }

        tracing::info!("[Application] gateway \"{}\" is starting", holder.id);
        match holder.gateway.on_start(&holder.ctx, &gateway_bundles) {
            Ok(()) => {
                started.push(index);
                tracing::info!("[Application] gateway \"{}\" started", holder.id);
            }
            Err(e) => {
                tracing::error!("[Application] unable to start gateway \"{}\": {e:#}", holder.id);
            }
        }
    }

    started
}

fn run_loop(
    app: &Application,
    holders: &mut [GatewayHolder],
    storage: &mut Option<Box<dyn PersistentStorage>>,
    autosave_period: Duration,
) {
    let shared = app.shared();
    let clock = &shared.clock;
    let mut processed_action_count: u64 = 0;

    let autosave_enabled = storage.is_some() && autosave_period > Duration::ZERO;
    let autosave_nanos = autosave_period.as_nanos() as u64;
    let mut last_save = clock.now_nanos();

    while !shared.exit_requested.load(Ordering::SeqCst) {
        let Some(action) = shared
            .queues
            .poll(clock, &mut processed_action_count, &shared.exit_requested)
        else {
            break;
        };

        execute_action(app, holders, action);

        if shared.save_requested.swap(false, Ordering::Relaxed) {
            save_state(app, holders, storage);
            last_save = clock.now_nanos();
        }
        if autosave_enabled {
            let now = clock.now_nanos();
            if now - last_save > autosave_nanos {
                save_state(app, holders, storage);
                last_save = now;
            }
        }
    }
}

fn execute_action(app: &Application, holders: &mut [GatewayHolder], action: Action) {
    match action {
        Action::Publish { gateway, message } => {
            let holder = &mut holders[gateway];
            if let Err(e) = holder.gateway.on_publish(message) {
                tracing::error!(
                    "[Application] publication via gateway \"{}\" failed: {e:#}",
                    holder.id
                );
            }
        }
        Action::Received { gateway, message } => {
            deliver(app, gateway, &message);
        }
        Action::SubscriptionChange {
            gateway,
            filter,
            subscribe,
        } => {
            let holder = &mut holders[gateway];
            if subscribe {
                holder.gateway.on_add_topic_filter(&filter);
            } else {
                holder.gateway.on_remove_topic_filter(&filter);
            }
        }
        Action::Synchronize { item } => item.synchronize(),
        Action::RequestChange { item, value } => item.apply_change(&*value),
        Action::Run { callback } => callback(app),
    }
}

/// Routes a received message to every matching subscriber. Listeners with
/// differing priorities are stably ordered, higher priority first; the
/// delivered topic carries the source gateway as its head. A panicking
/// listener is logged and then allowed to unwind the dispatch thread.
fn deliver(app: &Application, gateway: usize, message: &crate::message::Message) {
    let (gateway_id, mut matches) = app
        .shared()
        .router
        .lock()
        .collect_matches(gateway, message.topic());
    if matches.is_empty() {
        return;
    }

    if matches.len() >= 2 {
        let first_priority = matches[0].priority;
        if matches.iter().any(|m| m.priority != first_priority) {
            matches.sort_by(|a, b| b.priority.cmp(&a.priority));
        }
    }

    let delivered = message.prefixed(&gateway_id);
    for matched in matches {
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| matched.listener.on_message(&delivered)));
        if let Err(payload) = outcome {
            tracing::error!(
                "[Application] message listener for \"{}\" panicked",
                delivered.topic()
            );
            panic::resume_unwind(payload);
        }
    }
}

/// Collects the state bundles of every gateway and hands them to the
/// persistent storage. Emits `$SYS/state-saved` afterwards. A storage
/// failure is logged; the loop keeps running.
fn save_state(
    app: &Application,
    holders: &mut [GatewayHolder],
    storage: &mut Option<Box<dyn PersistentStorage>>,
) {
    let Some(storage) = storage.as_mut() else {
        return;
    };

    tracing::info!("[Application] saving application state");
    let mut bundles = BundleMap::new();
    for holder in holders.iter_mut() {
        let mut out = BundleMap::new();
        if let Err(e) = holder.gateway.on_save_state(&mut out) {
            tracing::error!(
                "[Application] saving the state of gateway \"{}\" failed: {e:#}",
                holder.id
            );
        }

        let prefix = format!("{}/", holder.id);
        for (key, bundle) in out {
            if !key.starts_with(&prefix) {
                tracing::warn!(
                    "[Application] gateway \"{}\" produced bundle key \"{key}\" outside its namespace",
                    holder.id
                );
            }
            bundles.insert(key, bundle);
        }
    }

    if let Err(e) = storage.save_bundles(&bundles) {
        tracing::error!("[Application] saving state to persistent storage failed: {e:#}");
    }

    app.shared().emit_system("state-saved");
    tracing::info!("[Application] application state saved");
}
