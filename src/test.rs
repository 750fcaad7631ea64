#[cfg(test)]
mod tests {
    use crate::app::Application;
    use crate::bundle::{Bundle, BundleMap};
    use crate::config::AppConfig;
    use crate::error::SetupError;
    use crate::gateway::{EchoGateway, Gateway, GatewayCtx};
    use crate::item::{ActivationCtx, AliasDataItem, DataItemSpec, LocalDataItem};
    use crate::message::Message;
    use crate::storage::{MemoryStorage, PersistentStorage};
    use crossbeam::channel::{Receiver, Sender, unbounded};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    const RECV_TIMEOUT: Duration = Duration::from_secs(2);

    fn test_app() -> Application {
        Application::with_config(AppConfig {
            autosave_period_secs: 0,
            handle_signals: false,
        })
    }

    /// An application with an echo gateway under "data" and another under
    /// "local", convenient for pure messaging tests.
    fn echo_app() -> Application {
        let app = test_app();
        app.add_gateway("data", EchoGateway::new()).unwrap();
        app.add_gateway("local", EchoGateway::new()).unwrap();
        app
    }

    fn shutdown(app: &Application) {
        app.request_exit();
        app.join().unwrap();
    }

    fn drain(rx: &Receiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    fn forward(tx: Sender<Message>) -> impl Fn(&Message) + Send + Sync + 'static {
        move |message: &Message| {
            let _ = tx.send(message.clone());
        }
    }

    // ---- messaging -------------------------------------------------------

    #[test]
    fn publication_is_delivered_with_qualified_topic_and_payload() {
        let app = echo_app();
        let (tx, rx) = unbounded();
        app.subscribe("data/a", forward(tx)).unwrap();
        app.launch().unwrap();

        app.publish(Message::text("data/a", "1")).unwrap();

        let message = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(message.topic(), "data/a");
        assert_eq!(message.payload(), &[0x31][..]);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        shutdown(&app);
    }

    #[test]
    fn wildcard_subscription_sees_messages_in_submission_order() {
        let app = echo_app();
        let (tx, rx) = unbounded();
        app.subscribe("data/+", forward(tx)).unwrap();
        app.launch().unwrap();

        app.publish(Message::empty("data/x")).unwrap();
        app.publish(Message::empty("data/y")).unwrap();

        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().topic(), "data/x");
        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().topic(), "data/y");

        shutdown(&app);
    }

    #[test]
    fn higher_priority_listeners_run_first() {
        let app = echo_app();
        let (tx, rx) = unbounded();

        let low = tx.clone();
        app.subscribe_with_priority("local/t", move |_: &Message| {
            let _ = low.send(Message::empty("low"));
        }, 0)
        .unwrap();
        let high = tx;
        app.subscribe_with_priority("local/t", move |_: &Message| {
            let _ = high.send(Message::empty("high"));
        }, 10)
        .unwrap();

        app.launch().unwrap();
        app.publish(Message::empty("local/t")).unwrap();

        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().topic(), "high");
        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().topic(), "low");

        shutdown(&app);
    }

    #[test]
    fn global_wildcard_matches_every_gateway() {
        let app = echo_app();
        let (tx, rx) = unbounded();
        app.subscribe("#", forward(tx)).unwrap();
        app.launch().unwrap();

        app.publish(Message::empty("data/a")).unwrap();
        app.publish(Message::empty("local/b/c")).unwrap();

        // "#" also sees $SYS/start, so filter on the test gateways
        let mut seen = Vec::new();
        while seen.len() < 2 {
            let message = rx.recv_timeout(RECV_TIMEOUT).unwrap();
            if !message.topic().starts_with("$SYS") {
                seen.push(message.topic().to_owned());
            }
        }
        assert_eq!(seen, vec!["data/a".to_owned(), "local/b/c".to_owned()]);

        shutdown(&app);
    }

    #[test]
    fn listeners_run_on_the_dispatch_thread() {
        let app = echo_app();
        let (tx, rx) = unbounded();
        let probe = app.clone();
        app.subscribe("local/probe", move |_: &Message| {
            let _ = tx.send(probe.is_in_application_thread());
        })
        .unwrap();
        app.launch().unwrap();
        assert!(!app.is_in_application_thread());

        app.publish(Message::empty("local/probe")).unwrap();
        assert!(rx.recv_timeout(RECV_TIMEOUT).unwrap());

        shutdown(&app);
    }

    #[test]
    fn closing_a_subscription_stops_delivery_and_is_idempotent() {
        let app = echo_app();
        let (tx, rx) = unbounded();
        let subscription = app.subscribe("local/t", forward(tx)).unwrap();
        app.launch().unwrap();

        app.publish(Message::empty("local/t")).unwrap();
        rx.recv_timeout(RECV_TIMEOUT).unwrap();

        subscription.close();
        subscription.close();
        app.publish(Message::empty("local/t")).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());

        shutdown(&app);
    }

    #[test]
    fn invalid_publications_are_rejected_synchronously() {
        let app = echo_app();
        assert!(app.publish(Message::empty("")).is_err());
        assert!(app.publish(Message::empty("data")).is_err());
        assert!(app.publish(Message::empty("nosuch/t")).is_err());
        assert!(app.publish(Message::empty("data/a/+")).is_err());
        // the data gateway of a real data application rejects publications
        let with_data = test_app();
        with_data.add_data_gateway("data").unwrap();
        assert!(with_data.publish(Message::empty("data/a")).is_err());
    }

    #[test]
    fn mailbox_topics_echo_messages_point_to_point() {
        let app = test_app();
        let topic = app.create_mailbox_topic();
        let other = app.create_mailbox_topic();
        assert!(topic.starts_with("$MAILBOX/mb-uid."));
        assert_ne!(topic, other);

        let (tx, rx) = unbounded();
        app.subscribe(&topic, forward(tx)).unwrap();
        app.launch().unwrap();

        app.publish(Message::text(&topic, "ping")).unwrap();
        let message = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(message.topic(), topic);
        assert_eq!(message.content(), "ping");

        shutdown(&app);
    }

    // ---- gateway lifecycle ----------------------------------------------

    /// Echo-style gateway that reports every lifecycle hook to a channel.
    struct RecordingGateway {
        events: Sender<String>,
        ctx: Option<GatewayCtx>,
    }

    impl Gateway for RecordingGateway {
        fn on_start(&mut self, ctx: &GatewayCtx, bundles: &BundleMap) -> anyhow::Result<()> {
            self.ctx = Some(ctx.clone());
            let _ = self.events.send(format!("start:{}", bundles.len()));
            Ok(())
        }

        fn on_add_topic_filter(&mut self, filter: &str) {
            let _ = self.events.send(format!("add:{filter}"));
        }

        fn on_remove_topic_filter(&mut self, filter: &str) {
            let _ = self.events.send(format!("remove:{filter}"));
        }

        fn on_publish(&mut self, message: Message) -> anyhow::Result<()> {
            let _ = self.events.send(format!("publish:{}", message.topic()));
            if let Some(ctx) = &self.ctx {
                ctx.push_received(message);
            }
            Ok(())
        }

        fn on_save_state(&mut self, out: &mut BundleMap) -> anyhow::Result<()> {
            let mut bundle = Bundle::new();
            bundle.put_bool("seen", true);
            out.insert("rec/state".to_owned(), bundle);
            Ok(())
        }

        fn on_stop(&mut self) {
            let _ = self.events.send("stop".to_owned());
        }
    }

    #[test]
    fn gateway_sees_filter_fanout_publications_and_stop() {
        let app = test_app();
        let (events_tx, events) = unbounded();
        app.add_gateway(
            "rec",
            RecordingGateway {
                events: events_tx,
                ctx: None,
            },
        )
        .unwrap();

        let (tx, rx) = unbounded();
        let subscription = app.subscribe("rec/t", forward(tx)).unwrap();
        app.launch().unwrap();

        assert_eq!(events.recv_timeout(RECV_TIMEOUT).unwrap(), "start:0");
        assert_eq!(events.recv_timeout(RECV_TIMEOUT).unwrap(), "add:t");

        app.publish(Message::empty("rec/t")).unwrap();
        assert_eq!(events.recv_timeout(RECV_TIMEOUT).unwrap(), "publish:t");
        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().topic(), "rec/t");

        subscription.close();
        assert_eq!(events.recv_timeout(RECV_TIMEOUT).unwrap(), "remove:t");

        shutdown(&app);
        assert_eq!(events.recv_timeout(RECV_TIMEOUT).unwrap(), "stop");
    }

    #[test]
    fn failing_gateway_start_aborts_the_application() {
        struct FailingGateway;
        impl Gateway for FailingGateway {
            fn on_start(&mut self, _ctx: &GatewayCtx, _bundles: &BundleMap) -> anyhow::Result<()> {
                anyhow::bail!("refusing to start")
            }
            fn on_publish(&mut self, _message: Message) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let app = test_app();
        app.add_gateway("bad", FailingGateway).unwrap();
        let (tx, rx) = unbounded();
        app.subscribe("$SYS/start", forward(tx)).unwrap();

        app.launch().unwrap();
        app.join().unwrap();

        // the event loop never ran, so the start message never fired
        assert!(rx.try_recv().is_err());
    }

    // ---- scheduling ------------------------------------------------------

    #[test]
    fn fixed_rate_publication_fires_until_cancelled() {
        let app = echo_app();
        let (tx, rx) = unbounded();
        app.subscribe("local/tick", forward(tx)).unwrap();
        app.launch().unwrap();

        let handle = app
            .publish_at_fixed_rate(
                Message::empty("local/tick"),
                Duration::from_millis(50),
                Duration::from_millis(50),
            )
            .unwrap();

        thread::sleep(Duration::from_millis(175));
        handle.cancel();
        assert!(handle.is_cancelled());
        thread::sleep(Duration::from_millis(50));

        let fired = drain(&rx).len();
        assert!((2..=4).contains(&fired), "fired {fired} times");

        thread::sleep(Duration::from_millis(150));
        assert!(drain(&rx).is_empty());

        shutdown(&app);
    }

    #[test]
    fn invoke_later_runs_once_on_the_dispatch_thread() {
        let app = echo_app();
        let (tx, rx) = unbounded();
        app.launch().unwrap();

        app.invoke_later(
            move |app| {
                let _ = tx.send(app.is_in_application_thread());
            },
            Duration::from_millis(10),
        );

        assert!(rx.recv_timeout(RECV_TIMEOUT).unwrap());
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());

        shutdown(&app);
    }

    #[test]
    fn cancelled_invoke_never_fires() {
        let app = echo_app();
        let (tx, rx) = unbounded::<()>();
        app.launch().unwrap();

        let handle = app.invoke_later(
            move |_| {
                let _ = tx.send(());
            },
            Duration::from_millis(200),
        );
        handle.cancel();

        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());

        shutdown(&app);
    }

    // ---- data items ------------------------------------------------------

    fn data_app(storage: Option<MemoryStorage>) -> Application {
        let app = test_app();
        app.add_data_gateway("data").unwrap();
        if let Some(storage) = storage {
            app.set_persistent_storage(storage).unwrap();
        }
        app
    }

    #[test]
    fn change_request_cascades_source_before_dependant() {
        let app = data_app(None);
        let y = app
            .add_data_item("data", "y", LocalDataItem::<i64>::ephemeral())
            .unwrap();
        let x = app
            .add_data_item("data", "x", AliasDataItem::new(&y))
            .unwrap();

        let (tx, rx) = unbounded();
        app.subscribe("data/y", forward(tx.clone())).unwrap();
        app.subscribe("data/x", forward(tx)).unwrap();
        app.launch().unwrap();

        y.request_change(42).unwrap();

        // observers see the source change before the dependant recomputes
        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().topic(), "data/y");
        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().topic(), "data/x");
        assert_eq!(y.value(), Some(42));
        assert_eq!(x.value(), Some(42));

        shutdown(&app);
    }

    #[test]
    fn read_only_items_reject_change_requests_synchronously() {
        let app = data_app(Some(MemoryStorage::new()));
        let source = app
            .add_data_item("data", "meter", LocalDataItem::<i64>::ephemeral())
            .unwrap();
        let total = app
            .add_data_item("data", "total", crate::item::AccumulatingDataItem::new(&source))
            .unwrap();

        assert!(total.is_read_only());
        assert!(matches!(
            total.request_change(5),
            Err(SetupError::ReadOnlyDataItem(_))
        ));
    }

    #[test]
    fn typed_lookup_checks_the_value_type() {
        let app = data_app(None);
        app.add_data_item("data", "y", LocalDataItem::<i64>::ephemeral())
            .unwrap();

        assert!(app.get_data_item::<i64>("data/y").unwrap().is_some());
        assert!(app.get_data_item::<i64>("data/nope").unwrap().is_none());
        assert!(app.get_data_item::<i64>("bare").unwrap().is_none());
        assert!(matches!(
            app.get_data_item::<String>("data/y"),
            Err(SetupError::DataItemTypeMismatch { .. })
        ));
    }

    #[test]
    fn duplicate_and_invalid_item_registrations_are_rejected() {
        let app = data_app(None);
        app.add_gateway("local", EchoGateway::new()).unwrap();
        app.add_data_item("data", "y", LocalDataItem::<i64>::ephemeral())
            .unwrap();

        assert!(matches!(
            app.add_data_item("data", "y", LocalDataItem::<i64>::ephemeral()),
            Err(SetupError::DuplicateDataItem(_))
        ));
        assert!(matches!(
            app.add_data_item("data", "bad topic", LocalDataItem::<i64>::ephemeral()),
            Err(SetupError::InvalidDataItemId(_))
        ));
        assert!(matches!(
            app.add_data_item("local", "y", LocalDataItem::<i64>::ephemeral()),
            Err(SetupError::NotDataGateway(_))
        ));
        assert!(matches!(
            app.add_data_item("nosuch", "y", LocalDataItem::<i64>::ephemeral()),
            Err(SetupError::UnknownGateway(_))
        ));
    }

    /// Behavior with an intentional dependency cycle, for abort tests.
    struct CyclicSpec {
        peer_id: &'static str,
    }

    impl DataItemSpec<i64> for CyclicSpec {
        fn on_activate(
            &mut self,
            ctx: &mut ActivationCtx<'_>,
            _saved: &Bundle,
        ) -> anyhow::Result<()> {
            let peer = ctx
                .application()
                .get_data_item::<i64>(self.peer_id)
                .unwrap()
                .unwrap();
            ctx.set_dependencies(&[peer.item_ref()]);
            Ok(())
        }

        fn on_synchronize(&mut self) -> anyhow::Result<Option<i64>> {
            Ok(None)
        }
    }

    #[test]
    fn dependency_cycles_abort_startup() {
        let app = data_app(None);
        app.add_data_item("data", "a", CyclicSpec { peer_id: "data/b" })
            .unwrap();
        app.add_data_item("data", "b", CyclicSpec { peer_id: "data/a" })
            .unwrap();

        let (tx, rx) = unbounded();
        app.subscribe("$SYS/start", forward(tx)).unwrap();
        app.launch().unwrap();
        app.join().unwrap();

        assert!(rx.try_recv().is_err());
    }

    // ---- persistence -----------------------------------------------------

    /// Storage decorator counting saves.
    struct CountingStorage {
        inner: MemoryStorage,
        saves: Arc<AtomicUsize>,
    }

    impl PersistentStorage for CountingStorage {
        fn load_bundles(&mut self) -> anyhow::Result<BundleMap> {
            self.inner.load_bundles()
        }

        fn save_bundles(&mut self, bundles: &BundleMap) -> anyhow::Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save_bundles(bundles)
        }
    }

    #[test]
    fn state_survives_a_relaunch_with_the_same_storage() {
        let storage = MemoryStorage::new();

        let app = data_app(Some(storage.clone()));
        let y = app
            .add_data_item("data", "y", LocalDataItem::<i64>::persistent())
            .unwrap();
        app.launch().unwrap();
        y.request_change(42).unwrap();
        let deadline = std::time::Instant::now() + RECV_TIMEOUT;
        while y.value() != Some(42) && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        shutdown(&app);
        assert_eq!(y.value(), Some(42));

        let snapshot = storage.snapshot();
        assert!(snapshot.contains_key("data/y"));

        // relaunch against the same storage; the value is restored during
        // activation, before $SYS/start fires
        let relaunched = data_app(Some(storage.clone()));
        let y2 = relaunched
            .add_data_item("data", "y", LocalDataItem::<i64>::persistent())
            .unwrap();
        let x2 = relaunched
            .add_data_item("data", "x", AliasDataItem::new(&y2))
            .unwrap();
        let (tx, rx) = unbounded();
        relaunched.subscribe("$SYS/start", forward(tx)).unwrap();
        relaunched.launch().unwrap();
        rx.recv_timeout(RECV_TIMEOUT).unwrap();

        assert_eq!(y2.value(), Some(42));
        y2.request_change(43).unwrap();
        let deadline = std::time::Instant::now() + RECV_TIMEOUT;
        while x2.value() != Some(43) && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(x2.value(), Some(43));

        shutdown(&relaunched);
    }

    #[test]
    fn exit_via_system_topic_saves_exactly_once() {
        let saves = Arc::new(AtomicUsize::new(0));
        let app = data_app(None);
        app.set_persistent_storage(CountingStorage {
            inner: MemoryStorage::new(),
            saves: saves.clone(),
        })
        .unwrap();
        app.add_data_item("data", "y", LocalDataItem::<i64>::persistent())
            .unwrap();

        app.launch().unwrap();
        app.publish(Message::empty("$SYS/exit")).unwrap();
        app.join().unwrap();

        assert_eq!(saves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn save_topic_triggers_a_save_and_state_saved_notification() {
        let saves = Arc::new(AtomicUsize::new(0));
        let app = data_app(None);
        app.set_persistent_storage(CountingStorage {
            inner: MemoryStorage::new(),
            saves: saves.clone(),
        })
        .unwrap();

        let (tx, rx) = unbounded();
        app.subscribe("$SYS/state-saved", forward(tx)).unwrap();
        app.launch().unwrap();

        app.publish(Message::empty("$SYS/save")).unwrap();
        assert_eq!(
            rx.recv_timeout(RECV_TIMEOUT).unwrap().topic(),
            "$SYS/state-saved"
        );
        assert_eq!(saves.load(Ordering::SeqCst), 1);

        app.request_exit();
        app.join().unwrap();
        // the exit path saves once more
        assert_eq!(saves.load(Ordering::SeqCst), 2);
    }

    // ---- facade guards ---------------------------------------------------

    #[test]
    fn configuration_is_rejected_after_launch() {
        let app = echo_app();
        app.launch().unwrap();

        assert!(matches!(
            app.add_gateway("late", EchoGateway::new()),
            Err(SetupError::AlreadyLaunched)
        ));
        assert!(matches!(
            app.set_autosave_period(Duration::from_secs(1)),
            Err(SetupError::AlreadyLaunched)
        ));
        assert!(matches!(
            app.set_persistent_storage(MemoryStorage::new()),
            Err(SetupError::AlreadyLaunched)
        ));
        assert!(matches!(app.launch(), Err(SetupError::AlreadyLaunched)));

        shutdown(&app);
    }

    #[test]
    fn gateway_id_rules_are_enforced() {
        let app = test_app();
        assert!(matches!(
            app.add_gateway("$nope", EchoGateway::new()),
            Err(SetupError::InvalidGatewayId(_))
        ));
        app.add_gateway("gw", EchoGateway::new()).unwrap();
        assert!(matches!(
            app.add_gateway("gw", EchoGateway::new()),
            Err(SetupError::DuplicateGatewayId(_))
        ));
    }

    #[test]
    fn properties_are_typed_and_mutable_after_launch() {
        let app = echo_app();
        app.set_property("threshold", 5i64);
        assert_eq!(app.property::<i64>("threshold"), Some(5));
        assert_eq!(app.property::<String>("threshold"), None);
        assert_eq!(app.property_or::<i64>("missing", 7), 7);

        app.launch().unwrap();
        app.set_property("threshold", 6i64);
        assert_eq!(app.property::<i64>("threshold"), Some(6));

        shutdown(&app);
    }

    #[test]
    fn shutdown_hooks_run_on_exit() {
        let app = echo_app();
        let (tx, rx) = unbounded::<()>();
        app.add_shutdown_hook(move |_| {
            let _ = tx.send(());
        });
        app.launch().unwrap();

        shutdown(&app);
        assert!(rx.try_recv().is_ok());
    }
}
