//! # hubrt — an in-process application core
//!
//! `hubrt` unifies heterogeneous message sources under a single MQTT-style
//! topic namespace, serializes all event handling on one dispatch thread
//! and projects remote or derived values as observable, persistable data
//! items.
//!
//! ## Building blocks
//!
//! - [`Application`](app::Application): the facade. Attach gateways and
//!   data items, subscribe, publish, schedule work, launch.
//! - [`Gateway`](gateway::Gateway): adapter between an external message
//!   source and the topic namespace. Built-ins: `$SYS` (system commands),
//!   `$MAILBOX` (in-process point-to-point), [`EchoGateway`](gateway::EchoGateway)
//!   and the data gateway behind [`add_data_gateway`](app::Application::add_data_gateway).
//! - [`DataItemSpec`](item::DataItemSpec): behavior of an observable value
//!   with dependencies, cascading synchronization and state bundles.
//! - [`PersistentStorage`](storage::PersistentStorage): snapshot store for
//!   the state bundles of all gateways.
//!
//! ## Example
//!
//! ```no_run
//! use hubrt::prelude::*;
//! use std::time::Duration;
//!
//! let app = Application::create_simple();
//! let item = app
//!     .add_data_item("data", "counter", LocalDataItem::<i64>::ephemeral())
//!     .unwrap();
//!
//! app.subscribe("data/counter", |message: &Message| {
//!     println!("counter changed: {}", message.topic());
//! })
//! .unwrap();
//!
//! app.launch().unwrap();
//! item.request_change(1).unwrap();
//! app.publish_later(Message::empty("$SYS/exit"), Duration::from_millis(100))
//!     .unwrap();
//! app.join().unwrap();
//! ```

pub mod app;
pub mod bundle;
pub mod config;
pub mod error;
pub mod gateway;
pub mod item;
pub mod message;
pub mod module;
pub mod storage;
pub mod topic;
pub mod utils;

mod test;

pub mod prelude;
