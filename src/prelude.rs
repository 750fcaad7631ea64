//! One-stop imports for applications built on hubrt.

pub use crate::app::{
    Application, DATA_GATEWAY, LOCAL_GATEWAY, MAILBOX_GATEWAY, SYSTEM_GATEWAY, ScheduleHandle,
    Subscription,
};
pub use crate::bundle::{Bundle, BundleMap, BundleValue};
pub use crate::config::AppConfig;
pub use crate::error::{MessagingError, SetupError};
pub use crate::gateway::{EchoGateway, Gateway, GatewayCtx, TopicValidator};
pub use crate::item::{
    AccumulatingDataItem, ActivationCtx, AliasDataItem, ChangeOutcome, DataItem, DataItemSpec,
    ItemRef, ItemState, ItemValue, LocalDataItem,
};
pub use crate::message::{Message, MessageListener};
pub use crate::module::Module;
pub use crate::storage::{JsonFileStorage, MemoryStorage, PersistentStorage};
pub use crate::utils::LoggerConfig;
