use std::error::Error;
use std::fmt;

/// Configuration or misuse error, surfaced synchronously on the calling
/// thread before anything is enqueued.
#[derive(Debug)]
pub enum SetupError {
    /// The application has already been launched; the requested mutation is
    /// no longer allowed.
    AlreadyLaunched,
    /// The operation requires a launched application.
    NotLaunched,
    /// Gateway identifiers must match `[A-Za-z][A-Za-z0-9]*`.
    InvalidGatewayId(String),
    /// A gateway with this identifier is already attached.
    DuplicateGatewayId(String),
    /// No gateway with this identifier is attached.
    UnknownGateway(String),
    /// The addressed gateway does not manage data items.
    NotDataGateway(String),
    /// Data item identifiers are `/`-separated levels of `[.A-Za-z0-9_]+`.
    InvalidDataItemId(String),
    /// The gateway already manages a data item with this identifier.
    DuplicateDataItem(String),
    /// The stored value type of the data item differs from the requested one.
    DataItemTypeMismatch {
        id: String,
        requested: &'static str,
        actual: &'static str,
    },
    /// Change requests are not accepted by read-only data items.
    ReadOnlyDataItem(String),
    /// A module failed to initialize; the launch was aborted.
    ModuleInitFailed(String),
    /// The dispatch thread could not be spawned.
    LaunchFailed(String),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::AlreadyLaunched => {
                write!(f, "the application has already been launched")
            }
            SetupError::NotLaunched => write!(f, "the application has not been launched"),
            SetupError::InvalidGatewayId(id) => {
                write!(f, "malformed gateway identifier \"{id}\"")
            }
            SetupError::DuplicateGatewayId(id) => {
                write!(f, "duplicated gateway identifier \"{id}\"")
            }
            SetupError::UnknownGateway(id) => write!(f, "unknown gateway \"{id}\""),
            SetupError::NotDataGateway(id) => {
                write!(f, "the gateway \"{id}\" is not a data gateway")
            }
            SetupError::InvalidDataItemId(id) => {
                write!(f, "malformed data item identifier \"{id}\"")
            }
            SetupError::DuplicateDataItem(id) => {
                write!(f, "duplicated data item identifier \"{id}\"")
            }
            SetupError::DataItemTypeMismatch {
                id,
                requested,
                actual,
            } => write!(
                f,
                "data item \"{id}\" stores values of type {actual}, not {requested}"
            ),
            SetupError::ReadOnlyDataItem(id) => {
                write!(f, "the data item \"{id}\" is read-only")
            }
            SetupError::ModuleInitFailed(reason) => {
                write!(f, "module initialization failed: {reason}")
            }
            SetupError::LaunchFailed(reason) => write!(f, "launch failed: {reason}"),
        }
    }
}

impl Error for SetupError {}

/// Messaging error raised while validating a topic or a topic filter on the
/// submitting thread, before the corresponding action is enqueued.
#[derive(Debug)]
pub enum MessagingError {
    /// The topic name violates the topic rules (empty, too long, or NUL).
    InvalidTopic(String),
    /// The topic filter violates the wildcard placement rules.
    InvalidTopicFilter(String),
    /// The topic or filter names a gateway but no subtopic below it.
    MissingSubtopic(String),
    /// The head of the topic or filter is not an attached gateway.
    UnknownGateway(String),
    /// The target gateway does not accept this publication topic.
    TopicRejected { gateway: String, topic: String },
}

impl fmt::Display for MessagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessagingError::InvalidTopic(topic) => write!(f, "invalid topic \"{topic}\""),
            MessagingError::InvalidTopicFilter(filter) => {
                write!(f, "malformed topic filter \"{filter}\"")
            }
            MessagingError::MissingSubtopic(topic) => {
                write!(f, "no subtopic after the gateway in \"{topic}\"")
            }
            MessagingError::UnknownGateway(id) => write!(f, "unknown gateway \"{id}\""),
            MessagingError::TopicRejected { gateway, topic } => {
                write!(f, "gateway \"{gateway}\" rejected the topic \"{topic}\"")
            }
        }
    }
}

impl Error for MessagingError {}
