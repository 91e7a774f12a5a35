use crate::service::address::Address;
use crate::service::command::Command;
use crate::service::context::ContextId;

/// Service layer error. Errors are cloneable because a single backend round trip may serve
/// many waiters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    // --------------------------------- request validation ----------------------------------------
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(&'static str),
    #[error("address range {0} + {1} units is outside of address space")]
    InconsistentRange(Address, u64),

    // --------------------------------- context errors --------------------------------------------
    #[error("context {0} not found")]
    UnknownContext(ContextId),
    #[error("context {0} has no memory address space")]
    NoMemoryContext(ContextId),
    #[error("target not available for context {0}")]
    TargetNotAvailable(ContextId),

    // --------------------------------- backend errors --------------------------------------------
    #[error("backend: `{command}` failed for context {context}: {message}")]
    Backend {
        context: ContextId,
        command: &'static str,
        message: String,
    },
    #[error("unexpected response to `{0}`")]
    UnexpectedResponse(&'static str),
    #[error("command channel closed")]
    ChannelClosed,
}

impl Error {
    /// Create a backend failure for a command issued for a context.
    pub fn backend(context: ContextId, command: &Command, message: impl Into<String>) -> Self {
        Error::Backend {
            context,
            command: command.name(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Return a hint to a front end - continue a session after error or stop it.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::InvalidArgument(_) => false,
            Error::UnsupportedConfiguration(_) => false,
            Error::InconsistentRange(_, _) => false,
            Error::UnknownContext(_) => false,
            Error::NoMemoryContext(_) => false,
            Error::TargetNotAvailable(_) => false,
            Error::Backend { .. } => false,
            Error::UnexpectedResponse(_) => false,

            // currently fatal errors
            Error::ChannelClosed => true,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                if $crate::log::is_enabled() {
                    $log_fn!(target: "service", "{:#}", e);
                }
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                if $crate::log::is_enabled() {
                    $log_fn!(target: "service", concat!($msg, " {:#}"), e);
                }
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(::log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(::log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(::log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(::log::debug, $res, $msg)
    };
}
