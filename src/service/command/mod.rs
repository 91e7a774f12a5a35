//! Commands and responses exchanged with a debugger backend.
//!
//! Marshalling of MI text is done by a [`CommandChannel`] implementation, this module only
//! describes the typed form of a request and its result.

pub mod buffered;
pub mod cache;

use crate::service::address::Address;
use crate::service::context::ContextId;
use crate::service::error::Error;
use crate::service::module::Module;
use crate::service::register::RegisterValue;
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use strum_macros::IntoStaticStr;

/// Backend command. Command name (see [`Command::name`]) matches an MI command without
/// a leading dash.
#[derive(Clone, Debug, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Command {
    /// Bulk memory read, `count` is in addressable units.
    DataReadMemoryBytes {
        address: Address,
        offset: u64,
        count: u64,
    },
    /// Legacy memory read, supports only byte sized words.
    DataReadMemory {
        address: Address,
        word_size: usize,
        count: u64,
    },
    /// Bulk memory write.
    DataWriteMemoryBytes { address: Address, bytes: Vec<u8> },
    /// Legacy memory write, supports only byte sized words.
    DataWriteMemory {
        address: Address,
        offset: u64,
        word_size: usize,
        bytes: Vec<u8>,
    },
    DataListRegisterNames,
    DataListRegisterValues,
    DataWriteRegisterValues { name: String, value: String },
    DataEvaluateExpression { expression: String },
    /// Resolve address and size (in octets) of an lvalue expression.
    DataEvaluateExpressionAddress { expression: String },
    /// Assign new value to an lvalue expression.
    VarAssign { expression: String, value: String },
    FileListSharedLibraries,
}

impl Command {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// True if command can be issued only when target is stopped.
    pub fn needs_stopped_target(&self) -> bool {
        !matches!(
            self,
            Command::DataListRegisterNames | Command::FileListSharedLibraries
        )
    }

    /// True if command result may be reused by an identical command.
    /// Commands that modify a target state are never cached.
    pub fn is_cacheable(&self) -> bool {
        !matches!(
            self,
            Command::DataWriteMemoryBytes { .. }
                | Command::DataWriteMemory { .. }
                | Command::DataWriteRegisterValues { .. }
                | Command::VarAssign { .. }
        )
    }
}

/// Typed backend response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Done,
    Memory(Vec<u8>),
    RegisterNames(Vec<String>),
    RegisterValues(Vec<RegisterValue>),
    Value(String),
    AddressRange { address: Address, size: u64 },
    Modules(Vec<Module>),
}

impl Response {
    pub(crate) fn into_memory(self, cmd: &'static str) -> Result<Vec<u8>, Error> {
        match self {
            Response::Memory(bytes) => Ok(bytes),
            _ => Err(Error::UnexpectedResponse(cmd)),
        }
    }

    pub(crate) fn into_done(self, cmd: &'static str) -> Result<(), Error> {
        match self {
            Response::Done => Ok(()),
            _ => Err(Error::UnexpectedResponse(cmd)),
        }
    }
}

/// Asynchronous channel to a debugger backend.
///
/// A channel delivers responses for one context in order of issued commands, responses
/// for different contexts may interleave.
pub trait CommandChannel {
    /// Issue a command for a context. Result is delivered when backend answers.
    fn issue(&self, context: ContextId, command: Command)
        -> LocalBoxFuture<'static, Result<Response, Error>>;
}

impl<T: CommandChannel + ?Sized> CommandChannel for Rc<T> {
    fn issue(
        &self,
        context: ContextId,
        command: Command,
    ) -> LocalBoxFuture<'static, Result<Response, Error>> {
        (**self).issue(context, command)
    }
}
