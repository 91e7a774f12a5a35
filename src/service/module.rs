use crate::service::address::Address;
use crate::service::command::cache::CommandCache;
use crate::service::command::{Command, Response};
use crate::service::context::ContextId;
use crate::service::error::Error;
use crate::service::event::ResumeReason;
use crate::service::invalidation::{self, InvalidationTarget};
use futures::future::LocalBoxFuture;
use futures::FutureExt;

/// Loaded executable object or shared library.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Module {
    pub name: String,
    /// Start of `.text` section, if known.
    pub from: Option<Address>,
    /// End of `.text` section, if known.
    pub to: Option<Address>,
    pub symbols_loaded: bool,
}

impl Module {
    pub fn contains(&self, addr: Address) -> bool {
        match (self.from, self.to) {
            (Some(from), Some(to)) => addr >= from && addr < to,
            _ => false,
        }
    }
}

/// Loaded modules tracking.
#[derive(Clone)]
pub struct ModuleService {
    commands: CommandCache,
}

impl ModuleService {
    pub(crate) fn new(commands: CommandCache) -> Self {
        Self { commands }
    }

    pub fn command_cache(&self) -> &CommandCache {
        &self.commands
    }

    /// Return modules loaded into a process.
    pub fn modules(
        &self,
        context: ContextId,
    ) -> LocalBoxFuture<'static, Result<Vec<Module>, Error>> {
        let command = Command::FileListSharedLibraries;
        let name = command.name();
        self.commands
            .execute(context, command)
            .map(move |response| match response? {
                Response::Modules(modules) => Ok(modules),
                _ => Err(Error::UnexpectedResponse(name)),
            })
            .boxed_local()
    }

    /// Return module which `.text` section contains an address.
    pub fn module_at(
        &self,
        context: ContextId,
        addr: Address,
    ) -> LocalBoxFuture<'static, Result<Option<Module>, Error>> {
        self.modules(context)
            .map(move |modules| Ok(modules?.into_iter().find(|m| m.contains(addr))))
            .boxed_local()
    }
}

impl InvalidationTarget for ModuleService {
    fn name(&self) -> &'static str {
        "modules"
    }

    fn on_resumed(&self, context: ContextId, reason: ResumeReason) {
        invalidation::on_resumed(&self.commands, context, reason);
    }

    fn on_suspended(&self, context: ContextId) {
        // shared libraries may be loaded or unloaded while running
        invalidation::on_suspended(&self.commands, context);
    }
}
