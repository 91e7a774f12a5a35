use crate::service::command::cache::CommandCache;
use crate::service::command::{Command, Response};
use crate::service::context::ContextId;
use crate::service::error::Error;
use crate::service::event::ResumeReason;
use crate::service::invalidation::{self, InvalidationTarget};
use futures::future::LocalBoxFuture;
use futures::FutureExt;

/// Register value as reported by backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterValue {
    /// Register number, index in a register names list.
    pub number: u32,
    pub value: String,
}

/// Register access for frame contexts.
#[derive(Clone)]
pub struct RegisterService {
    commands: CommandCache,
}

impl RegisterService {
    pub(crate) fn new(commands: CommandCache) -> Self {
        Self { commands }
    }

    pub fn command_cache(&self) -> &CommandCache {
        &self.commands
    }

    /// Return names of all target registers. Names are available even while target is running.
    pub fn register_names(
        &self,
        context: ContextId,
    ) -> LocalBoxFuture<'static, Result<Vec<String>, Error>> {
        let command = Command::DataListRegisterNames;
        let name = command.name();
        self.commands
            .execute(context, command)
            .map(move |response| match response? {
                Response::RegisterNames(names) => Ok(names),
                _ => Err(Error::UnexpectedResponse(name)),
            })
            .boxed_local()
    }

    /// Return values of all registers in a frame.
    pub fn register_values(
        &self,
        context: ContextId,
    ) -> LocalBoxFuture<'static, Result<Vec<RegisterValue>, Error>> {
        let command = Command::DataListRegisterValues;
        let name = command.name();
        self.commands
            .execute(context, command)
            .map(move |response| match response? {
                Response::RegisterValues(values) => Ok(values),
                _ => Err(Error::UnexpectedResponse(name)),
            })
            .boxed_local()
    }

    /// Return value of a register by its name, `None` if register not exists.
    pub fn register_value(
        &self,
        context: ContextId,
        register: &str,
    ) -> LocalBoxFuture<'static, Result<Option<String>, Error>> {
        let names = self.register_names(context);
        let values = self.register_values(context);
        let register = register.to_string();
        async move {
            let names = names.await?;
            let Some(number) = names.iter().position(|n| *n == register) else {
                return Ok(None);
            };
            Ok(values
                .await?
                .into_iter()
                .find(|v| v.number as usize == number)
                .map(|v| v.value))
        }
        .boxed_local()
    }

    /// Write register value, register cache is reset on success.
    pub fn write_register(
        &self,
        context: ContextId,
        register: &str,
        value: &str,
    ) -> LocalBoxFuture<'static, Result<(), Error>> {
        let command = Command::DataWriteRegisterValues {
            name: register.to_string(),
            value: value.to_string(),
        };
        let name = command.name();
        let request = self.commands.execute(context, command);
        let commands = self.commands.clone();
        async move {
            request.await?.into_done(name)?;
            commands.reset();
            Ok(())
        }
        .boxed_local()
    }
}

impl InvalidationTarget for RegisterService {
    fn name(&self) -> &'static str {
        "registers"
    }

    fn on_resumed(&self, context: ContextId, reason: ResumeReason) {
        invalidation::on_resumed(&self.commands, context, reason);
    }

    fn on_suspended(&self, context: ContextId) {
        invalidation::on_suspended(&self.commands, context);
    }

    fn on_expression_changed(&self, _: ContextId) {
        // assigned expression may be a register
        self.commands.reset();
    }
}
