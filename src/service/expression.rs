use crate::service::address::Address;
use crate::service::command::cache::CommandCache;
use crate::service::command::{Command, Response};
use crate::service::context::{ContextId, SharedContextTree};
use crate::service::error::Error;
use crate::service::event::{Event, EventBus, ResumeReason};
use crate::service::invalidation::{self, InvalidationTarget};
use futures::future::{self, LocalBoxFuture};
use futures::FutureExt;
use std::rc::Rc;

/// Resolve memory location of an lvalue expression.
pub trait ExpressionResolver {
    /// Return address and size (in octets) of an expression.
    ///
    /// # Arguments
    ///
    /// * `context`: expression context
    fn resolve_address(
        &self,
        context: ContextId,
    ) -> LocalBoxFuture<'static, Result<(Address, u64), Error>>;
}

struct Inner {
    commands: CommandCache,
    tree: SharedContextTree,
    bus: EventBus,
}

/// Expression evaluation and assignment.
#[derive(Clone)]
pub struct ExpressionService {
    inner: Rc<Inner>,
}

impl ExpressionService {
    pub(crate) fn new(commands: CommandCache, tree: SharedContextTree, bus: EventBus) -> Self {
        Self {
            inner: Rc::new(Inner {
                commands,
                tree,
                bus,
            }),
        }
    }

    pub fn command_cache(&self) -> &CommandCache {
        &self.inner.commands
    }

    fn expression(&self, context: ContextId) -> Result<String, Error> {
        let tree = self.inner.tree.borrow();
        if !tree.contains(context) {
            return Err(Error::UnknownContext(context));
        }
        tree.expression(context)
            .map(ToString::to_string)
            .ok_or_else(|| Error::invalid_argument(format!("{context} is not an expression")))
    }

    /// Evaluate an expression, result is a value formatted by backend.
    pub fn evaluate(&self, context: ContextId) -> LocalBoxFuture<'static, Result<String, Error>> {
        let expression = match self.expression(context) {
            Ok(expression) => expression,
            Err(e) => return future::ready(Err(e)).boxed_local(),
        };
        let command = Command::DataEvaluateExpression { expression };
        let name = command.name();
        self.inner
            .commands
            .execute(context, command)
            .map(move |response| match response? {
                Response::Value(value) => Ok(value),
                _ => Err(Error::UnexpectedResponse(name)),
            })
            .boxed_local()
    }

    /// Assign a new value to an expression. On success expression cache is reset and
    /// [`Event::ExpressionChanged`] is dispatched.
    ///
    /// # Arguments
    ///
    /// * `context`: expression context
    /// * `value`: new value in backend syntax
    pub fn assign(
        &self,
        context: ContextId,
        value: &str,
    ) -> LocalBoxFuture<'static, Result<(), Error>> {
        let expression = match self.expression(context) {
            Ok(expression) => expression,
            Err(e) => return future::ready(Err(e)).boxed_local(),
        };
        let command = Command::VarAssign {
            expression,
            value: value.to_string(),
        };
        let name = command.name();
        let request = self.inner.commands.execute(context, command);
        let inner = self.inner.clone();
        async move {
            request.await?.into_done(name)?;
            inner.commands.reset();
            inner.bus.dispatch(Event::ExpressionChanged { context });
            Ok(())
        }
        .boxed_local()
    }
}

impl ExpressionResolver for ExpressionService {
    fn resolve_address(
        &self,
        context: ContextId,
    ) -> LocalBoxFuture<'static, Result<(Address, u64), Error>> {
        let expression = match self.expression(context) {
            Ok(expression) => expression,
            Err(e) => return future::ready(Err(e)).boxed_local(),
        };
        let command = Command::DataEvaluateExpressionAddress { expression };
        let name = command.name();
        self.inner
            .commands
            .execute(context, command)
            .map(move |response| match response? {
                Response::AddressRange { address, size } => Ok((address, size)),
                _ => Err(Error::UnexpectedResponse(name)),
            })
            .boxed_local()
    }
}

impl InvalidationTarget for ExpressionService {
    fn name(&self) -> &'static str {
        "expressions"
    }

    fn on_resumed(&self, context: ContextId, reason: ResumeReason) {
        invalidation::on_resumed(&self.inner.commands, context, reason);
    }

    fn on_suspended(&self, context: ContextId) {
        invalidation::on_suspended(&self.inner.commands, context);
    }

    fn on_memory_changed(&self, _: ContextId, _: &[Address]) {
        // any expression may depend on modified memory
        self.inner.commands.reset();
    }

    fn on_expression_changed(&self, _: ContextId) {
        self.inner.commands.reset();
    }
}
