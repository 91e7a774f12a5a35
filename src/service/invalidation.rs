//! Cache invalidation driven by run-control and modification events.

use crate::service::address::Address;
use crate::service::command::cache::CommandCache;
use crate::service::context::ContextId;
use crate::service::event::{Event, EventListener, ResumeReason};
use std::cell::RefCell;
use std::rc::Rc;

/// A cached resource (memory, registers, expressions, modules) that reacts to
/// execution state changes.
pub trait InvalidationTarget {
    /// Resource name, used in logs.
    fn name(&self) -> &'static str;

    /// Target was resumed: new commands can't be dispatched; unless this is a single step
    /// everything cached for the context and its descendants is outdated.
    fn on_resumed(&self, context: ContextId, reason: ResumeReason);

    /// Target was suspended: commands may be dispatched again, state may have changed
    /// arbitrarily while running.
    fn on_suspended(&self, context: ContextId);

    fn on_memory_changed(&self, _context: ContextId, _addresses: &[Address]) {}

    fn on_expression_changed(&self, _context: ContextId) {}
}

/// Common reaction of a command-cache backed resource to run-control events.
pub(crate) fn on_resumed(commands: &CommandCache, context: ContextId, reason: ResumeReason) {
    commands.set_context_available(context, false);
    if reason != ResumeReason::Step {
        commands.reset_context(context);
    }
}

pub(crate) fn on_suspended(commands: &CommandCache, context: ContextId) {
    commands.set_context_available(context, true);
    commands.reset_context(context);
}

/// Event bus listener that forwards events to every registered cached resource.
#[derive(Default)]
pub struct InvalidationController {
    targets: RefCell<Vec<Rc<dyn InvalidationTarget>>>,
}

impl InvalidationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, target: Rc<dyn InvalidationTarget>) {
        self.targets.borrow_mut().push(target);
    }
}

impl EventListener for InvalidationController {
    fn on_event(&self, event: &Event) {
        let targets = self.targets.borrow().clone();
        for target in targets {
            crate::mi_debug!(target: "events", "{}: handle {event:?}", target.name());
            match event {
                Event::Resumed { context, reason } => target.on_resumed(*context, *reason),
                Event::Suspended { context } => target.on_suspended(*context),
                Event::MemoryChanged { context, addresses } => {
                    target.on_memory_changed(*context, addresses)
                }
                Event::ExpressionChanged { context } => target.on_expression_changed(*context),
            }
        }
    }
}
