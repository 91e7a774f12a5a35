use crate::mi_debug;
use crate::service::address::Address;
use crate::service::context::ContextId;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use strum_macros::{Display, EnumString};

/// Why a target was resumed.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, EnumString, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ResumeReason {
    Continue,
    /// Single step, state unrelated to a stepped context is assumed unchanged.
    Step,
    Signal,
    /// Inferior function call or `return` command.
    EvaluationCall,
    Unknown,
}

/// Run-control and modification notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Resumed {
        context: ContextId,
        reason: ResumeReason,
    },
    Suspended {
        context: ContextId,
    },
    /// Memory was modified, `addresses` contains every modified addressable unit.
    MemoryChanged {
        context: ContextId,
        addresses: Vec<Address>,
    },
    /// An expression value was assigned.
    ExpressionChanged {
        context: ContextId,
    },
}

impl Event {
    pub fn context(&self) -> ContextId {
        match self {
            Event::Resumed { context, .. }
            | Event::Suspended { context }
            | Event::MemoryChanged { context, .. }
            | Event::ExpressionChanged { context } => *context,
        }
    }
}

pub trait EventListener {
    fn on_event(&self, event: &Event);
}

/// Session event bus.
///
/// Events are delivered to all listeners in dispatch order. An event dispatched by a listener
/// while another event is being delivered is queued and delivered after the current one.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Rc<RefCell<Vec<Rc<dyn EventListener>>>>,
    queue: Rc<RefCell<VecDeque<Event>>>,
    dispatching: Rc<Cell<bool>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Rc<dyn EventListener>) {
        self.listeners.borrow_mut().push(listener);
    }

    pub fn dispatch(&self, event: Event) {
        self.queue.borrow_mut().push_back(event);
        if self.dispatching.replace(true) {
            return;
        }

        loop {
            let Some(event) = self.queue.borrow_mut().pop_front() else {
                break;
            };
            mi_debug!(target: "events", "dispatch {event:?}");

            let listeners = self.listeners.borrow().clone();
            listeners.iter().for_each(|l| l.on_event(&event));
        }
        self.dispatching.set(false);
    }
}
