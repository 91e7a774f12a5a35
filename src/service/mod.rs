pub mod address;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod executor;
pub mod expression;
pub mod invalidation;
pub mod memory;
pub mod module;
pub mod monitor;
pub mod register;

pub use address::Address;
pub use command::{Command, CommandChannel, Response};
pub use config::ServiceConfig;
pub use context::{ContextId, ContextKind, ContextTree};
pub use error::Error;
pub use event::{Event, EventListener, ResumeReason};
pub use memory::MemoryByte;

use crate::mi_info;
use crate::service::command::buffered::BufferedChannel;
use crate::service::command::cache::CommandCache;
use crate::service::event::EventBus;
use crate::service::executor::{Executor, Spawner};
use crate::service::expression::ExpressionService;
use crate::service::invalidation::InvalidationController;
use crate::service::memory::MemoryService;
use crate::service::module::ModuleService;
use crate::service::register::RegisterService;
use futures::future::LocalBoxFuture;
use std::cell::{Ref, RefCell};
use std::future::Future;
use std::rc::Rc;

/// Debug session services: one executor, one context hierarchy and one set of caches
/// per debugged target.
pub struct Session {
    executor: Executor,
    tree: Rc<RefCell<ContextTree>>,
    bus: EventBus,
    memory: MemoryService,
    registers: RegisterService,
    expressions: ExpressionService,
    modules: ModuleService,
}

#[derive(Default)]
pub struct SessionBuilder {
    config: ServiceConfig,
    listeners: Vec<Rc<dyn EventListener>>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(self, config: ServiceConfig) -> Self {
        Self { config, ..self }
    }

    /// Add an event listener. Listeners are notified after session caches are invalidated.
    pub fn with_listener(mut self, listener: Rc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Create a session.
    ///
    /// # Arguments
    ///
    /// * `channel`: channel to a debugger backend
    pub fn build(self, channel: Rc<dyn CommandChannel>) -> Session {
        let executor = Executor::new();
        let spawner = executor.spawner();
        let tree = Rc::new(RefCell::new(ContextTree::new()));
        let bus = EventBus::new();

        let delay = self.config.commands.result_delay_turns;
        let channel: Rc<dyn CommandChannel> = if delay > 0 {
            Rc::new(BufferedChannel::new(channel, delay))
        } else {
            channel
        };
        let command_cache = || CommandCache::new(channel.clone(), spawner.clone(), tree.clone());

        let memory = MemoryService::new(
            channel.clone(),
            spawner.clone(),
            tree.clone(),
            bus.clone(),
            self.config.memory.clone(),
        );
        let registers = RegisterService::new(command_cache());
        let expressions = ExpressionService::new(command_cache(), tree.clone(), bus.clone());
        let modules = ModuleService::new(command_cache());
        memory.set_expression_resolver(Rc::new(expressions.clone()));

        let controller = InvalidationController::new();
        controller.register(Rc::new(memory.clone()));
        controller.register(Rc::new(registers.clone()));
        controller.register(Rc::new(expressions.clone()));
        controller.register(Rc::new(modules.clone()));
        bus.subscribe(Rc::new(controller));
        self.listeners.into_iter().for_each(|l| bus.subscribe(l));

        crate::log::apply(&self.config.log);
        mi_info!(target: "service", "session created, config: {:?}", self.config);

        Session {
            executor,
            tree,
            bus,
            memory,
            registers,
            expressions,
            modules,
        }
    }
}

impl Session {
    /// Register a new context.
    ///
    /// # Arguments
    ///
    /// * `parent`: parent context, `None` for a root context
    /// * `kind`: context kind
    pub fn add_context(
        &self,
        parent: Option<ContextId>,
        kind: ContextKind,
    ) -> Result<ContextId, Error> {
        self.tree.borrow_mut().add(parent, kind)
    }

    /// Remove context with its descendants and drop everything cached for them.
    pub fn remove_context(&self, context: ContextId) {
        self.memory.command_cache().reset_context(context);
        self.registers.command_cache().reset_context(context);
        self.expressions.command_cache().reset_context(context);
        self.modules.command_cache().reset_context(context);
        let removed = self.tree.borrow_mut().remove(context);
        self.memory.forget(&removed);
    }

    pub fn contexts(&self) -> Ref<'_, ContextTree> {
        self.tree.borrow()
    }

    /// Deliver a backend event to session caches and listeners.
    pub fn dispatch_event(&self, event: Event) {
        self.bus.dispatch(event)
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn memory(&self) -> &MemoryService {
        &self.memory
    }

    pub fn registers(&self) -> &RegisterService {
        &self.registers
    }

    pub fn expressions(&self) -> &ExpressionService {
        &self.expressions
    }

    pub fn modules(&self) -> &ModuleService {
        &self.modules
    }

    /// See [`MemoryService::read_memory`].
    pub fn read_memory(
        &self,
        context: ContextId,
        address: Address,
        offset: i64,
        word_size: usize,
        count: i64,
    ) -> LocalBoxFuture<'static, Result<Vec<MemoryByte>, Error>> {
        self.memory
            .read_memory(context, address, offset, word_size, count)
    }

    /// See [`MemoryService::write_memory`].
    pub fn write_memory(
        &self,
        context: ContextId,
        address: Address,
        offset: i64,
        word_size: usize,
        count: i64,
        buffer: &[u8],
    ) -> LocalBoxFuture<'static, Result<(), Error>> {
        self.memory
            .write_memory(context, address, offset, word_size, count, buffer)
    }

    /// See [`MemoryService::fill_memory`].
    pub fn fill_memory(
        &self,
        context: ContextId,
        address: Address,
        offset: i64,
        word_size: usize,
        repeat: i64,
        pattern: &[u8],
    ) -> LocalBoxFuture<'static, Result<(), Error>> {
        self.memory
            .fill_memory(context, address, offset, word_size, repeat, pattern)
    }

    /// See [`MemoryService::flush_cache`].
    pub fn flush_cache(&self, context: ContextId) -> Result<(), Error> {
        self.memory.flush_cache(context)
    }

    pub fn spawner(&self) -> Spawner {
        self.executor.spawner()
    }

    /// Run session tasks until a future resolves.
    pub fn run_until<F: Future>(&mut self, future: F) -> F::Output {
        self.executor.run_until(future)
    }

    /// Run session tasks until none of them can make progress.
    pub fn run_until_stalled(&mut self) {
        self.executor.run_until_stalled()
    }
}
