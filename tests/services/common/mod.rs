use futures::channel::oneshot;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use mi_services::service::address::Address;
use mi_services::service::command::{Command, CommandChannel, Response};
use mi_services::service::config::ServiceConfig;
use mi_services::service::context::{ContextId, ContextKind};
use mi_services::service::error::Error;
use mi_services::service::event::{Event, EventListener};
use mi_services::service::module::Module;
use mi_services::service::register::RegisterValue;
use mi_services::service::{MemoryByte, Session, SessionBuilder};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

pub const REGISTERS: [&str; 3] = ["rax", "rbx", "rip"];

/// In-memory backend. Memory that was never written contains the low byte of an octet index.
pub struct FakeBackend {
    word_size: usize,
    memory: RefCell<HashMap<u64, u8>>,
    unreadable: RefCell<Vec<(u64, u64)>>,
    registers: RefCell<Vec<String>>,
    variables: RefCell<HashMap<String, (u64, u64)>>,
    modules: RefCell<Vec<Module>>,
    issued: RefCell<Vec<(ContextId, Command)>>,
    pub fail_writes: Cell<bool>,
    hold: Cell<bool>,
    gates: RefCell<Vec<oneshot::Sender<()>>>,
}

impl FakeBackend {
    pub fn new(word_size: usize) -> Self {
        Self {
            word_size,
            memory: RefCell::default(),
            unreadable: RefCell::default(),
            registers: RefCell::new(vec![
                "0x1".to_string(),
                "0x2".to_string(),
                "0x401000".to_string(),
            ]),
            variables: RefCell::default(),
            modules: RefCell::default(),
            issued: RefCell::default(),
            fail_writes: Cell::new(false),
            hold: Cell::new(false),
            gates: RefCell::default(),
        }
    }

    /// Default content of a target octet.
    pub fn initial(octet: u64) -> u8 {
        octet as u8
    }

    /// Modify target memory behind the debugger back (like a running target does).
    pub fn poke(&self, unit: u64, bytes: &[u8]) {
        let mut memory = self.memory.borrow_mut();
        for (i, b) in bytes.iter().enumerate() {
            memory.insert(unit * self.word_size as u64 + i as u64, *b);
        }
    }

    pub fn peek(&self, unit: u64, units: u64) -> Vec<u8> {
        let memory = self.memory.borrow();
        let from = unit * self.word_size as u64;
        (from..from + units * self.word_size as u64)
            .map(|o| memory.get(&o).copied().unwrap_or(Self::initial(o)))
            .collect()
    }

    pub fn set_unreadable(&self, unit: u64, units: u64) {
        self.unreadable.borrow_mut().push((unit, unit + units));
    }

    pub fn add_variable(&self, name: &str, unit: u64, size: u64) {
        self.variables
            .borrow_mut()
            .insert(name.to_string(), (unit, size));
    }

    pub fn set_modules(&self, modules: Vec<Module>) {
        *self.modules.borrow_mut() = modules;
    }

    /// Hold all responses until [`FakeBackend::release`].
    pub fn hold(&self) {
        self.hold.set(true);
    }

    pub fn release(&self) {
        self.hold.set(false);
        for gate in self.gates.borrow_mut().drain(..) {
            _ = gate.send(());
        }
    }

    pub fn issued(&self) -> Vec<Command> {
        self.issued.borrow().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn count(&self, predicate: impl Fn(&Command) -> bool) -> usize {
        self.issued.borrow().iter().filter(|(_, c)| predicate(c)).count()
    }

    pub fn memory_reads(&self) -> usize {
        self.count(|c| {
            matches!(
                c,
                Command::DataReadMemoryBytes { .. } | Command::DataReadMemory { .. }
            )
        })
    }

    fn read(&self, unit: u64, units: u64) -> Option<Vec<u8>> {
        let unreadable = self
            .unreadable
            .borrow()
            .iter()
            .any(|(from, to)| unit < *to && unit + units > *from);
        (!unreadable).then(|| self.peek(unit, units))
    }

    fn execute(&self, context: ContextId, command: &Command) -> Result<Response, Error> {
        let fail = |msg: &str| Err(Error::backend(context, command, msg));
        match command {
            Command::DataReadMemoryBytes {
                address,
                offset,
                count,
            } => match self.read(address.as_u64() + offset, *count) {
                Some(bytes) => Ok(Response::Memory(bytes)),
                None => fail("Cannot access memory"),
            },
            Command::DataReadMemory { address, count, .. } => {
                match self.read(address.as_u64(), *count) {
                    Some(bytes) => Ok(Response::Memory(bytes)),
                    None => fail("Cannot access memory"),
                }
            }
            Command::DataWriteMemoryBytes { address, bytes } => {
                if self.fail_writes.get() {
                    return fail("Cannot access memory");
                }
                self.poke(address.as_u64(), bytes);
                Ok(Response::Done)
            }
            Command::DataWriteMemory {
                address,
                offset,
                bytes,
                ..
            } => {
                if self.fail_writes.get() {
                    return fail("Cannot access memory");
                }
                self.poke(address.as_u64() + offset, bytes);
                Ok(Response::Done)
            }
            Command::DataListRegisterNames => Ok(Response::RegisterNames(
                REGISTERS.iter().map(ToString::to_string).collect(),
            )),
            Command::DataListRegisterValues => Ok(Response::RegisterValues(
                self.registers
                    .borrow()
                    .iter()
                    .enumerate()
                    .map(|(i, v)| RegisterValue {
                        number: i as u32,
                        value: v.clone(),
                    })
                    .collect(),
            )),
            Command::DataWriteRegisterValues { name, value } => {
                let Some(idx) = REGISTERS.iter().position(|r| *r == name.as_str()) else {
                    return fail("Invalid register");
                };
                self.registers.borrow_mut()[idx] = value.clone();
                Ok(Response::Done)
            }
            Command::DataEvaluateExpression { expression } => {
                let Some((unit, size)) = self.variables.borrow().get(expression).copied() else {
                    return fail("No symbol in current context.");
                };
                let bytes = self.peek(unit, size / self.word_size as u64);
                let value = bytes
                    .iter()
                    .rev()
                    .fold(0u64, |acc, b| (acc << 8) | *b as u64);
                Ok(Response::Value(value.to_string()))
            }
            Command::DataEvaluateExpressionAddress { expression } => {
                let Some((unit, size)) = self.variables.borrow().get(expression).copied() else {
                    return fail("No symbol in current context.");
                };
                Ok(Response::AddressRange {
                    address: Address::new(unit),
                    size,
                })
            }
            Command::VarAssign { expression, value } => {
                let Some((unit, size)) = self.variables.borrow().get(expression).copied() else {
                    return fail("No symbol in current context.");
                };
                let Ok(value) = value.parse::<u64>() else {
                    return fail("Invalid value");
                };
                let bytes = value.to_le_bytes()[..size as usize].to_vec();
                self.poke(unit, &bytes);
                Ok(Response::Done)
            }
            Command::FileListSharedLibraries => {
                Ok(Response::Modules(self.modules.borrow().clone()))
            }
        }
    }
}

impl CommandChannel for FakeBackend {
    fn issue(
        &self,
        context: ContextId,
        command: Command,
    ) -> LocalBoxFuture<'static, Result<Response, Error>> {
        self.issued.borrow_mut().push((context, command.clone()));
        let result = self.execute(context, &command);

        let gate = self.hold.get().then(|| {
            let (tx, rx) = oneshot::channel();
            self.gates.borrow_mut().push(tx);
            rx
        });
        async move {
            if let Some(gate) = gate {
                _ = gate.await;
            }
            result
        }
        .boxed_local()
    }
}

/// Records every event delivered to session listeners.
#[derive(Default)]
pub struct TestHooks {
    events: RefCell<Vec<Event>>,
}

impl TestHooks {
    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn memory_changes(&self) -> Vec<Vec<Address>> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::MemoryChanged { addresses, .. } => Some(addresses.clone()),
                _ => None,
            })
            .collect()
    }
}

impl EventListener for TestHooks {
    fn on_event(&self, event: &Event) {
        self.events.borrow_mut().push(event.clone());
    }
}

pub struct Contexts {
    pub process: ContextId,
    pub thread: ContextId,
    pub frame: ContextId,
}

pub struct TestEnv {
    pub session: Session,
    pub backend: Rc<FakeBackend>,
    pub hooks: Rc<TestHooks>,
    pub ctx: Contexts,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(ServiceConfig::default())
    }

    pub fn with_config(config: ServiceConfig) -> Self {
        mi_services::log::init();

        let backend = Rc::new(FakeBackend::new(config.memory.addressable_size));
        let hooks = Rc::new(TestHooks::default());
        let session = SessionBuilder::new()
            .with_config(config)
            .with_listener(hooks.clone())
            .build(backend.clone());

        let process = session
            .add_context(None, ContextKind::Process { pid: 100 })
            .unwrap();
        let thread = session
            .add_context(Some(process), ContextKind::Thread { tid: 1 })
            .unwrap();
        let frame = session
            .add_context(Some(thread), ContextKind::Frame { level: 0 })
            .unwrap();

        Self {
            session,
            backend,
            hooks,
            ctx: Contexts {
                process,
                thread,
                frame,
            },
        }
    }

    pub fn expression(&self, expression: &str) -> ContextId {
        self.session
            .add_context(
                Some(self.ctx.frame),
                ContextKind::Expression {
                    expression: expression.to_string(),
                },
            )
            .unwrap()
    }

    /// Read bytes with word size 1, all bytes expected to be valid.
    pub fn read(&mut self, addr: u64, count: i64) -> Vec<u8> {
        let bytes = self.read_raw(addr, count);
        assert!(bytes.iter().all(|b| b.valid), "unexpected invalid bytes");
        bytes.into_iter().map(|b| b.value).collect()
    }

    pub fn read_raw(&mut self, addr: u64, count: i64) -> Vec<MemoryByte> {
        let ws = self.backend.word_size;
        let fut = self
            .session
            .read_memory(self.ctx.process, Address::new(addr), 0, ws, count);
        self.session.run_until(fut).unwrap()
    }

    pub fn cached_ranges(&self) -> Vec<(u64, u64)> {
        self.session
            .memory()
            .cached_ranges(self.ctx.process)
            .unwrap()
            .into_iter()
            .map(|(a, u)| (a.as_u64(), u))
            .collect()
    }
}
