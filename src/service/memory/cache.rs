use crate::service::address::Address;
use crate::service::command::cache::CommandCache;
use crate::service::command::{Command, CommandChannel};
use crate::service::config::MemoryConfig;
use crate::service::context::ContextId;
use crate::service::error::Error;
use crate::service::event::{Event, EventBus};
use crate::service::executor::Spawner;
use crate::service::memory::block::{Gap, MemoryBlock, MemoryByte, SortedBlockList};
use crate::service::monitor::CountingMonitor;
use crate::{mi_debug, mi_warn, weak_error};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Collaborators shared by all memory caches of a session.
pub(crate) struct MemoryBackend {
    pub(crate) commands: CommandCache,
    pub(crate) channel: Rc<dyn CommandChannel>,
    pub(crate) bus: EventBus,
    pub(crate) spawner: Spawner,
    pub(crate) config: MemoryConfig,
}

/// Memory cache of a single memory context.
///
/// Every change of the backend state known to the cache (reset, write, refresh) starts a new
/// generation. A gap fetched in an older generation is returned to its reader but never
/// stored, so data read before a resume or a write never lands in the cache.
pub(crate) struct MemoryCache {
    context: ContextId,
    blocks: RefCell<SortedBlockList>,
    generation: Cell<u64>,
    backend: Rc<MemoryBackend>,
}

impl MemoryCache {
    pub(crate) fn new(context: ContextId, word_size: usize, backend: Rc<MemoryBackend>) -> Self {
        let max_block_units = backend.config.max_block_units;
        Self {
            context,
            blocks: RefCell::new(SortedBlockList::new(word_size, max_block_units)),
            generation: Cell::new(0),
            backend,
        }
    }

    pub(crate) fn word_size(&self) -> usize {
        self.blocks.borrow().word_size()
    }

    pub(crate) fn blocks(&self) -> std::cell::Ref<'_, SortedBlockList> {
        self.blocks.borrow()
    }

    /// Drop all cached blocks.
    pub(crate) fn reset(&self) {
        self.blocks.borrow_mut().clear();
        self.next_generation();
    }

    fn next_generation(&self) {
        self.generation.set(self.generation.get() + 1);
    }

    fn read_command(&self, start: Address, units: u64) -> Command {
        if self.backend.config.bulk_transfer {
            Command::DataReadMemoryBytes {
                address: start,
                offset: 0,
                count: units,
            }
        } else {
            Command::DataReadMemory {
                address: start,
                word_size: self.word_size(),
                count: units,
            }
        }
    }

    fn check_len(&self, command: &Command, bytes: &[u8], units: u64) -> Result<(), Error> {
        let expected = units * self.word_size() as u64;
        if bytes.len() as u64 != expected {
            return Err(Error::backend(
                self.context,
                command,
                format!("expect {expected} bytes, got {}", bytes.len()),
            ));
        }
        Ok(())
    }

    async fn fetch_gap(&self, gap: Gap) -> Result<MemoryBlock, Error> {
        let command = self.read_command(gap.start, gap.units);
        let response = self
            .backend
            .commands
            .execute(self.context, command.clone())
            .await?;
        let bytes = response.into_memory(command.name())?;
        self.check_len(&command, &bytes, gap.units)?;
        Ok(MemoryBlock::new(gap.start, self.word_size(), bytes))
    }

    /// Read memory directly from backend, bypassing command cache.
    async fn read_from_backend(&self, start: Address, units: u64) -> Result<Vec<u8>, Error> {
        let command = self.read_command(start, units);
        let response = self
            .backend
            .channel
            .issue(self.context, command.clone())
            .await?;
        let bytes = response.into_memory(command.name())?;
        self.check_len(&command, &bytes, units)?;
        Ok(bytes)
    }

    /// Read `units` addressable units starting from `start`.
    ///
    /// Missing parts are fetched from backend, one command per gap. A gap that can't be
    /// fetched is returned as invalid bytes, so result always has `units * word size` bytes.
    pub(crate) async fn read(self: Rc<Self>, start: Address, units: u64) -> Vec<MemoryByte> {
        let (gaps, mut result) = {
            let blocks = self.blocks.borrow();
            (blocks.find_gaps(start, units), blocks.read_range(start, units))
        };
        if gaps.is_empty() {
            return result;
        }

        mi_debug!(target: "memory", "read {start}+{units}: fetch {} gap(s)", gaps.len());

        let generation = self.generation.get();
        let fetched = Rc::new(RefCell::new(Vec::with_capacity(gaps.len())));
        let (monitor, tokens) = CountingMonitor::new(gaps.len());
        for (gap, token) in gaps.into_iter().zip(tokens) {
            let cache = self.clone();
            let fetched = fetched.clone();
            self.backend.spawner.spawn(async move {
                let block = weak_error!(cache.fetch_gap(gap).await, "memory gap:");
                if let Some(block) = block {
                    if cache.generation.get() == generation {
                        cache.blocks.borrow_mut().insert(block.clone());
                    }
                    fetched.borrow_mut().push(block);
                }
                token.done();
            });
        }
        monitor.wait().await;

        let ws = self.word_size();
        fetched
            .borrow()
            .iter()
            .for_each(|block| block.copy_into(&mut result, start, ws));
        result
    }

    /// Write memory and refresh cached content of a written range.
    ///
    /// # Arguments
    ///
    /// * `start`: first written unit
    /// * `units`: number of written units
    /// * `bytes`: `units * word size` octets
    pub(crate) async fn write(
        &self,
        start: Address,
        units: u64,
        bytes: Vec<u8>,
    ) -> Result<(), Error> {
        let command = if self.backend.config.bulk_transfer {
            Command::DataWriteMemoryBytes {
                address: start,
                bytes,
            }
        } else {
            Command::DataWriteMemory {
                address: start,
                offset: 0,
                word_size: self.word_size(),
                bytes,
            }
        };
        let name = command.name();
        self.backend
            .commands
            .execute(self.context, command)
            .await?
            .into_done(name)?;

        // backend memory is changed, cached read responses and in-flight reads are outdated
        self.backend.commands.reset_context(self.context);
        self.next_generation();

        match self.read_from_backend(start, units).await {
            Ok(fresh) => self.blocks.borrow_mut().write_range(start, units, &fresh),
            Err(e) => {
                mi_warn!(target: "memory", "read back {start}+{units}: {e}, drop cache");
                self.reset();
            }
        }

        self.backend.bus.dispatch(Event::MemoryChanged {
            context: self.context,
            addresses: unit_addresses(start, units),
        });
        Ok(())
    }

    /// Re-read a range that may be modified by a side effect (for example, an expression
    /// assignment). Cache is updated and a change is reported only if content differs.
    ///
    /// # Arguments
    ///
    /// * `start`: first unit of a range
    /// * `units`: number of units
    /// * `notify`: emit [`Event::MemoryChanged`] if content differs
    pub(crate) async fn refresh(
        &self,
        start: Address,
        units: u64,
        notify: bool,
    ) -> Result<(), Error> {
        if !self.blocks.borrow().contains_any(start, units) {
            return Ok(());
        }

        self.backend.commands.reset_context(self.context);
        self.next_generation();
        let fresh = self.read_from_backend(start, units).await?;

        let ws = self.word_size();
        let old = self.blocks.borrow().read_range(start, units);
        let changed: Vec<Address> = old
            .chunks(ws)
            .zip(fresh.chunks(ws))
            .enumerate()
            .filter(|(_, (old, new))| {
                old.iter()
                    .zip(new.iter())
                    .any(|(o, n)| o.valid && o.value != *n)
            })
            .map(|(i, _)| Address::from_position(start.as_u128() + i as u128))
            .collect();
        if changed.is_empty() {
            mi_debug!(target: "memory", "refresh {start}+{units}: no changes");
            return Ok(());
        }

        self.blocks.borrow_mut().write_range(start, units, &fresh);
        if notify {
            self.backend.bus.dispatch(Event::MemoryChanged {
                context: self.context,
                addresses: changed,
            });
        }
        Ok(())
    }
}

fn unit_addresses(start: Address, units: u64) -> Vec<Address> {
    (0..units as u128)
        .map(|i| Address::from_position(start.as_u128() + i))
        .collect()
}
