//! Memory service: cached, coalesced access to target memory.

pub mod block;
mod cache;

pub use block::{Gap, MemoryBlock, MemoryByte, SortedBlockList};

use crate::service::address::{check_range, Address};
use crate::service::command::cache::CommandCache;
use crate::service::command::CommandChannel;
use crate::service::config::MemoryConfig;
use crate::service::context::{ContextId, SharedContextTree};
use crate::service::error::Error;
use crate::service::event::{EventBus, ResumeReason};
use crate::service::executor::Spawner;
use crate::service::expression::ExpressionResolver;
use crate::service::invalidation::{self, InvalidationTarget};
use crate::{mi_debug, muted_error, weak_error};
use cache::{MemoryBackend, MemoryCache};
use futures::future::{self, LocalBoxFuture};
use futures::FutureExt;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

struct Inner {
    backend: Rc<MemoryBackend>,
    tree: SharedContextTree,
    caches: RefCell<HashMap<ContextId, Rc<MemoryCache>>>,
    resolver: RefCell<Option<Rc<dyn ExpressionResolver>>>,
}

/// Validated memory request.
struct Request {
    cache: Rc<MemoryCache>,
    start: Address,
    units: u64,
    octets: usize,
}

/// Memory access for all memory contexts of a session.
#[derive(Clone)]
pub struct MemoryService {
    inner: Rc<Inner>,
}

impl MemoryService {
    pub(crate) fn new(
        channel: Rc<dyn CommandChannel>,
        spawner: Spawner,
        tree: SharedContextTree,
        bus: EventBus,
        config: MemoryConfig,
    ) -> Self {
        let commands = CommandCache::new(channel.clone(), spawner.clone(), tree.clone());
        Self {
            inner: Rc::new(Inner {
                backend: Rc::new(MemoryBackend {
                    commands,
                    channel,
                    bus,
                    spawner,
                    config,
                }),
                tree,
                caches: RefCell::default(),
                resolver: RefCell::default(),
            }),
        }
    }

    /// Set a resolver used for a targeted refresh after an expression assignment.
    pub fn set_expression_resolver(&self, resolver: Rc<dyn ExpressionResolver>) {
        *self.inner.resolver.borrow_mut() = Some(resolver);
    }

    /// Command cache of memory commands.
    pub fn command_cache(&self) -> &CommandCache {
        &self.inner.backend.commands
    }

    fn config(&self) -> &MemoryConfig {
        &self.inner.backend.config
    }

    fn cache(&self, mem_ctx: ContextId) -> Rc<MemoryCache> {
        self.inner
            .caches
            .borrow_mut()
            .entry(mem_ctx)
            .or_insert_with(|| {
                mi_debug!(target: "memory", "create memory cache for {mem_ctx}");
                Rc::new(MemoryCache::new(
                    mem_ctx,
                    self.config().addressable_size,
                    self.inner.backend.clone(),
                ))
            })
            .clone()
    }

    fn validate(
        &self,
        context: ContextId,
        address: Address,
        offset: i64,
        word_size: usize,
        count: i64,
    ) -> Result<Request, Error> {
        let mem_ctx = self.inner.tree.borrow().memory_context(context)?;
        if word_size < 1 {
            return Err(Error::invalid_argument(format!(
                "word size {word_size} is less than 1"
            )));
        }
        if count < 0 {
            return Err(Error::invalid_argument(format!("negative word count {count}")));
        }
        if !self.config().bulk_transfer && word_size != 1 {
            return Err(Error::UnsupportedConfiguration(
                "legacy memory commands support only 1 byte words",
            ));
        }
        if word_size != self.config().addressable_size {
            return Err(Error::invalid_argument(format!(
                "word size {word_size} differs from addressable size {}",
                self.config().addressable_size
            )));
        }

        let units = count as u64;
        let start = address
            .checked_offset(offset)
            .ok_or(Error::InconsistentRange(address, offset.unsigned_abs()))?;
        check_range(start, units)?;

        let max_octets = self.config().max_request_octets;
        let octets = units
            .checked_mul(word_size as u64)
            .filter(|octets| *octets <= max_octets)
            .and_then(|octets| usize::try_from(octets).ok())
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "{count} words of {word_size} octets exceed limit of {max_octets} octets"
                ))
            })?;

        Ok(Request {
            cache: self.cache(mem_ctx),
            start,
            units,
            octets,
        })
    }

    /// Read memory. Unreadable bytes are returned with `valid` flag unset.
    ///
    /// Fails with [`Error::InvalidArgument`] if word size differs from the addressable size
    /// or if request exceeds [`MemoryConfig::max_request_octets`].
    ///
    /// # Arguments
    ///
    /// * `context`: context that determines memory context (process or memory space)
    /// * `address`: base address
    /// * `offset`: offset from base address in addressable units
    /// * `word_size`: size of addressable unit in octets, must be equal to configured
    ///   [`MemoryConfig::addressable_size`]
    /// * `count`: number of addressable units to read
    pub fn read_memory(
        &self,
        context: ContextId,
        address: Address,
        offset: i64,
        word_size: usize,
        count: i64,
    ) -> LocalBoxFuture<'static, Result<Vec<MemoryByte>, Error>> {
        match self.validate(context, address, offset, word_size, count) {
            Ok(req) => req.cache.read(req.start, req.units).map(Ok).boxed_local(),
            Err(e) => future::ready(Err(e)).boxed_local(),
        }
    }

    /// Write memory. On backend failure cache is left untouched.
    /// Arguments are validated the same way as in [`Self::read_memory`].
    ///
    /// # Arguments
    ///
    /// * `context`: context that determines memory context (process or memory space)
    /// * `address`: base address
    /// * `offset`: offset from base address in addressable units
    /// * `word_size`: size of addressable unit in octets, must be equal to configured
    ///   [`MemoryConfig::addressable_size`]
    /// * `count`: number of addressable units to write
    /// * `buffer`: data to write, at least `count * word_size` octets
    pub fn write_memory(
        &self,
        context: ContextId,
        address: Address,
        offset: i64,
        word_size: usize,
        count: i64,
        buffer: &[u8],
    ) -> LocalBoxFuture<'static, Result<(), Error>> {
        let req = match self.validate(context, address, offset, word_size, count) {
            Ok(req) => req,
            Err(e) => return future::ready(Err(e)).boxed_local(),
        };
        let len = req.octets;
        if buffer.len() < len {
            return future::ready(Err(Error::invalid_argument(format!(
                "buffer has {} bytes, {len} required",
                buffer.len()
            ))))
            .boxed_local();
        }
        if req.units == 0 {
            return future::ready(Ok(())).boxed_local();
        }

        let bytes = buffer[..len].to_vec();
        async move { req.cache.write(req.start, req.units, bytes).await }.boxed_local()
    }

    /// Fill memory with `repeat` copies of a pattern.
    ///
    /// # Arguments
    ///
    /// * `context`: context that determines memory context (process or memory space)
    /// * `address`: base address
    /// * `offset`: offset from base address in addressable units
    /// * `word_size`: size of addressable unit in octets, must be equal to configured
    ///   [`MemoryConfig::addressable_size`]
    /// * `repeat`: number of pattern copies
    /// * `pattern`: non-empty pattern, length is a multiple of `word_size`
    pub fn fill_memory(
        &self,
        context: ContextId,
        address: Address,
        offset: i64,
        word_size: usize,
        repeat: i64,
        pattern: &[u8],
    ) -> LocalBoxFuture<'static, Result<(), Error>> {
        let max_octets = self.config().max_request_octets;
        let buffer = match expand_pattern(word_size, repeat, pattern, max_octets) {
            Ok(buffer) => buffer,
            Err(e) => return future::ready(Err(e)).boxed_local(),
        };
        let count = (buffer.len() / word_size) as i64;
        self.write_memory(context, address, offset, word_size, count, &buffer)
    }

    /// Re-read a range after a possible side effect, see [`Self::read_memory`] for arguments.
    /// Does nothing if range is not cached. Emits a memory change event (if `notify` is set)
    /// only when content differs from the cached one.
    pub fn refresh_memory(
        &self,
        context: ContextId,
        address: Address,
        offset: i64,
        word_size: usize,
        count: i64,
        notify: bool,
    ) -> LocalBoxFuture<'static, Result<(), Error>> {
        match self.validate(context, address, offset, word_size, count) {
            Ok(req) => async move { req.cache.refresh(req.start, req.units, notify).await }
                .boxed_local(),
            Err(e) => future::ready(Err(e)).boxed_local(),
        }
    }

    /// Drop cached memory of a memory context owning `context` (and all nested memory spaces)
    /// and cached memory commands.
    pub fn flush_cache(&self, context: ContextId) -> Result<(), Error> {
        let mem_ctx = self.inner.tree.borrow().memory_context(context)?;
        self.reset_memory(mem_ctx);
        Ok(())
    }

    fn reset_memory(&self, mem_ctx: ContextId) {
        self.inner.backend.commands.reset_context(mem_ctx);
        let tree = self.inner.tree.borrow();
        self.inner
            .caches
            .borrow()
            .iter()
            .filter(|(ctx, _)| tree.is_ancestor_or_self(mem_ctx, **ctx))
            .for_each(|(ctx, cache)| {
                mi_debug!(target: "memory", "reset memory cache of {ctx}");
                cache.reset()
            });
    }

    /// Drop memory caches of removed contexts.
    pub(crate) fn forget(&self, contexts: &[ContextId]) {
        let mut caches = self.inner.caches.borrow_mut();
        for ctx in contexts {
            caches.remove(ctx);
        }
    }

    /// Return cached blocks of a memory context as `(start, units)` pairs.
    pub fn cached_ranges(&self, context: ContextId) -> Result<Vec<(Address, u64)>, Error> {
        let mem_ctx = self.inner.tree.borrow().memory_context(context)?;
        let caches = self.inner.caches.borrow();
        Ok(caches
            .get(&mem_ctx)
            .map(|cache| {
                cache
                    .blocks()
                    .iter()
                    .map(|b| (b.start(), b.units()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Repeat pattern `repeat` times, result is limited to `max_octets`.
fn expand_pattern(
    word_size: usize,
    repeat: i64,
    pattern: &[u8],
    max_octets: u64,
) -> Result<Vec<u8>, Error> {
    if pattern.is_empty() {
        return Err(Error::invalid_argument("empty fill pattern"));
    }
    if word_size < 1 || pattern.len() % word_size != 0 {
        return Err(Error::invalid_argument(format!(
            "pattern length {} is not a multiple of word size {word_size}",
            pattern.len()
        )));
    }
    if repeat < 0 {
        return Err(Error::invalid_argument(format!("negative repeat count {repeat}")));
    }
    let octets = (pattern.len() as u64).checked_mul(repeat as u64);
    if !octets.is_some_and(|octets| octets <= max_octets) {
        return Err(Error::invalid_argument(format!(
            "{repeat} copies of {} octets exceed limit of {max_octets} octets",
            pattern.len()
        )));
    }
    Ok(pattern.repeat(repeat as usize))
}

impl InvalidationTarget for MemoryService {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn on_resumed(&self, context: ContextId, reason: ResumeReason) {
        invalidation::on_resumed(&self.inner.backend.commands, context, reason);
        if reason == ResumeReason::Step {
            return;
        }
        let mem_ctx = muted_error!(self.inner.tree.borrow().memory_context(context));
        if let Some(mem_ctx) = mem_ctx {
            self.reset_memory(mem_ctx);
        }
    }

    fn on_suspended(&self, context: ContextId) {
        invalidation::on_suspended(&self.inner.backend.commands, context);
        let mem_ctx = muted_error!(self.inner.tree.borrow().memory_context(context));
        if let Some(mem_ctx) = mem_ctx {
            self.reset_memory(mem_ctx);
        }
    }

    fn on_expression_changed(&self, context: ContextId) {
        let Some(resolver) = self.inner.resolver.borrow().clone() else {
            return;
        };

        let service = self.clone();
        let word_size = self.config().addressable_size;
        self.inner.backend.spawner.spawn(async move {
            let Some((address, size)) = weak_error!(
                resolver.resolve_address(context).await,
                "resolve changed expression:"
            ) else {
                return;
            };
            let count = size.div_ceil(word_size as u64) as i64;
            weak_error!(
                service
                    .refresh_memory(context, address, 0, word_size, count, true)
                    .await,
                "refresh memory after expression change:"
            );
        });
    }
}
