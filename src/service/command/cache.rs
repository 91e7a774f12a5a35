use crate::mi_debug;
use crate::service::command::{Command, CommandChannel, Response};
use crate::service::context::{ContextId, SharedContextTree};
use crate::service::error::Error;
use crate::service::executor::Spawner;
use futures::channel::oneshot;
use futures::future::{self, LocalBoxFuture};
use futures::FutureExt;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

type CommandResult = Result<Response, Error>;
type Waiters = Rc<RefCell<Vec<oneshot::Sender<CommandResult>>>>;
type Key = (ContextId, Command);

enum Entry {
    /// Command is issued, waiting for a backend response.
    Pending(Waiters),
    Done(Response),
}

struct Inner {
    channel: Rc<dyn CommandChannel>,
    spawner: Spawner,
    tree: SharedContextTree,
    entries: RefCell<HashMap<Key, Entry>>,
    /// Explicit availability marks, unmarked context inherits mark of nearest ancestor.
    availability: RefCell<HashMap<ContextId, bool>>,
}

impl Inner {
    fn complete(&self, key: Key, waiters: Waiters, result: CommandResult) {
        {
            let mut entries = self.entries.borrow_mut();
            // entry is replaced or removed if cache was reset while command was in flight,
            // in this case result is delivered to waiters but never stored
            let is_current =
                matches!(entries.get(&key), Some(Entry::Pending(w)) if Rc::ptr_eq(w, &waiters));
            if is_current {
                match &result {
                    Ok(response) => {
                        entries.insert(key, Entry::Done(response.clone()));
                    }
                    Err(_) => {
                        entries.remove(&key);
                    }
                }
            } else {
                mi_debug!(target: "command", "drop outdated result of `{}`", key.1.name());
            }
        }

        let waiters = std::mem::take(&mut *waiters.borrow_mut());
        for waiter in waiters {
            _ = waiter.send(result.clone());
        }
    }
}

/// Memoizes backend commands per context.
///
/// At most one identical command per context is outstanding at a time: a request for
/// a command that is already in flight waits for the same response. Successful responses are
/// served from the cache until [`CommandCache::reset`] or [`CommandCache::reset_context`].
#[derive(Clone)]
pub struct CommandCache {
    inner: Rc<Inner>,
}

impl CommandCache {
    pub fn new(channel: Rc<dyn CommandChannel>, spawner: Spawner, tree: SharedContextTree) -> Self {
        Self {
            inner: Rc::new(Inner {
                channel,
                spawner,
                tree,
                entries: RefCell::default(),
                availability: RefCell::default(),
            }),
        }
    }

    /// Execute command for a context or take its result from the cache.
    ///
    /// # Arguments
    ///
    /// * `context`: context in which command is executed
    /// * `command`: backend command
    pub fn execute(
        &self,
        context: ContextId,
        command: Command,
    ) -> LocalBoxFuture<'static, CommandResult> {
        if !command.is_cacheable() {
            if let Err(e) = self.check_available(context, &command) {
                return future::ready(Err(e)).boxed_local();
            }
            return self.inner.channel.issue(context, command);
        }

        let key = (context, command);
        let mut entries = self.inner.entries.borrow_mut();
        match entries.get(&key) {
            Some(Entry::Done(response)) => {
                mi_debug!(target: "command", "`{}` served from cache", key.1.name());
                return future::ready(Ok(response.clone())).boxed_local();
            }
            Some(Entry::Pending(waiters)) => {
                mi_debug!(target: "command", "`{}` already in flight", key.1.name());
                let (tx, rx) = oneshot::channel();
                waiters.borrow_mut().push(tx);
                return wait_for(rx);
            }
            None => {}
        }
        if let Err(e) = self.check_available(context, &key.1) {
            return future::ready(Err(e)).boxed_local();
        }

        let (tx, rx) = oneshot::channel();
        let waiters: Waiters = Rc::new(RefCell::new(vec![tx]));
        entries.insert(key.clone(), Entry::Pending(waiters.clone()));
        drop(entries);

        let request = self.inner.channel.issue(key.0, key.1.clone());
        let inner = self.inner.clone();
        self.inner.spawner.spawn(async move {
            let result = request.await;
            inner.complete(key, waiters, result);
        });

        wait_for(rx)
    }

    fn check_available(&self, context: ContextId, command: &Command) -> Result<(), Error> {
        if command.needs_stopped_target() && !self.is_context_available(context) {
            mi_debug!(
                target: "command",
                "`{}` rejected, context {context} is running",
                command.name()
            );
            return Err(Error::TargetNotAvailable(context));
        }
        Ok(())
    }

    /// Set availability of a context (and all its descendants). Cached results are kept,
    /// only dispatch of new commands depends on availability.
    pub fn set_context_available(&self, context: ContextId, available: bool) {
        let tree = self.inner.tree.borrow();
        let mut marks = self.inner.availability.borrow_mut();
        marks.retain(|ctx, _| !tree.is_ancestor_or_self(context, *ctx));
        marks.insert(context, available);
    }

    pub fn is_context_available(&self, context: ContextId) -> bool {
        let tree = self.inner.tree.borrow();
        let marks = self.inner.availability.borrow();
        let available = tree
            .ancestors_or_self(context)
            .find_map(|ctx| marks.get(&ctx).copied())
            .unwrap_or(true);
        available
    }

    /// Drop all cached and pending entries.
    pub fn reset(&self) {
        self.inner.entries.borrow_mut().clear();
    }

    /// Drop cached and pending entries of a context and its descendants.
    pub fn reset_context(&self, context: ContextId) {
        let tree = self.inner.tree.borrow();
        self.inner.entries.borrow_mut().retain(|(ctx, _), _| {
            *ctx != context && !tree.is_ancestor_or_self(context, *ctx)
        });
    }

    /// Return true if a successful result of the command is cached.
    pub fn is_cached(&self, context: ContextId, command: &Command) -> bool {
        let key = (context, command.clone());
        matches!(self.inner.entries.borrow().get(&key), Some(Entry::Done(_)))
    }
}

fn wait_for(rx: oneshot::Receiver<CommandResult>) -> LocalBoxFuture<'static, CommandResult> {
    async move { rx.await.unwrap_or(Err(Error::ChannelClosed)) }.boxed_local()
}
