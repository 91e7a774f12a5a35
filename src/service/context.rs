use crate::service::error::Error;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

/// Identifier of an execution/data context (process, thread, frame, memory space, expression).
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct ContextId(u32);

impl ContextId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContextKind {
    /// Debugee process, owns a default address space.
    Process { pid: u32 },
    Thread { tid: u32 },
    Frame { level: u32 },
    /// Named address space nested into a process (for example, a DSP data space).
    MemorySpace { name: String },
    /// Expression evaluated in scope of a parent (usually frame) context.
    Expression { expression: String },
}

impl ContextKind {
    /// True if context of this kind owns a memory cache.
    pub fn is_memory(&self) -> bool {
        matches!(
            self,
            ContextKind::Process { .. } | ContextKind::MemorySpace { .. }
        )
    }
}

#[derive(Debug)]
struct Node {
    kind: ContextKind,
    parent: Option<ContextId>,
}

/// Explicit hierarchy of contexts known to a session.
///
/// Ancestor/descendant relations decide which caches are reset by an event
/// and which memory cache serves a request.
#[derive(Debug, Default)]
pub struct ContextTree {
    nodes: IndexMap<ContextId, Node>,
    next_id: u32,
}

pub type SharedContextTree = Rc<RefCell<ContextTree>>;

impl ContextTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new context.
    ///
    /// # Arguments
    ///
    /// * `parent`: parent context, `None` for a root (usually a process)
    /// * `kind`: context kind
    pub fn add(
        &mut self,
        parent: Option<ContextId>,
        kind: ContextKind,
    ) -> Result<ContextId, Error> {
        if let Some(parent) = parent {
            if !self.nodes.contains_key(&parent) {
                return Err(Error::UnknownContext(parent));
            }
        }

        let id = ContextId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node { kind, parent });
        Ok(id)
    }

    /// Remove context and all of its descendants. Return removed contexts.
    pub fn remove(&mut self, id: ContextId) -> Vec<ContextId> {
        let removed = self.descendants_or_self(id);
        for ctx in &removed {
            self.nodes.shift_remove(ctx);
        }
        removed
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn kind(&self, id: ContextId) -> Option<&ContextKind> {
        self.nodes.get(&id).map(|n| &n.kind)
    }

    pub fn parent(&self, id: ContextId) -> Option<ContextId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    /// Iterate over context and its ancestors, starting from the context itself.
    pub fn ancestors_or_self(&self, id: ContextId) -> impl Iterator<Item = ContextId> + '_ {
        let first = self.contains(id).then_some(id);
        std::iter::successors(first, move |ctx| self.parent(*ctx))
    }

    pub fn is_ancestor_or_self(&self, ancestor: ContextId, id: ContextId) -> bool {
        self.ancestors_or_self(id).any(|ctx| ctx == ancestor)
    }

    /// Return context and all of its descendants in registration order.
    pub fn descendants_or_self(&self, id: ContextId) -> Vec<ContextId> {
        if !self.contains(id) {
            return vec![];
        }
        self.nodes
            .keys()
            .copied()
            .filter(|ctx| self.is_ancestor_or_self(id, *ctx))
            .collect()
    }

    /// Return nearest memory context (process or memory space) of given context.
    pub fn memory_context(&self, id: ContextId) -> Result<ContextId, Error> {
        if !self.contains(id) {
            return Err(Error::UnknownContext(id));
        }
        self.ancestors_or_self(id)
            .find(|ctx| self.kind(*ctx).map(ContextKind::is_memory).unwrap_or_default())
            .ok_or(Error::NoMemoryContext(id))
    }

    /// Return expression text if context is an expression context.
    pub fn expression(&self, id: ContextId) -> Option<&str> {
        match self.kind(id)? {
            ContextKind::Expression { expression } => Some(expression),
            _ => None,
        }
    }
}
