//! Capability lookup for optional native entry points.
//!
//! Not every context exposes compute dispatch, transform feedback or
//! buffer mapping. A [`CapabilityRegistry`] is built once from the
//! context's loader and answers "can I call this?" per entry point. Each
//! entry is resolved the first time it is asked for and the answer never
//! changes afterwards.

use std::{cell::RefCell, ffi::c_void, fmt};

use fxhash::FxHashMap;

/// A native function identified by name and call signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryPoint {
    pub name: &'static str,
    pub signature: &'static str,
}

impl EntryPoint {
    /// Compute dispatch.
    pub const DISPATCH_COMPUTE: Self = Self::new("glDispatchCompute", "void(uint, uint, uint)");
    /// Memory barriers after compute writes.
    pub const MEMORY_BARRIER: Self = Self::new("glMemoryBarrier", "void(bitfield)");
    /// Indexed buffer bindings.
    pub const BIND_BUFFER_BASE: Self = Self::new("glBindBufferBase", "void(enum, uint, uint)");
    /// Mapping buffer ranges into client memory.
    pub const MAP_BUFFER_RANGE: Self = Self::new(
        "glMapBufferRange",
        "void*(enum, intptr, sizeiptr, bitfield)",
    );
    /// Declaring transform feedback outputs before linking.
    pub const TRANSFORM_FEEDBACK_VARYINGS: Self = Self::new(
        "glTransformFeedbackVaryings",
        "void(uint, sizei, const char**, enum)",
    );
    /// Transform feedback objects.
    pub const BIND_TRANSFORM_FEEDBACK: Self =
        Self::new("glBindTransformFeedback", "void(enum, uint)");
    /// Starting a transform feedback capture.
    pub const BEGIN_TRANSFORM_FEEDBACK: Self = Self::new("glBeginTransformFeedback", "void(enum)");

    /// An entry point by name and C signature.
    pub const fn new(name: &'static str, signature: &'static str) -> Self {
        Self { name, signature }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.signature)
    }
}

/// Cached answers to "can this entry point be called?".
pub struct CapabilityRegistry {
    resolver: Box<dyn Fn(&str) -> bool>,
    table: RefCell<FxHashMap<EntryPoint, bool>>,
}

impl CapabilityRegistry {
    /// `resolver` answers whether a function name can be loaded.
    pub fn new(resolver: impl Fn(&str) -> bool + 'static) -> Self {
        Self {
            resolver: Box::new(resolver),
            table: RefCell::new(FxHashMap::default()),
        }
    }

    /// Builds the registry from a GL loader such as the one handed to
    /// `glow::Context::from_loader_function`.
    pub fn from_loader<F>(loader: F) -> Self
    where
        F: Fn(&str) -> *const c_void + 'static,
    {
        Self::new(move |name| !loader(name).is_null())
    }

    /// Whether `entry` can be called, resolving it on first use.
    pub fn resolve(&self, entry: EntryPoint) -> bool {
        if let Some(&available) = self.table.borrow().get(&entry) {
            return available;
        }
        let available = (self.resolver)(entry.name);
        log::debug!(
            "{entry} is {}",
            if available { "available" } else { "missing" }
        );
        self.table.borrow_mut().insert(entry, available);
        available
    }

    /// Resolves a batch up front, typically right after context creation.
    pub fn preload(&self, entries: &[EntryPoint]) {
        for &entry in entries {
            self.resolve(entry);
        }
    }

    /// Number of entry points resolved so far.
    pub fn resolved(&self) -> usize {
        self.table.borrow().len()
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("table", &self.table.borrow())
            .finish_non_exhaustive()
    }
}
