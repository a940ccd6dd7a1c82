//! Host kernel programs: named Rust closures standing in for compiled
//! device code.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::engine::error::SimResult;
use crate::host::invocation::HostInvocation;


/// A host kernel body. Runs once per dispatch over the whole geometry.
pub type KernelFn = Arc<dyn Fn(&mut HostInvocation<'_>) -> SimResult<()> + Send + Sync>;

/// A set of named host kernels.
///
/// Cloning is cheap: entries are reference counted.
#[derive(Clone, Default)]
pub struct HostProgram {
    entries: BTreeMap<String, KernelFn>,
}

impl HostProgram {
    /// An empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the entry point `name`.
    pub fn with_entry<F>(mut self, name: impl Into<String>, kernel: F) -> Self
    where
        F: Fn(&mut HostInvocation<'_>) -> SimResult<()> + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Arc::new(kernel));
        self
    }

    /// Looks up an entry point.
    pub fn entry(&self, name: &str) -> Option<&KernelFn> {
        self.entries.get(name)
    }

    /// Entry point names in sorted order.
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl fmt::Debug for HostProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostProgram")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
