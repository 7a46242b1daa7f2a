//! Addressable-object registry.
//!
//! A logical distributed object is identified by an [`EbbId`]; every process
//! that references the id materializes its own local instance, exactly once,
//! on first fault. Instances live for the process lifetime — the registry
//! never garbage-collects.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use svr_types::EbbId;

use crate::error::{Result, RuntimeError};

/// Ids below this are reserved for statically agreed-upon objects (the
/// reconstruction coordinator is `EbbId(1)` by convention).
const FIRST_DYNAMIC_ID: u32 = 0x100;

// ── Allocator ─────────────────────────────────────────────────────────────────

/// Mints fresh process-wide-unique object ids.
#[derive(Debug)]
pub struct EbbAllocator {
    next: AtomicU32,
}

impl EbbAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(FIRST_DYNAMIC_ID),
        }
    }

    pub fn allocate(&self) -> EbbId {
        EbbId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for EbbAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Per-process map from object id to local instance.
///
/// One lock guards the whole map and construction happens inside the
/// critical section, so concurrent faults on the same id from multiple tasks
/// serialize into a single construction.
pub struct EbbRegistry {
    slots: Mutex<HashMap<EbbId, Arc<dyn Any + Send + Sync>>>,
}

impl EbbRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Reference the object `id`, constructing it if this process has no
    /// local instance yet. `construct` runs at most once per id per process.
    ///
    /// Faulting an id that was previously constructed with a different
    /// concrete type is an invariant violation and returns an error.
    pub fn handle_fault<T, F>(&self, id: EbbId, construct: F) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce(EbbId) -> Arc<T>,
    {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots
            .entry(id)
            .or_insert_with(|| construct(id) as Arc<dyn Any + Send + Sync>);
        slot.clone()
            .downcast::<T>()
            .map_err(|_| RuntimeError::RegistryTypeMismatch(id))
    }

    /// Look up an existing instance without constructing.
    pub fn get<T>(&self, id: EbbId) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(&id).and_then(|s| s.clone().downcast::<T>().ok())
    }

    pub fn contains(&self, id: EbbId) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.contains_key(&id)
    }
}

impl Default for EbbRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
