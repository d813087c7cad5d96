//! The handle table: generational descriptors over runtime objects.
//!
//! Channel halves are never exposed by reference; callers hold a [`Handle`]
//! and every operation resolves it through the table. Slots carry a
//! generation counter so a handle that outlives its object is detected as
//! stale rather than resolving to a recycled slot.

use crate::error::{Error, ErrorKind};
use core::fmt;
use slab::Slab;
use std::any::Any;

/// A descriptor naming an object registered with the runtime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}:{})", self.index, self.generation)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.index)
    }
}

/// The operations every registered object exposes to the handle layer.
///
/// `done` poisons the object's outbound direction; `close` runs when the
/// handle is removed from the table and consumes the object.
pub(crate) trait HandleObject: Any {
    fn as_any(&self) -> &dyn Any;

    fn done(&self) -> Result<(), Error>;

    fn close(self: Box<Self>);
}

impl fmt::Debug for dyn HandleObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&format_args!("<HandleObject>"), f)
    }
}

struct Entry {
    generation: u32,
    object: Box<dyn HandleObject>,
}

/// The table mapping handles to objects.
pub(crate) struct HandleTable {
    slots: Slab<Entry>,
    next_generation: u32,
    capacity: usize,
}

impl HandleTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: Slab::new(),
            next_generation: 1,
            capacity,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Registers an object, returning its handle.
    ///
    /// Fails with `OutOfMemory` once the configured capacity is reached.
    pub(crate) fn insert(&mut self, object: Box<dyn HandleObject>) -> Result<Handle, Error> {
        if self.slots.len() >= self.capacity {
            return Err(Error::new(ErrorKind::OutOfMemory)
                .with_context(format!("handle table at capacity {}", self.capacity)));
        }
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        let index = self.slots.insert(Entry { generation, object }) as u32;
        Ok(Handle { index, generation })
    }

    fn entry(&self, handle: Handle) -> Result<&Entry, Error> {
        self.slots
            .get(handle.index as usize)
            .filter(|entry| entry.generation == handle.generation)
            .ok_or_else(|| Error::new(ErrorKind::BadHandle).with_context(format!("{handle}")))
    }

    /// Resolves a handle to an object of the given type.
    ///
    /// Fails with `BadHandle` for a missing or stale handle and with
    /// `NotSupported` when the object has a different type.
    pub(crate) fn query<T: 'static>(&self, handle: Handle) -> Result<&T, Error> {
        self.entry(handle)?
            .object
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| Error::new(ErrorKind::NotSupported).with_context(format!("{handle}")))
    }

    /// Resolves a handle to the untyped object, for handle-generic dispatch.
    pub(crate) fn get(&self, handle: Handle) -> Result<&dyn HandleObject, Error> {
        Ok(self.entry(handle)?.object.as_ref())
    }

    /// Removes a handle, returning the object so the caller can close it.
    pub(crate) fn remove(&mut self, handle: Handle) -> Result<Box<dyn HandleObject>, Error> {
        self.entry(handle)?;
        Ok(self.slots.remove(handle.index as usize).object)
    }
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("len", &self.slots.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
