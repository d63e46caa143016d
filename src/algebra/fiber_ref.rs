//! Late-bound fiber references.
//!
//! Graphs are built against a [`FiberRef`] before any concrete storage is
//! chosen. Storage is bound (or swapped) between passes. Every node that
//! touches a fiber holds a [`FiberUse`] claim on it while a pass runs, and
//! binding is refused until the last claim is released.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::algebra::node::AlgebraError;
use crate::codec::format::StorageFormat;
use crate::fiber::{Coord, Value};

struct FiberSlot {
    name: String,
    storage: RefCell<Option<Box<dyn StorageFormat>>>,
    /// Number of nodes currently holding the fiber for a pass.
    claims: Cell<usize>,
}

/// Shared, format-agnostic handle to one fiber.
#[derive(Clone)]
pub struct FiberRef(Rc<FiberSlot>);

impl FiberRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Rc::new(FiberSlot {
            name: name.into(),
            storage: RefCell::new(None),
            claims: Cell::new(0),
        }))
    }

    /// Create and bind in one step.
    pub fn with_storage(name: impl Into<String>, storage: Box<dyn StorageFormat>) -> Self {
        let fiber = Self::new(name);
        *fiber.0.storage.borrow_mut() = Some(storage);
        fiber
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Attach a concrete representation, replacing any previous one.
    pub fn bind(&self, storage: Box<dyn StorageFormat>) -> Result<(), AlgebraError> {
        if self.is_active() {
            return Err(AlgebraError::ActivePass(self.0.name.clone()));
        }
        *self.0.storage.borrow_mut() = Some(storage);
        Ok(())
    }

    /// Detach and return the current representation.
    pub fn unbind(&self) -> Result<Option<Box<dyn StorageFormat>>, AlgebraError> {
        if self.is_active() {
            return Err(AlgebraError::ActivePass(self.0.name.clone()));
        }
        Ok(self.0.storage.borrow_mut().take())
    }

    pub fn is_bound(&self) -> bool {
        self.0.storage.borrow().is_some()
    }

    pub fn is_active(&self) -> bool {
        self.0.claims.get() > 0
    }

    pub(crate) fn begin_pass(&self) -> Result<(), AlgebraError> {
        if !self.is_bound() {
            return Err(AlgebraError::Unbound(self.0.name.clone()));
        }
        self.0.claims.set(self.0.claims.get() + 1);
        Ok(())
    }

    pub(crate) fn end_pass(&self) {
        self.0.claims.set(self.0.claims.get().saturating_sub(1));
    }

    /// Read access; `None` if nothing is bound.
    pub fn with<R>(&self, f: impl FnOnce(&dyn StorageFormat) -> R) -> Option<R> {
        let storage = self.0.storage.borrow();
        let storage = storage.as_ref()?;
        Some(f(storage.as_ref()))
    }

    /// Write access; `None` if nothing is bound.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut dyn StorageFormat) -> R) -> Option<R> {
        let mut storage = self.0.storage.borrow_mut();
        let storage = storage.as_mut()?;
        Some(f(storage.as_mut()))
    }

    /// Snapshot of the stored (coordinate, payload) pairs.
    pub fn pairs(&self) -> Vec<(Coord, Value)> {
        self.with(|s| s.pairs()).unwrap_or_default()
    }
}

impl fmt::Debug for FiberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRef")
            .field("name", &self.0.name)
            .field("bound", &self.is_bound())
            .field("claims", &self.0.claims.get())
            .finish()
    }
}

/// One node's claim on a fiber. `begin` and `end` may be called any number
/// of times; the claim is counted at most once.
pub(crate) struct FiberUse {
    fiber: FiberRef,
    held: bool,
}

impl FiberUse {
    pub(crate) fn new(fiber: &FiberRef) -> Self {
        Self {
            fiber: fiber.clone(),
            held: false,
        }
    }

    pub(crate) fn begin(&mut self) -> Result<(), AlgebraError> {
        if !self.held {
            self.fiber.begin_pass()?;
            self.held = true;
        }
        Ok(())
    }

    pub(crate) fn end(&mut self) {
        if self.held {
            self.fiber.end_pass();
            self.held = false;
        }
    }
}

impl Deref for FiberUse {
    type Target = FiberRef;

    fn deref(&self) -> &FiberRef {
        &self.fiber
    }
}
