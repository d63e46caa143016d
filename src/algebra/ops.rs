//! Stream operators over late-bound fibers.
//!
//! Every operator reaches storage only through [`FiberRef`] and the
//! [`StorageFormat`](crate::codec::StorageFormat) surface, so a graph can be
//! rebound to a different representation between passes.

use tracing::trace;

use crate::algebra::fiber_ref::{FiberRef, FiberUse};
use crate::algebra::node::{AlgebraError, BoxNode, Node, Token};
use crate::fiber::{Coord, Value};

/// Handles of the elements whose coordinate is in `[base, bound)`, at most
/// `max` of them.
pub struct Slice {
    fiber: FiberUse,
    base: Coord,
    bound: Option<Coord>,
    max: Option<usize>,
}

impl Slice {
    pub fn new(fiber: &FiberRef, base: Coord, bound: Option<Coord>, max: Option<usize>) -> Self {
        Self {
            fiber: FiberUse::new(fiber),
            base,
            bound,
            max,
        }
    }

    /// Every element of the fiber.
    pub fn iterate(fiber: &FiberRef) -> Self {
        Self::new(fiber, 0, None, None)
    }
}

impl Node for Slice {
    fn initialize(&mut self) -> Result<(), AlgebraError> {
        self.fiber.begin()?;
        let (base, bound, max) = (self.base, self.bound, self.max);
        self.fiber.with_mut(|s| s.setup_slice(base, bound, max));
        Ok(())
    }

    fn evaluate(&mut self) -> Option<Token> {
        let handle = self.fiber.with_mut(|s| s.next_in_slice()).flatten();
        trace!(fiber = self.fiber.name(), ?handle, "NextInSlice");
        handle.map(Token::Handle)
    }

    fn finish(&mut self) {
        self.fiber.end();
    }
}

/// Shared shape of the unary operators: one fiber, one input stream.
struct Unary {
    fiber: FiberUse,
    input: BoxNode,
}

impl Unary {
    fn new(fiber: &FiberRef, input: impl Node + 'static) -> Self {
        Self {
            fiber: FiberUse::new(fiber),
            input: Box::new(input),
        }
    }

    fn initialize(&mut self) -> Result<(), AlgebraError> {
        self.fiber.begin()?;
        self.input.initialize()
    }

    fn finish(&mut self) {
        self.input.finish();
        self.fiber.end();
    }

    fn next_handle(&mut self) -> Option<usize> {
        self.input.evaluate()?.handle()
    }

    fn next_coord(&mut self) -> Option<Coord> {
        self.input.evaluate()?.coord()
    }
}

macro_rules! unary_node {
    ($name:ident) => {
        impl Node for $name {
            fn initialize(&mut self) -> Result<(), AlgebraError> {
                self.0.initialize()
            }

            fn evaluate(&mut self) -> Option<Token> {
                self.step()
            }

            fn finish(&mut self) {
                self.0.finish()
            }
        }
    };
}

/// Handle stream to coordinate stream.
pub struct HandlesToCoords(Unary);

impl HandlesToCoords {
    pub fn new(fiber: &FiberRef, handles: impl Node + 'static) -> Self {
        Self(Unary::new(fiber, handles))
    }

    fn step(&mut self) -> Option<Token> {
        let handle = self.0.next_handle()?;
        let coord = self.0.fiber.with(|s| s.handle_to_coord(handle)).flatten();
        trace!(fiber = self.0.fiber.name(), handle, ?coord, "HandleToCoord");
        coord.map(Token::Coord)
    }
}

unary_node!(HandlesToCoords);

/// Handle stream to payload stream.
pub struct HandlesToPayloads(Unary);

impl HandlesToPayloads {
    pub fn new(fiber: &FiberRef, handles: impl Node + 'static) -> Self {
        Self(Unary::new(fiber, handles))
    }

    fn step(&mut self) -> Option<Token> {
        let handle = self.0.next_handle()?;
        let payload = self.0.fiber.with(|s| s.handle_to_payload(handle)).flatten();
        trace!(fiber = self.0.fiber.name(), handle, ?payload, "HandleToPayload");
        payload.map(Token::Value)
    }
}

unary_node!(HandlesToPayloads);

/// Coordinate stream to the handles of the smallest stored coordinate at
/// or above each one.
pub struct CoordsToHandles(Unary);

impl CoordsToHandles {
    pub fn new(fiber: &FiberRef, coords: impl Node + 'static) -> Self {
        Self(Unary::new(fiber, coords))
    }

    fn step(&mut self) -> Option<Token> {
        let coord = self.0.next_coord()?;
        let handle = self.0.fiber.with(|s| s.coord_to_handle(coord)).flatten();
        trace!(fiber = self.0.fiber.name(), coord, ?handle, "CoordToHandle");
        handle.map(Token::Handle)
    }
}

unary_node!(CoordsToHandles);

/// Materializes each pulled coordinate in the fiber and yields its handle.
pub struct InsertElement(Unary);

impl InsertElement {
    pub fn new(fiber: &FiberRef, coords: impl Node + 'static) -> Self {
        Self(Unary::new(fiber, coords))
    }

    fn step(&mut self) -> Option<Token> {
        let coord = self.0.next_coord()?;
        let handle = self.0.fiber.with_mut(|s| s.insert_element(coord))?;
        trace!(fiber = self.0.fiber.name(), coord, handle, "InsertElement");
        Some(Token::Handle(handle))
    }
}

unary_node!(InsertElement);

/// Writes one payload per pulled handle.
///
/// The handle is pulled first; if it is the end of its stream the payload
/// stream is not touched.
pub struct UpdatePayload {
    fiber: FiberUse,
    handles: BoxNode,
    payloads: BoxNode,
}

impl UpdatePayload {
    pub fn new(
        fiber: &FiberRef,
        handles: impl Node + 'static,
        payloads: impl Node + 'static,
    ) -> Self {
        Self {
            fiber: FiberUse::new(fiber),
            handles: Box::new(handles),
            payloads: Box::new(payloads),
        }
    }
}

impl Node for UpdatePayload {
    fn initialize(&mut self) -> Result<(), AlgebraError> {
        self.fiber.begin()?;
        self.handles.initialize()?;
        self.payloads.initialize()
    }

    fn evaluate(&mut self) -> Option<Token> {
        let handle = self.handles.evaluate()?.handle()?;
        let value = self.payloads.evaluate()?.value()?;
        trace!(fiber = self.fiber.name(), handle, value, "UpdatePayload");
        let handle = self.fiber.with_mut(|s| s.update_payload(handle, value))?;
        Some(Token::Handle(handle))
    }

    fn finish(&mut self) {
        self.handles.finish();
        self.payloads.finish();
        self.fiber.end();
    }
}

/// Merge-join of two ascending (coordinate, handle) stream pairs.
///
/// Emits `Tuple[Coord, Handle(a), Handle(b)]` for every coordinate present
/// on both sides. Inputs must be non-decreasing; this is not checked.
pub struct Intersect {
    a_coords: BoxNode,
    a_handles: BoxNode,
    b_coords: BoxNode,
    b_handles: BoxNode,
}

impl Intersect {
    pub fn new(
        a_coords: impl Node + 'static,
        a_handles: impl Node + 'static,
        b_coords: impl Node + 'static,
        b_handles: impl Node + 'static,
    ) -> Self {
        Self {
            a_coords: Box::new(a_coords),
            a_handles: Box::new(a_handles),
            b_coords: Box::new(b_coords),
            b_handles: Box::new(b_handles),
        }
    }

    fn pull(coords: &mut BoxNode, handles: &mut BoxNode) -> Option<(Coord, usize)> {
        let coord = coords.evaluate()?.coord()?;
        let handle = handles.evaluate()?.handle()?;
        Some((coord, handle))
    }
}

impl Node for Intersect {
    fn initialize(&mut self) -> Result<(), AlgebraError> {
        self.a_coords.initialize()?;
        self.a_handles.initialize()?;
        self.b_coords.initialize()?;
        self.b_handles.initialize()
    }

    fn evaluate(&mut self) -> Option<Token> {
        let mut a = Self::pull(&mut self.a_coords, &mut self.a_handles)?;
        let mut b = Self::pull(&mut self.b_coords, &mut self.b_handles)?;
        loop {
            if a.0 == b.0 {
                trace!(coord = a.0, a = a.1, b = b.1, "Intersection found");
                return Some(Token::Tuple(vec![
                    Token::Coord(a.0),
                    Token::Handle(a.1),
                    Token::Handle(b.1),
                ]));
            }
            if a.0 < b.0 {
                a = Self::pull(&mut self.a_coords, &mut self.a_handles)?;
            } else {
                b = Self::pull(&mut self.b_coords, &mut self.b_handles)?;
            }
        }
    }

    fn finish(&mut self) {
        self.a_coords.finish();
        self.a_handles.finish();
        self.b_coords.finish();
        self.b_handles.finish();
    }
}

/// Applies a function to one value from each input per call.
pub struct Compute {
    function: Box<dyn FnMut(&[Value]) -> Value>,
    inputs: Vec<BoxNode>,
}

impl Compute {
    pub fn new(function: impl FnMut(&[Value]) -> Value + 'static, inputs: Vec<BoxNode>) -> Self {
        Self {
            function: Box::new(function),
            inputs,
        }
    }
}

impl Node for Compute {
    fn initialize(&mut self) -> Result<(), AlgebraError> {
        self.inputs.iter_mut().try_for_each(|n| n.initialize())
    }

    fn evaluate(&mut self) -> Option<Token> {
        // Every input is pulled so that shared taps stay in step.
        let args: Vec<Option<Value>> = self
            .inputs
            .iter_mut()
            .map(|n| n.evaluate().and_then(|t| t.value()))
            .collect();
        let args: Vec<Value> = args.into_iter().collect::<Option<_>>()?;
        let result = (self.function)(&args);
        trace!(?args, result, "Compute");
        Some(Token::Value(result))
    }

    fn finish(&mut self) {
        for n in &mut self.inputs {
            n.finish();
        }
    }
}
