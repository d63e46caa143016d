//! Ready-made graphs for the two canonical programs.

use crate::algebra::fiber_ref::FiberRef;
use crate::algebra::latch::{fan_out, split};
use crate::algebra::node::{BoxNode, Node};
use crate::algebra::ops::{
    Compute, HandlesToCoords, HandlesToPayloads, InsertElement, Intersect, Slice, UpdatePayload,
};

/// `Z[k] = A[k] * B[k]` for every `k` present in both `A` and `B`.
///
/// The returned node is the terminal of the graph; run it with
/// [`evaluate`](crate::algebra::evaluate). Each step yields the handle of
/// the `Z` element written.
pub fn intersect_multiply(a: &FiberRef, b: &FiberRef, z: &FiberRef) -> impl Node {
    let [a_h0, a_h1] = fan_out::<2>(Slice::iterate(a));
    let [b_h0, b_h1] = fan_out::<2>(Slice::iterate(b));
    let a_coords = HandlesToCoords::new(a, a_h0);
    let b_coords = HandlesToCoords::new(b, b_h0);

    let matches = Intersect::new(a_coords, a_h1, b_coords, b_h1);
    let [coords, a_handles, b_handles] = split::<3>(matches);

    let z_handles = InsertElement::new(z, coords);
    let a_values = HandlesToPayloads::new(a, a_handles);
    let b_values = HandlesToPayloads::new(b, b_handles);
    let products = Compute::new(
        |v| v[0] * v[1],
        vec![Box::new(a_values) as BoxNode, Box::new(b_values)],
    );

    UpdatePayload::new(z, z_handles, products)
}

/// `Z[k] += A[k]` for every `k` in `A`, inserting missing coordinates of `Z`.
///
/// Into an empty `Z` this is a copy of `A`.
pub fn populate(z: &FiberRef, a: &FiberRef) -> impl Node {
    let [a_h0, a_h1] = fan_out::<2>(Slice::iterate(a));
    let a_coords = HandlesToCoords::new(a, a_h0);
    let a_values = HandlesToPayloads::new(a, a_h1);

    let [z_h0, z_h1] = fan_out::<2>(InsertElement::new(z, a_coords));
    let z_values = HandlesToPayloads::new(z, z_h1);
    let sums = Compute::new(
        |v| v[0] + v[1],
        vec![Box::new(z_values) as BoxNode, Box::new(a_values)],
    );

    UpdatePayload::new(z, z_h0, sums)
}
