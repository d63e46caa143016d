//! Integration tests for the stream algebra.

use fibertree_sim::algebra::{
    evaluate, fan_out, intersect_multiply, populate, AlgebraError, FiberRef, HandlesToCoords,
    Node, Slice, Token,
};
use fibertree_sim::codec::coord_list::CoordinateList;
use fibertree_sim::codec::uncompressed::Uncompressed;
use fibertree_sim::codec::{FormatKind, StorageFormat};
use fibertree_sim::fiber::Fiber;

#[test]
fn test_sparse_intersection_writes_only_matches() {
    let a = FiberRef::with_storage(
        "A",
        Box::new(CoordinateList::from_pairs([(0, 2.0), (3, 3.0), (4, 1.0), (6, 4.0)])),
    );
    let b = FiberRef::with_storage(
        "B",
        Box::new(CoordinateList::from_pairs([(1, 9.0), (3, 5.0), (6, 0.5)])),
    );
    let z = FiberRef::with_storage("Z", Box::new(CoordinateList::default()));

    let mut program = intersect_multiply(&a, &b, &z);
    let steps = evaluate(&mut program).unwrap();

    assert_eq!(steps.len(), 2);
    assert_eq!(z.pairs(), vec![(3, 15.0), (6, 2.0)]);
    assert!(!a.is_active() && !b.is_active() && !z.is_active());
}

#[test]
fn test_populate_copies_into_empty_destination() {
    let source = Fiber::from_dense(&[0.0, 1.5, 0.0, 0.0, 2.5]);
    for kind in [FormatKind::Uncompressed, FormatKind::CoordinateList] {
        let a = FiberRef::with_storage("A", kind.materialize(&source, 5).unwrap());
        let z = FiberRef::with_storage("Z", Box::new(CoordinateList::default()));

        let mut program = populate(&z, &a);
        evaluate(&mut program).unwrap();

        let mut stored = z.pairs();
        stored.retain(|&(_, v)| v != 0.0);
        assert_eq!(stored, vec![(1, 1.5), (4, 2.5)], "source {kind}");
    }
}

#[test]
fn test_rebinding_refused_during_pass() {
    let a = FiberRef::with_storage("A", Box::new(Uncompressed::from_pairs(2, [(0, 1.0)])));
    let b = FiberRef::with_storage("B", Box::new(Uncompressed::from_pairs(2, [(0, 2.0)])));
    let z = FiberRef::with_storage("Z", Box::new(Uncompressed::new(2)));

    let mut program = intersect_multiply(&a, &b, &z);
    program.initialize().unwrap();
    assert!(a.is_active());
    assert_eq!(
        a.bind(Box::new(CoordinateList::default())),
        Err(AlgebraError::ActivePass("A".into()))
    );
    assert!(z.unbind().is_err());
    program.finish();

    assert!(a.bind(Box::new(CoordinateList::from_pairs([(1, 3.0)]))).is_ok());
    b.bind(Box::new(CoordinateList::from_pairs([(1, 4.0)]))).unwrap();
    evaluate(&mut program).unwrap();
    assert_eq!(z.with(|s| s.handle_to_payload(1)), Some(Some(12.0)));
}

#[test]
fn test_unbound_fiber_fails_before_any_step() {
    let a = FiberRef::new("A");
    let b = FiberRef::with_storage("B", Box::new(CoordinateList::default()));
    let z = FiberRef::with_storage("Z", Box::new(CoordinateList::default()));

    let mut program = intersect_multiply(&a, &b, &z);
    assert_eq!(
        evaluate(&mut program),
        Err(AlgebraError::Unbound("A".into()))
    );
    assert!(!b.is_active());
    assert!(!z.is_active());
}

#[test]
fn test_failed_pass_releases_every_fiber() {
    let a = FiberRef::with_storage("A", Box::new(CoordinateList::from_pairs([(1, 1.0)])));
    let b = FiberRef::new("B");
    let z = FiberRef::with_storage("Z", Box::new(CoordinateList::default()));

    let mut program = intersect_multiply(&a, &b, &z);
    assert_eq!(
        evaluate(&mut program),
        Err(AlgebraError::Unbound("B".into()))
    );
    assert!(!a.is_active());
    assert!(!z.is_active());

    a.bind(Box::new(CoordinateList::from_pairs([(1, 2.0)]))).unwrap();
    b.bind(Box::new(CoordinateList::from_pairs([(1, 3.0)]))).unwrap();
    evaluate(&mut program).unwrap();
    assert_eq!(z.pairs(), vec![(1, 6.0)]);
}

#[test]
fn test_fan_out_taps_see_the_same_stream() {
    let a = FiberRef::with_storage(
        "A",
        Box::new(CoordinateList::from_pairs([(2, 1.0), (5, 1.0), (8, 1.0)])),
    );
    let [mut handles, coords] = fan_out::<2>(Slice::new(&a, 3, None, None));
    let mut coords = HandlesToCoords::new(&a, coords);

    handles.initialize().unwrap();
    coords.initialize().unwrap();
    assert_eq!(handles.evaluate(), Some(Token::Handle(1)));
    assert_eq!(coords.evaluate(), Some(Token::Coord(5)));
    assert_eq!(coords.evaluate(), Some(Token::Coord(8)));
    assert_eq!(handles.evaluate(), Some(Token::Handle(2)));
    assert_eq!(handles.evaluate(), None);
    assert_eq!(coords.evaluate(), None);
    handles.finish();
    coords.finish();
    assert!(!a.is_active());
}
