//! End-to-end traffic estimates: CSV trace on disk, extraction, projection
//! onto a tensor, and every policy.

use std::path::Path;

use fibertree_sim::fiber::{Fiber, Tensor};
use fibertree_sim::model::{
    AccessTrace, Footprint, FormatSpec, RankTrace, TraceSelection, TrafficModel, TrafficPolicy,
};

/// Iteration over A[M, K] in row-major order.
const A_TRACE: &str = "M_pos,K_pos,M,K
0,0,0,1
0,1,0,7
1,0,1,0
1,1,1,5
2,0,2,1
2,1,2,6
3,0,3,0
3,1,3,2
3,2,3,5
4,0,4,2
4,1,4,6
4,2,4,7
5,0,5,0
5,1,5,6
";

/// B[K, N] with K fibers of 3, 5, 1, 5, 3 and 3 elements.
fn tensor_b() -> Tensor {
    let mut rows = vec![vec![0.0; 7]; 8];
    for (k, n) in [(0, 3), (1, 5), (2, 1), (5, 5), (6, 3), (7, 3)] {
        rows[k][..n].fill(2.0);
    }
    Tensor::new(
        "B",
        vec!["K".into(), "N".into()],
        vec![8, 7],
        Fiber::from_dense_rows(&rows),
    )
    .unwrap()
}

fn spec_b() -> FormatSpec {
    FormatSpec::from_json(
        r#"{
            "root": { "hbits": 32, "pbits": 32 },
            "K": { "format": "U", "rhbits": 32, "pbits": 32 },
            "N": { "format": "C", "cbits": 32, "pbits": 64 }
        }"#,
    )
    .unwrap()
}

fn extract(dir: &Path) -> RankTrace {
    let path = dir.join("A-MK.csv");
    std::fs::write(&path, A_TRACE).unwrap();
    let trace = AccessTrace::read_csv(&path).unwrap();
    assert_eq!(trace.len(), 14);
    trace.build_trace("K", TraceSelection::default()).unwrap()
}

#[test]
fn test_footprint_is_additive() {
    let (b, spec) = (tensor_b(), spec_b());
    let footprint = Footprint::new(&b, &spec).unwrap();

    assert_eq!(footprint.get_root().unwrap(), 64);
    assert_eq!(footprint.get_rank("K").unwrap(), 32 + 8 * 32);
    assert_eq!(footprint.get_rank("N").unwrap(), 20 * 96);
    assert_eq!(footprint.get_tensor().unwrap(), 64 + 288 + 1920);
    assert_eq!(
        footprint.get_tensor().unwrap(),
        footprint.get_root().unwrap() + footprint.get_subtree(&[]).unwrap()
    );

    let headers = FormatSpec::from_json(
        r#"{
            "root": { "hbits": 32, "pbits": 32 },
            "K": { "format": "U", "rhbits": 32, "fhbits": 8, "pbits": 32 },
            "N": { "format": "C", "rhbits": 16, "fhbits": 8, "cbits": 32, "pbits": 64 }
        }"#,
    )
    .unwrap();
    let footprint = Footprint::new(&b, &headers).unwrap();
    assert_eq!(footprint.get_tensor().unwrap(), 2344);
    assert_eq!(
        footprint.get_root().unwrap() + footprint.get_subtree(&[]).unwrap(),
        2344
    );
}

#[test]
fn test_replayed_trace_hits_empty_uncompressed_rows() {
    let b = tensor_b();
    let spec = FormatSpec::from_json(
        r#"{
            "K": { "format": "U", "pbits": 32 },
            "N": { "format": "C", "fhbits": 8, "cbits": 32, "pbits": 64 }
        }"#,
    )
    .unwrap();
    let model = TrafficModel::new(Footprint::new(&b, &spec).unwrap());

    // Rows 3 and 4 of B are empty; the uncompressed K rank still stores them.
    let report = model.buffet(&[vec![3], vec![1], vec![4]]).unwrap();
    assert_eq!(report.charges, vec![8, 8 + 5 * 96, 8]);
    assert!(model.buffet(&[vec![8]]).is_err());
}

#[test]
fn test_policies_over_extracted_trace() {
    let dir = tempfile::tempdir().unwrap();
    let rank_trace = extract(dir.path());
    assert_eq!(rank_trace.paths()[..3].to_vec(), vec![vec![0, 1], vec![0, 7], vec![1, 0]]);

    let (b, spec) = (tensor_b(), spec_b());
    let model = TrafficModel::new(Footprint::new(&b, &spec).unwrap());
    let uses = model.uses(&rank_trace).unwrap();
    assert_eq!(uses[0], vec![1]);

    let buffet = model.simulate(TrafficPolicy::Buffet, &uses, 0).unwrap();
    assert_eq!(buffet.bits, 4416);
    assert_eq!(buffet.accesses, 14);

    let cache = model.simulate(TrafficPolicy::Cache, &uses, 1024).unwrap();
    assert_eq!(
        cache.charges,
        vec![480, 288, 288, 480, 480, 288, 288, 96, 480, 0, 288, 288, 288, 0]
    );
    assert_eq!(cache.bits, 4032);

    let lru = model.simulate(TrafficPolicy::Lru, &uses, 1280).unwrap();
    assert_eq!(lru.hits, 3);
    assert_eq!(lru.bits, 3744);

    let stream = model.simulate(TrafficPolicy::Stream, &uses, 0).unwrap();
    assert_eq!(stream.bits, 64 + 13 * 32);
}

#[test]
fn test_extracted_trace_written_as_csv() {
    let dir = tempfile::tempdir().unwrap();
    let rank_trace = extract(dir.path());
    let out = dir.path().join("K.csv");
    rank_trace.write_csv(&out).unwrap();

    let written = std::fs::read_to_string(&out).unwrap();
    let mut lines = written.lines();
    assert_eq!(lines.next(), Some("M,K"));
    assert_eq!(lines.next(), Some("0,1"));
    assert_eq!(written.lines().count(), 15);
}

#[test]
fn test_intersection_trace_selects_matching_steps() {
    let csv = "K_pos,K,0_match,1_match\n0,0,True,False\n1,1,True,True\n2,5,False,True\n3,6,True,True\n";
    let trace = AccessTrace::from_reader(csv.as_bytes()).unwrap();

    let b_side = trace.build_trace("K", TraceSelection::tensor(1)).unwrap();
    assert_eq!(b_side.paths().to_vec(), vec![vec![1], vec![5], vec![6]]);
    assert!(trace.build_trace("K", TraceSelection::default()).is_err());

    let (b, spec) = (tensor_b(), spec_b());
    let model = TrafficModel::new(Footprint::new(&b, &spec).unwrap());
    let uses = model.uses(&b_side).unwrap();
    let report = model.buffet(&uses).unwrap();
    assert_eq!(report.charges, vec![480, 480, 288]);
}
