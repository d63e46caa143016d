//! Integration tests for storage formats and the fiber-tree codec.

use fibertree_sim::codec::coord_list::CoordinateList;
use fibertree_sim::codec::image::{decode_image, encode_image};
use fibertree_sim::codec::uncompressed::Uncompressed;
use fibertree_sim::codec::{Codec, FormatKind, PayloadWord, StorageFormat};
use fibertree_sim::config::CodecConfig;
use fibertree_sim::fiber::{Fiber, Tensor};
use fibertree_sim::model::FormatSpec;

fn three_rank_tensor() -> Tensor {
    let json = r#"{
        "name": "T",
        "rank_ids": ["M", "N", "K"],
        "shape": [3, 3, 5],
        "root": {
            "coords": [0, 2],
            "payloads": [
                { "coords": [1], "payloads": [ { "coords": [0, 4], "payloads": [1.5, 2.0] } ] },
                { "coords": [0, 2], "payloads": [
                    { "coords": [3], "payloads": [7.0] },
                    { "coords": [1, 2, 4], "payloads": [1.0, 1.0, 9.0] }
                ] }
            ]
        }
    }"#;
    serde_json::from_str(json).unwrap()
}

#[test]
fn test_coord_to_handle_finds_smallest_at_or_above() {
    let formats: Vec<Box<dyn StorageFormat>> = vec![
        Box::new(CoordinateList::from_pairs([(1, 1.0), (4, 1.0), (5, 1.0), (7, 1.0)])),
        Box::new(Uncompressed::from_pairs(8, [(1, 1.0), (4, 1.0), (5, 1.0), (7, 1.0)])),
    ];
    for f in &formats {
        let h = f.coord_to_handle(3).unwrap();
        let c = f.handle_to_coord(h).unwrap();
        assert!(c >= 3, "{:?}", f.format());
        assert_eq!(f.coord_to_handle(9), None);
    }
    assert_eq!(formats[0].handle_to_coord(formats[0].coord_to_handle(3).unwrap()), Some(4));
    assert_eq!(CoordinateList::default().coord_to_handle(0), None);
}

#[test]
fn test_insert_is_idempotent() {
    let mut list = CoordinateList::from_pairs([(1, 0.5), (5, 0.5), (7, 0.5)]);
    assert_eq!(list.insert_element(4), 1);
    assert_eq!(list.coords(), &[1, 4, 5, 7]);
    assert_eq!(list.insert_element(4), 1);
    assert_eq!(list.coords(), &[1, 4, 5, 7]);

    list.update_payload(1, 3.0);
    assert_eq!(list.handle_to_payload(1), Some(3.0));
    list.update_payload(42, 1.0);
    assert_eq!(list.occupancy(), 4);
}

#[test]
fn test_three_rank_roundtrip_under_every_layout() {
    let tensor = three_rank_tensor();
    let kinds = [FormatKind::Uncompressed, FormatKind::CoordinateList];
    for a in kinds {
        for b in kinds {
            for c in kinds {
                for cumulative in [true, false] {
                    let config = CodecConfig {
                        cumulative_occupancy: cumulative,
                        ..Default::default()
                    };
                    let image = Codec::new(vec![a, b, c], config).encode(&tensor).unwrap();
                    assert_eq!(Codec::decode(&image).unwrap(), tensor, "{a}{b}{c}");
                }
            }
        }
    }
}

#[test]
fn test_occupancy_matches_emitted_elements() {
    let tensor = three_rank_tensor();
    let codec = Codec::new(
        vec![FormatKind::CoordinateList; 3],
        CodecConfig::default(),
    );
    let image = codec.encode(&tensor).unwrap();

    assert_eq!(image.root_occupancy, 2);
    let pointers = |words: &[PayloadWord]| -> Vec<u64> {
        words
            .iter()
            .filter_map(|w| match w {
                PayloadWord::Pointer(p) => Some(*p),
                PayloadWord::Value(_) => None,
            })
            .collect()
    };
    // CSR pointers: one N fiber of 1 then one of 2; K fibers of 2, 1, 3.
    assert_eq!(pointers(&image.ranks[0].payloads), vec![1, 3]);
    assert_eq!(pointers(&image.ranks[1].payloads), vec![2, 1, 4]);
    assert_eq!(image.ranks[2].coords.len(), 6);
    assert_eq!(image.ranks[2].payloads.len(), 6);
}

#[test]
fn test_formats_from_spec_and_binary_image() {
    let tensor = three_rank_tensor();
    let spec = FormatSpec::from_json(r#"{"M": {"format": "U"}, "K": {"format": "C"}}"#).unwrap();
    let config = CodecConfig {
        compress_image: true,
        ..Default::default()
    };
    let codec = Codec::from_spec(&spec, &tensor, config.clone());
    assert_eq!(
        codec.formats(),
        &[
            FormatKind::Uncompressed,
            FormatKind::CoordinateList,
            FormatKind::CoordinateList
        ]
    );

    let image = codec.encode(&tensor).unwrap();
    let bytes = encode_image(&image, &config).unwrap();
    let parsed = decode_image(&bytes).unwrap();
    assert_eq!(parsed, image);
    assert_eq!(Codec::decode(&parsed).unwrap(), tensor);
}

#[test]
fn test_materialized_leaf_matches_codec() {
    let leaf = Fiber::from_dense(&[0.0, 2.0, 0.0, 5.0]);
    for kind in [FormatKind::Uncompressed, FormatKind::CoordinateList] {
        let storage = kind.materialize(&leaf, 4).unwrap();
        let stored: Vec<_> = storage
            .pairs()
            .into_iter()
            .filter(|&(_, v)| v != 0.0)
            .collect();
        assert_eq!(stored, vec![(1, 2.0), (3, 5.0)]);
    }
}
