//! Model-based property tests.
//!
//! Random graph specs are built over the fixture registry, encoded, decoded,
//! and compared with the original through the isomorphism oracle.
//!
//! # Architecture
//!
//! ```text
//! proptest generates: seed / bytes
//!                          │
//!                     GraphSpec::build
//!                          │
//!           ┌──────────────┼──────────────┐
//!           ▼              ▼              ▼
//!        original      encode→decode    Compare
//!         Graph          Graph          (oracle)
//! ```

use proptest::{prelude::*, sample::Index};
use slicewire_core::{DecodeError, Marshaller};
use slicewire_harness::{
    BuiltGraph, GraphGenerator, GraphSpec, check_isomorphic, fixtures, set_total_size,
};
use slicewire_proto::EncapsulationHeader;

fn marshaller() -> Marshaller {
    fixtures::marshaller().unwrap()
}

fn seeded(m: &Marshaller, seed: u64, nodes: usize) -> BuiltGraph {
    GraphGenerator::new(seed).spec(nodes).build(m.registry()).unwrap()
}

fn assert_round_trip(m: &Marshaller, mut built: BuiltGraph) -> Result<(), TestCaseError> {
    let bytes = m.encode(&mut built.graph, &built.roots).unwrap();
    let decoded = m.decode(bytes.clone(), &built.expected).unwrap();

    let same = check_isomorphic(&built.graph, &built.roots, &decoded.graph, &decoded.roots);
    prop_assert_eq!(same, Ok(()));

    // Each reachable instance decodes to exactly one instance.
    prop_assert_eq!(decoded.graph.len(), built.graph.reachable(&built.roots).len());

    // Re-encoding the decoded graph reproduces the message.
    let mut graph = decoded.graph;
    let again = m.encode(&mut graph, &decoded.roots).unwrap();
    prop_assert_eq!(again, bytes);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_round_trip_seeded(seed in any::<u64>(), nodes in 0usize..24) {
        let m = marshaller();
        let built = seeded(&m, seed, nodes);
        assert_round_trip(&m, built)?;
    }

    #[test]
    fn prop_round_trip_structured(data in prop::collection::vec(any::<u8>(), 0..1024)) {
        let Ok(spec) = GraphSpec::from_bytes(&data) else {
            return Ok(());
        };
        let m = marshaller();
        let built = spec.build(m.registry()).unwrap();
        assert_round_trip(&m, built)?;
    }

    #[test]
    fn prop_shared_roots_stay_shared(seed in any::<u64>(), nodes in 1usize..16) {
        let m = marshaller();
        let mut spec = GraphGenerator::new(seed).spec(nodes);
        spec.roots = vec![Some(0), None, Some(0)];
        let mut built = spec.build(m.registry()).unwrap();

        let bytes = m.encode(&mut built.graph, &built.roots).unwrap();
        let decoded = m.decode(bytes, &built.expected).unwrap();

        prop_assert!(decoded.roots[0].is_some());
        prop_assert_eq!(decoded.roots[0], decoded.roots[2]);
        prop_assert_eq!(decoded.roots[1], None);
    }

    #[test]
    fn prop_truncation_is_detected(seed in any::<u64>(), nodes in 0usize..12, cut in any::<Index>()) {
        let m = marshaller();
        let mut built = seeded(&m, seed, nodes);
        let bytes = m.encode(&mut built.graph, &built.roots).unwrap();
        let cut = EncapsulationHeader::SIZE + cut.index(bytes.len() - EncapsulationHeader::SIZE);

        // Header still claims the full length
        let short = bytes.slice(..cut);
        let err = m.decode(short, &built.expected).unwrap_err();
        prop_assert!(matches!(err, DecodeError::TruncatedData { .. }), "{err:?}");

        // Header rewritten to match, so the cut is only found mid-stream
        let patched = set_total_size(&bytes[..cut], cut);
        let err = m.decode(patched, &built.expected).unwrap_err();
        prop_assert!(matches!(err, DecodeError::TruncatedData { .. }), "{err:?}");
    }
}

#[test]
fn fixed_seeds_round_trip() {
    let m = marshaller();
    for seed in 0..32 {
        let built = seeded(&m, seed, 20);
        assert_round_trip(&m, built).unwrap();
    }
}
