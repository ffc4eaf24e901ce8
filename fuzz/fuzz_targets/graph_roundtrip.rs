#![no_main]
use libfuzzer_sys::fuzz_target;
use slicewire_harness::{GraphSpec, check_isomorphic, fixtures};

fuzz_target!(|spec: GraphSpec| {
    let Ok(m) = fixtures::marshaller() else {
        return;
    };
    let Ok(mut built) = spec.build(m.registry()) else {
        return;
    };

    let bytes = m.encode(&mut built.graph, &built.roots).expect("fixture graphs encode");
    let decoded = m.decode(bytes, &built.expected).expect("encoded graphs decode");
    if let Err(mismatch) = check_isomorphic(&built.graph, &built.roots, &decoded.graph, &decoded.roots) {
        panic!("round trip changed the graph: {mismatch}");
    }
});
