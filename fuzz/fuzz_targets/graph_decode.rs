#![no_main]
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use slicewire_core::{EncodeError, MarshalConfig, Marshaller, SlicePolicy, TypeId};
use slicewire_harness::fixtures;

// Arbitrary bytes against the fixture registry: decoding may fail, never
// panic. Under Preserve a successful decode must re-encode, though possibly
// deeper than the input nested it, since table entries are re-emitted in
// first-use order. Under Drop an object whose slices were all unknown comes
// back empty and opaque, and encoding it fails with EmptyObject.
fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let Ok(registry) = fixtures::registry() else {
        return;
    };
    let policy = if selector & 1 == 0 { SlicePolicy::Preserve } else { SlicePolicy::Drop };
    let config = MarshalConfig {
        slice_policy: policy,
        max_depth: 16,
        ..MarshalConfig::default()
    };
    let m = Marshaller::new(registry, config);

    let roots = usize::from(selector >> 1) % 4;
    let expected = vec![TypeId::from(fixtures::BASE); roots];
    if let Ok(mut decoded) = m.decode(Bytes::copy_from_slice(rest), &expected) {
        let encoded = m.encode(&mut decoded.graph, &decoded.roots);
        if policy == SlicePolicy::Preserve {
            assert!(
                matches!(encoded, Ok(_) | Err(EncodeError::DepthExceeded { .. })),
                "{encoded:?}"
            );
        }
    }
});
