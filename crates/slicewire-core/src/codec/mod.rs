//! Slice codec.
//!
//! [`Marshaller`] pairs a frozen [`TypeRegistry`] with a [`MarshalConfig`]
//! and runs encode and decode calls. Each call builds its own identity
//! tables, type-id table and lifecycle tracker and drops them on return, so
//! one marshaller can serve any number of threads.
//!
//! # Wire layout
//!
//! ```text
//! message  := header(6) size(roots) object*
//! object   := 0x00                                   null
//!           | 0x01 size(handle)                      handle reference
//!           | 0x02 size(handle) slice* 0x00          first occurrence
//! slice    := flags|kind  type-key  u32(len)  payload[len]  table?
//! table    := size(n) object{n}
//! ```
//!
//! Slices run from most-derived to root. A receiver that does not know a
//! slice's type skips `len` bytes of payload, then still decodes the table so
//! handle numbering stays in step with the sender.

mod decoder;
mod encoder;
mod fields;
mod type_ids;

use bytes::Bytes;

use crate::{
    config::MarshalConfig,
    descriptor::TypeId,
    error::{DecodeError, EncodeError},
    graph::{Graph, ObjectId},
    registry::TypeRegistry,
};

/// Result of a successful decode.
#[derive(Debug, Clone)]
pub struct Decoded {
    /// Every decoded instance
    pub graph: Graph,
    /// One entry per root, in wire order
    pub roots: Vec<Option<ObjectId>>,
}

/// Encoder and decoder for object graphs of one registry.
#[derive(Debug, Clone)]
pub struct Marshaller {
    registry: TypeRegistry,
    config: MarshalConfig,
}

impl Marshaller {
    /// Marshaller with the given options.
    pub fn new(registry: TypeRegistry, config: MarshalConfig) -> Self {
        Self { registry, config }
    }

    /// The registry types are resolved against.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// The active options.
    pub fn config(&self) -> &MarshalConfig {
        &self.config
    }

    /// Encode the graph reachable from `roots`.
    ///
    /// Pre-marshal hooks may modify instances in `graph`, which is why it is
    /// borrowed mutably. On error the partial output is discarded.
    ///
    /// # Errors
    ///
    /// See [`EncodeError`].
    pub fn encode(
        &self,
        graph: &mut Graph,
        roots: &[Option<ObjectId>],
    ) -> Result<Bytes, EncodeError> {
        encoder::Encoder::new(&self.registry, &self.config).encode(graph, roots)
    }

    /// Decode a message whose roots must be instances of `expected_roots`
    /// (or types derived from them), one entry per root.
    ///
    /// # Errors
    ///
    /// See [`DecodeError`].
    pub fn decode(&self, bytes: Bytes, expected_roots: &[TypeId]) -> Result<Decoded, DecodeError> {
        decoder::Decoder::new(&self.registry, &self.config).decode(bytes, expected_roots)
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use proptest::{prelude::*, sample::Index};

    use super::*;
    use crate::{
        descriptor::{FieldDescriptor, TypeDescriptor, WireKind},
        registry::RegistryBuilder,
        value::Value,
    };

    const NODE: &str = "::T::Node";

    fn marshaller() -> Marshaller {
        let mut builder = RegistryBuilder::new();
        builder
            .register(
                TypeDescriptor::new(NODE)
                    .field(FieldDescriptor::required("value", WireKind::Int))
                    .field(FieldDescriptor::required("next", WireKind::Object)),
            )
            .unwrap();
        Marshaller::new(builder.freeze().unwrap(), MarshalConfig::default())
    }

    const BASE: &str = "::T::Base";
    const DERIVED: &str = "::T::Derived";

    fn hierarchy() -> Marshaller {
        let mut builder = RegistryBuilder::new();
        builder
            .register(
                TypeDescriptor::new(BASE).field(FieldDescriptor::required("id", WireKind::Int)),
            )
            .unwrap();
        builder
            .register(
                TypeDescriptor::new(DERIVED)
                    .extends(BASE)
                    .field(FieldDescriptor::required("extra", WireKind::Byte)),
            )
            .unwrap();
        Marshaller::new(builder.freeze().unwrap(), MarshalConfig::default())
    }

    fn corrupt(m: &Marshaller, bytes: &[u8], root: &str) -> (usize, String) {
        match m.decode(Bytes::copy_from_slice(bytes), &[TypeId::from(root)]) {
            Err(DecodeError::CorruptFraming { offset, reason }) => (offset, reason),
            other => (usize::MAX, format!("{other:?}")),
        }
    }

    fn node(m: &Marshaller, graph: &mut Graph, value: i32) -> ObjectId {
        let mut instance = m.registry().instantiate(NODE).unwrap();
        instance.set("value", value).unwrap();
        graph.insert(instance)
    }

    #[test]
    fn single_node_golden_bytes() {
        let m = marshaller();
        let mut graph = Graph::new();
        let a = node(&m, &mut graph, 7);

        let bytes = m.encode(&mut graph, &[Some(a)]).unwrap();
        assert_eq!(
            bytes.as_ref(),
            hex!(
                "1e000000 0100"         // encapsulation, 30 bytes, v1.0
                "01"                    // one root
                "02 01"                 // first occurrence, handle 1
                "11 09 3a3a543a3a4e6f6465" // string type id
                "05000000 07000000 00"  // length, value, null next
                "00"                    // terminal
            )
        );

        let decoded = m.decode(bytes, &[TypeId::from(NODE)]).unwrap();
        let root = decoded.roots[0].unwrap();
        assert_eq!(decoded.graph.get(root).unwrap().get("value"), Some(&Value::Int(7)));
    }

    #[test]
    fn self_reference_resolves() {
        let m = marshaller();
        let mut graph = Graph::new();
        let a = node(&m, &mut graph, 1);
        graph.get_mut(a).unwrap().set("next", a).unwrap();

        let bytes = m.encode(&mut graph, &[Some(a)]).unwrap();
        let decoded = m.decode(bytes, &[TypeId::from(NODE)]).unwrap();

        let root = decoded.roots[0].unwrap();
        assert_eq!(decoded.graph.len(), 1);
        assert_eq!(decoded.graph.get(root).unwrap().get("next"), Some(&Value::Object(Some(root))));
    }

    #[test]
    fn shared_root_decodes_to_one_instance() {
        let m = marshaller();
        let mut graph = Graph::new();
        let a = node(&m, &mut graph, 1);

        let bytes = m.encode(&mut graph, &[Some(a), None, Some(a)]).unwrap();
        let expected = vec![TypeId::from(NODE); 3];
        let decoded = m.decode(bytes, &expected).unwrap();

        assert_eq!(decoded.graph.len(), 1);
        assert_eq!(decoded.roots[0], decoded.roots[2]);
        assert_eq!(decoded.roots[1], None);
    }

    #[test]
    fn dangling_reference_fails_encode() {
        let m = marshaller();
        let mut graph = Graph::new();
        let a = node(&m, &mut graph, 1);
        let missing = ObjectId::from_index(9);
        graph.get_mut(a).unwrap().set("next", missing).unwrap();

        let err = m.encode(&mut graph, &[Some(a)]).unwrap_err();
        assert_eq!(err, EncodeError::DanglingReference(missing));
    }

    #[test]
    fn root_count_mismatch_is_corrupt() {
        let m = marshaller();
        let bytes = Bytes::copy_from_slice(&hex!("07000000 0100 01"));
        let err = m.decode(bytes, &[]).unwrap_err();
        assert!(matches!(err, DecodeError::CorruptFraming { offset: 6, .. }));
    }

    #[test]
    fn zero_handle_is_corrupt() {
        let m = marshaller();
        let bytes = Bytes::copy_from_slice(&hex!("09000000 0100 01 01 00"));
        let err = m.decode(bytes, &[TypeId::from(NODE)]).unwrap_err();
        assert!(matches!(err, DecodeError::CorruptFraming { offset: 8, .. }));
    }

    #[test]
    fn reference_to_unseen_handle_is_unresolved() {
        let m = marshaller();
        let bytes = Bytes::copy_from_slice(&hex!("09000000 0100 01 01 05"));
        let err = m.decode(bytes, &[TypeId::from(NODE)]).unwrap_err();
        assert_eq!(err, DecodeError::UnresolvedReference {
            handle: slicewire_proto::Handle::new(5).unwrap(),
        });
    }

    #[test]
    fn unsupported_version_rejected() {
        let m = marshaller();
        let bytes = Bytes::copy_from_slice(&hex!("07000000 0200 00"));
        let err = m.decode(bytes, &[]).unwrap_err();
        assert_eq!(err, DecodeError::UnsupportedEncoding { major: 2, minor: 0 });
    }

    #[test]
    fn slice_length_short_of_its_fields_is_corrupt() {
        // golden single node with the slice length cut from 5 to 4
        let bytes = hex!(
            "1e000000 0100 01 02 01"
            "11 09 3a3a543a3a4e6f6465 04000000 07000000 00"
            "00"
        );
        let (offset, reason) = corrupt(&marshaller(), &bytes, NODE);
        assert_eq!(offset, 28);
        assert!(reason.contains("shorter"), "{reason}");
    }

    #[test]
    fn slice_length_past_its_fields_is_corrupt() {
        let bytes = hex!(
            "1f000000 0100 01 02 01"
            "11 09 3a3a543a3a4e6f6465 06000000 07000000 00 ee"
            "00"
        );
        let (offset, reason) = corrupt(&marshaller(), &bytes, NODE);
        assert_eq!(offset, 29);
        assert!(reason.contains("longer"), "{reason}");
    }

    #[test]
    fn object_without_slices_is_corrupt() {
        let bytes = hex!("0a000000 0100 01 02 01 00");
        let (offset, reason) = corrupt(&marshaller(), &bytes, NODE);
        assert_eq!(offset, 9);
        assert!(reason.contains("without slices"), "{reason}");
    }

    #[test]
    fn base_slice_before_derived_is_corrupt() {
        let bytes = hex!(
            "30000000 0100 01 02 01"
            "11 09 3a3a543a3a42617365 04000000 05000000"
            "11 0c 3a3a543a3a44657269766564 01000000 01"
            "00"
        );
        let (offset, reason) = corrupt(&hierarchy(), &bytes, BASE);
        assert_eq!(offset, 28);
        assert!(reason.contains("inheritance order"), "{reason}");
    }

    #[test]
    fn derived_slice_without_its_base_is_corrupt() {
        let bytes = hex!(
            "1d000000 0100 01 02 01"
            "11 0c 3a3a543a3a44657269766564 01000000 01"
            "00"
        );
        let (offset, reason) = corrupt(&hierarchy(), &bytes, BASE);
        assert_eq!(offset, 29);
        assert!(reason.contains("missing base slice ::T::Base"), "{reason}");
    }

    #[test]
    fn unknown_slice_after_a_known_one_is_corrupt() {
        let bytes = hex!(
            "26000000 0100 01 02 01"
            "11 09 3a3a543a3a42617365 04000000 05000000"
            "11 03 3a3a51 00000000"
            "00"
        );
        let (offset, reason) = corrupt(&hierarchy(), &bytes, BASE);
        assert_eq!(offset, 28);
        assert!(reason.contains("below a known slice"), "{reason}");
    }

    #[test]
    fn hierarchy_round_trips() {
        let m = hierarchy();
        let mut graph = Graph::new();
        let mut instance = m.registry().instantiate(DERIVED).unwrap();
        instance.set("id", 5).unwrap();
        instance.set("extra", Value::Byte(1)).unwrap();
        let d = graph.insert(instance);

        let bytes = m.encode(&mut graph, &[Some(d)]).unwrap();
        let decoded = m.decode(bytes, &[TypeId::from(BASE)]).unwrap();
        let root = decoded.graph.get(decoded.roots[0].unwrap()).unwrap();
        assert_eq!(root.type_id().map(TypeId::as_str), Some(DERIVED));
        assert_eq!(root.get("id"), Some(&Value::Int(5)));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let m = marshaller();
        let bytes = Bytes::copy_from_slice(&hex!("07000000 0100 00 ff"));
        let err = m.decode(bytes, &[]).unwrap_err();
        assert!(matches!(err, DecodeError::CorruptFraming { offset: 7, .. }));
    }

    fn linked_pair(m: &Marshaller) -> Bytes {
        let mut graph = Graph::new();
        let a = node(m, &mut graph, 1);
        let b = node(m, &mut graph, -1);
        graph.get_mut(a).unwrap().set("next", b).unwrap();
        graph.get_mut(b).unwrap().set("next", a).unwrap();
        m.encode(&mut graph, &[Some(a)]).unwrap()
    }

    proptest! {
        #[test]
        fn prop_hierarchy_values_survive(id in any::<i32>(), extra in any::<u8>()) {
            let m = hierarchy();
            let mut graph = Graph::new();
            let mut instance = m.registry().instantiate(DERIVED).unwrap();
            instance.set("id", id).unwrap();
            instance.set("extra", Value::Byte(extra)).unwrap();
            let d = graph.insert(instance);

            let bytes = m.encode(&mut graph, &[Some(d)]).unwrap();
            let decoded = m.decode(bytes, &[TypeId::from(BASE)]).unwrap();
            let root = decoded.graph.get(decoded.roots[0].unwrap()).unwrap();
            prop_assert_eq!(root.get("id"), Some(&Value::Int(id)));
            prop_assert_eq!(root.get("extra"), Some(&Value::Byte(extra)));
        }

        #[test]
        fn prop_flipped_byte_decodes_or_errors(at in any::<Index>(), byte in any::<u8>()) {
            let m = marshaller();
            let mut bytes = linked_pair(&m).to_vec();
            let at = at.index(bytes.len());
            bytes[at] = byte;

            // Whatever decodes must be encodable again.
            if let Ok(mut decoded) = m.decode(Bytes::from(bytes), &[TypeId::from(NODE)]) {
                let again = m.encode(&mut decoded.graph, &decoded.roots);
                prop_assert!(again.is_ok(), "{again:?}");
            }
        }
    }
}
