//! Schema documents.
//!
//! A [`SchemaDocument`] is the serializable form of a set of type
//! declarations, as produced by schema tooling. It carries no factories or
//! hooks; attach those to the resulting descriptors before registering, or
//! register the document directly for plain data types.

use serde::{Deserialize, Serialize};

use crate::{
    descriptor::{FieldDescriptor, TypeDescriptor, TypeId},
    error::RegistryError,
    registry::RegistryBuilder,
};

/// One type declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchema {
    /// Type id
    pub type_id: TypeId,
    /// Parent type id
    #[serde(default)]
    pub parent: Option<TypeId>,
    /// Numeric compact id
    #[serde(default)]
    pub compact_id: Option<u32>,
    /// Fields of this type's own slice
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

impl TypeSchema {
    /// Convert to a descriptor with no factory and no hooks.
    pub fn into_descriptor(self) -> TypeDescriptor {
        let mut descriptor = TypeDescriptor::new(self.type_id);
        if let Some(parent) = self.parent {
            descriptor = descriptor.extends(parent);
        }
        if let Some(compact_id) = self.compact_id {
            descriptor = descriptor.compact_id(compact_id);
        }
        self.fields.into_iter().fold(descriptor, TypeDescriptor::field)
    }
}

impl From<&TypeDescriptor> for TypeSchema {
    fn from(descriptor: &TypeDescriptor) -> Self {
        Self {
            type_id: descriptor.type_id().clone(),
            parent: descriptor.parent().cloned(),
            compact_id: descriptor.compact(),
            fields: descriptor.fields().to_vec(),
        }
    }
}

/// A set of type declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDocument {
    /// Declarations in any order; parents need not precede children
    pub types: Vec<TypeSchema>,
}

impl SchemaDocument {
    /// Parse a CBOR-encoded document.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, RegistryError> {
        ciborium::de::from_reader(bytes).map_err(|e| RegistryError::Schema(e.to_string()))
    }

    /// Serialize to CBOR.
    pub fn to_cbor(&self) -> Result<Vec<u8>, RegistryError> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(self, &mut out)
            .map_err(|e| RegistryError::Schema(e.to_string()))?;
        Ok(out)
    }

    /// Register every declared type.
    ///
    /// # Errors
    ///
    /// The first registration error; types before it stay registered.
    pub fn register_into(self, builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
        for schema in self.types {
            builder.register(schema.into_descriptor())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::WireKind;

    fn document() -> SchemaDocument {
        SchemaDocument {
            types: vec![
                TypeSchema::from(
                    &TypeDescriptor::new("::Demo::Circle")
                        .extends("::Demo::Shape")
                        .compact_id(3)
                        .field(FieldDescriptor::required("radius", WireKind::Double))
                        .field(FieldDescriptor::optional("label", WireKind::String, 1)),
                ),
                TypeSchema::from(
                    &TypeDescriptor::new("::Demo::Shape")
                        .field(FieldDescriptor::required("origin", WireKind::sequence(WireKind::Int))),
                ),
            ],
        }
    }

    #[test]
    fn cbor_document_registers() {
        let bytes = document().to_cbor().unwrap();
        let parsed = SchemaDocument::from_cbor(&bytes).unwrap();
        assert_eq!(parsed, document());

        let mut builder = RegistryBuilder::new();
        parsed.register_into(&mut builder).unwrap();
        let registry = builder.freeze().unwrap();

        assert!(registry.is_a("::Demo::Circle", "::Demo::Shape"));
        assert_eq!(registry.lookup_compact(3).unwrap().type_id().as_str(), "::Demo::Circle");
    }

    #[test]
    fn garbage_is_a_schema_error() {
        assert!(matches!(SchemaDocument::from_cbor(&[0xff, 0x00]), Err(RegistryError::Schema(_))));
    }
}
