//! Field values.

use crate::{descriptor::WireKind, graph::ObjectId};

/// Value held by one field of an instance.
///
/// Object references are arena ids, never owning pointers, so shared and
/// cyclic references are ordinary values.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// [`WireKind::Bool`]
    Bool(bool),
    /// [`WireKind::Byte`]
    Byte(u8),
    /// [`WireKind::Short`]
    Short(i16),
    /// [`WireKind::Int`]
    Int(i32),
    /// [`WireKind::Long`]
    Long(i64),
    /// [`WireKind::Float`]
    Float(f32),
    /// [`WireKind::Double`]
    Double(f64),
    /// [`WireKind::String`]
    String(String),
    /// [`WireKind::Sequence`]
    Sequence(Vec<Value>),
    /// [`WireKind::Struct`], members in declaration order
    Struct(Vec<Value>),
    /// [`WireKind::Object`]; `None` is the null reference
    Object(Option<ObjectId>),
    /// An optional field that is not set
    Absent,
}

impl Value {
    /// Zero value for a kind: false, 0, empty, null.
    pub fn default_for(kind: &WireKind) -> Self {
        match kind {
            WireKind::Bool => Self::Bool(false),
            WireKind::Byte => Self::Byte(0),
            WireKind::Short => Self::Short(0),
            WireKind::Int => Self::Int(0),
            WireKind::Long => Self::Long(0),
            WireKind::Float => Self::Float(0.0),
            WireKind::Double => Self::Double(0.0),
            WireKind::String => Self::String(String::new()),
            WireKind::Sequence(_) => Self::Sequence(Vec::new()),
            WireKind::Object => Self::Object(None),
            WireKind::Struct(s) => {
                Self::Struct(s.members.iter().map(|m| Self::default_for(&m.kind)).collect())
            },
        }
    }

    /// True if this value can be written as `kind`. [`Value::Absent`] is
    /// accepted only when `optional` is set.
    pub fn conforms(&self, kind: &WireKind, optional: bool) -> bool {
        match (self, kind) {
            (Self::Absent, _) => optional,
            (Self::Bool(_), WireKind::Bool)
            | (Self::Byte(_), WireKind::Byte)
            | (Self::Short(_), WireKind::Short)
            | (Self::Int(_), WireKind::Int)
            | (Self::Long(_), WireKind::Long)
            | (Self::Float(_), WireKind::Float)
            | (Self::Double(_), WireKind::Double)
            | (Self::String(_), WireKind::String)
            | (Self::Object(_), WireKind::Object) => true,
            (Self::Sequence(items), WireKind::Sequence(element)) => {
                items.iter().all(|v| v.conforms(element, false))
            },
            (Self::Struct(values), WireKind::Struct(s)) => {
                values.len() == s.members.len()
                    && values.iter().zip(&s.members).all(|(v, m)| v.conforms(&m.kind, false))
            },
            _ => false,
        }
    }

    /// Call `f` for every non-null object reference inside this value, in
    /// wire order.
    pub fn for_each_reference(&self, f: &mut impl FnMut(ObjectId)) {
        match self {
            Self::Object(Some(id)) => f(*id),
            Self::Sequence(items) | Self::Struct(items) => {
                for item in items {
                    item.for_each_reference(f);
                }
            },
            _ => {},
        }
    }

    /// The bool, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The i32, if this is one.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The i64, if this is one.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(i) => Some(*i),
            _ => None,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The referenced object, if this is a non-null reference.
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Self::Object(id) => *id,
            _ => None,
        }
    }

    /// The elements, if this is a sequence.
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Self::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// True for [`Value::Absent`].
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Option<ObjectId>> for Value {
    fn from(v: Option<ObjectId>) -> Self {
        Self::Object(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Self::Object(Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::StructDescriptor;

    #[test]
    fn defaults_conform_to_their_kind() {
        let point = StructDescriptor::new("Point")
            .member("x", WireKind::Int)
            .member("label", WireKind::String);
        let kinds = [
            WireKind::Bool,
            WireKind::Double,
            WireKind::sequence(WireKind::Object),
            WireKind::Struct(point),
        ];
        for kind in &kinds {
            assert!(Value::default_for(kind).conforms(kind, false), "{kind:?}");
        }
    }

    #[test]
    fn absent_only_for_optional() {
        assert!(Value::Absent.conforms(&WireKind::Int, true));
        assert!(!Value::Absent.conforms(&WireKind::Int, false));
    }

    #[test]
    fn sequence_elements_are_checked() {
        let kind = WireKind::sequence(WireKind::Int);
        assert!(Value::Sequence(vec![Value::Int(1)]).conforms(&kind, false));
        assert!(!Value::Sequence(vec![Value::Long(1)]).conforms(&kind, false));
    }

    #[test]
    fn references_visited_in_order() {
        let a = ObjectId::from_index(0);
        let b = ObjectId::from_index(1);
        let value = Value::Struct(vec![
            Value::Object(Some(b)),
            Value::Sequence(vec![Value::Object(None), Value::Object(Some(a))]),
        ]);
        let mut seen = Vec::new();
        value.for_each_reference(&mut |id| seen.push(id));
        assert_eq!(seen, vec![b, a]);
    }
}
