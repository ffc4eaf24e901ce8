//! Graph isomorphism oracle.
//!
//! Two graphs match when there is a bijection between the instances
//! reachable from their roots that preserves types, field values, preserved
//! slices and every reference, root references included. Floats compare by
//! bit pattern so NaN payloads must survive too.

use std::{collections::HashMap, fmt};

use slicewire_core::{Graph, Instance, ObjectId, Value};

/// First difference found between two graphs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Where: root index, instance pair and field path
    pub at: String,
    /// What differs
    pub reason: String,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.at, self.reason)
    }
}

impl std::error::Error for Mismatch {}

/// Check that `(a, a_roots)` and `(b, b_roots)` are isomorphic.
pub fn check_isomorphic(
    a: &Graph,
    a_roots: &[Option<ObjectId>],
    b: &Graph,
    b_roots: &[Option<ObjectId>],
) -> Result<(), Mismatch> {
    if a_roots.len() != b_roots.len() {
        return Err(Mismatch {
            at: "roots".into(),
            reason: format!("{} roots vs {}", a_roots.len(), b_roots.len()),
        });
    }

    let mut walk = Walk { a, b, forward: HashMap::new(), backward: HashMap::new(), queue: Vec::new() };
    for (index, (&x, &y)) in a_roots.iter().zip(b_roots).enumerate() {
        walk.pair(x, y, &format!("root {index}"))?;
    }
    while let Some((x, y)) = walk.queue.pop() {
        walk.instances(x, y)?;
    }
    Ok(())
}

struct Walk<'g> {
    a: &'g Graph,
    b: &'g Graph,
    forward: HashMap<ObjectId, ObjectId>,
    backward: HashMap<ObjectId, ObjectId>,
    queue: Vec<(ObjectId, ObjectId)>,
}

impl Walk<'_> {
    fn pair(&mut self, x: Option<ObjectId>, y: Option<ObjectId>, at: &str) -> Result<(), Mismatch> {
        let mismatch = |reason: String| Mismatch { at: at.to_owned(), reason };
        let (x, y) = match (x, y) {
            (None, None) => return Ok(()),
            (Some(x), Some(y)) => (x, y),
            (x, y) => return Err(mismatch(format!("{x:?} vs {y:?}"))),
        };

        let seen = (self.forward.get(&x).copied(), self.backward.get(&y).copied());
        match seen {
            (None, None) => {
                self.forward.insert(x, y);
                self.backward.insert(y, x);
                self.queue.push((x, y));
                Ok(())
            },
            (Some(mapped), _) if mapped == y => Ok(()),
            (mapped, reverse) => Err(mismatch(format!(
                "{x} maps to {mapped:?} and {y} to {reverse:?}, sharing differs"
            ))),
        }
    }

    fn instances(&mut self, x: ObjectId, y: ObjectId) -> Result<(), Mismatch> {
        let at = format!("{x}~{y}");
        let mismatch = |reason: String| Mismatch { at: at.clone(), reason };
        let (a, b) = (self.a, self.b);
        let (Some(left), Some(right)) = (a.get(x), b.get(y)) else {
            return Err(mismatch("dangling reference".into()));
        };

        if left.type_id() != right.type_id() {
            return Err(mismatch(format!("type {:?} vs {:?}", left.type_id(), right.type_id())));
        }

        self.preserved(left, right, &at)?;

        let slices = left.chain().map_or(0, |c| c.len());
        for slice in 0..slices {
            let (Some(lv), Some(rv)) = (left.slice_values(slice), right.slice_values(slice)) else {
                return Err(mismatch(format!("slice {slice} missing")));
            };
            if lv.len() != rv.len() {
                return Err(mismatch(format!("slice {slice} field count")));
            }
            for (field, (l, r)) in lv.iter().zip(rv).enumerate() {
                self.values(l, r, &format!("{at} slice {slice} field {field}"))?;
            }
        }
        Ok(())
    }

    fn preserved(&mut self, left: &Instance, right: &Instance, at: &str) -> Result<(), Mismatch> {
        let (lp, rp) = (left.preserved_slices(), right.preserved_slices());
        if lp.len() != rp.len() {
            return Err(Mismatch {
                at: at.to_owned(),
                reason: format!("{} preserved slices vs {}", lp.len(), rp.len()),
            });
        }
        for (index, (l, r)) in lp.iter().zip(rp).enumerate() {
            let at = format!("{at} preserved {index}");
            if l.key() != r.key()
                || l.has_optional_members() != r.has_optional_members()
                || l.payload() != r.payload()
                || l.references().len() != r.references().len()
            {
                return Err(Mismatch { at, reason: "preserved slice differs".into() });
            }
            for (&lr, &rr) in l.references().iter().zip(r.references()) {
                self.pair(lr, rr, &at)?;
            }
        }
        Ok(())
    }

    fn values(&mut self, l: &Value, r: &Value, at: &str) -> Result<(), Mismatch> {
        let differ = || Mismatch { at: at.to_owned(), reason: format!("{l:?} vs {r:?}") };
        match (l, r) {
            (Value::Object(x), Value::Object(y)) => self.pair(*x, *y, at),
            (Value::Float(x), Value::Float(y)) if x.to_bits() == y.to_bits() => Ok(()),
            (Value::Double(x), Value::Double(y)) if x.to_bits() == y.to_bits() => Ok(()),
            (Value::Float(_), _) | (Value::Double(_), _) => Err(differ()),
            (Value::Sequence(xs), Value::Sequence(ys)) | (Value::Struct(xs), Value::Struct(ys)) => {
                if xs.len() != ys.len() {
                    return Err(differ());
                }
                for (index, (x, y)) in xs.iter().zip(ys).enumerate() {
                    self.values(x, y, &format!("{at}[{index}]"))?;
                }
                Ok(())
            },
            (l, r) if l == r => Ok(()),
            _ => Err(differ()),
        }
    }
}
