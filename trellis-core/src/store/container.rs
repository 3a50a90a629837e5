//! Container Kinds
//!
//! The interception layer talks to raw data through the [`Container`] trait,
//! implemented once per container kind. Every mutation reports the keys whose
//! value changed so the caller can turn them into invalidation paths.
//!
//! Sequences always report the synthetic `length` key alongside any element
//! change, except for a pure `length` write, which reports only `length`.
//! A sequence never grows past [`MAX_LENGTH`] elements.

use indexmap::IndexMap;
use smallvec::{smallvec, SmallVec};

use crate::error::{Result, StoreError};
use crate::graph::{Key, NodeKind, Path, LENGTH};

use super::Value;

/// Largest sequence length, the same bound JavaScript arrays have.
pub const MAX_LENGTH: usize = u32::MAX as usize;

/// Keys touched by a mutation. Empty when the write was a no-op.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Mutation {
    pub changed: SmallVec<[Key; 2]>,
}

impl Mutation {
    fn none() -> Self {
        Self::default()
    }

    fn of(changed: SmallVec<[Key; 2]>) -> Self {
        Self { changed }
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Read/write capabilities of a raw container.
///
/// `at` is the absolute path of the container; it is only used to give errors
/// some context.
pub(crate) trait Container {
    fn kind(&self) -> NodeKind;

    fn len(&self) -> usize;

    fn keys(&self) -> Vec<String>;

    fn read(&self, key: &str) -> Option<Value>;

    fn write(&mut self, at: &Path, key: &Key, value: Value) -> Result<Mutation>;

    fn delete(&mut self, at: &Path, key: &Key) -> Result<Mutation>;
}

// ----------------------------------------------------------------------------
// Records
// ----------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct Record {
    fields: IndexMap<String, Value>,
}

impl Record {
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl Container for Record {
    fn kind(&self) -> NodeKind {
        NodeKind::Record
    }

    fn len(&self) -> usize {
        self.fields.len()
    }

    fn keys(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    fn read(&self, key: &str) -> Option<Value> {
        self.fields.get(key).cloned()
    }

    fn write(&mut self, _at: &Path, key: &Key, value: Value) -> Result<Mutation> {
        if let Some(previous) = self.fields.get(key.as_str()) {
            if previous.same(&value) {
                return Ok(Mutation::none());
            }
        }
        self.fields.insert(key.as_str().to_owned(), value);
        Ok(Mutation::of(smallvec![key.clone()]))
    }

    fn delete(&mut self, _at: &Path, key: &Key) -> Result<Mutation> {
        match self.fields.shift_remove(key.as_str()) {
            Some(_) => Ok(Mutation::of(smallvec![key.clone()])),
            None => Ok(Mutation::none()),
        }
    }
}

// ----------------------------------------------------------------------------
// Sequences
// ----------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct Sequence {
    elements: Vec<Value>,
}

impl Sequence {
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.elements.iter()
    }

    fn length_key() -> Key {
        Key::from(LENGTH)
    }

    /// Keys `from..to` followed by `length`.
    fn span(from: usize, to: usize) -> Mutation {
        let mut changed: SmallVec<[Key; 2]> = (from..to).map(Key::from).collect();
        changed.push(Self::length_key());
        Mutation::of(changed)
    }

    pub fn push(&mut self, value: Value) -> Mutation {
        self.elements.push(value);
        let index = self.elements.len() - 1;
        Self::span(index, index + 1)
    }

    pub fn pop(&mut self) -> (Option<Value>, Mutation) {
        match self.elements.pop() {
            Some(value) => {
                let index = self.elements.len();
                (Some(value), Self::span(index, index + 1))
            }
            None => (None, Mutation::none()),
        }
    }

    /// Insert at `index` (clamped to the end). Every shifted index changes.
    pub fn insert(&mut self, index: usize, value: Value) -> Mutation {
        let index = index.min(self.elements.len());
        self.elements.insert(index, value);
        Self::span(index, self.elements.len())
    }

    /// Remove the element at `index`. Every shifted index changes, and so does
    /// the slot that fell off the end.
    pub fn remove(&mut self, index: usize) -> (Option<Value>, Mutation) {
        if index >= self.elements.len() {
            return (None, Mutation::none());
        }
        let value = self.elements.remove(index);
        (Some(value), Self::span(index, self.elements.len() + 1))
    }

    /// Resize to `len`, padding with `Null`. This is a pure length write.
    pub fn set_len(&mut self, at: &Path, len: usize) -> Result<Mutation> {
        if len > MAX_LENGTH {
            return Err(Self::length_error(at, "number"));
        }
        if len == self.elements.len() {
            return Ok(Mutation::none());
        }
        self.grow_to(at, len)?;
        self.elements.resize(len, Value::Null);
        Ok(Mutation::of(smallvec![Self::length_key()]))
    }

    /// Reserve room for `len` elements, failing instead of aborting when the
    /// allocation is refused.
    fn grow_to(&mut self, at: &Path, len: usize) -> Result<()> {
        let additional = len.saturating_sub(self.elements.len());
        self.elements
            .try_reserve_exact(additional)
            .map_err(|_| StoreError::CapacityExceeded {
                path: at.clone(),
                requested: len,
            })
    }

    fn length_error(at: &Path, found: &'static str) -> StoreError {
        StoreError::TypeMismatch {
            path: at.child(LENGTH),
            expected: "integer length no greater than 4294967295",
            found,
        }
    }

    fn parse_length(at: &Path, value: &Value) -> Result<usize> {
        match value {
            Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n <= MAX_LENGTH as f64 => {
                Ok(*n as usize)
            }
            other => Err(Self::length_error(at, other.kind_name())),
        }
    }

    /// A valid position: a canonical index below [`MAX_LENGTH`].
    fn index_of(at: &Path, key: &Key) -> Result<usize> {
        key.index()
            .filter(|index| *index < MAX_LENGTH)
            .ok_or_else(|| StoreError::InvalidKey {
                path: at.clone(),
                key: key.to_string(),
            })
    }
}

impl FromIterator<Value> for Sequence {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self {
            elements: iter.into_iter().collect(),
        }
    }
}

impl Container for Sequence {
    fn kind(&self) -> NodeKind {
        NodeKind::Sequence
    }

    fn len(&self) -> usize {
        self.elements.len()
    }

    fn keys(&self) -> Vec<String> {
        (0..self.elements.len()).map(|i| i.to_string()).collect()
    }

    fn read(&self, key: &str) -> Option<Value> {
        if key == LENGTH {
            return Some(Value::Number(self.elements.len() as f64));
        }
        Key::from(key)
            .index()
            .and_then(|index| self.elements.get(index).cloned())
    }

    fn write(&mut self, at: &Path, key: &Key, value: Value) -> Result<Mutation> {
        if key.is_length() {
            let len = Self::parse_length(at, &value)?;
            return self.set_len(at, len);
        }

        let index = Self::index_of(at, key)?;
        if index >= self.elements.len() {
            // Readers of the padded positions all recorded `length`.
            self.grow_to(at, index + 1)?;
            self.elements.resize(index, Value::Null);
            self.elements.push(value);
            return Ok(Self::span(index, index + 1));
        }
        if self.elements[index].same(&value) {
            return Ok(Mutation::none());
        }
        self.elements[index] = value;
        Ok(Self::span(index, index + 1))
    }

    /// Leaves a `Null` hole, the length is unchanged.
    fn delete(&mut self, at: &Path, key: &Key) -> Result<Mutation> {
        if key.is_length() {
            return Err(StoreError::InvalidKey {
                path: at.clone(),
                key: key.to_string(),
            });
        }
        let index = Self::index_of(at, key)?;
        match self.elements.get_mut(index) {
            Some(slot) if !slot.is_null() => {
                *slot = Value::Null;
                Ok(Self::span(index, index + 1))
            }
            _ => Ok(Mutation::none()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(mutation: &Mutation) -> Vec<&str> {
        mutation.changed.iter().map(Key::as_str).collect()
    }

    #[test]
    fn record_write_reports_changed_key() {
        let mut record = Record::default();
        let at = Path::root();

        let mutation = record.write(&at, &Key::from("a"), Value::from(1)).unwrap();
        assert_eq!(keys(&mutation), vec!["a"]);

        // Same value again is a no-op.
        let mutation = record.write(&at, &Key::from("a"), Value::from(1)).unwrap();
        assert!(mutation.is_empty());
    }

    #[test]
    fn record_delete_missing_key_is_noop() {
        let mut record = Record::default();
        let mutation = record.delete(&Path::root(), &Key::from("nope")).unwrap();
        assert!(mutation.is_empty());
    }

    #[test]
    fn sequence_index_write_also_reports_length() {
        let mut seq: Sequence = [1, 2].into_iter().map(Value::from).collect();
        let at = Path::from("items");

        let mutation = seq.write(&at, &Key::from(1usize), Value::from(5)).unwrap();
        assert_eq!(keys(&mutation), vec!["1", "length"]);
    }

    #[test]
    fn sequence_write_past_end_pads_with_null() {
        let mut seq = Sequence::default();
        let mutation = seq
            .write(&Path::root(), &Key::from(2usize), Value::from(7))
            .unwrap();

        assert_eq!(seq.len(), 3);
        assert!(seq.read("0").unwrap().is_null());
        assert_eq!(keys(&mutation), vec!["2", "length"]);
    }

    #[test]
    fn oversized_lengths_and_indices_are_rejected() {
        let mut seq: Sequence = [1, 2].into_iter().map(Value::from).collect();
        let at = Path::from("items");

        let err = seq
            .write(&at, &Key::from("length"), Value::from(1e300))
            .unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));

        let err = seq.set_len(&at, MAX_LENGTH + 1).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));

        let err = seq
            .write(&at, &Key::from(MAX_LENGTH), Value::from(1))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }));

        let err = seq
            .write(&at, &Key::from("99999999999999999999999"), Value::from(1))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }));

        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn sequence_length_write_is_pure() {
        let mut seq: Sequence = [1, 2, 3].into_iter().map(Value::from).collect();
        let mutation = seq
            .write(&Path::root(), &Key::from("length"), Value::from(1))
            .unwrap();

        assert_eq!(seq.len(), 1);
        assert_eq!(keys(&mutation), vec!["length"]);
    }

    #[test]
    fn sequence_rejects_named_keys() {
        let mut seq = Sequence::default();
        let err = seq
            .write(&Path::from("items"), &Key::from("qty"), Value::from(1))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }));
    }

    #[test]
    fn sequence_remove_reports_shifted_indices() {
        let mut seq: Sequence = [1, 2, 3].into_iter().map(Value::from).collect();
        let (removed, mutation) = seq.remove(0);

        assert_eq!(removed.and_then(|v| v.as_f64()), Some(1.0));
        assert_eq!(keys(&mutation), vec!["0", "1", "2", "length"]);
    }

    #[test]
    fn sequence_reads_length_as_number() {
        let seq: Sequence = [1, 2].into_iter().map(Value::from).collect();
        assert_eq!(seq.read("length").and_then(|v| v.as_f64()), Some(2.0));
        assert!(seq.read("5").is_none());
    }
}
