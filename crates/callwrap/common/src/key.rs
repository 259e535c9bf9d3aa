// Callwrap
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Cache key serialization.
//!
//! A key is a bincode-style encoding of the argument value: leaves are
//! written with bincode, tuples and sequences keep their order, enum variants
//! carry their index and sequences carry their length. For a fixed argument
//! type the encoding is injective. Types whose `Serialize` impl is untagged
//! (such as `serde_json::Value`) lose that property, so heterogeneous argument
//! lists should be expressed with [`ArgValue`] instead.
//!
//! # Unordered collections
//! `HashMap` and `HashSet` serialize in a per-instance iteration order, so two
//! equal values would otherwise produce different keys. Map entries are
//! always encoded sorted by their encoded bytes, which makes every map key
//! independent of iteration order. Sets serialize exactly like sequences; they
//! are recognised by type name (`HashSet` from std or hashbrown, directly or
//! behind `&`, `Box`, `Rc` or `Arc`) and their elements are sorted the same
//! way. Other unordered set types should be passed as a `BTreeSet`.

use std::any::type_name;
use std::fmt;
use std::mem;

use serde::Serialize;
use serde::ser;

use crate::error::KeyError;

/// Serialized argument list used as a memoization key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Vec<u8>);

impl CacheKey {
    /// Encodes `args` into a key
    ///
    /// # Errors
    /// Returns [`KeyError::Unserializable`] when the value refuses to
    /// serialize, e.g. live handles whose `Serialize` impl always errors.
    pub fn of<A: Serialize + ?Sized>(args: &A) -> Result<Self, KeyError> {
        KeyWriter::encode(args).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// Smart pointers that serde serializes as their pointee
const TRANSPARENT_WRAPPERS: [&str; 3] = ["alloc::boxed::Box", "alloc::rc::Rc", "alloc::sync::Arc"];

/// Whether `T` is a hash set, whose sequence order carries no meaning
fn is_unordered_set<T: ?Sized>() -> bool {
    let mut name = type_name::<T>();
    loop {
        name = name.trim_start_matches('&').trim_start_matches("mut ");
        match name.split_once('<') {
            Some((path, inner)) if TRANSPARENT_WRAPPERS.contains(&path) => name = inner,
            Some((path, _)) => return !path.starts_with(['(', '[']) && path.ends_with("::HashSet"),
            None => return false,
        }
    }
}

/// Serializer producing canonical key bytes
struct KeyWriter {
    out: Vec<u8>,
    unordered: bool,
}

impl KeyWriter {
    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, KeyError> {
        let mut writer = KeyWriter {
            out: Vec::new(),
            unordered: is_unordered_set::<T>(),
        };
        value.serialize(&mut writer)?;
        Ok(writer.out)
    }

    fn put<T: bincode::Encode>(&mut self, value: T) -> Result<(), KeyError> {
        bincode::encode_into_std_write(value, &mut self.out, bincode::config::standard())
            .map(drop)
            .map_err(|e| KeyError::Unserializable(e.to_string()))
    }

    fn nested<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), KeyError> {
        let bytes = Self::encode(value)?;
        self.out.extend_from_slice(&bytes);
        Ok(())
    }
}

/// Elements of a compound value, each encoded on its own
struct Entries<'a> {
    parent: &'a mut KeyWriter,
    items: Vec<Vec<u8>>,
    pending_key: Option<Vec<u8>>,
    counted: bool,
    sorted: bool,
}

impl<'a> Entries<'a> {
    fn new(parent: &'a mut KeyWriter, counted: bool, sorted: bool) -> Self {
        Self {
            parent,
            items: Vec::new(),
            pending_key: None,
            counted,
            sorted,
        }
    }

    fn push<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), KeyError> {
        self.items.push(KeyWriter::encode(value)?);
        Ok(())
    }

    fn finish(mut self) -> Result<(), KeyError> {
        if self.pending_key.is_some() {
            return Err(KeyError::Unserializable("map key without a value".into()));
        }
        if self.sorted {
            self.items.sort_unstable();
        }
        if self.counted {
            self.parent.put(self.items.len() as u64)?;
        }
        for item in &self.items {
            self.parent.out.extend_from_slice(item);
        }
        Ok(())
    }
}

impl<'a> ser::Serializer for &'a mut KeyWriter {
    type Ok = ();
    type Error = KeyError;
    type SerializeSeq = Entries<'a>;
    type SerializeTuple = Entries<'a>;
    type SerializeTupleStruct = Entries<'a>;
    type SerializeTupleVariant = Entries<'a>;
    type SerializeMap = Entries<'a>;
    type SerializeStruct = Entries<'a>;
    type SerializeStructVariant = Entries<'a>;

    fn serialize_bool(self, v: bool) -> Result<(), KeyError> {
        self.put(v)
    }

    fn serialize_i8(self, v: i8) -> Result<(), KeyError> {
        self.put(v)
    }

    fn serialize_i16(self, v: i16) -> Result<(), KeyError> {
        self.put(v)
    }

    fn serialize_i32(self, v: i32) -> Result<(), KeyError> {
        self.put(v)
    }

    fn serialize_i64(self, v: i64) -> Result<(), KeyError> {
        self.put(v)
    }

    fn serialize_i128(self, v: i128) -> Result<(), KeyError> {
        self.put(v)
    }

    fn serialize_u8(self, v: u8) -> Result<(), KeyError> {
        self.put(v)
    }

    fn serialize_u16(self, v: u16) -> Result<(), KeyError> {
        self.put(v)
    }

    fn serialize_u32(self, v: u32) -> Result<(), KeyError> {
        self.put(v)
    }

    fn serialize_u64(self, v: u64) -> Result<(), KeyError> {
        self.put(v)
    }

    fn serialize_u128(self, v: u128) -> Result<(), KeyError> {
        self.put(v)
    }

    fn serialize_f32(self, v: f32) -> Result<(), KeyError> {
        self.put(v)
    }

    fn serialize_f64(self, v: f64) -> Result<(), KeyError> {
        self.put(v)
    }

    fn serialize_char(self, v: char) -> Result<(), KeyError> {
        self.put(v)
    }

    fn serialize_str(self, v: &str) -> Result<(), KeyError> {
        self.put(v)
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<(), KeyError> {
        self.put(v)
    }

    fn serialize_none(self) -> Result<(), KeyError> {
        self.put(0u8)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<(), KeyError> {
        self.put(1u8)?;
        self.nested(value)
    }

    fn serialize_unit(self) -> Result<(), KeyError> {
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), KeyError> {
        Ok(())
    }

    fn serialize_unit_variant(self, _name: &'static str, variant_index: u32, _variant: &'static str) -> Result<(), KeyError> {
        self.put(variant_index)
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(self, _name: &'static str, value: &T) -> Result<(), KeyError> {
        self.nested(value)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(self, _name: &'static str, variant_index: u32, _variant: &'static str, value: &T) -> Result<(), KeyError> {
        self.put(variant_index)?;
        self.nested(value)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Entries<'a>, KeyError> {
        let sorted = mem::take(&mut self.unordered);
        Ok(Entries::new(self, true, sorted))
    }

    fn serialize_tuple(self, _len: usize) -> Result<Entries<'a>, KeyError> {
        Ok(Entries::new(self, false, false))
    }

    fn serialize_tuple_struct(self, _name: &'static str, _len: usize) -> Result<Entries<'a>, KeyError> {
        Ok(Entries::new(self, false, false))
    }

    fn serialize_tuple_variant(self, _name: &'static str, variant_index: u32, _variant: &'static str, _len: usize) -> Result<Entries<'a>, KeyError> {
        self.put(variant_index)?;
        Ok(Entries::new(self, false, false))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Entries<'a>, KeyError> {
        Ok(Entries::new(self, true, true))
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Entries<'a>, KeyError> {
        Ok(Entries::new(self, false, false))
    }

    fn serialize_struct_variant(self, _name: &'static str, variant_index: u32, _variant: &'static str, _len: usize) -> Result<Entries<'a>, KeyError> {
        self.put(variant_index)?;
        Ok(Entries::new(self, false, false))
    }

    fn is_human_readable(&self) -> bool {
        false
    }
}

impl ser::SerializeSeq for Entries<'_> {
    type Ok = ();
    type Error = KeyError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), KeyError> {
        self.push(value)
    }

    fn end(self) -> Result<(), KeyError> {
        self.finish()
    }
}

impl ser::SerializeTuple for Entries<'_> {
    type Ok = ();
    type Error = KeyError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), KeyError> {
        self.push(value)
    }

    fn end(self) -> Result<(), KeyError> {
        self.finish()
    }
}

impl ser::SerializeTupleStruct for Entries<'_> {
    type Ok = ();
    type Error = KeyError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), KeyError> {
        self.push(value)
    }

    fn end(self) -> Result<(), KeyError> {
        self.finish()
    }
}

impl ser::SerializeTupleVariant for Entries<'_> {
    type Ok = ();
    type Error = KeyError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), KeyError> {
        self.push(value)
    }

    fn end(self) -> Result<(), KeyError> {
        self.finish()
    }
}

impl ser::SerializeMap for Entries<'_> {
    type Ok = ();
    type Error = KeyError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), KeyError> {
        self.pending_key = Some(KeyWriter::encode(key)?);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), KeyError> {
        let mut entry = self
            .pending_key
            .take()
            .ok_or_else(|| KeyError::Unserializable("map value without a key".into()))?;
        entry.extend_from_slice(&KeyWriter::encode(value)?);
        self.items.push(entry);
        Ok(())
    }

    fn end(self) -> Result<(), KeyError> {
        self.finish()
    }
}

impl ser::SerializeStruct for Entries<'_> {
    type Ok = ();
    type Error = KeyError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, _key: &'static str, value: &T) -> Result<(), KeyError> {
        self.push(value)
    }

    fn end(self) -> Result<(), KeyError> {
        self.finish()
    }
}

impl ser::SerializeStructVariant for Entries<'_> {
    type Ok = ();
    type Error = KeyError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, _key: &'static str, value: &T) -> Result<(), KeyError> {
        self.push(value)
    }

    fn end(self) -> Result<(), KeyError> {
        self.finish()
    }
}

/// A dynamically typed argument.
///
/// Every variant is encoded with its tag, so `ArgValue::Int(1)` and
/// `ArgValue::Str("1")` never share a key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ArgValue>),
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ArgValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl<T: Into<ArgValue>> From<Vec<T>> for ArgValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ArgValue>> From<Option<T>> for ArgValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Ordered argument list of [`ArgValue`]s.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Args(pub Vec<ArgValue>);

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an argument, builder style
    pub fn arg(mut self, value: impl Into<ArgValue>) -> Self {
        self.0.push(value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ArgValue> {
        self.0.get(index)
    }
}

impl FromIterator<ArgValue> for Args {
    fn from_iter<I: IntoIterator<Item = ArgValue>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Builds an [`Args`] list from heterogeneous values.
///
/// ```
/// use callwrap_common::args;
/// let a = args![1, "two", 3.0];
/// assert_eq!(a.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    () => { $crate::key::Args::new() };
    ($($value:expr),+ $(,)?) => {
        $crate::key::Args(vec![$($crate::key::ArgValue::from($value)),+])
    };
}
