#![forbid(unsafe_code)]

//! Binding values and the store of last-observed values.
//!
//! A binding is a named input on a view node. The update scheduler compares
//! each binding's current value against the value it recorded the last time
//! the node was visited, using [`Identity::is_same`]:
//!
//! | Value kind | Comparison |
//! |------------|------------|
//! | `Null`, `Bool`, `Int`, `Str` | value equality |
//! | `Float` | value equality, `NaN` is the same as `NaN` |
//! | `Object`, `List` | pointer identity |
//!
//! Reference-typed values are never compared structurally. Two distinct
//! allocations holding equal data are different values, so replacing an
//! object with a fresh copy always counts as a change.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::node::NodeId;

/// Equality rule used for change detection.
///
/// Implementations must use value equality for primitive types and pointer
/// identity for shared references.
pub trait Identity {
    /// Whether `self` and `other` are the same value for change detection.
    fn is_same(&self, other: &Self) -> bool;
}

macro_rules! value_identity {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Identity for $ty {
                #[inline]
                fn is_same(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

value_identity!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    String,
    &str,
);

impl Identity for f32 {
    #[inline]
    fn is_same(&self, other: &Self) -> bool {
        self == other || (self.is_nan() && other.is_nan())
    }
}

impl Identity for f64 {
    #[inline]
    fn is_same(&self, other: &Self) -> bool {
        self == other || (self.is_nan() && other.is_nan())
    }
}

impl<T: ?Sized> Identity for Rc<T> {
    #[inline]
    fn is_same(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }
}

impl<T: ?Sized> Identity for Arc<T> {
    #[inline]
    fn is_same(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: Identity> Identity for Option<T> {
    fn is_same(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.is_same(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<A: Identity, B: Identity> Identity for (A, B) {
    fn is_same(&self, other: &Self) -> bool {
        self.0.is_same(&other.0) && self.1.is_same(&other.1)
    }
}

// ---------------------------------------------------------------------------
// BindingValue
// ---------------------------------------------------------------------------

/// A value bound to a named input of a view node.
#[derive(Clone, Default)]
pub enum BindingValue {
    /// Absent value.
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Strings are primitives: compared by content.
    Str(Rc<str>),
    /// An arbitrary shared object, compared by identity.
    Object(Rc<dyn Any>),
    /// A shared collection, compared by identity or reconciled by key.
    List(Rc<[BindingValue]>),
}

impl BindingValue {
    /// Wrap `value` in a fresh shared allocation.
    ///
    /// Every call produces a distinct identity, even for equal values.
    #[must_use]
    pub fn object<T: Any>(value: T) -> Self {
        Self::Object(Rc::new(value))
    }

    /// Build a list value with a fresh identity.
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = BindingValue>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Short name of the value kind, used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Object(_) => "object",
            Self::List(_) => "list",
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Items of a list value. Any other kind yields `None`.
    #[must_use]
    pub fn as_list(&self) -> Option<&[BindingValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the payload of an object value as `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Object(obj) => obj.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl Identity for BindingValue {
    fn is_same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.is_same(b),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for BindingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(i) => write!(f, "Int({i})"),
            Self::Float(x) => write!(f, "Float({x})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::Object(obj) => write!(f, "Object({:p})", Rc::as_ptr(obj).cast::<()>()),
            Self::List(items) => write!(f, "List(len={}, {:p})", items.len(), items.as_ptr()),
        }
    }
}

impl From<bool> for BindingValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for BindingValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for BindingValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for BindingValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for BindingValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for BindingValue {
    fn from(value: &str) -> Self {
        Self::Str(Rc::from(value))
    }
}

impl From<String> for BindingValue {
    fn from(value: String) -> Self {
        Self::Str(Rc::from(value))
    }
}

impl From<Rc<str>> for BindingValue {
    fn from(value: Rc<str>) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<BindingValue>> for BindingValue {
    fn from(value: Vec<BindingValue>) -> Self {
        Self::List(Rc::from(value))
    }
}

impl<T: Into<BindingValue>> From<Option<T>> for BindingValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// ItemKey
// ---------------------------------------------------------------------------

/// Key identifying an item of a collection binding across snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKey {
    Int(i64),
    Str(Rc<str>),
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for ItemKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ItemKey {
    fn from(value: &str) -> Self {
        Self::Str(Rc::from(value))
    }
}

impl From<Rc<str>> for ItemKey {
    fn from(value: Rc<str>) -> Self {
        Self::Str(value)
    }
}

/// Caller-supplied pure key function for a collection binding.
pub type KeyFn = Rc<dyn Fn(&BindingValue) -> ItemKey>;

// ---------------------------------------------------------------------------
// BindingStore
// ---------------------------------------------------------------------------

/// A borrowed view of one recorded binding.
#[derive(Debug, Clone, Copy)]
pub struct BindingRecord<'a> {
    pub node: NodeId,
    pub name: &'a str,
    pub last_value: &'a BindingValue,
}

/// Last-observed binding values, per node.
///
/// Entries are written when a node is created and whenever the update
/// scheduler observes a changed binding during a walk. They are dropped
/// when the node is removed.
#[derive(Debug, Default)]
pub struct BindingStore {
    records: HashMap<NodeId, BTreeMap<Rc<str>, BindingValue>>,
}

impl BindingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The value recorded for `name` on `node`, if any.
    #[must_use]
    pub fn get(&self, node: NodeId, name: &str) -> Option<&BindingValue> {
        self.records.get(&node).and_then(|m| m.get(name))
    }

    /// All records of `node`, ordered by binding name.
    pub fn records_for(&self, node: NodeId) -> impl Iterator<Item = BindingRecord<'_>> {
        self.records.get(&node).into_iter().flat_map(move |m| {
            m.iter().map(move |(name, value)| BindingRecord {
                node,
                name,
                last_value: value,
            })
        })
    }

    /// Total number of recorded bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.values().all(BTreeMap::is_empty)
    }

    /// Number of nodes with at least one tracked binding slot.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn init_node(&mut self, node: NodeId, bindings: &BTreeMap<Rc<str>, BindingValue>) {
        self.records.insert(node, bindings.clone());
    }

    /// Record `value` and return the value it replaced.
    pub(crate) fn record(
        &mut self,
        node: NodeId,
        name: Rc<str>,
        value: BindingValue,
    ) -> Option<BindingValue> {
        self.records.entry(node).or_default().insert(name, value)
    }

    pub(crate) fn forget(&mut self, node: NodeId) {
        self.records.remove(&node);
    }
}
