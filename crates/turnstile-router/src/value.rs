//! Dispatch keys for routing logical calls.
//!
//! A [`ValueTuple`] identifies one registered logical call: typically an
//! HTTP path plus method (`("/embed", "POST")`) or a bare method name
//! (`("embed",)`). Tuples mix strings, integers and floats, compare by
//! exact value, and are usable as hash-map keys (floats compare by bit
//! pattern).

use std::fmt;
use std::hash::{Hash, Hasher};

/// A single element of a [`ValueTuple`].
#[derive(Debug, Clone)]
pub enum ValueAtom {
    /// A string element.
    Str(String),
    /// An integer element.
    Int(i64),
    /// A float element. Compared and hashed by bit pattern.
    Float(f64),
}

impl PartialEq for ValueAtom {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for ValueAtom {}

impl Hash for ValueAtom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Str(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            Self::Int(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            Self::Float(f) => {
                2u8.hash(state);
                f.to_bits().hash(state);
            }
        }
    }
}

impl fmt::Display for ValueAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
        }
    }
}

impl From<&str> for ValueAtom {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ValueAtom {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for ValueAtom {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for ValueAtom {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for ValueAtom {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// The dispatch key used to pick a preprocessor/postprocessor pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValueTuple(Vec<ValueAtom>);

impl ValueTuple {
    /// Create a tuple from its elements.
    pub fn new(atoms: Vec<ValueAtom>) -> Self {
        Self(atoms)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the tuple has no elements.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The elements in order.
    pub fn atoms(&self) -> &[ValueAtom] {
        &self.0
    }
}

impl fmt::Display for ValueTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, atom) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{atom}")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<ValueAtom>> for ValueTuple {
    fn from(atoms: Vec<ValueAtom>) -> Self {
        Self(atoms)
    }
}

macro_rules! impl_value_tuple_from {
    ($(($($name:ident : $ty:ident),+)),+ $(,)?) => {
        $(
            impl<$($ty: Into<ValueAtom>),+> From<($($ty,)+)> for ValueTuple {
                fn from(($($name,)+): ($($ty,)+)) -> Self {
                    Self(vec![$($name.into()),+])
                }
            }
        )+
    };
}

impl_value_tuple_from!(
    (a: A),
    (a: A, b: B),
    (a: A, b: B, c: C),
    (a: A, b: B, c: C, d: D),
);
