//! Operator descriptors and typed attribute values.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use gfe_intern::Symbol;

use crate::tensor::TensorDescriptor;

/// A typed attribute value on an operator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    /// 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// String.
    Str(String),
    /// List of integers.
    IntList(Vec<i64>),
    /// List of floats.
    FloatList(Vec<f64>),
    /// List of booleans.
    BoolList(Vec<bool>),
    /// List of strings.
    StrList(Vec<String>),
}

impl AttrValue {
    /// Returns the integer value, if this is an `Int`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the float value, if this is a `Float`.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the boolean value, if this is a `Bool`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string value, if this is a `Str`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the integer list, if this is an `IntList`.
    #[must_use]
    pub fn as_int_list(&self) -> Option<&[i64]> {
        match self {
            Self::IntList(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the float list, if this is a `FloatList`.
    #[must_use]
    pub fn as_float_list(&self) -> Option<&[f64]> {
        match self {
            Self::FloatList(v) => Some(v),
            _ => None,
        }
    }
}

/// An operator instance: type tag, attributes, and one tensor
/// descriptor per declared input/output anchor.
///
/// The descriptor lists fix the node's anchor arity at `add_node` time;
/// surgery that changes arity builds a fresh `OpDesc` instead of
/// resizing one in place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpDesc {
    name: Symbol,
    op_type: Symbol,
    attrs: IndexMap<Symbol, AttrValue>,
    inputs: Vec<TensorDescriptor>,
    outputs: Vec<TensorDescriptor>,
}

impl OpDesc {
    /// Creates a descriptor with no anchors or attributes.
    #[must_use]
    pub fn new(name: impl Into<Symbol>, op_type: impl Into<Symbol>) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.into(),
            attrs: IndexMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Appends an input anchor descriptor (builder style).
    #[must_use]
    pub fn with_input(mut self, desc: TensorDescriptor) -> Self {
        self.inputs.push(desc);
        self
    }

    /// Appends an output anchor descriptor (builder style).
    #[must_use]
    pub fn with_output(mut self, desc: TensorDescriptor) -> Self {
        self.outputs.push(desc);
        self
    }

    /// Sets an attribute (builder style).
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<Symbol>, value: AttrValue) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    /// Instance name.
    #[must_use]
    pub fn name(&self) -> Symbol {
        self.name
    }

    /// Operator type tag.
    #[must_use]
    pub fn op_type(&self) -> Symbol {
        self.op_type
    }

    /// Retypes the operator in place. Anchors are untouched.
    pub fn set_op_type(&mut self, op_type: Symbol) {
        self.op_type = op_type;
    }

    /// Looks up an attribute.
    #[must_use]
    pub fn attr(&self, name: Symbol) -> Option<&AttrValue> {
        self.attrs.get(&name)
    }

    /// Sets or replaces an attribute.
    pub fn set_attr(&mut self, name: Symbol, value: AttrValue) {
        self.attrs.insert(name, value);
    }

    /// Removes an attribute, returning its previous value.
    pub fn remove_attr(&mut self, name: Symbol) -> Option<AttrValue> {
        self.attrs.shift_remove(&name)
    }

    /// Iterates attributes in insertion order.
    pub fn attrs(&self) -> impl Iterator<Item = (Symbol, &AttrValue)> {
        self.attrs.iter().map(|(k, v)| (*k, v))
    }

    /// Number of input anchors.
    #[must_use]
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Number of output anchors.
    #[must_use]
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Descriptor of input anchor `index`.
    #[must_use]
    pub fn input_desc(&self, index: usize) -> Option<&TensorDescriptor> {
        self.inputs.get(index)
    }

    /// Descriptor of output anchor `index`.
    #[must_use]
    pub fn output_desc(&self, index: usize) -> Option<&TensorDescriptor> {
        self.outputs.get(index)
    }

    /// Mutable descriptor of input anchor `index`.
    #[must_use]
    pub fn input_desc_mut(&mut self, index: usize) -> Option<&mut TensorDescriptor> {
        self.inputs.get_mut(index)
    }

    /// Mutable descriptor of output anchor `index`.
    #[must_use]
    pub fn output_desc_mut(&mut self, index: usize) -> Option<&mut TensorDescriptor> {
        self.outputs.get_mut(index)
    }
}
