//! Values produced by partial evaluation.

use std::collections::BTreeMap;
use std::fmt;

use num_bigint::BigInt;
use ordered_float::OrderedFloat;

use crate::ast::NodeId;

/// Values bound to parameters during evaluation, keyed by parameter node.
pub type ParameterSubstitutions = BTreeMap<NodeId, EvaluatedNode>;

// =====================================================================
// Constants
// =====================================================================

/// Compile-time constant. `Int`, `Float` and `Boolean` are never equal to
/// each other, even for numerically equal values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    Boolean(bool),
    Int(BigInt),
    Float(OrderedFloat<f64>),
    String(String),
    Null,
}

impl Constant {
    pub fn float(value: f64) -> Self {
        Constant::Float(OrderedFloat(value))
    }

    pub fn int(value: i64) -> Self {
        Constant::Int(BigInt::from(value))
    }

    pub fn string(value: &str) -> Self {
        Constant::String(value.to_string())
    }

    /// Text used when the constant is interpolated into a template string.
    pub fn to_interpolation_string(&self) -> String {
        match self {
            Constant::String(value) => value.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Boolean(value) => write!(f, "{value}"),
            Constant::Int(value) => write!(f, "{value}"),
            Constant::Float(value) => write!(f, "{}", value.0),
            Constant::String(value) => write!(f, "\"{value}\""),
            Constant::Null => f.write_str("null"),
        }
    }
}

// =====================================================================
// Evaluated nodes
// =====================================================================

/// Closure over a lambda or segment together with the parameter values
/// visible where it was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closure {
    pub callable: NodeId,
    pub substitutions_on_creation: ParameterSubstitutions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatedEnumVariant {
    pub variant: NodeId,
    pub has_parameters: bool,
    /// Argument values; `None` until the variant has been instantiated.
    pub args: Option<ParameterSubstitutions>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatedMapEntry {
    pub key: EvaluatedNode,
    pub value: EvaluatedNode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluatedNode {
    Constant(Constant),
    BlockLambdaClosure(Closure),
    ExpressionLambdaClosure(Closure),
    SegmentClosure(Closure),
    /// A class or function referenced by name.
    NamedCallable(NodeId),
    EnumVariant(EvaluatedEnumVariant),
    List(Vec<EvaluatedNode>),
    Map(Vec<EvaluatedMapEntry>),
    /// Result values of a callable, in declaration order.
    NamedTuple(Vec<(NodeId, EvaluatedNode)>),
    Unknown,
}

impl From<Constant> for EvaluatedNode {
    fn from(value: Constant) -> Self {
        EvaluatedNode::Constant(value)
    }
}

impl EvaluatedNode {
    pub fn is_fully_evaluated(&self) -> bool {
        match self {
            EvaluatedNode::Constant(_) => true,
            EvaluatedNode::BlockLambdaClosure(_)
            | EvaluatedNode::ExpressionLambdaClosure(_)
            | EvaluatedNode::SegmentClosure(_)
            | EvaluatedNode::NamedCallable(_)
            | EvaluatedNode::Unknown => false,
            EvaluatedNode::EnumVariant(variant) => match &variant.args {
                Some(args) => args.values().all(EvaluatedNode::is_fully_evaluated),
                None => !variant.has_parameters,
            },
            EvaluatedNode::List(elements) => elements.iter().all(EvaluatedNode::is_fully_evaluated),
            EvaluatedNode::Map(entries) => entries
                .iter()
                .all(|it| it.key.is_fully_evaluated() && it.value.is_fully_evaluated()),
            EvaluatedNode::NamedTuple(entries) => entries.iter().all(|(_, it)| it.is_fully_evaluated()),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, EvaluatedNode::Unknown)
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            EvaluatedNode::Constant(constant) => Some(constant),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, EvaluatedNode::Constant(Constant::Null))
    }

    /// Named tuples with a single entry stand for that entry's value.
    pub fn unwrap(self) -> EvaluatedNode {
        match self {
            EvaluatedNode::NamedTuple(mut entries) if entries.len() == 1 => {
                entries.pop().map(|(_, value)| value).unwrap_or(EvaluatedNode::Unknown)
            }
            other => other,
        }
    }

    pub fn element_by_index(&self, index: &BigInt) -> EvaluatedNode {
        let EvaluatedNode::List(elements) = self else {
            return EvaluatedNode::Unknown;
        };
        usize::try_from(index)
            .ok()
            .and_then(|it| elements.get(it))
            .cloned()
            .unwrap_or(EvaluatedNode::Unknown)
    }

    /// Later duplicate keys shadow earlier ones, like in a dictionary literal.
    pub fn last_value_for_key(&self, key: &EvaluatedNode) -> EvaluatedNode {
        let EvaluatedNode::Map(entries) = self else {
            return EvaluatedNode::Unknown;
        };
        entries
            .iter()
            .rev()
            .find(|it| it.key == *key)
            .map(|it| it.value.clone())
            .unwrap_or(EvaluatedNode::Unknown)
    }

    pub fn result_by_index(&self, index: usize) -> EvaluatedNode {
        match self {
            EvaluatedNode::NamedTuple(entries) => entries
                .get(index)
                .map(|(_, value)| value.clone())
                .unwrap_or(EvaluatedNode::Unknown),
            _ => EvaluatedNode::Unknown,
        }
    }
}
