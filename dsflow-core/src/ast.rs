//! Arena syntax tree consumed by the semantic core.
//!
//! Parsing and name resolution happen elsewhere: the tree arrives with
//! every reference already bound to its target node. Nodes live in a
//! flat arena and are addressed by [`NodeId`], which is also the key of
//! the per-document caches for computed types and evaluations.

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::purity::ImpurityReason;

/// Stable identifier of a node within one [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Zero-based line/column position in the source document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: (u32, u32), end: (u32, u32)) -> Self {
        Span {
            start: Position {
                line: start.0,
                column: start.1,
            },
            end: Position {
                line: end.0,
                column: end.1,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variance {
    #[default]
    Invariant,
    Covariant,
    Contravariant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InfixOperator {
    #[serde(rename = "or")]
    Or,
    #[serde(rename = "and")]
    And,
    #[serde(rename = "==")]
    Equals,
    #[serde(rename = "!=")]
    NotEquals,
    #[serde(rename = "===")]
    IdenticalTo,
    #[serde(rename = "!==")]
    NotIdenticalTo,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanOrEquals,
    #[serde(rename = ">=")]
    GreaterThanOrEquals,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "+")]
    Plus,
    #[serde(rename = "-")]
    Minus,
    #[serde(rename = "*")]
    Times,
    #[serde(rename = "/")]
    DividedBy,
    #[serde(rename = "?:")]
    Elvis,
}

impl InfixOperator {
    /// Surface syntax of the operator, which is also its Python spelling
    /// for the operators that lower one to one.
    pub fn symbol(self) -> &'static str {
        match self {
            InfixOperator::Or => "or",
            InfixOperator::And => "and",
            InfixOperator::Equals => "==",
            InfixOperator::NotEquals => "!=",
            InfixOperator::IdenticalTo => "===",
            InfixOperator::NotIdenticalTo => "!==",
            InfixOperator::LessThan => "<",
            InfixOperator::LessThanOrEquals => "<=",
            InfixOperator::GreaterThanOrEquals => ">=",
            InfixOperator::GreaterThan => ">",
            InfixOperator::Plus => "+",
            InfixOperator::Minus => "-",
            InfixOperator::Times => "*",
            InfixOperator::DividedBy => "/",
            InfixOperator::Elvis => "?:",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrefixOperator {
    #[serde(rename = "not")]
    Not,
    #[serde(rename = "-")]
    Negation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplatePosition {
    Start,
    Inner,
    End,
}

/// Declared purity of a function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Purity {
    Pure,
    Impure {
        reasons: Vec<ImpurityReason>,
    },
    #[default]
    Unspecified,
}

/// Kind and payload of a syntax node. Fields holding child nodes own
/// them; `target`, `declaration`, `parameter`, `type_parameter` and
/// `result` fields are resolved cross references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeKind {
    // Declarations
    Module {
        package: String,
        file: String,
        #[serde(default)]
        python_module: Option<String>,
        members: Vec<NodeId>,
    },
    Annotation {
        name: String,
        parameters: Vec<NodeId>,
    },
    Class {
        name: String,
        #[serde(default)]
        python_name: Option<String>,
        #[serde(default)]
        type_parameters: Vec<NodeId>,
        /// Constructor parameters; `None` if the class cannot be instantiated.
        #[serde(default)]
        parameters: Option<Vec<NodeId>>,
        #[serde(default)]
        parent_types: Vec<NodeId>,
        #[serde(default)]
        members: Vec<NodeId>,
    },
    Attribute {
        name: String,
        #[serde(default)]
        python_name: Option<String>,
        #[serde(default)]
        is_static: bool,
        #[serde(default)]
        ty: Option<NodeId>,
    },
    Enum {
        name: String,
        #[serde(default)]
        python_name: Option<String>,
        variants: Vec<NodeId>,
    },
    EnumVariant {
        name: String,
        #[serde(default)]
        python_name: Option<String>,
        #[serde(default)]
        parameters: Vec<NodeId>,
    },
    Function {
        name: String,
        #[serde(default)]
        python_name: Option<String>,
        /// Python template with `$parameter` placeholders.
        #[serde(default)]
        python_macro: Option<String>,
        #[serde(default)]
        is_static: bool,
        #[serde(default)]
        type_parameters: Vec<NodeId>,
        parameters: Vec<NodeId>,
        results: Vec<NodeId>,
        #[serde(default)]
        purity: Purity,
    },
    Segment {
        name: String,
        #[serde(default)]
        python_name: Option<String>,
        parameters: Vec<NodeId>,
        results: Vec<NodeId>,
        body: NodeId,
    },
    Pipeline {
        name: String,
        #[serde(default)]
        python_name: Option<String>,
        body: NodeId,
    },
    Parameter {
        name: String,
        #[serde(default)]
        python_name: Option<String>,
        #[serde(default)]
        is_constant: bool,
        #[serde(default)]
        ty: Option<NodeId>,
        #[serde(default)]
        default_value: Option<NodeId>,
    },
    Result {
        name: String,
        #[serde(default)]
        ty: Option<NodeId>,
    },
    TypeParameter {
        name: String,
        #[serde(default)]
        variance: Variance,
        #[serde(default)]
        upper_bound: Option<NodeId>,
        #[serde(default)]
        lower_bound: Option<NodeId>,
        #[serde(default)]
        default_value: Option<NodeId>,
    },

    // Statements
    Block {
        statements: Vec<NodeId>,
    },
    Assignment {
        assignees: Vec<NodeId>,
        expression: NodeId,
    },
    ExpressionStatement {
        expression: NodeId,
    },
    OutputStatement {
        expression: NodeId,
    },

    // Assignees
    Placeholder {
        name: String,
    },
    Wildcard,
    Yield {
        result: Option<NodeId>,
    },
    BlockLambdaResult {
        name: String,
    },

    // Expressions
    Boolean {
        value: bool,
    },
    Int {
        #[serde(with = "bigint_text")]
        value: BigInt,
    },
    Float {
        value: f64,
    },
    Null,
    String {
        value: String,
    },
    TemplateString {
        expressions: Vec<NodeId>,
    },
    TemplateStringPart {
        position: TemplatePosition,
        value: String,
    },
    List {
        elements: Vec<NodeId>,
    },
    Map {
        entries: Vec<NodeId>,
    },
    MapEntry {
        key: NodeId,
        value: NodeId,
    },
    BlockLambda {
        parameters: Vec<NodeId>,
        body: NodeId,
    },
    ExpressionLambda {
        parameters: Vec<NodeId>,
        result: NodeId,
    },
    Call {
        receiver: NodeId,
        arguments: Vec<NodeId>,
        #[serde(default)]
        null_safe: bool,
    },
    Argument {
        #[serde(default)]
        parameter: Option<NodeId>,
        value: NodeId,
    },
    IndexedAccess {
        receiver: NodeId,
        index: NodeId,
        #[serde(default)]
        null_safe: bool,
    },
    InfixOperation {
        operator: InfixOperator,
        left: NodeId,
        right: NodeId,
    },
    PrefixOperation {
        operator: PrefixOperator,
        operand: NodeId,
    },
    MemberAccess {
        receiver: NodeId,
        /// A `Reference` node naming the accessed member.
        member: NodeId,
        #[serde(default)]
        null_safe: bool,
    },
    Parenthesized {
        expression: NodeId,
    },
    Reference {
        target: Option<NodeId>,
        /// Name as written at the use site when it differs from the
        /// declaration (import alias).
        #[serde(default)]
        text: Option<String>,
    },
    This,
    TypeCast {
        expression: NodeId,
        ty: NodeId,
    },
    UnknownLiteral,

    // Types
    NamedType {
        declaration: Option<NodeId>,
        #[serde(default)]
        type_arguments: Vec<NodeId>,
        #[serde(default)]
        nullable: bool,
    },
    TypeArgument {
        #[serde(default)]
        type_parameter: Option<NodeId>,
        value: NodeId,
    },
    MemberType {
        receiver: NodeId,
        member: NodeId,
    },
    CallableType {
        parameters: Vec<NodeId>,
        results: Vec<NodeId>,
    },
    UnionType {
        members: Vec<NodeId>,
    },
    LiteralType {
        literals: Vec<NodeId>,
    },
}

mod bigint_text {
    use num_bigint::BigInt;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigInt, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigInt, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

impl NodeKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::Module { .. } => "module",
            NodeKind::Annotation { .. } => "annotation",
            NodeKind::Class { .. } => "class",
            NodeKind::Attribute { .. } => "attribute",
            NodeKind::Enum { .. } => "enum",
            NodeKind::EnumVariant { .. } => "enum variant",
            NodeKind::Function { .. } => "function",
            NodeKind::Segment { .. } => "segment",
            NodeKind::Pipeline { .. } => "pipeline",
            NodeKind::Parameter { .. } => "parameter",
            NodeKind::Result { .. } => "result",
            NodeKind::TypeParameter { .. } => "type parameter",
            NodeKind::Block { .. } => "block",
            NodeKind::Assignment { .. } => "assignment",
            NodeKind::ExpressionStatement { .. } => "expression statement",
            NodeKind::OutputStatement { .. } => "output statement",
            NodeKind::Placeholder { .. } => "placeholder",
            NodeKind::Wildcard => "wildcard",
            NodeKind::Yield { .. } => "yield",
            NodeKind::BlockLambdaResult { .. } => "block lambda result",
            NodeKind::Boolean { .. } => "boolean",
            NodeKind::Int { .. } => "int",
            NodeKind::Float { .. } => "float",
            NodeKind::Null => "null",
            NodeKind::String { .. } => "string",
            NodeKind::TemplateString { .. } => "template string",
            NodeKind::TemplateStringPart { .. } => "template string part",
            NodeKind::List { .. } => "list",
            NodeKind::Map { .. } => "map",
            NodeKind::MapEntry { .. } => "map entry",
            NodeKind::BlockLambda { .. } => "block lambda",
            NodeKind::ExpressionLambda { .. } => "expression lambda",
            NodeKind::Call { .. } => "call",
            NodeKind::Argument { .. } => "argument",
            NodeKind::IndexedAccess { .. } => "indexed access",
            NodeKind::InfixOperation { .. } => "infix operation",
            NodeKind::PrefixOperation { .. } => "prefix operation",
            NodeKind::MemberAccess { .. } => "member access",
            NodeKind::Parenthesized { .. } => "parenthesized expression",
            NodeKind::Reference { .. } => "reference",
            NodeKind::This => "this",
            NodeKind::TypeCast { .. } => "type cast",
            NodeKind::UnknownLiteral => "unknown",
            NodeKind::NamedType { .. } => "named type",
            NodeKind::TypeArgument { .. } => "type argument",
            NodeKind::MemberType { .. } => "member type",
            NodeKind::CallableType { .. } => "callable type",
            NodeKind::UnionType { .. } => "union type",
            NodeKind::LiteralType { .. } => "literal type",
        }
    }

    pub fn is_declaration(&self) -> bool {
        matches!(
            self,
            NodeKind::Module { .. }
                | NodeKind::Annotation { .. }
                | NodeKind::Class { .. }
                | NodeKind::Attribute { .. }
                | NodeKind::Enum { .. }
                | NodeKind::EnumVariant { .. }
                | NodeKind::Function { .. }
                | NodeKind::Segment { .. }
                | NodeKind::Pipeline { .. }
                | NodeKind::Parameter { .. }
                | NodeKind::Result { .. }
                | NodeKind::TypeParameter { .. }
        )
    }

    pub fn is_assignee(&self) -> bool {
        matches!(
            self,
            NodeKind::Placeholder { .. }
                | NodeKind::Wildcard
                | NodeKind::Yield { .. }
                | NodeKind::BlockLambdaResult { .. }
        )
    }

    pub fn is_type(&self) -> bool {
        matches!(
            self,
            NodeKind::NamedType { .. }
                | NodeKind::MemberType { .. }
                | NodeKind::CallableType { .. }
                | NodeKind::UnionType { .. }
                | NodeKind::LiteralType { .. }
        )
    }

    /// Annotations, classes, enum variants, functions, segments, lambdas
    /// and callable types all declare a parameter list.
    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            NodeKind::Annotation { .. }
                | NodeKind::Class { .. }
                | NodeKind::EnumVariant { .. }
                | NodeKind::Function { .. }
                | NodeKind::Segment { .. }
                | NodeKind::BlockLambda { .. }
                | NodeKind::ExpressionLambda { .. }
                | NodeKind::CallableType { .. }
        )
    }

    pub fn is_lambda(&self) -> bool {
        matches!(
            self,
            NodeKind::BlockLambda { .. } | NodeKind::ExpressionLambda { .. }
        )
    }

    pub fn is_named_type_declaration(&self) -> bool {
        matches!(
            self,
            NodeKind::Class { .. } | NodeKind::Enum { .. } | NodeKind::EnumVariant { .. }
        )
    }

    /// Child nodes together with their position inside the owning field.
    fn children(&self) -> Vec<(NodeId, usize)> {
        fn list(out: &mut Vec<(NodeId, usize)>, ids: &[NodeId]) {
            out.extend(ids.iter().enumerate().map(|(index, id)| (*id, index)));
        }
        fn opt(out: &mut Vec<(NodeId, usize)>, id: Option<NodeId>) {
            out.extend(id.map(|id| (id, 0)));
        }

        let mut out = Vec::new();
        match self {
            NodeKind::Module { members, .. } => list(&mut out, members),
            NodeKind::Annotation { parameters, .. } => list(&mut out, parameters),
            NodeKind::Class {
                type_parameters,
                parameters,
                parent_types,
                members,
                ..
            } => {
                list(&mut out, type_parameters);
                if let Some(parameters) = parameters {
                    list(&mut out, parameters);
                }
                list(&mut out, parent_types);
                list(&mut out, members);
            }
            NodeKind::Attribute { ty, .. } => opt(&mut out, *ty),
            NodeKind::Enum { variants, .. } => list(&mut out, variants),
            NodeKind::EnumVariant { parameters, .. } => list(&mut out, parameters),
            NodeKind::Function {
                type_parameters,
                parameters,
                results,
                ..
            } => {
                list(&mut out, type_parameters);
                list(&mut out, parameters);
                list(&mut out, results);
            }
            NodeKind::Segment {
                parameters,
                results,
                body,
                ..
            } => {
                list(&mut out, parameters);
                list(&mut out, results);
                opt(&mut out, Some(*body));
            }
            NodeKind::Pipeline { body, .. } => opt(&mut out, Some(*body)),
            NodeKind::Parameter {
                ty, default_value, ..
            } => {
                opt(&mut out, *ty);
                opt(&mut out, *default_value);
            }
            NodeKind::Result { ty, .. } => opt(&mut out, *ty),
            NodeKind::TypeParameter {
                upper_bound,
                lower_bound,
                default_value,
                ..
            } => {
                opt(&mut out, *upper_bound);
                opt(&mut out, *lower_bound);
                opt(&mut out, *default_value);
            }
            NodeKind::Block { statements } => list(&mut out, statements),
            NodeKind::Assignment {
                assignees,
                expression,
            } => {
                list(&mut out, assignees);
                opt(&mut out, Some(*expression));
            }
            NodeKind::ExpressionStatement { expression }
            | NodeKind::OutputStatement { expression }
            | NodeKind::Parenthesized { expression } => opt(&mut out, Some(*expression)),
            NodeKind::TemplateString { expressions } => list(&mut out, expressions),
            NodeKind::List { elements } => list(&mut out, elements),
            NodeKind::Map { entries } => list(&mut out, entries),
            NodeKind::MapEntry { key, value } => {
                opt(&mut out, Some(*key));
                opt(&mut out, Some(*value));
            }
            NodeKind::BlockLambda { parameters, body } => {
                list(&mut out, parameters);
                opt(&mut out, Some(*body));
            }
            NodeKind::ExpressionLambda { parameters, result } => {
                list(&mut out, parameters);
                opt(&mut out, Some(*result));
            }
            NodeKind::Call {
                receiver,
                arguments,
                ..
            } => {
                opt(&mut out, Some(*receiver));
                list(&mut out, arguments);
            }
            NodeKind::Argument { value, .. } => opt(&mut out, Some(*value)),
            NodeKind::IndexedAccess {
                receiver, index, ..
            } => {
                opt(&mut out, Some(*receiver));
                opt(&mut out, Some(*index));
            }
            NodeKind::InfixOperation { left, right, .. } => {
                opt(&mut out, Some(*left));
                opt(&mut out, Some(*right));
            }
            NodeKind::PrefixOperation { operand, .. } => opt(&mut out, Some(*operand)),
            NodeKind::MemberAccess {
                receiver, member, ..
            } => {
                opt(&mut out, Some(*receiver));
                opt(&mut out, Some(*member));
            }
            NodeKind::TypeCast { expression, ty } => {
                opt(&mut out, Some(*expression));
                opt(&mut out, Some(*ty));
            }
            NodeKind::NamedType { type_arguments, .. } => list(&mut out, type_arguments),
            NodeKind::TypeArgument { value, .. } => opt(&mut out, Some(*value)),
            NodeKind::MemberType { receiver, member } => {
                opt(&mut out, Some(*receiver));
                opt(&mut out, Some(*member));
            }
            NodeKind::CallableType {
                parameters,
                results,
            } => {
                list(&mut out, parameters);
                list(&mut out, results);
            }
            NodeKind::UnionType { members } => list(&mut out, members),
            NodeKind::LiteralType { literals } => list(&mut out, literals),
            NodeKind::Placeholder { .. }
            | NodeKind::Wildcard
            | NodeKind::Yield { .. }
            | NodeKind::BlockLambdaResult { .. }
            | NodeKind::Boolean { .. }
            | NodeKind::Int { .. }
            | NodeKind::Float { .. }
            | NodeKind::Null
            | NodeKind::String { .. }
            | NodeKind::TemplateStringPart { .. }
            | NodeKind::Reference { .. }
            | NodeKind::This
            | NodeKind::UnknownLiteral => {}
        }
        out
    }

    fn cross_references(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Reference { target, .. } => target.iter().copied().collect(),
            NodeKind::NamedType { declaration, .. } => declaration.iter().copied().collect(),
            NodeKind::Argument { parameter, .. } => parameter.iter().copied().collect(),
            NodeKind::TypeArgument { type_parameter, .. } => {
                type_parameter.iter().copied().collect()
            }
            NodeKind::Yield { result } => result.iter().copied().collect(),
            NodeKind::Function {
                purity: Purity::Impure { reasons },
                ..
            } => reasons.iter().filter_map(ImpurityReason::parameter).collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Serialize)]
struct AstDataRef<'a> {
    nodes: &'a [Node],
}

#[derive(Deserialize)]
struct AstData {
    nodes: Vec<Node>,
}

/// A resolved syntax tree of one document generation.
///
/// Containment links are derived when the tree is built. Every node id
/// stored inside the tree is guaranteed to be in range; indexing with an
/// id from another tree panics like slice indexing does.
#[derive(Debug, Clone, Default)]
pub struct Ast {
    nodes: Vec<Node>,
    parents: Vec<Option<NodeId>>,
    indices: Vec<usize>,
}

impl Ast {
    pub fn from_nodes(nodes: Vec<Node>) -> Result<Self, CoreError> {
        let len = nodes.len();
        let mut parents = vec![None; len];
        let mut indices = vec![0; len];

        for (position, node) in nodes.iter().enumerate() {
            let parent = NodeId(position as u32);
            for (child, index) in node.kind.children() {
                if child.index() >= len {
                    return Err(CoreError::DanglingNode(child));
                }
                parents[child.index()] = Some(parent);
                indices[child.index()] = index;
            }
            if let Some(target) = node
                .kind
                .cross_references()
                .into_iter()
                .find(|it| it.index() >= len)
            {
                return Err(CoreError::DanglingNode(target));
            }
        }

        Ok(Ast {
            nodes,
            parents,
            indices,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        let data: AstData = serde_json::from_str(text)?;
        Self::from_nodes(data.nodes)
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(&AstDataRef { nodes: &self.nodes })?)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(|it| NodeId(it as u32))
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn span(&self, id: NodeId) -> Option<Span> {
        self.nodes[id.index()].span
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents[id.index()]
    }

    /// Position of the node inside the field of its parent that holds it.
    pub fn container_index(&self, id: NodeId) -> usize {
        self.indices[id.index()]
    }

    /// Strict ancestors, innermost first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |it| self.parent(*it))
    }

    /// Innermost strict ancestor whose kind satisfies `predicate`.
    pub fn containing(&self, id: NodeId, predicate: impl Fn(&NodeKind) -> bool) -> Option<NodeId> {
        self.ancestors(id).find(|it| predicate(self.kind(*it)))
    }

    pub fn containing_module(&self, id: NodeId) -> Option<NodeId> {
        self.containing(id, |it| matches!(it, NodeKind::Module { .. }))
    }

    pub fn modules(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ids()
            .filter(|it| matches!(self.kind(*it), NodeKind::Module { .. }))
    }

    /// Direct children in field order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.kind(id)
            .children()
            .into_iter()
            .map(|(child, _)| child)
            .collect()
    }

    /// Every node below `id` in pre-order, excluding `id`.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).into_iter().rev());
        }
        out
    }

    /// Whether `id` is `ancestor` or lies below it.
    pub fn is_contained_in_or_equal(&self, id: NodeId, ancestor: NodeId) -> bool {
        id == ancestor || self.ancestors(id).any(|it| it == ancestor)
    }

    // -----------------------------------------------------------------
    // Node properties
    // -----------------------------------------------------------------

    pub fn name(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Annotation { name, .. }
            | NodeKind::Class { name, .. }
            | NodeKind::Attribute { name, .. }
            | NodeKind::Enum { name, .. }
            | NodeKind::EnumVariant { name, .. }
            | NodeKind::Function { name, .. }
            | NodeKind::Segment { name, .. }
            | NodeKind::Pipeline { name, .. }
            | NodeKind::Parameter { name, .. }
            | NodeKind::Result { name, .. }
            | NodeKind::TypeParameter { name, .. }
            | NodeKind::Placeholder { name }
            | NodeKind::BlockLambdaResult { name } => Some(name),
            NodeKind::Module { package, .. } => Some(package),
            _ => None,
        }
    }

    pub fn name_or_empty(&self, id: NodeId) -> &str {
        self.name(id).unwrap_or_default()
    }

    /// Name used in generated Python code.
    pub fn python_name(&self, id: NodeId) -> &str {
        let python_name = match self.kind(id) {
            NodeKind::Class { python_name, .. }
            | NodeKind::Attribute { python_name, .. }
            | NodeKind::Enum { python_name, .. }
            | NodeKind::EnumVariant { python_name, .. }
            | NodeKind::Function { python_name, .. }
            | NodeKind::Segment { python_name, .. }
            | NodeKind::Pipeline { python_name, .. }
            | NodeKind::Parameter { python_name, .. } => python_name.as_deref(),
            _ => None,
        };
        python_name.unwrap_or_else(|| self.name_or_empty(id))
    }

    pub fn parameters(&self, id: NodeId) -> &[NodeId] {
        match self.kind(id) {
            NodeKind::Annotation { parameters, .. }
            | NodeKind::EnumVariant { parameters, .. }
            | NodeKind::Function { parameters, .. }
            | NodeKind::Segment { parameters, .. }
            | NodeKind::BlockLambda { parameters, .. }
            | NodeKind::ExpressionLambda { parameters, .. }
            | NodeKind::CallableType { parameters, .. } => parameters,
            NodeKind::Class {
                parameters: Some(parameters),
                ..
            } => parameters,
            _ => &[],
        }
    }

    pub fn results(&self, id: NodeId) -> &[NodeId] {
        match self.kind(id) {
            NodeKind::Function { results, .. }
            | NodeKind::Segment { results, .. }
            | NodeKind::CallableType { results, .. } => results,
            _ => &[],
        }
    }

    /// Declared results, or the results assigned inside a block lambda.
    pub fn abstract_results(&self, id: NodeId) -> Vec<NodeId> {
        match self.kind(id) {
            NodeKind::BlockLambda { .. } => self.block_lambda_results(id),
            _ => self.results(id).to_vec(),
        }
    }

    pub fn block_lambda_results(&self, lambda: NodeId) -> Vec<NodeId> {
        let NodeKind::BlockLambda { body, .. } = self.kind(lambda) else {
            return Vec::new();
        };
        self.statements(*body)
            .iter()
            .flat_map(|statement| self.assignees(*statement).iter().copied())
            .filter(|it| matches!(self.kind(*it), NodeKind::BlockLambdaResult { .. }))
            .collect()
    }

    pub fn type_parameters(&self, id: NodeId) -> &[NodeId] {
        match self.kind(id) {
            NodeKind::Class {
                type_parameters, ..
            }
            | NodeKind::Function {
                type_parameters, ..
            } => type_parameters,
            _ => &[],
        }
    }

    pub fn variance(&self, type_parameter: NodeId) -> Variance {
        match self.kind(type_parameter) {
            NodeKind::TypeParameter { variance, .. } => *variance,
            _ => Variance::Invariant,
        }
    }

    pub fn statements(&self, block: NodeId) -> &[NodeId] {
        match self.kind(block) {
            NodeKind::Block { statements } => statements,
            _ => &[],
        }
    }

    pub fn assignees(&self, assignment: NodeId) -> &[NodeId] {
        match self.kind(assignment) {
            NodeKind::Assignment { assignees, .. } => assignees,
            _ => &[],
        }
    }

    pub fn arguments(&self, call: NodeId) -> &[NodeId] {
        match self.kind(call) {
            NodeKind::Call { arguments, .. } => arguments,
            _ => &[],
        }
    }

    pub fn default_value(&self, parameter: NodeId) -> Option<NodeId> {
        match self.kind(parameter) {
            NodeKind::Parameter { default_value, .. } => *default_value,
            _ => None,
        }
    }

    pub fn is_optional_parameter(&self, parameter: NodeId) -> bool {
        self.default_value(parameter).is_some()
    }

    pub fn is_constant_parameter(&self, parameter: NodeId) -> bool {
        matches!(
            self.kind(parameter),
            NodeKind::Parameter {
                is_constant: true,
                ..
            }
        )
    }

    pub fn reference_target(&self, reference: NodeId) -> Option<NodeId> {
        match self.kind(reference) {
            NodeKind::Reference { target, .. } => *target,
            _ => None,
        }
    }

    /// Target of the member reference of a member access.
    pub fn member_target(&self, member_access: NodeId) -> Option<NodeId> {
        match self.kind(member_access) {
            NodeKind::MemberAccess { member, .. } => self.reference_target(*member),
            _ => None,
        }
    }

    /// Yields assigning the given segment result, in tree order.
    pub fn result_to_yields(&self, result: NodeId) -> Vec<NodeId> {
        self.ids()
            .filter(|it| matches!(self.kind(*it), NodeKind::Yield { result: Some(r) } if *r == result))
            .collect()
    }

    /// Dotted name built from the package and the chain of containing
    /// declarations, using Python names where declared.
    pub fn qualified_python_name(&self, id: NodeId) -> String {
        let mut segments = vec![self.python_name(id).to_string()];
        for ancestor in self.ancestors(id) {
            match self.kind(ancestor) {
                NodeKind::Module {
                    package,
                    python_module,
                    ..
                } => {
                    segments.push(python_module.clone().unwrap_or_else(|| package.clone()));
                    break;
                }
                kind if kind.is_declaration() => segments.push(self.python_name(ancestor).to_string()),
                _ => {}
            }
        }
        segments.reverse();
        segments.join(".")
    }
}

/// Incremental construction of an [`Ast`].
///
/// Children are added before their parent. Forward references (e.g. a
/// recursive segment call) use [`AstBuilder::reserve`] and
/// [`AstBuilder::fill`].
#[derive(Debug, Default)]
pub struct AstBuilder {
    nodes: Vec<Option<Node>>,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: NodeKind) -> NodeId {
        self.push(Some(Node { kind, span: None }))
    }

    pub fn add_spanned(&mut self, kind: NodeKind, span: Span) -> NodeId {
        self.push(Some(Node {
            kind,
            span: Some(span),
        }))
    }

    pub fn reserve(&mut self) -> NodeId {
        self.push(None)
    }

    pub fn fill(&mut self, id: NodeId, kind: NodeKind) {
        if let Some(slot) = self.nodes.get_mut(id.index()) {
            *slot = Some(Node { kind, span: None });
        }
    }

    pub fn set_span(&mut self, id: NodeId, span: Span) {
        if let Some(Some(node)) = self.nodes.get_mut(id.index()) {
            node.span = Some(span);
        }
    }

    pub fn kind_mut(&mut self, id: NodeId) -> Option<&mut NodeKind> {
        self.nodes
            .get_mut(id.index())
            .and_then(|it| it.as_mut())
            .map(|it| &mut it.kind)
    }

    pub fn finish(self) -> Result<Ast, CoreError> {
        let nodes = self
            .nodes
            .into_iter()
            .enumerate()
            .map(|(index, node)| node.ok_or(CoreError::DanglingNode(NodeId(index as u32))))
            .collect::<Result<Vec<_>, _>>()?;
        Ast::from_nodes(nodes)
    }

    fn push(&mut self, node: Option<Node>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }
}

// ---------------------------------------------------------------------
// Shorthands for common node shapes
// ---------------------------------------------------------------------

impl AstBuilder {
    pub fn module(&mut self, package: &str, file: &str, members: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::Module {
            package: package.to_string(),
            file: file.to_string(),
            python_module: None,
            members,
        })
    }

    pub fn class(&mut self, name: &str, parameters: Option<Vec<NodeId>>, parent_types: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::Class {
            name: name.to_string(),
            python_name: None,
            type_parameters: Vec::new(),
            parameters,
            parent_types,
            members: Vec::new(),
        })
    }

    pub fn enumeration(&mut self, name: &str, variants: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::Enum {
            name: name.to_string(),
            python_name: None,
            variants,
        })
    }

    pub fn enum_variant(&mut self, name: &str, parameters: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::EnumVariant {
            name: name.to_string(),
            python_name: None,
            parameters,
        })
    }

    pub fn function(&mut self, name: &str, parameters: Vec<NodeId>, results: Vec<NodeId>, purity: Purity) -> NodeId {
        self.add(NodeKind::Function {
            name: name.to_string(),
            python_name: None,
            python_macro: None,
            is_static: false,
            type_parameters: Vec::new(),
            parameters,
            results,
            purity,
        })
    }

    pub fn segment(&mut self, name: &str, parameters: Vec<NodeId>, results: Vec<NodeId>, body: NodeId) -> NodeId {
        self.add(NodeKind::Segment {
            name: name.to_string(),
            python_name: None,
            parameters,
            results,
            body,
        })
    }

    pub fn pipeline(&mut self, name: &str, body: NodeId) -> NodeId {
        self.add(NodeKind::Pipeline {
            name: name.to_string(),
            python_name: None,
            body,
        })
    }

    pub fn parameter(&mut self, name: &str, ty: Option<NodeId>) -> NodeId {
        self.add(NodeKind::Parameter {
            name: name.to_string(),
            python_name: None,
            is_constant: false,
            ty,
            default_value: None,
        })
    }

    pub fn optional_parameter(&mut self, name: &str, ty: Option<NodeId>, default_value: NodeId) -> NodeId {
        self.add(NodeKind::Parameter {
            name: name.to_string(),
            python_name: None,
            is_constant: false,
            ty,
            default_value: Some(default_value),
        })
    }

    pub fn result(&mut self, name: &str, ty: Option<NodeId>) -> NodeId {
        self.add(NodeKind::Result {
            name: name.to_string(),
            ty,
        })
    }

    pub fn type_parameter(&mut self, name: &str, variance: Variance, upper_bound: Option<NodeId>) -> NodeId {
        self.add(NodeKind::TypeParameter {
            name: name.to_string(),
            variance,
            upper_bound,
            lower_bound: None,
            default_value: None,
        })
    }

    pub fn block(&mut self, statements: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::Block { statements })
    }

    pub fn assignment(&mut self, assignees: Vec<NodeId>, expression: NodeId) -> NodeId {
        self.add(NodeKind::Assignment {
            assignees,
            expression,
        })
    }

    pub fn expression_statement(&mut self, expression: NodeId) -> NodeId {
        self.add(NodeKind::ExpressionStatement { expression })
    }

    pub fn placeholder(&mut self, name: &str) -> NodeId {
        self.add(NodeKind::Placeholder {
            name: name.to_string(),
        })
    }

    pub fn wildcard(&mut self) -> NodeId {
        self.add(NodeKind::Wildcard)
    }

    pub fn yield_to(&mut self, result: NodeId) -> NodeId {
        self.add(NodeKind::Yield {
            result: Some(result),
        })
    }

    pub fn boolean(&mut self, value: bool) -> NodeId {
        self.add(NodeKind::Boolean { value })
    }

    pub fn int(&mut self, value: i64) -> NodeId {
        self.add(NodeKind::Int {
            value: BigInt::from(value),
        })
    }

    pub fn float(&mut self, value: f64) -> NodeId {
        self.add(NodeKind::Float { value })
    }

    pub fn null(&mut self) -> NodeId {
        self.add(NodeKind::Null)
    }

    pub fn string(&mut self, value: &str) -> NodeId {
        self.add(NodeKind::String {
            value: value.to_string(),
        })
    }

    pub fn list(&mut self, elements: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::List { elements })
    }

    pub fn reference(&mut self, target: NodeId) -> NodeId {
        self.add(NodeKind::Reference {
            target: Some(target),
            text: None,
        })
    }

    pub fn argument(&mut self, value: NodeId) -> NodeId {
        self.add(NodeKind::Argument {
            parameter: None,
            value,
        })
    }

    pub fn named_argument(&mut self, parameter: NodeId, value: NodeId) -> NodeId {
        self.add(NodeKind::Argument {
            parameter: Some(parameter),
            value,
        })
    }

    pub fn call(&mut self, receiver: NodeId, arguments: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::Call {
            receiver,
            arguments,
            null_safe: false,
        })
    }

    /// Call of a declaration by reference with positional arguments.
    pub fn call_of(&mut self, callable: NodeId, values: Vec<NodeId>) -> NodeId {
        let receiver = self.reference(callable);
        let arguments = values.into_iter().map(|it| self.argument(it)).collect();
        self.call(receiver, arguments)
    }

    pub fn infix(&mut self, operator: InfixOperator, left: NodeId, right: NodeId) -> NodeId {
        self.add(NodeKind::InfixOperation {
            operator,
            left,
            right,
        })
    }

    pub fn prefix(&mut self, operator: PrefixOperator, operand: NodeId) -> NodeId {
        self.add(NodeKind::PrefixOperation { operator, operand })
    }

    pub fn member_access(&mut self, receiver: NodeId, member: NodeId, null_safe: bool) -> NodeId {
        let member = self.reference(member);
        self.add(NodeKind::MemberAccess {
            receiver,
            member,
            null_safe,
        })
    }

    pub fn named_type(&mut self, declaration: NodeId, nullable: bool) -> NodeId {
        self.add(NodeKind::NamedType {
            declaration: Some(declaration),
            type_arguments: Vec::new(),
            nullable,
        })
    }

    pub fn generic_type(&mut self, declaration: NodeId, arguments: Vec<NodeId>, nullable: bool) -> NodeId {
        let type_arguments = arguments
            .into_iter()
            .map(|value| {
                self.add(NodeKind::TypeArgument {
                    type_parameter: None,
                    value,
                })
            })
            .collect();
        self.add(NodeKind::NamedType {
            declaration: Some(declaration),
            type_arguments,
            nullable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_parents_and_container_indices() {
        let mut b = AstBuilder::new();
        let one = b.int(1);
        let two = b.int(2);
        let list = b.list(vec![one, two]);
        let first = b.placeholder("a");
        let assignment = b.assignment(vec![first], list);
        let ast = b.finish().expect("tree is complete");

        assert_eq!(ast.parent(two), Some(list));
        assert_eq!(ast.container_index(two), 1);
        assert_eq!(ast.parent(list), Some(assignment));
        assert_eq!(ast.ancestors(one).collect::<Vec<_>>(), vec![list, assignment]);
    }

    #[test]
    fn rejects_unfilled_reservations() {
        let mut b = AstBuilder::new();
        let reserved = b.reserve();
        b.reference(reserved);
        assert!(matches!(b.finish(), Err(CoreError::DanglingNode(id)) if id == reserved));
    }

    #[test]
    fn rejects_out_of_range_references() {
        let nodes = vec![Node {
            kind: NodeKind::Reference {
                target: Some(NodeId(7)),
                text: None,
            },
            span: None,
        }];
        assert!(matches!(Ast::from_nodes(nodes), Err(CoreError::DanglingNode(NodeId(7)))));
    }

    #[test]
    fn json_keeps_big_integers() {
        let mut b = AstBuilder::new();
        let big = b.add(NodeKind::Int {
            value: "123456789012345678901234567890".parse().expect("valid integer"),
        });
        b.expression_statement(big);
        let ast = b.finish().expect("tree is complete");

        let json = ast.to_json().expect("serializes");
        assert!(json.contains("\"123456789012345678901234567890\""));
        let restored = Ast::from_json(&json).expect("deserializes");
        assert_eq!(restored.kind(big), ast.kind(big));
        assert_eq!(restored.parent(big), ast.parent(big));
    }

    #[test]
    fn qualified_names_follow_containers() {
        let mut b = AstBuilder::new();
        let function = b.function("f", vec![], vec![], Purity::Pure);
        let class = b.add(NodeKind::Class {
            name: "C".to_string(),
            python_name: Some("PyC".to_string()),
            type_parameters: vec![],
            parameters: None,
            parent_types: vec![],
            members: vec![function],
        });
        b.module("a.b", "input.sds", vec![class]);
        let ast = b.finish().expect("tree is complete");

        assert_eq!(ast.qualified_python_name(function), "a.b.PyC.f");
    }
}
