//! Type model of the semantic core.
//!
//! Types are immutable values. Every operation returns a new type;
//! [`Type::Unknown`] absorbs all of them. Simplification needs the
//! subtype relation, which lives in the type checker and is passed in
//! through [`SubtypeRelation`].

use std::collections::BTreeMap;
use std::fmt;

use crate::ast::NodeId;
use crate::evaluation::Constant;

/// Replacement types for type parameters, keyed by type parameter node.
pub type TypeSubstitutions = BTreeMap<NodeId, Type>;

/// Relation consulted by [`Type::simplify`].
pub trait SubtypeRelation {
    fn is_subtype_of(&self, ty: &Type, other: &Type) -> bool;

    /// The bottom type `Nothing`, or `Nothing?` when `nullable`.
    fn nothing(&self, nullable: bool) -> Type;
}

/// Named declaration a type refers to. Equality only looks at the node.
#[derive(Debug, Clone)]
pub struct DeclRef {
    pub id: NodeId,
    pub name: String,
}

impl DeclRef {
    pub fn new(id: NodeId, name: impl Into<String>) -> Self {
        DeclRef {
            id,
            name: name.into(),
        }
    }
}

impl PartialEq for DeclRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DeclRef {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Callable(CallableType),
    Literal(LiteralType),
    NamedTuple(NamedTupleType),
    Class(ClassType),
    Enum(EnumType),
    EnumVariant(EnumVariantType),
    TypeParameter(TypeParameterType),
    Static(StaticType),
    Union(UnionType),
    Unknown,
}

/// Signature of a function, segment, lambda or callable type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallableType {
    pub callable: NodeId,
    /// Parameter whose declared type this is, if any.
    pub parameter: Option<NodeId>,
    pub input: NamedTupleType,
    pub output: NamedTupleType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedTupleType {
    pub entries: Vec<NamedTupleEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedTupleEntry {
    pub declaration: Option<NodeId>,
    pub name: String,
    pub ty: Type,
    /// Whether the declaring parameter has a default value.
    pub optional: bool,
}

/// Finite set of constants. Empty means no value is possible. Equality
/// is positional; [`Type::simplify`] keeps first-occurrence order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiteralType {
    pub constants: Vec<Constant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassType {
    pub decl: DeclRef,
    pub substitutions: TypeSubstitutions,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumType {
    pub decl: DeclRef,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumVariantType {
    pub decl: DeclRef,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeParameterType {
    pub decl: DeclRef,
    pub nullable: bool,
}

/// Type of a reference to a named declaration itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticType {
    pub instance: Box<Type>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnionType {
    pub members: Vec<Type>,
}

impl LiteralType {
    pub fn new(constants: Vec<Constant>) -> Self {
        LiteralType { constants }
    }

    fn deduplicated(constants: impl IntoIterator<Item = Constant>) -> Self {
        let mut result: Vec<Constant> = Vec::new();
        for constant in constants {
            if !result.contains(&constant) {
                result.push(constant);
            }
        }
        LiteralType { constants: result }
    }
}

impl NamedTupleType {
    pub fn new(entries: Vec<NamedTupleEntry>) -> Self {
        NamedTupleType { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn type_of_entry_by_index(&self, index: usize) -> Type {
        self.entries
            .get(index)
            .map(|it| it.ty.clone())
            .unwrap_or(Type::Unknown)
    }

    fn map_types(&self, f: impl Fn(&Type) -> Type) -> NamedTupleType {
        NamedTupleType {
            entries: self
                .entries
                .iter()
                .map(|it| NamedTupleEntry {
                    ty: f(&it.ty),
                    ..it.clone()
                })
                .collect(),
        }
    }
}

impl NamedTupleEntry {
    pub fn new(declaration: Option<NodeId>, name: impl Into<String>, ty: Type) -> Self {
        NamedTupleEntry {
            declaration,
            name: name.into(),
            ty,
            optional: false,
        }
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }
}

impl CallableType {
    pub fn parameter_type_by_index(&self, index: usize) -> Type {
        self.input.type_of_entry_by_index(index)
    }
}

impl Type {
    pub fn class(decl: DeclRef, substitutions: TypeSubstitutions, nullable: bool) -> Type {
        Type::Class(ClassType {
            decl,
            substitutions,
            nullable,
        })
    }

    pub fn literal(constants: Vec<Constant>) -> Type {
        Type::Literal(LiteralType::new(constants))
    }

    pub fn union(members: Vec<Type>) -> Type {
        Type::Union(UnionType { members })
    }

    pub fn named_tuple(entries: Vec<NamedTupleEntry>) -> Type {
        Type::NamedTuple(NamedTupleType::new(entries))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Type::Unknown)
    }

    pub fn as_class(&self) -> Option<&ClassType> {
        match self {
            Type::Class(class) => Some(class),
            _ => None,
        }
    }

    /// Declaration of a class, enum, enum variant or type parameter type.
    pub fn declaration(&self) -> Option<NodeId> {
        match self {
            Type::Class(it) => Some(it.decl.id),
            Type::Enum(it) => Some(it.decl.id),
            Type::EnumVariant(it) => Some(it.decl.id),
            Type::TypeParameter(it) => Some(it.decl.id),
            _ => None,
        }
    }

    pub fn is_explicitly_nullable(&self) -> bool {
        match self {
            Type::Literal(literal) => literal.constants.contains(&Constant::Null),
            Type::Union(union) => union.members.iter().any(Type::is_explicitly_nullable),
            Type::Class(it) => it.nullable,
            Type::Enum(it) => it.nullable,
            Type::EnumVariant(it) => it.nullable,
            Type::TypeParameter(it) => it.nullable,
            Type::Callable(_) | Type::NamedTuple(_) | Type::Static(_) | Type::Unknown => false,
        }
    }

    pub fn is_fully_substituted(&self) -> bool {
        match self {
            Type::TypeParameter(_) => false,
            Type::Class(class) => class.substitutions.values().all(Type::is_fully_substituted),
            Type::Callable(callable) => {
                callable.input.entries.iter().all(|it| it.ty.is_fully_substituted())
                    && callable.output.entries.iter().all(|it| it.ty.is_fully_substituted())
            }
            Type::NamedTuple(tuple) => tuple.entries.iter().all(|it| it.ty.is_fully_substituted()),
            Type::Union(union) => union.members.iter().all(Type::is_fully_substituted),
            Type::Literal(_) | Type::Enum(_) | Type::EnumVariant(_) | Type::Static(_) | Type::Unknown => true,
        }
    }

    /// Replaces type parameters by their substitutions. The nullability of
    /// a replaced type parameter carries over to its replacement.
    pub fn substitute(&self, substitutions: &TypeSubstitutions) -> Type {
        if substitutions.is_empty() || self.is_fully_substituted() {
            return self.clone();
        }

        match self {
            Type::Callable(callable) => Type::Callable(CallableType {
                input: callable.input.map_types(|it| it.substitute(substitutions)),
                output: callable.output.map_types(|it| it.substitute(substitutions)),
                ..callable.clone()
            }),
            Type::NamedTuple(tuple) => Type::NamedTuple(tuple.map_types(|it| it.substitute(substitutions))),
            Type::Class(class) => Type::Class(ClassType {
                substitutions: class
                    .substitutions
                    .iter()
                    .map(|(key, value)| (*key, value.substitute(substitutions)))
                    .collect(),
                ..class.clone()
            }),
            Type::TypeParameter(parameter) => match substitutions.get(&parameter.decl.id) {
                Some(replacement) => replacement
                    .with_explicit_nullability(replacement.is_explicitly_nullable() || parameter.nullable),
                None => self.clone(),
            },
            Type::Union(union) => Type::union(union.members.iter().map(|it| it.substitute(substitutions)).collect()),
            Type::Literal(_) | Type::Enum(_) | Type::EnumVariant(_) | Type::Static(_) | Type::Unknown => {
                self.clone()
            }
        }
    }

    pub fn with_explicit_nullability(&self, nullable: bool) -> Type {
        match self {
            Type::Callable(_) | Type::NamedTuple(_) | Type::Static(_) => {
                if nullable {
                    Type::union(vec![self.clone(), Type::literal(vec![Constant::Null])])
                } else {
                    self.clone()
                }
            }
            Type::Literal(literal) => {
                let has_null = literal.constants.contains(&Constant::Null);
                if nullable && !has_null {
                    let mut constants = literal.constants.clone();
                    constants.push(Constant::Null);
                    Type::literal(constants)
                } else if !nullable && has_null {
                    Type::literal(
                        literal
                            .constants
                            .iter()
                            .filter(|it| **it != Constant::Null)
                            .cloned()
                            .collect(),
                    )
                } else {
                    self.clone()
                }
            }
            Type::Union(union) => {
                if union.members.is_empty() {
                    return if nullable {
                        Type::literal(vec![Constant::Null])
                    } else {
                        self.clone()
                    };
                }
                if self.is_explicitly_nullable() == nullable {
                    return self.clone();
                }
                Type::union(
                    union
                        .members
                        .iter()
                        .map(|it| it.with_explicit_nullability(nullable))
                        .collect(),
                )
            }
            Type::Class(class) => Type::Class(ClassType {
                nullable,
                ..class.clone()
            }),
            Type::Enum(it) => Type::Enum(EnumType {
                nullable,
                ..it.clone()
            }),
            Type::EnumVariant(it) => Type::EnumVariant(EnumVariantType {
                nullable,
                ..it.clone()
            }),
            Type::TypeParameter(it) => Type::TypeParameter(TypeParameterType {
                nullable,
                ..it.clone()
            }),
            Type::Unknown => Type::Unknown,
        }
    }

    /// Canonical form of the type. Idempotent.
    pub fn simplify(&self, relation: &dyn SubtypeRelation) -> Type {
        match self {
            Type::Callable(callable) => Type::Callable(CallableType {
                input: callable.input.map_types(|it| it.simplify(relation)),
                output: callable.output.map_types(|it| it.simplify(relation)),
                ..callable.clone()
            }),
            Type::Literal(literal) => {
                let simplified = LiteralType::deduplicated(literal.constants.iter().cloned());
                if simplified.constants == [Constant::Null] {
                    relation.nothing(true)
                } else {
                    Type::Literal(simplified)
                }
            }
            Type::NamedTuple(tuple) => {
                if tuple.entries.len() == 1 {
                    tuple.entries[0].ty.simplify(relation)
                } else {
                    Type::NamedTuple(tuple.map_types(|it| it.simplify(relation)))
                }
            }
            Type::Class(class) => Type::Class(ClassType {
                substitutions: class
                    .substitutions
                    .iter()
                    .map(|(key, value)| (*key, value.simplify(relation)))
                    .collect(),
                ..class.clone()
            }),
            Type::Union(union) => simplify_union(&union.members, relation),
            Type::Enum(_) | Type::EnumVariant(_) | Type::TypeParameter(_) | Type::Static(_) | Type::Unknown => {
                self.clone()
            }
        }
    }
}

fn simplify_union(members: &[Type], relation: &dyn SubtypeRelation) -> Type {
    if members.is_empty() {
        return relation.nothing(false);
    }

    let mut types: Vec<Type> = Vec::new();
    for member in members {
        match member.simplify(relation) {
            Type::Union(inner) => types.extend(inner.members),
            other => types.push(other),
        }
    }

    // Back to front keeps the first of two equivalent members.
    let nothing_or_null = relation.nothing(true);
    for i in (0..types.len()).rev() {
        for j in 0..types.len() {
            if i == j {
                continue;
            }
            let current = types[i].clone();
            let other = types[j].clone();

            if current == nothing_or_null
                && matches!(other, Type::Callable(_) | Type::NamedTuple(_) | Type::Static(_))
            {
                continue;
            }

            if let (Type::Literal(current), Type::Literal(other)) = (&current, &other) {
                let merged = LiteralType::deduplicated(other.constants.iter().chain(&current.constants).cloned());
                types[j] = Type::Literal(merged);
                types.remove(i);
                break;
            }

            let nullable = current.is_explicitly_nullable() || other.is_explicitly_nullable();

            if matches!(current, Type::TypeParameter(_)) {
                let candidate = current.with_explicit_nullability(nullable);
                if relation.is_subtype_of(&other, &candidate) {
                    types[j] = candidate;
                    types.remove(i);
                    break;
                }
            }

            let candidate = other.with_explicit_nullability(nullable);
            if relation.is_subtype_of(&current, &candidate) {
                types[j] = candidate;
                types.remove(i);
                break;
            }
        }
    }

    if types.len() == 1 {
        types.remove(0)
    } else {
        Type::union(types)
    }
}

// ---------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------

fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: impl IntoIterator<Item = T>) -> fmt::Result {
    for (index, item) in items.into_iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn nullable_suffix(nullable: bool) -> &'static str {
    if nullable { "?" } else { "" }
}

impl fmt::Display for NamedTupleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        write_joined(
            f,
            self.entries.iter().map(|it| format!("{}: {}", it.name, it.ty)),
        )?;
        f.write_str(")")
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Callable(callable) => {
                f.write_str("(")?;
                write_joined(
                    f,
                    callable.input.entries.iter().map(|it| {
                        format!("{}{}: {}", it.name, nullable_suffix(it.optional), it.ty)
                    }),
                )?;
                write!(f, ") -> {}", callable.output)
            }
            Type::Literal(literal) => {
                f.write_str("literal<")?;
                write_joined(f, &literal.constants)?;
                f.write_str(">")
            }
            Type::NamedTuple(tuple) => write!(f, "{tuple}"),
            Type::Class(class) => {
                f.write_str(&class.decl.name)?;
                if !class.substitutions.is_empty() {
                    f.write_str("<")?;
                    write_joined(f, class.substitutions.values())?;
                    f.write_str(">")?;
                }
                f.write_str(nullable_suffix(class.nullable))
            }
            Type::Enum(it) => write!(f, "{}{}", it.decl.name, nullable_suffix(it.nullable)),
            Type::EnumVariant(it) => write!(f, "{}{}", it.decl.name, nullable_suffix(it.nullable)),
            Type::TypeParameter(it) => write!(f, "{}{}", it.decl.name, nullable_suffix(it.nullable)),
            Type::Static(it) => write!(f, "$type<{}>", it.instance),
            Type::Union(union) => {
                f.write_str("union<")?;
                write_joined(f, &union.members)?;
                f.write_str(">")
            }
            Type::Unknown => f.write_str("$unknown"),
        }
    }
}
