//! Type inference for syntax nodes.
//!
//! Every node gets a type: declarations their declared type, expressions
//! the type of their value, type syntax the type it denotes. Expressions
//! that fold to a constant get a literal type. Results are simplified and
//! cached per node in the [`SemanticCache`](crate::semantics::SemanticCache).

use std::collections::{BTreeMap, BTreeSet};
use std::iter;

use tracing::trace;

use crate::ast::{InfixOperator, NodeId, NodeKind, PrefixOperator, Variance};
use crate::evaluation::{Constant, EvaluatedNode};
use crate::semantics::SemanticModel;
use crate::typecheck::TypeCheckOptions;
use crate::types::{
    CallableType, ClassType, EnumType, EnumVariantType, LiteralType, NamedTupleEntry, NamedTupleType, StaticType,
    Type, TypeParameterType, TypeSubstitutions,
};

pub struct TypeComputer<'m> {
    model: &'m SemanticModel<'m>,
}

#[derive(Clone, Copy)]
enum Bound {
    Upper,
    Lower,
}

impl<'m> TypeComputer<'m> {
    pub fn new(model: &'m SemanticModel<'m>) -> Self {
        TypeComputer { model }
    }

    /// Simplified type of `node`. Computed once per node and cached.
    pub fn compute_type(&self, node: NodeId) -> Type {
        if let Some(cached) = self.model.cache.cached_type(node) {
            return cached;
        }

        let ty = self.do_compute_type(node).simplify(&self.model.checker());
        trace!(node = node.0, kind = self.model.ast.kind(node).kind_name(), %ty, "computed type");
        self.model.cache.store_type(node, ty.clone());
        ty
    }

    /// Type of `node` with type parameters replaced. The substituted type
    /// is not cached.
    pub fn compute_type_with_substitutions(&self, node: NodeId, substitutions: &TypeSubstitutions) -> Type {
        let ty = self.compute_type(node);
        if substitutions.is_empty() {
            return ty;
        }

        let checker = self.model.checker();
        let simplified: TypeSubstitutions = substitutions
            .iter()
            .map(|(parameter, ty)| (*parameter, ty.simplify(&checker)))
            .collect();
        ty.substitute(&simplified)
    }

    fn type_of(&self, node: Option<NodeId>) -> Type {
        node.map(|it| self.compute_type(it)).unwrap_or(Type::Unknown)
    }

    fn do_compute_type(&self, node: NodeId) -> Type {
        let ast = self.model.ast;
        match ast.kind(node) {
            kind if kind.is_assignee() => self.type_of_assignee(node),

            // Declarations
            NodeKind::Annotation { .. }
            | NodeKind::Function { .. }
            | NodeKind::Segment { .. }
            | NodeKind::CallableType { .. } => self.type_of_callable_with_manifest_types(node),
            NodeKind::Attribute { ty, .. } | NodeKind::Result { ty, .. } => self.type_of(*ty),
            NodeKind::Class { .. } => self.model.class_type(node, TypeSubstitutions::new(), false),
            NodeKind::Enum { .. } => Type::Enum(EnumType {
                decl: self.model.decl_ref(node),
                nullable: false,
            }),
            NodeKind::EnumVariant { .. } => Type::EnumVariant(EnumVariantType {
                decl: self.model.decl_ref(node),
                nullable: false,
            }),
            NodeKind::TypeParameter { .. } => Type::TypeParameter(TypeParameterType {
                decl: self.model.decl_ref(node),
                nullable: false,
            }),
            NodeKind::Parameter { ty, .. } => self.type_of_parameter(node, *ty),
            NodeKind::Module { .. }
            | NodeKind::Pipeline { .. }
            | NodeKind::Block { .. }
            | NodeKind::Assignment { .. }
            | NodeKind::ExpressionStatement { .. }
            | NodeKind::OutputStatement { .. }
            | NodeKind::MapEntry { .. } => Type::Unknown,

            // Type syntax
            NodeKind::NamedType {
                declaration,
                type_arguments,
                nullable,
            } => self.type_of_named_type(*declaration, type_arguments, *nullable),
            NodeKind::TypeArgument { value, .. } => self.compute_type(*value),
            NodeKind::MemberType { member, .. } => self.compute_type(*member),
            NodeKind::UnionType { members } => {
                Type::union(members.iter().map(|it| self.compute_type(*it)).collect())
            }
            NodeKind::LiteralType { literals } => self.type_of_literal_type(literals),

            _ => self.type_of_expression(node),
        }
    }

    // -----------------------------------------------------------------
    // Declarations
    // -----------------------------------------------------------------

    fn type_of_assignee(&self, node: NodeId) -> Type {
        let ast = self.model.ast;
        let Some(NodeKind::Assignment { expression, .. }) = ast.parent(node).map(|it| ast.kind(it)) else {
            return Type::Unknown;
        };

        let index = ast.container_index(node);
        match self.compute_type(*expression) {
            Type::NamedTuple(tuple) => tuple.type_of_entry_by_index(index),
            other if index == 0 => other,
            _ => Type::Unknown,
        }
    }

    fn manifest_input(&self, callable: NodeId) -> NamedTupleType {
        let ast = self.model.ast;
        NamedTupleType::new(
            ast.parameters(callable)
                .iter()
                .map(|parameter| {
                    let ty = match ast.kind(*parameter) {
                        NodeKind::Parameter { ty, .. } => self.type_of(*ty),
                        _ => Type::Unknown,
                    };
                    NamedTupleEntry::new(Some(*parameter), ast.name_or_empty(*parameter), ty)
                        .optional(ast.is_optional_parameter(*parameter))
                })
                .collect(),
        )
    }

    fn type_of_callable_with_manifest_types(&self, node: NodeId) -> Type {
        let ast = self.model.ast;
        let output = ast
            .results(node)
            .iter()
            .map(|result| {
                let ty = match ast.kind(*result) {
                    NodeKind::Result { ty, .. } => self.type_of(*ty),
                    _ => Type::Unknown,
                };
                NamedTupleEntry::new(Some(*result), ast.name_or_empty(*result), ty)
            })
            .collect();

        Type::Callable(CallableType {
            callable: node,
            parameter: None,
            input: self.manifest_input(node),
            output: NamedTupleType::new(output),
        })
    }

    /// Declared type, or for an untyped lambda parameter the matching
    /// parameter type of the callable the lambda is passed as.
    fn type_of_parameter(&self, node: NodeId, ty: Option<NodeId>) -> Type {
        let ty = match ty {
            Some(ty) => self.compute_type(ty),
            None => self.type_of_parameter_from_context(node),
        };

        match ty {
            Type::Callable(callable) => Type::Callable(CallableType {
                parameter: Some(node),
                ..callable
            }),
            other => other,
        }
    }

    fn type_of_parameter_from_context(&self, node: NodeId) -> Type {
        let ast = self.model.ast;
        let Some(lambda) = ast.parent(node).filter(|it| ast.kind(*it).is_lambda()) else {
            return Type::Unknown;
        };
        let Some(context) = ast.parent(lambda) else {
            return Type::Unknown;
        };

        let expected = match ast.kind(context) {
            NodeKind::Argument { .. } => {
                let parameter = self.model.mapper.argument_to_parameter(self.model, context);
                self.type_of(parameter.and_then(|it| self.declared_type(it)))
            }
            NodeKind::Parameter { .. } => self.compute_type(context),
            NodeKind::Assignment { assignees, .. } => match assignees.first().map(|it| ast.kind(*it)) {
                Some(NodeKind::Yield { result }) => self.type_of(*result),
                _ => Type::Unknown,
            },
            _ => Type::Unknown,
        };

        match expected {
            Type::Callable(callable) => callable.parameter_type_by_index(ast.container_index(node)),
            _ => Type::Unknown,
        }
    }

    fn declared_type(&self, declaration: NodeId) -> Option<NodeId> {
        match self.model.ast.kind(declaration) {
            NodeKind::Parameter { ty, .. } | NodeKind::Result { ty, .. } | NodeKind::Attribute { ty, .. } => *ty,
            _ => None,
        }
    }

    // -----------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------

    fn type_of_expression(&self, node: NodeId) -> Type {
        let ast = self.model.ast;
        let kind = ast.kind(node);
        if let NodeKind::TypeCast { ty, .. } = kind {
            return self.compute_type(*ty);
        }

        if let EvaluatedNode::Constant(constant) = self.model.evaluator().evaluate(node) {
            return Type::literal(vec![constant]);
        }

        match kind {
            NodeKind::Boolean { .. } => self.model.boolean_type(),
            NodeKind::Int { .. } => self.model.int_type(),
            NodeKind::Float { .. } => self.model.float_type(),
            NodeKind::Null => self.model.nothing_type(true),
            NodeKind::String { .. } | NodeKind::TemplateString { .. } | NodeKind::TemplateStringPart { .. } => {
                self.model.string_type()
            }
            NodeKind::List { elements } => {
                let element = self.lowest_common_supertype(elements.iter().map(|it| self.compute_type(*it)).collect());
                self.model.list_type(element)
            }
            NodeKind::Map { entries } => self.type_of_map(entries),
            NodeKind::BlockLambda { parameters, .. } => {
                let output = ast
                    .block_lambda_results(node)
                    .into_iter()
                    .map(|it| NamedTupleEntry::new(Some(it), ast.name_or_empty(it), self.compute_type(it)))
                    .collect();
                Type::Callable(CallableType {
                    callable: node,
                    parameter: None,
                    input: self.lambda_input(parameters),
                    output: NamedTupleType::new(output),
                })
            }
            NodeKind::ExpressionLambda { parameters, result } => Type::Callable(CallableType {
                callable: node,
                parameter: None,
                input: self.lambda_input(parameters),
                output: NamedTupleType::new(vec![NamedTupleEntry::new(None, "result", self.compute_type(*result))]),
            }),
            NodeKind::Call {
                receiver, null_safe, ..
            } => self.type_of_call(node, *receiver, *null_safe),
            NodeKind::Argument { value, .. } => self.compute_type(*value),
            NodeKind::IndexedAccess { receiver, .. } => self.type_of_indexed_access(*receiver),
            NodeKind::InfixOperation { operator, left, right } => self.type_of_infix_operation(*operator, *left, *right),
            NodeKind::PrefixOperation { operator, operand } => match operator {
                PrefixOperator::Not => self.model.boolean_type(),
                PrefixOperator::Negation => self.type_of_arithmetic_operation(&[*operand]),
            },
            NodeKind::MemberAccess {
                receiver,
                member,
                null_safe,
            } => self.type_of_member_access(node, *receiver, *member, *null_safe),
            NodeKind::Parenthesized { expression } => self.compute_type(*expression),
            NodeKind::Reference { target, .. } => self.type_of_reference(*target),
            NodeKind::This => self.type_of(ast.containing(node, |it| matches!(it, NodeKind::Class { .. }))),
            _ => Type::Unknown,
        }
    }

    fn lambda_input(&self, parameters: &[NodeId]) -> NamedTupleType {
        let ast = self.model.ast;
        NamedTupleType::new(
            parameters
                .iter()
                .map(|it| {
                    NamedTupleEntry::new(Some(*it), ast.name_or_empty(*it), self.compute_type(*it))
                        .optional(ast.is_optional_parameter(*it))
                })
                .collect(),
        )
    }

    fn type_of_map(&self, entries: &[NodeId]) -> Type {
        let ast = self.model.ast;
        let (keys, values): (Vec<Type>, Vec<Type>) = entries
            .iter()
            .filter_map(|entry| match ast.kind(*entry) {
                NodeKind::MapEntry { key, value } => Some((self.compute_type(*key), self.compute_type(*value))),
                _ => None,
            })
            .unzip();

        let key = match self.lowest_common_supertype(keys) {
            Type::Literal(literal) => self.compute_class_type_for_literal_type(&literal),
            other => other,
        };
        let value = self.lowest_common_supertype(values);
        self.model.map_type(key, value)
    }

    fn type_of_call(&self, call: NodeId, receiver: NodeId, null_safe: bool) -> Type {
        let ast = self.model.ast;
        let receiver_type = self.compute_type(receiver);

        let result = match self.compute_non_nullable_type(&receiver_type) {
            Type::Callable(callable) if !matches!(ast.kind(callable.callable), NodeKind::Annotation { .. }) => {
                let substitutions = self.compute_substitutions_for_call(call);
                Type::NamedTuple(callable.output).substitute(&substitutions)
            }
            Type::Static(StaticType { instance })
                if instance.declaration().is_some_and(|it| ast.kind(it).is_callable()) =>
            {
                *instance
            }
            _ => Type::Unknown,
        };

        result.with_explicit_nullability(receiver_type.is_explicitly_nullable() && null_safe)
    }

    fn type_of_indexed_access(&self, receiver: NodeId) -> Type {
        let receiver_type = self.compute_type(receiver);
        if !matches!(receiver_type, Type::Class(_) | Type::TypeParameter(_)) {
            return Type::Unknown;
        }

        let checker = self.model.checker();
        if checker.is_list(&receiver_type) || checker.is_map(&receiver_type) {
            self.model.any_type(true)
        } else {
            Type::Unknown
        }
    }

    fn type_of_infix_operation(&self, operator: InfixOperator, left: NodeId, right: NodeId) -> Type {
        match operator {
            InfixOperator::Or
            | InfixOperator::And
            | InfixOperator::Equals
            | InfixOperator::NotEquals
            | InfixOperator::IdenticalTo
            | InfixOperator::NotIdenticalTo
            | InfixOperator::LessThan
            | InfixOperator::LessThanOrEquals
            | InfixOperator::GreaterThanOrEquals
            | InfixOperator::GreaterThan => self.model.boolean_type(),
            InfixOperator::Plus | InfixOperator::Minus | InfixOperator::Times | InfixOperator::DividedBy => {
                self.type_of_arithmetic_operation(&[left, right])
            }
            InfixOperator::Elvis => {
                let left_type = self.compute_type(left);
                if left_type.is_explicitly_nullable() {
                    let right_type = self.compute_type(right);
                    self.lowest_common_supertype(vec![left_type.with_explicit_nullability(false), right_type])
                } else {
                    left_type
                }
            }
        }
    }

    /// `Int` if every operand is an `Int`, `Float` otherwise.
    fn type_of_arithmetic_operation(&self, operands: &[NodeId]) -> Type {
        let checker = self.model.checker();
        let int = self.model.int_type();
        if operands
            .iter()
            .all(|it| checker.is_subtype_of(&self.compute_type(*it), &int))
        {
            int
        } else {
            self.model.float_type()
        }
    }

    fn type_of_member_access(&self, node: NodeId, receiver: NodeId, member: NodeId, null_safe: bool) -> Type {
        let ast = self.model.ast;
        let member_type = self.compute_type(member);

        // Accessing a variant without parameters yields an instance even outside a call.
        if let Type::Static(StaticType { instance }) = &member_type
            && let Type::EnumVariant(variant) = instance.as_ref()
            && ast.parameters(variant.decl.id).is_empty()
            && !matches!(ast.parent(node).map(|it| ast.kind(it)), Some(NodeKind::Call { .. }))
        {
            return instance.as_ref().clone();
        }

        let receiver_type = self.compute_type(receiver);
        let mut result = member_type;

        // Inherited members see the substitutions of the class declaring them.
        if matches!(receiver_type, Type::Class(_))
            && let Some(class) = ast
                .reference_target(member)
                .and_then(|it| ast.containing(it, |kind| matches!(kind, NodeKind::Class { .. })))
            && let Some(declaring) = self.compute_matching_supertype(&receiver_type, class)
        {
            result = result.substitute(&declaring.substitutions);
        }

        let nullable = (receiver_type.is_explicitly_nullable() && null_safe) || result.is_explicitly_nullable();
        result.with_explicit_nullability(nullable)
    }

    fn type_of_reference(&self, target: Option<NodeId>) -> Type {
        let Some(target) = target else {
            return Type::Unknown;
        };

        let instance = self.compute_type(target);
        let is_named_type = matches!(
            instance,
            Type::Class(_) | Type::Enum(_) | Type::EnumVariant(_) | Type::TypeParameter(_)
        );
        if self.model.ast.kind(target).is_named_type_declaration() && is_named_type {
            Type::Static(StaticType {
                instance: Box::new(instance.with_explicit_nullability(false)),
            })
        } else {
            instance
        }
    }

    // -----------------------------------------------------------------
    // Type syntax
    // -----------------------------------------------------------------

    fn type_of_named_type(&self, declaration: Option<NodeId>, type_arguments: &[NodeId], nullable: bool) -> Type {
        let ast = self.model.ast;
        let unparameterized = self.type_of(declaration).with_explicit_nullability(nullable);
        let Type::Class(class) = &unparameterized else {
            return unparameterized;
        };

        let type_parameters = ast.type_parameters(class.decl.id);
        if type_parameters.is_empty() {
            return unparameterized;
        }

        // The first type argument for a type parameter wins.
        let mut arguments: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        for argument in type_arguments {
            if let Some(parameter) = self.model.mapper.type_argument_to_type_parameter(self.model, *argument) {
                arguments.entry(parameter).or_insert(*argument);
            }
        }

        let substitutions = type_parameters
            .iter()
            .map(|parameter| {
                let source = arguments.get(parameter).copied().or_else(|| match ast.kind(*parameter) {
                    NodeKind::TypeParameter { default_value, .. } => *default_value,
                    _ => None,
                });
                (*parameter, self.type_of(source))
            })
            .collect();

        self.model.class_type(class.decl.id, substitutions, nullable)
    }

    fn type_of_literal_type(&self, literals: &[NodeId]) -> Type {
        let evaluator = self.model.evaluator();
        let constants: Option<Vec<Constant>> = literals
            .iter()
            .map(|it| match evaluator.evaluate(*it) {
                EvaluatedNode::Constant(constant) => Some(constant),
                _ => None,
            })
            .collect();
        constants.map(Type::literal).unwrap_or(Type::Unknown)
    }

    // -----------------------------------------------------------------
    // Conversions
    // -----------------------------------------------------------------

    pub fn compute_non_nullable_type(&self, ty: &Type) -> Type {
        ty.with_explicit_nullability(false).simplify(&self.model.checker())
    }

    /// Narrowest class type containing every constant of `literal`.
    pub fn compute_class_type_for_literal_type(&self, literal: &LiteralType) -> Type {
        self.lowest_common_supertype(
            literal
                .constants
                .iter()
                .map(|it| self.compute_class_type_for_constant(it))
                .collect(),
        )
    }

    pub fn compute_class_type_for_constant(&self, constant: &Constant) -> Type {
        match constant {
            Constant::Boolean(_) => self.model.boolean_type(),
            Constant::Int(_) => self.model.int_type(),
            Constant::Float(_) => self.model.float_type(),
            Constant::String(_) => self.model.string_type(),
            Constant::Null => self.model.nothing_type(true),
        }
    }

    /// Signature of calling a class or enum variant by name. Classes
    /// without constructor are not callable.
    pub fn compute_callable_type_for_static_type(&self, ty: &StaticType) -> Type {
        let Some(declaration) = ty.instance.declaration() else {
            return Type::Unknown;
        };

        match self.model.ast.kind(declaration) {
            NodeKind::Class {
                parameters: Some(_), ..
            }
            | NodeKind::EnumVariant { .. } => Type::Callable(CallableType {
                callable: declaration,
                parameter: None,
                input: self.manifest_input(declaration),
                output: NamedTupleType::new(vec![NamedTupleEntry::new(None, "instance", ty.instance.as_ref().clone())]),
            }),
            _ => Type::Unknown,
        }
    }

    /// Type parameters of the called declaration inferred from the types
    /// of the arguments passed for parameters typed directly with them.
    pub fn compute_substitutions_for_call(&self, call: NodeId) -> TypeSubstitutions {
        let ast = self.model.ast;
        let Some(callable) = self.model.mapper.call_to_callable(self.model, call) else {
            return TypeSubstitutions::new();
        };
        let type_parameters = ast.type_parameters(callable);
        if type_parameters.is_empty() {
            return TypeSubstitutions::new();
        }

        let arguments = self
            .model
            .mapper
            .parameters_to_arguments(self.model, ast.parameters(callable), ast.arguments(call));

        let mut bindings: BTreeMap<NodeId, Vec<Type>> = BTreeMap::new();
        for (parameter, argument) in arguments {
            let Type::TypeParameter(type_parameter) = self.type_of(self.declared_type(parameter)) else {
                continue;
            };
            if !type_parameters.contains(&type_parameter.decl.id) {
                continue;
            }
            let argument_type = match self.compute_type(argument) {
                Type::Literal(literal) => self.compute_class_type_for_literal_type(&literal),
                other => other,
            };
            bindings.entry(type_parameter.decl.id).or_default().push(argument_type);
        }

        bindings
            .into_iter()
            .map(|(parameter, types)| (parameter, self.lowest_common_supertype(types)))
            .collect()
    }

    // -----------------------------------------------------------------
    // Type parameter bounds
    // -----------------------------------------------------------------

    /// `Any?` without an explicit bound, `$unknown` for an unresolved or
    /// cyclic bound.
    pub fn compute_upper_bound(&self, ty: &TypeParameterType, stop_at_type_parameter: bool) -> Type {
        let mut visited = BTreeSet::new();
        let result = self.do_compute_bound(ty.decl.id, Bound::Upper, stop_at_type_parameter, &mut visited);
        let nullable = result.is_explicitly_nullable() || ty.nullable;
        result.with_explicit_nullability(nullable)
    }

    /// `Nothing` without an explicit bound, `$unknown` for an unresolved or
    /// cyclic bound.
    pub fn compute_lower_bound(&self, ty: &TypeParameterType, stop_at_type_parameter: bool) -> Type {
        let mut visited = BTreeSet::new();
        self.do_compute_bound(ty.decl.id, Bound::Lower, stop_at_type_parameter, &mut visited)
    }

    fn do_compute_bound(
        &self,
        declaration: NodeId,
        bound: Bound,
        stop_at_type_parameter: bool,
        visited: &mut BTreeSet<NodeId>,
    ) -> Type {
        if !visited.insert(declaration) {
            return Type::Unknown;
        }

        let NodeKind::TypeParameter {
            upper_bound,
            lower_bound,
            ..
        } = self.model.ast.kind(declaration)
        else {
            return Type::Unknown;
        };

        let node = match bound {
            Bound::Upper => *upper_bound,
            Bound::Lower => *lower_bound,
        };
        let Some(node) = node else {
            return match bound {
                Bound::Upper => self.model.any_type(true),
                Bound::Lower => self.model.nothing_type(false),
            };
        };

        match self.compute_type(node) {
            Type::TypeParameter(next) if !stop_at_type_parameter => {
                self.do_compute_bound(next.decl.id, bound, stop_at_type_parameter, visited)
            }
            ty @ (Type::Class(_) | Type::Enum(_) | Type::EnumVariant(_) | Type::TypeParameter(_)) => ty,
            _ => Type::Unknown,
        }
    }

    // -----------------------------------------------------------------
    // Supertypes
    // -----------------------------------------------------------------

    /// `ty` or its nearest supertype declared by `target`, with type
    /// parameters of parent types substituted.
    pub fn compute_matching_supertype(&self, ty: &Type, target: NodeId) -> Option<ClassType> {
        match ty {
            Type::TypeParameter(parameter) => match self.compute_upper_bound(parameter, false) {
                bound @ Type::Class(_) => self.compute_matching_supertype(&bound, target),
                _ => None,
            },
            Type::Class(class) => iter::once(class.clone())
                .chain(self.stream_proper_supertypes(class))
                .find(|it| it.decl.id == target),
            _ => None,
        }
    }

    /// Declared supertypes of `ty`, nearest first, ending with `Any`.
    pub fn stream_proper_supertypes(&self, ty: &ClassType) -> Vec<ClassType> {
        let mut visited = vec![ty.decl.id];
        let mut result = Vec::new();

        let mut current = self.parent_class_type(ty);
        while let Some(next) = current {
            if visited.contains(&next.decl.id) {
                break;
            }
            visited.push(next.decl.id);
            current = self.parent_class_type(&next);
            result.push(next);
        }

        let any = self.model.core.any;
        if !visited.contains(&any) {
            result.push(ClassType {
                decl: self.model.decl_ref(any),
                substitutions: TypeSubstitutions::new(),
                nullable: ty.nullable,
            });
        }
        result
    }

    fn parent_class_type(&self, ty: &ClassType) -> Option<ClassType> {
        let first = self
            .model
            .hierarchy
            .parent_types(self.model, ty.decl.id)
            .into_iter()
            .next()?;
        match self.compute_type_with_substitutions(first, &ty.substitutions) {
            Type::Class(parent) => Some(ClassType {
                nullable: ty.nullable,
                ..parent
            }),
            _ => None,
        }
    }

    // -----------------------------------------------------------------
    // Lowest common supertype
    // -----------------------------------------------------------------

    pub fn lowest_common_supertype(&self, types: Vec<Type>) -> Type {
        let checker = self.model.checker();
        let mut simplified = match Type::union(types).simplify(&checker) {
            Type::Union(union) => union.members,
            other => vec![other],
        };
        if simplified.len() == 1 {
            return simplified.remove(0);
        }

        let replaced: Vec<Type> = simplified
            .into_iter()
            .map(|it| match it {
                Type::TypeParameter(parameter) => self.compute_upper_bound(&parameter, false),
                other => other,
            })
            .collect();

        let nothing = self.model.nothing_type(false);
        let nothing_or_null = self.model.nothing_type(true);
        let mut classes = Vec::new();
        let mut enums = Vec::new();
        let mut variants = Vec::new();
        for ty in &replaced {
            if *ty == nothing || *ty == nothing_or_null {
                continue;
            }
            match ty {
                Type::Class(class) => classes.push(class.clone()),
                Type::Enum(it) => enums.push(it.clone()),
                Type::EnumVariant(it) => variants.push(it.clone()),
                Type::Literal(literal) => match self.compute_class_type_for_literal_type(literal) {
                    Type::Class(class) => classes.push(class),
                    _ => return Type::Unknown,
                },
                _ => return Type::Unknown,
            }
        }

        let nullable = replaced.iter().any(Type::is_explicitly_nullable);
        if !classes.is_empty() {
            if !enums.is_empty() || !variants.is_empty() {
                return self.model.any_type(nullable);
            }
            return self.lowest_common_supertype_for_classes(&classes, nullable);
        }
        self.lowest_common_supertype_for_enums(&enums, &variants, nullable)
    }

    fn lowest_common_supertype_for_classes(&self, classes: &[ClassType], nullable: bool) -> Type {
        let ast = self.model.ast;
        let checker = self.model.checker();
        let Some((first, rest)) = classes.split_first() else {
            return self.model.nothing_type(nullable);
        };

        let first = ClassType {
            nullable,
            ..first.clone()
        };
        let options = TypeCheckOptions {
            ignore_type_parameters: true,
            ..TypeCheckOptions::default()
        };

        let candidates = iter::once(first.clone()).chain(self.stream_proper_supertypes(&first));
        for candidate in candidates {
            let candidate_type = Type::Class(candidate.clone());
            let is_common = rest
                .iter()
                .all(|it| checker.is_supertype_of_with(&candidate_type, &Type::Class(it.clone()), options));
            if !is_common {
                continue;
            }

            let type_parameters = ast.type_parameters(candidate.decl.id);
            if type_parameters.is_empty() {
                return candidate_type;
            }

            let others: Vec<ClassType> = rest
                .iter()
                .filter_map(|it| self.compute_matching_supertype(&Type::Class(it.clone()), candidate.decl.id))
                .collect();

            let invariant_agree = type_parameters
                .iter()
                .filter(|it| ast.variance(**it) == Variance::Invariant)
                .all(|parameter| match candidate.substitutions.get(parameter) {
                    Some(own) => others.iter().all(|other| other.substitutions.get(parameter) == Some(own)),
                    None => false,
                });
            if !invariant_agree {
                continue;
            }

            let substitutions = type_parameters
                .iter()
                .map(|parameter| {
                    let own = candidate.substitutions.get(parameter).cloned().unwrap_or(Type::Unknown);
                    let unified = match ast.variance(*parameter) {
                        Variance::Covariant => {
                            let all = iter::once(own)
                                .chain(
                                    others
                                        .iter()
                                        .map(|it| it.substitutions.get(parameter).cloned().unwrap_or(Type::Unknown)),
                                )
                                .collect();
                            self.lowest_common_supertype(all)
                        }
                        // Highest common subtype of the substitutions.
                        Variance::Contravariant => self.model.nothing_type(false),
                        Variance::Invariant => own,
                    };
                    (*parameter, unified)
                })
                .collect();
            return self.model.class_type(candidate.decl.id, substitutions, nullable);
        }

        self.model.any_type(nullable)
    }

    fn lowest_common_supertype_for_enums(
        &self,
        enums: &[EnumType],
        variants: &[EnumVariantType],
        nullable: bool,
    ) -> Type {
        let ast = self.model.ast;
        let mut candidates = Vec::new();
        if let Some(first) = enums.first() {
            candidates.push(Type::Enum(EnumType {
                nullable,
                ..first.clone()
            }));
        } else if let Some(first) = variants.first() {
            candidates.push(Type::EnumVariant(EnumVariantType {
                nullable,
                ..first.clone()
            }));
            if let Some(containing) = ast.containing(first.decl.id, |it| matches!(it, NodeKind::Enum { .. })) {
                candidates.push(Type::Enum(EnumType {
                    decl: self.model.decl_ref(containing),
                    nullable,
                }));
            }
        } else {
            return self.model.nothing_type(nullable);
        }

        let checker = self.model.checker();
        let others: Vec<Type> = enums
            .iter()
            .cloned()
            .map(Type::Enum)
            .chain(variants.iter().cloned().map(Type::EnumVariant))
            .collect();
        candidates
            .into_iter()
            .find(|candidate| others.iter().all(|it| checker.is_supertype_of(candidate, it)))
            .unwrap_or_else(|| self.model.any_type(nullable))
    }
}
