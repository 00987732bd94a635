//! Partial evaluation of expressions.
//!
//! Folds an expression into an [`EvaluatedNode`] as far as its inputs are
//! known at compile time. Anything that depends on runtime values becomes
//! [`EvaluatedNode::Unknown`]. Evaluating a node again while it is already
//! being evaluated (with the same parameter values) yields `Unknown`, so
//! recursive segments and self-referencing placeholders terminate.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use ordered_float::OrderedFloat;
use tracing::trace;

use crate::ast::{InfixOperator, NodeId, NodeKind, PrefixOperator};
use crate::evaluation::{
    Closure, Constant, EvaluatedEnumVariant, EvaluatedMapEntry, EvaluatedNode, ParameterSubstitutions,
};
use crate::semantics::SemanticModel;

type Visited = Vec<(NodeId, ParameterSubstitutions)>;

pub struct PartialEvaluator<'m> {
    model: &'m SemanticModel<'m>,
}

impl<'m> PartialEvaluator<'m> {
    pub fn new(model: &'m SemanticModel<'m>) -> Self {
        PartialEvaluator { model }
    }

    pub fn evaluate(&self, node: NodeId) -> EvaluatedNode {
        self.evaluate_with_substitutions(node, &ParameterSubstitutions::new())
    }

    /// Value of `node` when the given parameters are bound. Named tuples
    /// with a single entry are unwrapped.
    pub fn evaluate_with_substitutions(&self, node: NodeId, substitutions: &ParameterSubstitutions) -> EvaluatedNode {
        let mut visited = Visited::new();
        self.evaluate_with_recursion_check(node, substitutions, &mut visited)
            .unwrap()
    }

    fn evaluate_with_recursion_check(
        &self,
        node: NodeId,
        substitutions: &ParameterSubstitutions,
        visited: &mut Visited,
    ) -> EvaluatedNode {
        if visited
            .iter()
            .any(|(id, seen)| *id == node && seen == substitutions)
        {
            return EvaluatedNode::Unknown;
        }

        visited.push((node, substitutions.clone()));
        let result = self.evaluate_cached(node, substitutions, visited);
        visited.pop();
        result
    }

    /// The value without substitutions is cached. It is reused whenever
    /// it does not depend on parameters.
    fn evaluate_cached(
        &self,
        node: NodeId,
        substitutions: &ParameterSubstitutions,
        visited: &mut Visited,
    ) -> EvaluatedNode {
        let cache = self.model.cache;
        let without_substitutions = match cache.cached_evaluation(node) {
            Some(cached) => cached,
            None => {
                let value = self.do_evaluate(node, &ParameterSubstitutions::new(), visited);
                trace!(node = node.0, kind = self.model.ast.kind(node).kind_name(), ?value, "evaluated");
                cache.store_evaluation(node, value.clone());
                value
            }
        };

        if without_substitutions.is_fully_evaluated() || substitutions.is_empty() {
            without_substitutions
        } else {
            self.do_evaluate(node, substitutions, visited)
        }
    }

    fn do_evaluate(&self, node: NodeId, substitutions: &ParameterSubstitutions, visited: &mut Visited) -> EvaluatedNode {
        let ast = self.model.ast;
        let kind = ast.kind(node);
        if kind.is_assignee() {
            return self.evaluate_assignee(node, substitutions, visited);
        }

        match kind {
            // Declarations
            NodeKind::Class { .. } | NodeKind::Function { .. } => EvaluatedNode::NamedCallable(node),
            NodeKind::EnumVariant { parameters, .. } => EvaluatedNode::EnumVariant(EvaluatedEnumVariant {
                variant: node,
                has_parameters: !parameters.is_empty(),
                args: None,
            }),
            NodeKind::Parameter { .. } => substitutions.get(&node).cloned().unwrap_or(EvaluatedNode::Unknown),
            NodeKind::Result { .. } => match ast.result_to_yields(node).first() {
                Some(first) => self.evaluate_with_recursion_check(*first, substitutions, visited),
                None => EvaluatedNode::Unknown,
            },
            NodeKind::Segment { .. } => EvaluatedNode::SegmentClosure(Closure {
                callable: node,
                substitutions_on_creation: ParameterSubstitutions::new(),
            }),

            // Literals
            NodeKind::Boolean { value } => Constant::Boolean(*value).into(),
            NodeKind::Int { value } => Constant::Int(value.clone()).into(),
            NodeKind::Float { value } => Constant::Float(OrderedFloat(*value)).into(),
            NodeKind::Null => Constant::Null.into(),
            NodeKind::String { value } | NodeKind::TemplateStringPart { value, .. } => {
                Constant::String(value.clone()).into()
            }
            NodeKind::UnknownLiteral => EvaluatedNode::Unknown,

            // Composites
            NodeKind::BlockLambda { .. } => EvaluatedNode::BlockLambdaClosure(Closure {
                callable: node,
                substitutions_on_creation: substitutions.clone(),
            }),
            NodeKind::ExpressionLambda { .. } => EvaluatedNode::ExpressionLambdaClosure(Closure {
                callable: node,
                substitutions_on_creation: substitutions.clone(),
            }),
            NodeKind::Argument { value, .. }
            | NodeKind::Parenthesized { expression: value }
            | NodeKind::TypeCast { expression: value, .. } => {
                self.evaluate_with_recursion_check(*value, substitutions, visited)
            }
            NodeKind::Reference { target, .. } => match target {
                Some(target) => self.evaluate_with_recursion_check(*target, substitutions, visited),
                None => EvaluatedNode::Unknown,
            },
            NodeKind::List { elements } => EvaluatedNode::List(
                elements
                    .iter()
                    .map(|it| self.evaluate_with_recursion_check(*it, substitutions, visited))
                    .collect(),
            ),
            NodeKind::Map { entries } => EvaluatedNode::Map(
                entries
                    .iter()
                    .filter_map(|entry| match ast.kind(*entry) {
                        NodeKind::MapEntry { key, value } => Some((*key, *value)),
                        _ => None,
                    })
                    .map(|(key, value)| EvaluatedMapEntry {
                        key: self.evaluate_with_recursion_check(key, substitutions, visited),
                        value: self.evaluate_with_recursion_check(value, substitutions, visited),
                    })
                    .collect(),
            ),
            NodeKind::TemplateString { expressions } => self.evaluate_template_string(expressions, substitutions, visited),

            // Operations
            NodeKind::InfixOperation { operator, left, right } => {
                self.evaluate_infix_operation(*operator, *left, *right, substitutions, visited)
            }
            NodeKind::PrefixOperation { operator, operand } => {
                let operand = self.evaluate_with_recursion_check(*operand, substitutions, visited);
                match (operator, operand) {
                    (PrefixOperator::Not, EvaluatedNode::Constant(Constant::Boolean(value))) => {
                        Constant::Boolean(!value).into()
                    }
                    (PrefixOperator::Negation, EvaluatedNode::Constant(Constant::Int(value))) => {
                        Constant::Int(-value).into()
                    }
                    (PrefixOperator::Negation, EvaluatedNode::Constant(Constant::Float(value))) => {
                        Constant::Float(-value).into()
                    }
                    _ => EvaluatedNode::Unknown,
                }
            }
            NodeKind::Call {
                receiver,
                arguments,
                null_safe,
            } => self.evaluate_call(*receiver, arguments, *null_safe, substitutions, visited),
            NodeKind::IndexedAccess {
                receiver,
                index,
                null_safe,
            } => {
                let receiver = self
                    .evaluate_with_recursion_check(*receiver, substitutions, visited)
                    .unwrap();
                match &receiver {
                    EvaluatedNode::List(_) => match self
                        .evaluate_with_recursion_check(*index, substitutions, visited)
                        .unwrap()
                    {
                        EvaluatedNode::Constant(Constant::Int(index)) => receiver.element_by_index(&index),
                        _ => EvaluatedNode::Unknown,
                    },
                    EvaluatedNode::Map(_) => {
                        let key = self
                            .evaluate_with_recursion_check(*index, substitutions, visited)
                            .unwrap();
                        receiver.last_value_for_key(&key)
                    }
                    it if it.is_null() && *null_safe => Constant::Null.into(),
                    _ => EvaluatedNode::Unknown,
                }
            }
            NodeKind::MemberAccess {
                receiver,
                member,
                null_safe,
            } => self.evaluate_member_access(*receiver, *member, *null_safe, substitutions, visited),

            _ => EvaluatedNode::Unknown,
        }
    }

    fn evaluate_assignee(
        &self,
        node: NodeId,
        substitutions: &ParameterSubstitutions,
        visited: &mut Visited,
    ) -> EvaluatedNode {
        let ast = self.model.ast;
        let Some(NodeKind::Assignment { expression, .. }) = ast.parent(node).map(|it| ast.kind(it)) else {
            return EvaluatedNode::Unknown;
        };

        let value = self.evaluate_with_recursion_check(*expression, substitutions, visited);
        let index = ast.container_index(node);
        match value {
            EvaluatedNode::NamedTuple(_) => value.result_by_index(index),
            other if index == 0 => other,
            _ => EvaluatedNode::Unknown,
        }
    }

    fn evaluate_template_string(
        &self,
        expressions: &[NodeId],
        substitutions: &ParameterSubstitutions,
        visited: &mut Visited,
    ) -> EvaluatedNode {
        let mut text = String::new();
        for expression in expressions {
            match self.evaluate_with_recursion_check(*expression, substitutions, visited) {
                EvaluatedNode::Constant(constant) => text.push_str(&constant.to_interpolation_string()),
                _ => return EvaluatedNode::Unknown,
            }
        }
        Constant::String(text).into()
    }

    // -----------------------------------------------------------------
    // Infix operations
    // -----------------------------------------------------------------

    fn evaluate_infix_operation(
        &self,
        operator: InfixOperator,
        left: NodeId,
        right: NodeId,
        substitutions: &ParameterSubstitutions,
        visited: &mut Visited,
    ) -> EvaluatedNode {
        let left = self.evaluate_with_recursion_check(left, substitutions, visited);
        if left.is_unknown() {
            return EvaluatedNode::Unknown;
        }

        // The right operand is only needed if the left one does not decide.
        match operator {
            InfixOperator::Or => {
                if left == EvaluatedNode::Constant(Constant::Boolean(true)) {
                    return left;
                }
                let right = self.evaluate_with_recursion_check(right, substitutions, visited);
                return match (left, right) {
                    (
                        EvaluatedNode::Constant(Constant::Boolean(left)),
                        EvaluatedNode::Constant(Constant::Boolean(right)),
                    ) => Constant::Boolean(left || right).into(),
                    _ => EvaluatedNode::Unknown,
                };
            }
            InfixOperator::And => {
                if left == EvaluatedNode::Constant(Constant::Boolean(false)) {
                    return left;
                }
                let right = self.evaluate_with_recursion_check(right, substitutions, visited);
                return match (left, right) {
                    (
                        EvaluatedNode::Constant(Constant::Boolean(left)),
                        EvaluatedNode::Constant(Constant::Boolean(right)),
                    ) => Constant::Boolean(left && right).into(),
                    _ => EvaluatedNode::Unknown,
                };
            }
            InfixOperator::Elvis => {
                if matches!(&left, EvaluatedNode::Constant(constant) if *constant != Constant::Null) {
                    return left;
                }
                let right = self.evaluate_with_recursion_check(right, substitutions, visited);
                return if left.is_null() {
                    right
                } else if right.is_unknown() {
                    EvaluatedNode::Unknown
                } else {
                    left
                };
            }
            _ => {}
        }

        let right = self.evaluate_with_recursion_check(right, substitutions, visited);
        if right.is_unknown() {
            return EvaluatedNode::Unknown;
        }

        match operator {
            InfixOperator::Equals | InfixOperator::IdenticalTo => Constant::Boolean(left == right).into(),
            InfixOperator::NotEquals | InfixOperator::NotIdenticalTo => Constant::Boolean(left != right).into(),
            InfixOperator::LessThan => compare(&left, &right, Ordering::is_lt),
            InfixOperator::LessThanOrEquals => compare(&left, &right, Ordering::is_le),
            InfixOperator::GreaterThanOrEquals => compare(&left, &right, Ordering::is_ge),
            InfixOperator::GreaterThan => compare(&left, &right, Ordering::is_gt),
            InfixOperator::Plus => arithmetic(&left, &right, |a, b| Some(a + b), |a, b| a + b),
            InfixOperator::Minus => arithmetic(&left, &right, |a, b| Some(a - b), |a, b| a - b),
            InfixOperator::Times => arithmetic(&left, &right, |a, b| Some(a * b), |a, b| a * b),
            InfixOperator::DividedBy => {
                if is_zero(&right) {
                    return EvaluatedNode::Unknown;
                }
                arithmetic(&left, &right, |a, b| Some(a / b), |a, b| a / b)
            }
            InfixOperator::Or | InfixOperator::And | InfixOperator::Elvis => EvaluatedNode::Unknown,
        }
    }

    // -----------------------------------------------------------------
    // Calls and member accesses
    // -----------------------------------------------------------------

    fn evaluate_call(
        &self,
        receiver: NodeId,
        arguments: &[NodeId],
        null_safe: bool,
        substitutions: &ParameterSubstitutions,
        visited: &mut Visited,
    ) -> EvaluatedNode {
        let receiver = self
            .evaluate_with_recursion_check(receiver, substitutions, visited)
            .unwrap();

        match receiver {
            EvaluatedNode::EnumVariant(variant) => {
                if variant.args.is_some() {
                    return EvaluatedNode::Unknown;
                }
                let args = self.substitutions_after_call(
                    variant.variant,
                    arguments,
                    &ParameterSubstitutions::new(),
                    substitutions,
                    visited,
                );
                EvaluatedNode::EnumVariant(EvaluatedEnumVariant {
                    args: Some(args),
                    ..variant
                })
            }
            EvaluatedNode::BlockLambdaClosure(closure)
            | EvaluatedNode::ExpressionLambdaClosure(closure)
            | EvaluatedNode::SegmentClosure(closure) => self.evaluate_callable_call(
                closure.callable,
                arguments,
                &closure.substitutions_on_creation,
                substitutions,
                visited,
            ),
            EvaluatedNode::NamedCallable(callable) => self.evaluate_callable_call(
                callable,
                arguments,
                &ParameterSubstitutions::new(),
                substitutions,
                visited,
            ),
            it if it.is_null() && null_safe => Constant::Null.into(),
            _ => EvaluatedNode::Unknown,
        }
    }

    fn evaluate_callable_call(
        &self,
        callable: NodeId,
        arguments: &[NodeId],
        on_creation: &ParameterSubstitutions,
        on_call: &ParameterSubstitutions,
        visited: &mut Visited,
    ) -> EvaluatedNode {
        let ast = self.model.ast;
        match ast.kind(callable) {
            NodeKind::ExpressionLambda { result, .. } => {
                let substitutions = self.substitutions_after_call(callable, arguments, on_creation, on_call, visited);
                self.evaluate_with_recursion_check(*result, &substitutions, visited)
            }
            NodeKind::BlockLambda { .. } | NodeKind::Segment { .. } => {
                let substitutions = self.substitutions_after_call(callable, arguments, on_creation, on_call, visited);
                EvaluatedNode::NamedTuple(
                    ast.abstract_results(callable)
                        .into_iter()
                        .map(|result| {
                            let value = self.evaluate_with_recursion_check(result, &substitutions, visited);
                            (result, value)
                        })
                        .collect(),
                )
            }
            _ => EvaluatedNode::Unknown,
        }
    }

    /// Values of the callable's parameters inside a call: the values
    /// captured on creation, then each argument, then each default value.
    /// Unknown values are left out.
    fn substitutions_after_call(
        &self,
        callable: NodeId,
        arguments: &[NodeId],
        on_creation: &ParameterSubstitutions,
        on_call: &ParameterSubstitutions,
        visited: &mut Visited,
    ) -> ParameterSubstitutions {
        let ast = self.model.ast;
        let parameters = ast.parameters(callable);
        let mapping = self.model.mapper.parameters_to_arguments(self.model, parameters, arguments);

        let mut result = on_creation.clone();
        for parameter in parameters {
            let value = if let Some(argument) = mapping.get(parameter) {
                self.evaluate_with_recursion_check(*argument, on_call, visited)
            } else if let Some(default_value) = ast.default_value(*parameter) {
                let so_far = result.clone();
                self.evaluate_with_recursion_check(default_value, &so_far, visited)
            } else {
                continue;
            };
            if !value.is_unknown() {
                result.insert(*parameter, value);
            }
        }
        result
    }

    /// Parameter values bound when `call` runs, given the values bound
    /// around the call itself.
    pub fn compute_parameter_substitutions_for_call(
        &self,
        call: NodeId,
        substitutions: &ParameterSubstitutions,
    ) -> ParameterSubstitutions {
        let ast = self.model.ast;
        let NodeKind::Call { receiver, arguments, .. } = ast.kind(call) else {
            return ParameterSubstitutions::new();
        };

        let mut visited = Visited::new();
        let (callable, on_creation) = match self
            .evaluate_with_recursion_check(*receiver, substitutions, &mut visited)
            .unwrap()
        {
            EvaluatedNode::BlockLambdaClosure(closure)
            | EvaluatedNode::ExpressionLambdaClosure(closure)
            | EvaluatedNode::SegmentClosure(closure) => (closure.callable, closure.substitutions_on_creation),
            EvaluatedNode::NamedCallable(callable) => (callable, ParameterSubstitutions::new()),
            EvaluatedNode::EnumVariant(variant) => (variant.variant, ParameterSubstitutions::new()),
            _ => return ParameterSubstitutions::new(),
        };
        self.substitutions_after_call(callable, arguments, &on_creation, substitutions, &mut visited)
    }

    fn evaluate_member_access(
        &self,
        receiver: NodeId,
        member: NodeId,
        null_safe: bool,
        substitutions: &ParameterSubstitutions,
        visited: &mut Visited,
    ) -> EvaluatedNode {
        let ast = self.model.ast;
        let Some(target) = ast.reference_target(member) else {
            return EvaluatedNode::Unknown;
        };
        if matches!(ast.kind(target), NodeKind::EnumVariant { .. }) {
            return self.evaluate_with_recursion_check(target, substitutions, visited);
        }

        let name = ast.name_or_empty(target);
        match self.evaluate_with_recursion_check(receiver, substitutions, visited) {
            EvaluatedNode::EnumVariant(variant) => variant
                .args
                .as_ref()
                .and_then(|args| {
                    args.iter()
                        .find(|(parameter, _)| ast.name_or_empty(**parameter) == name)
                        .map(|(_, value)| value.clone())
                })
                .unwrap_or(EvaluatedNode::Unknown),
            EvaluatedNode::NamedTuple(entries) => entries
                .into_iter()
                .find(|(result, _)| ast.name_or_empty(*result) == name)
                .map(|(_, value)| value)
                .unwrap_or(EvaluatedNode::Unknown),
            it if it.is_null() && null_safe => Constant::Null.into(),
            _ => EvaluatedNode::Unknown,
        }
    }

    // -----------------------------------------------------------------
    // Constant parameters
    // -----------------------------------------------------------------

    /// Whether the expression may be passed to a constant parameter. This
    /// is a syntactic check; the value itself may still be unknown.
    pub fn can_be_value_of_constant_parameter(&self, node: NodeId) -> bool {
        let ast = self.model.ast;
        match ast.kind(node) {
            NodeKind::Boolean { .. }
            | NodeKind::Float { .. }
            | NodeKind::Int { .. }
            | NodeKind::Null
            | NodeKind::String { .. } => true,
            NodeKind::Call { receiver, arguments, .. } => {
                self.can_be_value_of_constant_parameter(*receiver)
                    && arguments.iter().all(|it| match ast.kind(*it) {
                        NodeKind::Argument { value, .. } => self.can_be_value_of_constant_parameter(*value),
                        _ => false,
                    })
            }
            NodeKind::List { elements } => elements.iter().all(|it| self.can_be_value_of_constant_parameter(*it)),
            NodeKind::Map { entries } => entries.iter().all(|entry| match ast.kind(*entry) {
                NodeKind::MapEntry { key, value } => {
                    self.can_be_value_of_constant_parameter(*key) && self.can_be_value_of_constant_parameter(*value)
                }
                _ => false,
            }),
            NodeKind::MemberAccess { member, .. } => match ast.reference_target(*member) {
                None => true,
                Some(target) => matches!(ast.kind(target), NodeKind::EnumVariant { .. }),
            },
            NodeKind::PrefixOperation {
                operator: PrefixOperator::Negation,
                operand,
            } => self.can_be_value_of_constant_parameter(*operand),
            NodeKind::Reference { target, .. } => target.is_none(),
            _ => false,
        }
    }
}

fn is_zero(value: &EvaluatedNode) -> bool {
    match value {
        EvaluatedNode::Constant(Constant::Int(value)) => value.is_zero(),
        // Also true for -0.0.
        EvaluatedNode::Constant(Constant::Float(value)) => value.0 == 0.0,
        _ => false,
    }
}

fn as_f64(value: &Constant) -> Option<f64> {
    match value {
        Constant::Int(value) => value.to_f64(),
        Constant::Float(value) => Some(value.0),
        _ => None,
    }
}

fn compare(left: &EvaluatedNode, right: &EvaluatedNode, accept: fn(Ordering) -> bool) -> EvaluatedNode {
    let (Some(left), Some(right)) = (left.as_constant(), right.as_constant()) else {
        return EvaluatedNode::Unknown;
    };
    let ordering = match (left, right) {
        (Constant::Int(left), Constant::Int(right)) => Some(left.cmp(right)),
        _ => match (as_f64(left), as_f64(right)) {
            (Some(left), Some(right)) => left.partial_cmp(&right),
            _ => None,
        },
    };
    ordering
        .map(|it| Constant::Boolean(accept(it)).into())
        .unwrap_or(EvaluatedNode::Unknown)
}

/// Ints combine exactly; any Float operand makes the result a Float.
fn arithmetic(
    left: &EvaluatedNode,
    right: &EvaluatedNode,
    on_ints: fn(&BigInt, &BigInt) -> Option<BigInt>,
    on_floats: fn(f64, f64) -> f64,
) -> EvaluatedNode {
    let (Some(left), Some(right)) = (left.as_constant(), right.as_constant()) else {
        return EvaluatedNode::Unknown;
    };
    match (left, right) {
        (Constant::Int(left), Constant::Int(right)) => on_ints(left, right)
            .map(|it| Constant::Int(it).into())
            .unwrap_or(EvaluatedNode::Unknown),
        _ => match (as_f64(left), as_f64(right)) {
            (Some(left), Some(right)) => Constant::Float(OrderedFloat(on_floats(left, right))).into(),
            _ => EvaluatedNode::Unknown,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Ast, Purity};
    use crate::semantics::SemanticCache;
    use crate::testing::Fixture;

    fn model<'a>(ast: &'a Ast, cache: &'a SemanticCache) -> SemanticModel<'a> {
        SemanticModel::new(ast, cache).expect("core classes")
    }

    fn evaluate_all(f: Fixture, nodes: &[NodeId]) -> Vec<EvaluatedNode> {
        let ast = f.finish();
        let cache = SemanticCache::default();
        let model = model(&ast, &cache);
        let evaluator = model.evaluator();
        nodes.iter().map(|it| evaluator.evaluate(*it)).collect()
    }

    fn constant(value: Constant) -> EvaluatedNode {
        EvaluatedNode::Constant(value)
    }

    #[test]
    fn arithmetic_folds_exactly() {
        let mut f = Fixture::new();
        let (one, two) = (f.b.int(1), f.b.int(2));
        let sum = f.b.infix(InfixOperator::Plus, one, two);
        let (seven, two) = (f.b.int(-7), f.b.int(2));
        let quotient = f.b.infix(InfixOperator::DividedBy, seven, two);
        let (one, half) = (f.b.int(1), f.b.float(0.5));
        let mixed = f.b.infix(InfixOperator::Times, one, half);
        let (one, zero) = (f.b.int(1), f.b.int(0));
        let by_zero = f.b.infix(InfixOperator::DividedBy, one, zero);
        let (one, negative_zero) = (f.b.float(1.0), f.b.float(-0.0));
        let by_negative_zero = f.b.infix(InfixOperator::DividedBy, one, negative_zero);
        let five = f.b.int(5);
        let negated = f.b.prefix(PrefixOperator::Negation, five);

        let values = evaluate_all(f, &[sum, quotient, mixed, by_zero, by_negative_zero, negated]);
        assert_eq!(values[0], constant(Constant::int(3)));
        assert_eq!(values[1], constant(Constant::int(-3)));
        assert_eq!(values[2], constant(Constant::float(0.5)));
        assert_eq!(values[3], EvaluatedNode::Unknown);
        assert_eq!(values[4], EvaluatedNode::Unknown);
        assert_eq!(values[5], constant(Constant::int(-5)));
    }

    #[test]
    fn comparisons_and_equality() {
        let mut f = Fixture::new();
        let (one, half) = (f.b.int(1), f.b.float(1.5));
        let less = f.b.infix(InfixOperator::LessThan, one, half);
        let (a, b) = (f.b.int(2), f.b.int(2));
        let greater_or_equal = f.b.infix(InfixOperator::GreaterThanOrEquals, a, b);
        let (int, float) = (f.b.int(1), f.b.float(1.0));
        let equal = f.b.infix(InfixOperator::Equals, int, float);
        let (x, y) = (f.b.string("x"), f.b.string("x"));
        let not_identical = f.b.infix(InfixOperator::NotIdenticalTo, x, y);
        let (text, number) = (f.b.string("a"), f.b.int(1));
        let nonsense = f.b.infix(InfixOperator::LessThan, text, number);

        let values = evaluate_all(f, &[less, greater_or_equal, equal, not_identical, nonsense]);
        assert_eq!(values[0], constant(Constant::Boolean(true)));
        assert_eq!(values[1], constant(Constant::Boolean(true)));
        assert_eq!(values[2], constant(Constant::Boolean(false)));
        assert_eq!(values[3], constant(Constant::Boolean(false)));
        assert_eq!(values[4], EvaluatedNode::Unknown);
    }

    #[test]
    fn logical_operators_short_circuit() {
        let mut f = Fixture::new();
        let unknown = f.b.add(NodeKind::UnknownLiteral);
        let yes = f.b.boolean(true);
        let or = f.b.infix(InfixOperator::Or, yes, unknown);
        let no = f.b.boolean(false);
        let unknown_right = f.b.add(NodeKind::UnknownLiteral);
        let and = f.b.infix(InfixOperator::And, no, unknown_right);
        let yes_again = f.b.boolean(true);
        let unknown_again = f.b.add(NodeKind::UnknownLiteral);
        let undecided = f.b.infix(InfixOperator::And, yes_again, unknown_again);
        let unknown_left = f.b.add(NodeKind::UnknownLiteral);
        let right = f.b.boolean(true);
        let unknown_first = f.b.infix(InfixOperator::Or, unknown_left, right);
        let not_yes = f.b.boolean(true);
        let not = f.b.prefix(PrefixOperator::Not, not_yes);

        let values = evaluate_all(f, &[or, and, undecided, unknown_first, not]);
        assert_eq!(values[0], constant(Constant::Boolean(true)));
        assert_eq!(values[1], constant(Constant::Boolean(false)));
        assert_eq!(values[2], EvaluatedNode::Unknown);
        assert_eq!(values[3], EvaluatedNode::Unknown);
        assert_eq!(values[4], constant(Constant::Boolean(false)));
    }

    #[test]
    fn elvis_picks_the_first_non_null_value() {
        let mut f = Fixture::new();
        let (null, one) = (f.b.null(), f.b.int(1));
        let fallback = f.b.infix(InfixOperator::Elvis, null, one);
        let (two, unknown) = (f.b.int(2), f.b.add(NodeKind::UnknownLiteral));
        let kept = f.b.infix(InfixOperator::Elvis, two, unknown);
        let (null_again, unknown_again) = (f.b.null(), f.b.add(NodeKind::UnknownLiteral));
        let unresolved = f.b.infix(InfixOperator::Elvis, null_again, unknown_again);

        let values = evaluate_all(f, &[fallback, kept, unresolved]);
        assert_eq!(values[0], constant(Constant::int(1)));
        assert_eq!(values[1], constant(Constant::int(2)));
        assert_eq!(values[2], EvaluatedNode::Unknown);
    }

    #[test]
    fn template_strings_join_constant_parts() {
        let mut f = Fixture::new();
        let start = f.b.add(NodeKind::TemplateStringPart {
            position: crate::ast::TemplatePosition::Start,
            value: "n = ".to_string(),
        });
        let (one, two) = (f.b.int(1), f.b.int(2));
        let sum = f.b.infix(InfixOperator::Plus, one, two);
        let end = f.b.add(NodeKind::TemplateStringPart {
            position: crate::ast::TemplatePosition::End,
            value: "!".to_string(),
        });
        let template = f.b.add(NodeKind::TemplateString {
            expressions: vec![start, sum, end],
        });
        let unknown = f.b.add(NodeKind::UnknownLiteral);
        let partial = f.b.add(NodeKind::TemplateString {
            expressions: vec![unknown],
        });

        let values = evaluate_all(f, &[template, partial]);
        assert_eq!(values[0], constant(Constant::string("n = 3!")));
        assert_eq!(values[1], EvaluatedNode::Unknown);
    }

    #[test]
    fn collections_are_indexed() {
        let mut f = Fixture::new();
        let (a, b) = (f.b.string("a"), f.b.string("b"));
        let list = f.b.list(vec![a, b]);
        let index = f.b.int(1);
        let element = f.b.add(NodeKind::IndexedAccess {
            receiver: list,
            index,
            null_safe: false,
        });
        let (k1, v1, k2, v2) = (f.b.string("k"), f.b.int(1), f.b.string("k"), f.b.int(2));
        let first = f.b.add(NodeKind::MapEntry { key: k1, value: v1 });
        let second = f.b.add(NodeKind::MapEntry { key: k2, value: v2 });
        let map = f.b.add(NodeKind::Map {
            entries: vec![first, second],
        });
        let key = f.b.string("k");
        let value = f.b.add(NodeKind::IndexedAccess {
            receiver: map,
            index: key,
            null_safe: false,
        });
        let null = f.b.null();
        let zero = f.b.int(0);
        let null_safe = f.b.add(NodeKind::IndexedAccess {
            receiver: null,
            index: zero,
            null_safe: true,
        });
        let (c, out_of_range) = (f.b.string("c"), f.b.int(5));
        let short = f.b.list(vec![c]);
        let missing = f.b.add(NodeKind::IndexedAccess {
            receiver: short,
            index: out_of_range,
            null_safe: false,
        });

        let values = evaluate_all(f, &[element, value, null_safe, missing]);
        assert_eq!(values[0], constant(Constant::string("b")));
        assert_eq!(values[1], constant(Constant::int(2)));
        assert_eq!(values[2], constant(Constant::Null));
        assert_eq!(values[3], EvaluatedNode::Unknown);
    }

    /// `((x, y = 10) -> x + y)(value)`
    fn call_adding_lambda(f: &mut Fixture, value: NodeId) -> (NodeId, NodeId, NodeId, NodeId) {
        let x = f.b.parameter("x", None);
        let ten = f.b.int(10);
        let y = f.b.optional_parameter("y", None, ten);
        let (rx, ry) = (f.b.reference(x), f.b.reference(y));
        let body = f.b.infix(InfixOperator::Plus, rx, ry);
        let lambda = f.b.add(NodeKind::ExpressionLambda {
            parameters: vec![x, y],
            result: body,
        });
        let receiver = f.b.add(NodeKind::Parenthesized { expression: lambda });
        let argument = f.b.argument(value);
        let call = f.b.call(receiver, vec![argument]);
        (call, lambda, x, y)
    }

    #[test]
    fn lambdas_bind_arguments_and_defaults() {
        let mut f = Fixture::new();
        let one = f.b.int(1);
        let (call, lambda, x, y) = call_adding_lambda(&mut f, one);
        let unknown = f.b.add(NodeKind::UnknownLiteral);
        let (unresolved, _, _, _) = call_adding_lambda(&mut f, unknown);

        let ast = f.finish();
        let cache = SemanticCache::default();
        let model = model(&ast, &cache);
        let evaluator = model.evaluator();
        assert_eq!(evaluator.evaluate(call), constant(Constant::int(11)));
        assert_eq!(evaluator.evaluate(unresolved), EvaluatedNode::Unknown);
        assert!(matches!(evaluator.evaluate(lambda), EvaluatedNode::ExpressionLambdaClosure(_)));

        let substitutions = evaluator.compute_parameter_substitutions_for_call(call, &ParameterSubstitutions::new());
        assert_eq!(substitutions.get(&x), Some(&constant(Constant::int(1))));
        assert_eq!(substitutions.get(&y), Some(&constant(Constant::int(10))));
    }

    #[test]
    fn segments_yield_named_results() {
        let mut f = Fixture::new();
        let int = f.b.named_type(f.core.int, false);
        let p = f.b.parameter("p", Some(int));
        let result_type = f.b.named_type(f.core.int, false);
        let result = f.b.result("r", Some(result_type));
        let yielded = f.b.yield_to(result);
        let (rp, two) = (f.b.reference(p), f.b.int(2));
        let doubled = f.b.infix(InfixOperator::Times, rp, two);
        let assignment = f.b.assignment(vec![yielded], doubled);
        let body = f.b.block(vec![assignment]);
        let segment = f.b.segment("double", vec![p], vec![result], body);
        f.members(&[segment]);
        let twenty_one = f.b.int(21);
        let call = f.b.call_of(segment, vec![twenty_one]);
        let one = f.b.int(1);
        let receiver = f.b.call_of(segment, vec![one]);
        let member = f.b.member_access(receiver, result, false);
        let unbound = f.b.call_of(segment, vec![]);

        let ast = f.finish();
        let cache = SemanticCache::default();
        let model = model(&ast, &cache);
        let evaluator = model.evaluator();
        assert_eq!(evaluator.evaluate(call), constant(Constant::int(42)));
        assert_eq!(evaluator.evaluate(member), constant(Constant::int(2)));
        assert_eq!(evaluator.evaluate(unbound), EvaluatedNode::Unknown);
        assert!(matches!(evaluator.evaluate(segment), EvaluatedNode::SegmentClosure(_)));
    }

    #[test]
    fn recursion_terminates_with_unknown() {
        let mut f = Fixture::new();
        let segment = f.b.reserve();
        let result = f.b.result("r", None);
        let yielded = f.b.yield_to(result);
        let recursive = f.b.call_of(segment, vec![]);
        let assignment = f.b.assignment(vec![yielded], recursive);
        let body = f.b.block(vec![assignment]);
        f.b.fill(
            segment,
            NodeKind::Segment {
                name: "loop".to_string(),
                python_name: None,
                parameters: vec![],
                results: vec![result],
                body,
            },
        );
        f.members(&[segment]);

        let values = evaluate_all(f, &[recursive]);
        assert_eq!(values[0], EvaluatedNode::Unknown);
    }

    #[test]
    fn enum_variants_expose_their_arguments() {
        let mut f = Fixture::new();
        let int = f.b.named_type(f.core.int, false);
        let size = f.b.parameter("size", Some(int));
        let variant = f.b.enum_variant("Sized", vec![size]);
        let plain = f.b.enum_variant("Plain", vec![]);
        let enumeration = f.b.enumeration("Shape", vec![variant, plain]);
        f.members(&[enumeration]);
        let enum_reference = f.b.reference(enumeration);
        let variant_access = f.b.member_access(enum_reference, variant, false);
        let three = f.b.int(3);
        let argument = f.b.argument(three);
        let instance = f.b.call(variant_access, vec![argument]);
        let size_access = f.b.member_access(instance, size, false);
        let plain_reference = f.b.reference(enumeration);
        let plain_access = f.b.member_access(plain_reference, plain, false);

        let ast = f.finish();
        let cache = SemanticCache::default();
        let model = model(&ast, &cache);
        let evaluator = model.evaluator();
        assert_eq!(evaluator.evaluate(size_access), constant(Constant::int(3)));
        let EvaluatedNode::EnumVariant(evaluated) = evaluator.evaluate(instance) else {
            panic!("expected an enum variant");
        };
        assert!(evaluated.args.is_some());
        assert!(evaluator.evaluate(instance).is_fully_evaluated());
        assert!(evaluator.evaluate(plain_access).is_fully_evaluated());
        assert!(evaluator.can_be_value_of_constant_parameter(instance));
    }

    #[test]
    fn constant_parameter_values_are_literal_shaped() {
        let mut f = Fixture::new();
        let one = f.b.int(1);
        let negated = f.b.prefix(PrefixOperator::Negation, one);
        let (a, b) = (f.b.string("a"), f.b.int(2));
        let list = f.b.list(vec![a, b]);
        let function = f.b.function("f", vec![], vec![], Purity::Pure);
        f.members(&[function]);
        let reference = f.b.reference(function);
        let unresolved = f.b.add(NodeKind::Reference {
            target: None,
            text: Some("missing".to_string()),
        });
        let (left, right) = (f.b.int(1), f.b.int(2));
        let sum = f.b.infix(InfixOperator::Plus, left, right);

        let ast = f.finish();
        let cache = SemanticCache::default();
        let model = model(&ast, &cache);
        let evaluator = model.evaluator();
        assert!(evaluator.can_be_value_of_constant_parameter(negated));
        assert!(evaluator.can_be_value_of_constant_parameter(list));
        assert!(evaluator.can_be_value_of_constant_parameter(unresolved));
        assert!(!evaluator.can_be_value_of_constant_parameter(reference));
        assert!(!evaluator.can_be_value_of_constant_parameter(sum));
    }
}
