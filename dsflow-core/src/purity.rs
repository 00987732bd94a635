//! Impurity reasons and the purity oracle.
//!
//! A function declares its impurity reasons; segments and lambdas
//! inherit the reasons of the calls they execute. File reads are the only
//! reasons that are not side effects.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::ast::{Ast, NodeId, NodeKind, Purity};
use crate::semantics::SemanticModel;
use crate::types::Type;

/// Path of a file touched by a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathRef {
    Constant(String),
    /// The path is passed in the given parameter.
    Parameter(NodeId),
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ImpurityReason {
    FileRead {
        path: PathRef,
    },
    FileWrite {
        path: PathRef,
    },
    PotentiallyImpureParameterCall {
        #[serde(default)]
        parameter: Option<NodeId>,
    },
    UnknownCallableCall,
    EndlessRecursion,
    Other,
}

impl ImpurityReason {
    pub fn is_side_effect(&self) -> bool {
        !matches!(self, ImpurityReason::FileRead { .. })
    }

    /// Parameter the reason refers to, if any.
    pub fn parameter(&self) -> Option<NodeId> {
        match self {
            ImpurityReason::FileRead {
                path: PathRef::Parameter(parameter),
            }
            | ImpurityReason::FileWrite {
                path: PathRef::Parameter(parameter),
            } => Some(*parameter),
            ImpurityReason::PotentiallyImpureParameterCall { parameter } => *parameter,
            _ => None,
        }
    }

    /// Whether executing `self` first can change the outcome of `future`.
    pub fn can_affect_future(&self, future: &ImpurityReason) -> bool {
        match self {
            ImpurityReason::FileRead { .. } | ImpurityReason::EndlessRecursion => false,
            ImpurityReason::FileWrite { path } => {
                if let (
                    PathRef::Constant(own),
                    ImpurityReason::FileRead {
                        path: PathRef::Constant(other),
                    }
                    | ImpurityReason::FileWrite {
                        path: PathRef::Constant(other),
                    },
                ) = (path, future)
                {
                    return own == other;
                }
                *future != ImpurityReason::EndlessRecursion
            }
            ImpurityReason::PotentiallyImpureParameterCall { .. }
            | ImpurityReason::UnknownCallableCall
            | ImpurityReason::Other => *future != ImpurityReason::EndlessRecursion,
        }
    }
}

impl fmt::Display for PathRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathRef::Constant(path) => write!(f, "\"{path}\""),
            PathRef::Parameter(parameter) => write!(f, "parameter {}", parameter.0),
            PathRef::Unknown => f.write_str("?"),
        }
    }
}

impl fmt::Display for ImpurityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImpurityReason::FileRead { path } => write!(f, "file read from {path}"),
            ImpurityReason::FileWrite { path } => write!(f, "file write to {path}"),
            ImpurityReason::PotentiallyImpureParameterCall {
                parameter: Some(parameter),
            } => write!(f, "potentially impure call of parameter {}", parameter.0),
            ImpurityReason::PotentiallyImpureParameterCall { parameter: None } => {
                f.write_str("potentially impure call of ?")
            }
            ImpurityReason::UnknownCallableCall => f.write_str("unknown callable call"),
            ImpurityReason::EndlessRecursion => f.write_str("endless recursion"),
            ImpurityReason::Other => f.write_str("other"),
        }
    }
}

// ---------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------

/// Answers which impurity reasons evaluating a node has.
///
/// Lambdas are both callables and expressions: as a callable their body
/// runs, as an expression only the closure is created.
pub trait PurityOracle {
    fn impurity_reasons_of_callable(&self, model: &SemanticModel<'_>, callable: NodeId) -> Vec<ImpurityReason>;

    fn impurity_reasons_of_expression(&self, model: &SemanticModel<'_>, expression: NodeId) -> Vec<ImpurityReason>;

    fn impurity_reasons_of_statement(&self, model: &SemanticModel<'_>, statement: NodeId) -> Vec<ImpurityReason> {
        match model.ast.kind(statement) {
            NodeKind::Assignment { expression, .. }
            | NodeKind::ExpressionStatement { expression }
            | NodeKind::OutputStatement { expression } => self.impurity_reasons_of_expression(model, *expression),
            _ => Vec::new(),
        }
    }

    fn expression_has_side_effects(&self, model: &SemanticModel<'_>, expression: NodeId) -> bool {
        self.impurity_reasons_of_expression(model, expression)
            .iter()
            .any(ImpurityReason::is_side_effect)
    }

    fn callable_has_no_side_effects(&self, model: &SemanticModel<'_>, callable: NodeId) -> bool {
        !self
            .impurity_reasons_of_callable(model, callable)
            .iter()
            .any(ImpurityReason::is_side_effect)
    }
}

/// Oracle reading declared purity from functions and walking the bodies
/// of segments and lambdas.
#[derive(Debug, Clone, Copy, Default)]
pub struct AstPurityOracle;

impl PurityOracle for AstPurityOracle {
    fn impurity_reasons_of_callable(&self, model: &SemanticModel<'_>, callable: NodeId) -> Vec<ImpurityReason> {
        let mut walker = Walker::new(model);
        walker.callable(callable);
        walker.reasons
    }

    fn impurity_reasons_of_expression(&self, model: &SemanticModel<'_>, expression: NodeId) -> Vec<ImpurityReason> {
        let mut walker = Walker::new(model);
        for call in executed_calls(model.ast, expression) {
            walker.call(call);
        }
        walker.reasons
    }
}

/// Calls at or below `root` that run when `root` is evaluated. Calls
/// inside lambdas only run when the lambda is called.
pub fn executed_calls(ast: &Ast, root: NodeId) -> Vec<NodeId> {
    let mut calls = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        let kind = ast.kind(node);
        if kind.is_lambda() {
            continue;
        }
        if matches!(kind, NodeKind::Call { .. }) {
            calls.push(node);
        }
        stack.extend(ast.children(node).into_iter().rev());
    }
    calls
}

struct Walker<'m, 'a> {
    model: &'m SemanticModel<'a>,
    /// Callables whose bodies are being walked.
    active: Vec<NodeId>,
    reasons: Vec<ImpurityReason>,
}

impl<'m, 'a> Walker<'m, 'a> {
    fn new(model: &'m SemanticModel<'a>) -> Self {
        Walker {
            model,
            active: Vec::new(),
            reasons: Vec::new(),
        }
    }

    fn push(&mut self, reason: ImpurityReason) {
        if !self.reasons.contains(&reason) {
            self.reasons.push(reason);
        }
    }

    fn callable(&mut self, callable: NodeId) {
        match self.model.ast.kind(callable) {
            NodeKind::Function { purity, .. } => match purity {
                Purity::Pure => {}
                Purity::Impure { reasons } => {
                    for reason in reasons {
                        self.push(reason.clone());
                    }
                }
                Purity::Unspecified => self.push(ImpurityReason::Other),
            },
            NodeKind::Segment { body, .. }
            | NodeKind::BlockLambda { body, .. }
            | NodeKind::ExpressionLambda { result: body, .. } => self.body(callable, *body),
            NodeKind::Parameter { .. } => self.push(ImpurityReason::PotentiallyImpureParameterCall {
                parameter: Some(callable),
            }),
            _ => {}
        }
    }

    fn body(&mut self, callable: NodeId, body: NodeId) {
        if self.active.contains(&callable) {
            trace!(callable = callable.0, "recursive call");
            self.push(ImpurityReason::EndlessRecursion);
            return;
        }
        self.active.push(callable);
        for call in executed_calls(self.model.ast, body) {
            self.call(call);
        }
        self.active.pop();
    }

    fn call(&mut self, call: NodeId) {
        let NodeKind::Call {
            receiver,
            arguments,
            ..
        } = self.model.ast.kind(call)
        else {
            return;
        };

        let Some(target) = self.call_target(*receiver) else {
            self.push(ImpurityReason::UnknownCallableCall);
            return;
        };
        self.callable(target);

        // Callables passed to a function may get called by it.
        if matches!(self.model.ast.kind(target), NodeKind::Function { .. }) {
            for argument in arguments {
                let value = match self.model.ast.kind(*argument) {
                    NodeKind::Argument { value, .. } => *value,
                    _ => *argument,
                };
                if let Some(passed) = passed_callable(self.model.ast, value) {
                    self.callable(passed);
                }
            }
        }
    }

    /// Declaration that runs when `receiver` is called. Parameters stand
    /// for the callable passed to them.
    fn call_target(&self, receiver: NodeId) -> Option<NodeId> {
        let ty = self.model.types().compute_non_nullable_type(&self.model.types().compute_type(receiver));
        match ty {
            Type::Callable(callable) => match callable.parameter {
                Some(parameter) => Some(parameter),
                None if matches!(self.model.ast.kind(callable.callable), NodeKind::CallableType { .. }) => None,
                None => Some(callable.callable),
            },
            Type::Static(static_type) => static_type
                .instance
                .declaration()
                .filter(|it| self.model.ast.kind(*it).is_callable()),
            _ => None,
        }
    }
}

fn passed_callable(ast: &Ast, value: NodeId) -> Option<NodeId> {
    match ast.kind(value) {
        kind if kind.is_lambda() => Some(value),
        NodeKind::Reference { target: Some(target), .. } => {
            matches!(ast.kind(*target), NodeKind::Segment { .. } | NodeKind::Function { .. }).then_some(*target)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::InfixOperator;
    use crate::semantics::SemanticCache;
    use crate::testing::Fixture;

    fn reads(path: &str) -> Purity {
        Purity::Impure {
            reasons: vec![ImpurityReason::FileRead {
                path: PathRef::Constant(path.to_string()),
            }],
        }
    }

    #[test]
    fn writes_only_affect_the_same_known_file() {
        let write_a = ImpurityReason::FileWrite {
            path: PathRef::Constant("a.txt".to_string()),
        };
        let read_a = ImpurityReason::FileRead {
            path: PathRef::Constant("a.txt".to_string()),
        };
        let read_b = ImpurityReason::FileRead {
            path: PathRef::Constant("b.txt".to_string()),
        };
        let read_unknown = ImpurityReason::FileRead { path: PathRef::Unknown };

        assert!(write_a.can_affect_future(&read_a));
        assert!(!write_a.can_affect_future(&read_b));
        assert!(write_a.can_affect_future(&read_unknown));
        assert!(!write_a.can_affect_future(&ImpurityReason::EndlessRecursion));
        assert!(!read_a.can_affect_future(&write_a));
        assert!(ImpurityReason::Other.can_affect_future(&read_b));
        assert!(!ImpurityReason::EndlessRecursion.can_affect_future(&ImpurityReason::Other));
    }

    #[test]
    fn only_reads_are_free_of_side_effects() {
        assert!(!ImpurityReason::FileRead { path: PathRef::Unknown }.is_side_effect());
        assert!(ImpurityReason::FileWrite { path: PathRef::Unknown }.is_side_effect());
        assert!(ImpurityReason::UnknownCallableCall.is_side_effect());
    }

    #[test]
    fn reasons_round_trip_through_json() {
        let reason = ImpurityReason::FileRead {
            path: PathRef::Parameter(NodeId(3)),
        };
        let json = serde_json::to_string(&reason).expect("serializes");
        assert_eq!(json, r#"{"reason":"file_read","path":{"parameter":3}}"#);
        let restored: ImpurityReason = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(restored, reason);
        assert_eq!(restored.parameter(), Some(NodeId(3)));
    }

    #[test]
    fn expressions_collect_reasons_of_called_functions() {
        let mut f = Fixture::new();
        let read = f.b.function("read", vec![], vec![], reads("a.csv"));
        let pure = f.b.function("pure", vec![], vec![], Purity::Pure);
        let undeclared = f.b.function("undeclared", vec![], vec![], Purity::Unspecified);
        f.members(&[read, pure, undeclared]);
        let read_call = f.b.call_of(read, vec![]);
        let pure_call = f.b.call_of(pure, vec![]);
        let undeclared_call = f.b.call_of(undeclared, vec![]);
        let both = f.b.infix(InfixOperator::Plus, read_call, pure_call);
        let ast = f.finish();
        let cache = SemanticCache::default();
        let model = SemanticModel::new(&ast, &cache).expect("core classes");
        let oracle = AstPurityOracle;

        assert_eq!(
            oracle.impurity_reasons_of_expression(&model, both),
            vec![ImpurityReason::FileRead {
                path: PathRef::Constant("a.csv".to_string())
            }]
        );
        assert!(!oracle.expression_has_side_effects(&model, both));
        assert_eq!(
            oracle.impurity_reasons_of_expression(&model, undeclared_call),
            vec![ImpurityReason::Other]
        );
        assert!(oracle.expression_has_side_effects(&model, undeclared_call));
    }

    #[test]
    fn lambdas_are_not_executed_by_their_creation() {
        let mut f = Fixture::new();
        let write = f.b.function(
            "write",
            vec![],
            vec![],
            Purity::Impure {
                reasons: vec![ImpurityReason::FileWrite { path: PathRef::Unknown }],
            },
        );
        f.members(&[write]);
        let call = f.b.call_of(write, vec![]);
        let lambda = f.b.add(NodeKind::ExpressionLambda {
            parameters: vec![],
            result: call,
        });
        let ast = f.finish();
        let cache = SemanticCache::default();
        let model = SemanticModel::new(&ast, &cache).expect("core classes");
        let oracle = AstPurityOracle;

        assert!(oracle.impurity_reasons_of_expression(&model, lambda).is_empty());
        assert_eq!(
            oracle.impurity_reasons_of_callable(&model, lambda),
            vec![ImpurityReason::FileWrite { path: PathRef::Unknown }]
        );
    }

    #[test]
    fn recursive_segments_report_endless_recursion() {
        let mut f = Fixture::new();
        let segment = f.b.reserve();
        let recursive_call = f.b.call_of(segment, vec![]);
        let statement = f.b.expression_statement(recursive_call);
        let body = f.b.block(vec![statement]);
        f.b.fill(
            segment,
            NodeKind::Segment {
                name: "s".to_string(),
                python_name: None,
                parameters: vec![],
                results: vec![],
                body,
            },
        );
        f.members(&[segment]);
        let ast = f.finish();
        let cache = SemanticCache::default();
        let model = SemanticModel::new(&ast, &cache).expect("core classes");

        assert_eq!(
            AstPurityOracle.impurity_reasons_of_callable(&model, segment),
            vec![ImpurityReason::EndlessRecursion]
        );
    }

    #[test]
    fn calling_a_parameter_is_potentially_impure() {
        let mut f = Fixture::new();
        let callable_type = f.b.add(NodeKind::CallableType {
            parameters: vec![],
            results: vec![],
        });
        let parameter = f.b.parameter("callback", Some(callable_type));
        let call = f.b.call_of(parameter, vec![]);
        let statement = f.b.expression_statement(call);
        let body = f.b.block(vec![statement]);
        let segment = f.b.segment("s", vec![parameter], vec![], body);
        f.members(&[segment]);
        let ast = f.finish();
        let cache = SemanticCache::default();
        let model = SemanticModel::new(&ast, &cache).expect("core classes");

        assert_eq!(
            AstPurityOracle.impurity_reasons_of_statement(&model, statement),
            vec![ImpurityReason::PotentiallyImpureParameterCall {
                parameter: Some(parameter)
            }]
        );
    }
}
