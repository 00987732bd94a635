//! Backward slicing over the statements of a block.

use std::collections::BTreeSet;

use tracing::debug;

use crate::ast::{NodeId, NodeKind};
use crate::purity::ImpurityReason;
use crate::semantics::SemanticModel;

pub struct Slicer<'m> {
    model: &'m SemanticModel<'m>,
}

impl<'m> Slicer<'m> {
    pub fn new(model: &'m SemanticModel<'m>) -> Self {
        Slicer { model }
    }

    /// Subset of `statements`, in their original order, needed to execute
    /// the `targets`.
    ///
    /// Statements are visited back to front. A statement is kept if it is a
    /// target, if it assigns a placeholder read by a kept statement, or if
    /// one of its impurity reasons can affect a reason of a kept statement.
    pub fn compute_backward_slice(&self, statements: &[NodeId], targets: &[NodeId]) -> Vec<NodeId> {
        let mut slice = Slice::default();

        for statement in statements.iter().rev().copied() {
            let keep = targets.contains(&statement)
                || self
                    .assigned_placeholders(statement)
                    .any(|it| slice.placeholders.contains(&it))
                || self.reasons_of(statement).iter().any(|past| {
                    slice
                        .reasons
                        .iter()
                        .any(|future| past.can_affect_future(future))
                });

            if keep {
                self.add(&mut slice, statement);
            }
        }

        slice.statements.reverse();
        debug!(
            statements = statements.len(),
            kept = slice.statements.len(),
            "computed backward slice"
        );
        slice.statements
    }

    fn add(&self, slice: &mut Slice, statement: NodeId) {
        slice.statements.push(statement);
        slice.placeholders.extend(self.referenced_placeholders(statement));
        for reason in self.reasons_of(statement) {
            if !slice.reasons.contains(&reason) {
                slice.reasons.push(reason);
            }
        }
    }

    fn reasons_of(&self, statement: NodeId) -> Vec<ImpurityReason> {
        self.model
            .purity
            .impurity_reasons_of_statement(self.model, statement)
    }

    fn assigned_placeholders(&self, statement: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let ast = self.model.ast;
        ast.assignees(statement)
            .iter()
            .copied()
            .filter(|it| matches!(ast.kind(*it), NodeKind::Placeholder { .. }))
    }

    fn referenced_placeholders(&self, statement: NodeId) -> Vec<NodeId> {
        let ast = self.model.ast;
        ast.descendants(statement)
            .into_iter()
            .filter_map(|it| ast.reference_target(it))
            .filter(|it| matches!(ast.kind(*it), NodeKind::Placeholder { .. }))
            .collect()
    }
}

#[derive(Default)]
struct Slice {
    /// Kept statements, last statement first.
    statements: Vec<NodeId>,
    placeholders: BTreeSet<NodeId>,
    reasons: Vec<ImpurityReason>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{InfixOperator, Purity};
    use crate::purity::PathRef;
    use crate::semantics::SemanticCache;
    use crate::testing::Fixture;

    fn impure(reason: ImpurityReason) -> Purity {
        Purity::Impure { reasons: vec![reason] }
    }

    #[test]
    fn keeps_statements_defining_needed_placeholders() {
        let mut f = Fixture::new();
        let one = f.b.int(1);
        let a = f.b.placeholder("a");
        let define_a = f.b.assignment(vec![a], one);
        let two = f.b.int(2);
        let b = f.b.placeholder("b");
        let define_b = f.b.assignment(vec![b], two);
        let read_a = f.b.reference(a);
        let three = f.b.int(3);
        let sum = f.b.infix(InfixOperator::Plus, read_a, three);
        let c = f.b.placeholder("c");
        let define_c = f.b.assignment(vec![c], sum);
        let ast = f.finish();
        let cache = SemanticCache::default();
        let model = SemanticModel::new(&ast, &cache).expect("core classes");

        let statements = [define_a, define_b, define_c];
        assert_eq!(
            Slicer::new(&model).compute_backward_slice(&statements, &[define_c]),
            vec![define_a, define_c]
        );
        assert_eq!(
            Slicer::new(&model).compute_backward_slice(&statements, &[define_b]),
            vec![define_b]
        );
        assert!(Slicer::new(&model).compute_backward_slice(&statements, &[]).is_empty());
    }

    #[test]
    fn keeps_writes_that_affect_later_reads() {
        let mut f = Fixture::new();
        let write_data = f.b.function(
            "writeData",
            vec![],
            vec![],
            impure(ImpurityReason::FileWrite {
                path: PathRef::Constant("data.csv".to_string()),
            }),
        );
        let write_other = f.b.function(
            "writeOther",
            vec![],
            vec![],
            impure(ImpurityReason::FileWrite {
                path: PathRef::Constant("other.csv".to_string()),
            }),
        );
        let read_data = f.b.function(
            "readData",
            vec![],
            vec![],
            impure(ImpurityReason::FileRead {
                path: PathRef::Constant("data.csv".to_string()),
            }),
        );
        f.members(&[write_data, write_other, read_data]);

        let call = f.b.call_of(write_data, vec![]);
        let first = f.b.expression_statement(call);
        let call = f.b.call_of(write_other, vec![]);
        let second = f.b.expression_statement(call);
        let call = f.b.call_of(read_data, vec![]);
        let target = f.b.expression_statement(call);
        let ast = f.finish();
        let cache = SemanticCache::default();
        let model = SemanticModel::new(&ast, &cache).expect("core classes");

        assert_eq!(
            Slicer::new(&model).compute_backward_slice(&[first, second, target], &[target]),
            vec![first, target]
        );
    }
}
