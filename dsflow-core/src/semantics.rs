//! Shared context of the semantic services.
//!
//! [`SemanticModel`] bundles the syntax tree, the core classes, the
//! per-document cache and the collaborator services. The type computer,
//! type checker and partial evaluator are thin views over it, so they can
//! call each other without owning each other.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use crate::ast::{Ast, NodeId, NodeKind};
use crate::builtins::CoreClasses;
use crate::error::CoreError;
use crate::evaluation::EvaluatedNode;
use crate::partial_eval::PartialEvaluator;
use crate::purity::{AstPurityOracle, PurityOracle};
use crate::type_computer::TypeComputer;
use crate::typecheck::TypeChecker;
use crate::types::{DeclRef, Type, TypeSubstitutions};

// ---------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------

/// Computed types and evaluations of one document generation.
///
/// Entries are only ever added. Drop the cache when the tree changes.
#[derive(Debug, Default)]
pub struct SemanticCache {
    types: RefCell<HashMap<NodeId, Type>>,
    evaluations: RefCell<HashMap<NodeId, EvaluatedNode>>,
}

impl SemanticCache {
    pub fn cached_type(&self, node: NodeId) -> Option<Type> {
        self.types.borrow().get(&node).cloned()
    }

    pub fn store_type(&self, node: NodeId, ty: Type) {
        self.types.borrow_mut().entry(node).or_insert(ty);
    }

    pub fn cached_evaluation(&self, node: NodeId) -> Option<EvaluatedNode> {
        self.evaluations.borrow().get(&node).cloned()
    }

    pub fn store_evaluation(&self, node: NodeId, value: EvaluatedNode) {
        self.evaluations.borrow_mut().entry(node).or_insert(value);
    }

    pub fn len(&self) -> usize {
        self.types.borrow().len() + self.evaluations.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------
// Collaborator services
// ---------------------------------------------------------------------

/// Superclass queries over class declarations.
pub trait ClassHierarchy {
    /// Type nodes listed as parents of the class.
    fn parent_types(&self, model: &SemanticModel<'_>, class: NodeId) -> Vec<NodeId>;

    /// The first parent type that names a class.
    fn parent_class(&self, model: &SemanticModel<'_>, class: NodeId) -> Option<NodeId> {
        self.parent_types(model, class).into_iter().find_map(|it| match model.ast.kind(it) {
            NodeKind::NamedType {
                declaration: Some(declaration),
                ..
            } if matches!(model.ast.kind(*declaration), NodeKind::Class { .. }) => Some(*declaration),
            _ => None,
        })
    }

    /// Proper superclasses, nearest first, ending with `Any`. Stops at
    /// the first class seen twice.
    fn stream_superclasses(&self, model: &SemanticModel<'_>, class: NodeId) -> Vec<NodeId> {
        let mut visited = vec![class];
        let mut result = Vec::new();
        let mut current = self.parent_class(model, class);
        while let Some(next) = current {
            if visited.contains(&next) {
                break;
            }
            visited.push(next);
            result.push(next);
            current = self.parent_class(model, next);
        }

        let any = model.core.any;
        if !visited.contains(&any) {
            result.push(any);
        }
        result
    }

    fn is_equal_to_or_subclass_of(&self, model: &SemanticModel<'_>, class: NodeId, other: NodeId) -> bool {
        class == model.core.nothing || class == other || self.stream_superclasses(model, class).contains(&other)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AstClassHierarchy;

impl ClassHierarchy for AstClassHierarchy {
    fn parent_types(&self, model: &SemanticModel<'_>, class: NodeId) -> Vec<NodeId> {
        match model.ast.kind(class) {
            NodeKind::Class { parent_types, .. } => parent_types.clone(),
            _ => Vec::new(),
        }
    }
}

/// Maps between call sites and declarations.
pub trait NodeMapper {
    fn call_to_callable(&self, model: &SemanticModel<'_>, call: NodeId) -> Option<NodeId>;

    fn argument_to_parameter(&self, model: &SemanticModel<'_>, argument: NodeId) -> Option<NodeId>;

    fn type_argument_to_type_parameter(&self, model: &SemanticModel<'_>, type_argument: NodeId) -> Option<NodeId>;

    /// Argument passed for each parameter. The first argument mapped to a
    /// parameter wins.
    fn parameters_to_arguments(
        &self,
        model: &SemanticModel<'_>,
        parameters: &[NodeId],
        arguments: &[NodeId],
    ) -> BTreeMap<NodeId, NodeId> {
        let mut result = BTreeMap::new();
        for argument in arguments {
            if let Some(parameter) = self.argument_to_parameter(model, *argument)
                && parameters.contains(&parameter)
            {
                result.entry(parameter).or_insert(*argument);
            }
        }
        result
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AstNodeMapper;

impl NodeMapper for AstNodeMapper {
    fn call_to_callable(&self, model: &SemanticModel<'_>, call: NodeId) -> Option<NodeId> {
        let NodeKind::Call { receiver, .. } = model.ast.kind(call) else {
            return None;
        };
        let types = model.types();
        match types.compute_non_nullable_type(&types.compute_type(*receiver)) {
            Type::Callable(callable) => Some(callable.callable),
            Type::Static(static_type) => static_type.instance.declaration().filter(|it| {
                matches!(
                    model.ast.kind(*it),
                    NodeKind::Class { .. } | NodeKind::EnumVariant { .. } | NodeKind::Function { .. }
                )
            }),
            _ => None,
        }
    }

    fn argument_to_parameter(&self, model: &SemanticModel<'_>, argument: NodeId) -> Option<NodeId> {
        let NodeKind::Argument { parameter, .. } = model.ast.kind(argument) else {
            return None;
        };
        if parameter.is_some() {
            return *parameter;
        }

        let call = model.ast.parent(argument)?;
        let arguments = model.ast.arguments(call);
        let index = model.ast.container_index(argument);
        let follows_named_argument = arguments[..index.min(arguments.len())]
            .iter()
            .any(|it| matches!(model.ast.kind(*it), NodeKind::Argument { parameter: Some(_), .. }));
        if follows_named_argument {
            return None;
        }

        let callable = self.call_to_callable(model, call)?;
        model.ast.parameters(callable).get(index).copied()
    }

    fn type_argument_to_type_parameter(&self, model: &SemanticModel<'_>, type_argument: NodeId) -> Option<NodeId> {
        let NodeKind::TypeArgument { type_parameter, .. } = model.ast.kind(type_argument) else {
            return None;
        };
        if type_parameter.is_some() {
            return *type_parameter;
        }

        let named_type = model.ast.parent(type_argument)?;
        let NodeKind::NamedType {
            declaration: Some(declaration),
            ..
        } = model.ast.kind(named_type)
        else {
            return None;
        };
        model
            .ast
            .type_parameters(*declaration)
            .get(model.ast.container_index(type_argument))
            .copied()
    }
}

// ---------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------

pub struct SemanticModel<'a> {
    pub ast: &'a Ast,
    pub core: CoreClasses,
    pub cache: &'a SemanticCache,
    pub hierarchy: &'a dyn ClassHierarchy,
    pub mapper: &'a dyn NodeMapper,
    pub purity: &'a dyn PurityOracle,
}

impl<'a> SemanticModel<'a> {
    /// Model with the AST-backed services. Fails if the tree lacks the
    /// core classes.
    pub fn new(ast: &'a Ast, cache: &'a SemanticCache) -> Result<Self, CoreError> {
        Ok(SemanticModel {
            ast,
            core: CoreClasses::locate(ast)?,
            cache,
            hierarchy: &AstClassHierarchy,
            mapper: &AstNodeMapper,
            purity: &AstPurityOracle,
        })
    }

    pub fn with_hierarchy(mut self, hierarchy: &'a dyn ClassHierarchy) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    pub fn with_mapper(mut self, mapper: &'a dyn NodeMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_purity(mut self, purity: &'a dyn PurityOracle) -> Self {
        self.purity = purity;
        self
    }

    pub fn types(&self) -> TypeComputer<'_> {
        TypeComputer::new(self)
    }

    pub fn checker(&self) -> TypeChecker<'_> {
        TypeChecker::new(self)
    }

    pub fn evaluator(&self) -> PartialEvaluator<'_> {
        PartialEvaluator::new(self)
    }

    // Core types

    pub fn decl_ref(&self, declaration: NodeId) -> DeclRef {
        DeclRef::new(declaration, self.ast.name_or_empty(declaration))
    }

    pub fn class_type(&self, declaration: NodeId, substitutions: TypeSubstitutions, nullable: bool) -> Type {
        Type::class(self.decl_ref(declaration), substitutions, nullable)
    }

    pub fn any_type(&self, nullable: bool) -> Type {
        self.class_type(self.core.any, TypeSubstitutions::new(), nullable)
    }

    pub fn nothing_type(&self, nullable: bool) -> Type {
        self.class_type(self.core.nothing, TypeSubstitutions::new(), nullable)
    }

    pub fn boolean_type(&self) -> Type {
        self.class_type(self.core.boolean, TypeSubstitutions::new(), false)
    }

    pub fn number_type(&self) -> Type {
        self.class_type(self.core.number, TypeSubstitutions::new(), false)
    }

    pub fn int_type(&self) -> Type {
        self.class_type(self.core.int, TypeSubstitutions::new(), false)
    }

    pub fn float_type(&self) -> Type {
        self.class_type(self.core.float, TypeSubstitutions::new(), false)
    }

    pub fn string_type(&self) -> Type {
        self.class_type(self.core.string, TypeSubstitutions::new(), false)
    }

    pub fn list_type(&self, element: Type) -> Type {
        let substitutions = self
            .ast
            .type_parameters(self.core.list)
            .first()
            .map(|it| (*it, element))
            .into_iter()
            .collect();
        self.class_type(self.core.list, substitutions, false)
    }

    pub fn map_type(&self, key: Type, value: Type) -> Type {
        let substitutions = self
            .ast
            .type_parameters(self.core.map)
            .iter()
            .copied()
            .zip([key, value])
            .collect();
        self.class_type(self.core.map, substitutions, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[test]
    fn superclasses_end_with_any() {
        let mut f = Fixture::new();
        let top = f.b.class("Top", None, vec![]);
        let top_type = f.b.named_type(top, false);
        let bottom = f.b.class("Bottom", None, vec![top_type]);
        f.members(&[top, bottom]);
        let ast = f.finish();
        let cache = SemanticCache::default();
        let model = SemanticModel::new(&ast, &cache).expect("core classes");

        let hierarchy = AstClassHierarchy;
        assert_eq!(hierarchy.stream_superclasses(&model, bottom), vec![top, model.core.any]);
        assert!(hierarchy.is_equal_to_or_subclass_of(&model, bottom, top));
        assert!(!hierarchy.is_equal_to_or_subclass_of(&model, top, bottom));
        assert!(hierarchy.is_equal_to_or_subclass_of(&model, model.core.nothing, bottom));
        assert_eq!(hierarchy.stream_superclasses(&model, model.core.any), Vec::<NodeId>::new());
    }

    #[test]
    fn cyclic_hierarchies_terminate() {
        let mut f = Fixture::new();
        let a = f.b.reserve();
        let b_type = f.b.reserve();
        let a_type = f.b.named_type(a, false);
        let b = f.b.class("B", None, vec![a_type]);
        f.b.fill(
            b_type,
            NodeKind::NamedType {
                declaration: Some(b),
                type_arguments: vec![],
                nullable: false,
            },
        );
        f.b.fill(
            a,
            NodeKind::Class {
                name: "A".to_string(),
                python_name: None,
                type_parameters: vec![],
                parameters: None,
                parent_types: vec![b_type],
                members: vec![],
            },
        );
        f.members(&[a, b]);
        let ast = f.finish();
        let cache = SemanticCache::default();
        let model = SemanticModel::new(&ast, &cache).expect("core classes");

        assert_eq!(AstClassHierarchy.stream_superclasses(&model, a), vec![b, model.core.any]);
    }

    #[test]
    fn positional_arguments_after_named_ones_map_to_nothing() {
        let mut f = Fixture::new();
        let p1 = f.b.parameter("p1", None);
        let p2 = f.b.parameter("p2", None);
        let function = f.b.function("f", vec![p1, p2], vec![], crate::ast::Purity::Pure);
        f.members(&[function]);
        let one = f.b.int(1);
        let two = f.b.int(2);
        let named = f.b.named_argument(p2, one);
        let positional = f.b.argument(two);
        let receiver = f.b.reference(function);
        let call = f.b.call(receiver, vec![named, positional]);
        let ast = f.finish();
        let cache = SemanticCache::default();
        let model = SemanticModel::new(&ast, &cache).expect("core classes");

        let mapper = AstNodeMapper;
        assert_eq!(mapper.call_to_callable(&model, call), Some(function));
        assert_eq!(mapper.argument_to_parameter(&model, named), Some(p2));
        assert_eq!(mapper.argument_to_parameter(&model, positional), None);
        let mapping = mapper.parameters_to_arguments(&model, &[p1, p2], &[named, positional]);
        assert_eq!(mapping.get(&p2), Some(&named));
        assert_eq!(mapping.get(&p1), None);
    }

    #[test]
    fn type_arguments_map_by_position() {
        let mut f = Fixture::new();
        let int = f.b.named_type(f.core.int, false);
        let string = f.b.named_type(f.core.string, false);
        let map = f.b.generic_type(f.core.map, vec![int, string], false);
        let ast = f.finish();
        let cache = SemanticCache::default();
        let model = SemanticModel::new(&ast, &cache).expect("core classes");

        let NodeKind::NamedType { type_arguments, .. } = ast.kind(map) else {
            panic!("expected a named type");
        };
        let parameters = ast.type_parameters(model.core.map);
        assert_eq!(
            AstNodeMapper.type_argument_to_type_parameter(&model, type_arguments[1]),
            Some(parameters[1])
        );
    }

    #[test]
    fn cache_keeps_first_entry() {
        let cache = SemanticCache::default();
        assert!(cache.is_empty());
        cache.store_type(NodeId(1), Type::Unknown);
        cache.store_type(NodeId(1), Type::union(vec![]));
        assert_eq!(cache.cached_type(NodeId(1)), Some(Type::Unknown));
        assert_eq!(cache.len(), 1);
    }
}
