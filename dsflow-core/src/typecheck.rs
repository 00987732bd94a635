//! Subtype relation between types.
//!
//! `Unknown` is unrelated to everything, itself included. A type
//! parameter whose bound is unresolved or cyclic is unrelated to
//! everything as well.

use std::collections::BTreeSet;

use crate::ast::{NodeKind, Variance};
use crate::evaluation::Constant;
use crate::semantics::SemanticModel;
use crate::types::{
    CallableType, ClassType, EnumType, EnumVariantType, LiteralType, NamedTupleType, StaticType, SubtypeRelation,
    Type, TypeParameterType,
};

/// Relaxations of the subtype check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeCheckOptions {
    /// Compare classes by declaration only.
    pub ignore_type_parameters: bool,
    /// Do not require callable parameters to have matching names.
    pub ignore_parameter_names: bool,
}

pub struct TypeChecker<'m> {
    model: &'m SemanticModel<'m>,
}

impl SubtypeRelation for TypeChecker<'_> {
    fn is_subtype_of(&self, ty: &Type, other: &Type) -> bool {
        self.is_subtype_of_with(ty, other, TypeCheckOptions::default())
    }

    fn nothing(&self, nullable: bool) -> Type {
        self.model.nothing_type(nullable)
    }
}

impl<'m> TypeChecker<'m> {
    pub fn new(model: &'m SemanticModel<'m>) -> Self {
        TypeChecker { model }
    }

    pub fn is_subtype_of(&self, ty: &Type, other: &Type) -> bool {
        self.is_subtype_of_with(ty, other, TypeCheckOptions::default())
    }

    pub fn is_supertype_of(&self, ty: &Type, other: &Type) -> bool {
        self.is_subtype_of(other, ty)
    }

    pub fn is_supertype_of_with(&self, ty: &Type, other: &Type, options: TypeCheckOptions) -> bool {
        self.is_subtype_of_with(other, ty, options)
    }

    pub fn is_subtype_of_with(&self, ty: &Type, other: &Type, options: TypeCheckOptions) -> bool {
        if ty.is_unknown() || other.is_unknown() {
            return false;
        }
        if self.has_invalid_bound(ty) || self.has_invalid_bound(other) {
            return false;
        }
        if *ty == self.model.nothing_type(false) || *other == self.model.any_type(true) {
            return true;
        }

        if let Type::TypeParameter(other_parameter) = other {
            if ty.is_explicitly_nullable() && !other_parameter.nullable {
                return false;
            }
            if let Type::TypeParameter(parameter) = ty
                && self.is_bounded_by(parameter, other_parameter)
            {
                return true;
            }
            // Nothing else fits every possible substitution.
            let nothing = self.model.nothing_type(other_parameter.nullable);
            return self.is_subtype_of_with(ty, &nothing, options);
        }

        if let Type::Union(union) = ty {
            return union
                .members
                .iter()
                .all(|it| self.is_subtype_of_with(it, other, options));
        }
        if let Type::Union(union) = other {
            return union.members.iter().any(|it| self.is_subtype_of_with(ty, it, options));
        }

        match ty {
            Type::Callable(callable) => self.callable_is_subtype_of(callable, other, options),
            Type::Class(class) => self.class_is_subtype_of(class, other, options),
            Type::Enum(enumeration) => self.enum_is_subtype_of(enumeration, other),
            Type::EnumVariant(variant) => self.enum_variant_is_subtype_of(variant, other),
            Type::Literal(literal) => self.literal_is_subtype_of(literal, other, options),
            Type::NamedTuple(tuple) => self.named_tuple_is_subtype_of(tuple, other, options),
            Type::Static(static_type) => self.static_is_subtype_of(static_type, other, options),
            Type::TypeParameter(parameter) => {
                let bound = self.model.types().compute_upper_bound(parameter, false);
                self.is_subtype_of_with(&bound, other, options)
            }
            Type::Union(_) | Type::Unknown => false,
        }
    }

    fn has_invalid_bound(&self, ty: &Type) -> bool {
        match ty {
            Type::TypeParameter(parameter) => self.model.types().compute_upper_bound(parameter, false).is_unknown(),
            _ => false,
        }
    }

    /// Whether the chain of direct type parameter bounds of `ty` reaches `other`.
    fn is_bounded_by(&self, ty: &TypeParameterType, other: &TypeParameterType) -> bool {
        let types = self.model.types();
        let mut visited = BTreeSet::new();
        let mut current = ty.clone();
        loop {
            if current.decl.id == other.decl.id {
                return true;
            }
            if !visited.insert(current.decl.id) {
                return false;
            }
            match types.compute_upper_bound(&current, true) {
                Type::TypeParameter(next) => current = next,
                _ => return false,
            }
        }
    }

    fn is_any(&self, ty: &Type) -> bool {
        matches!(ty, Type::Class(class) if class.decl.id == self.model.core.any)
    }

    fn callable_is_subtype_of(&self, ty: &CallableType, other: &Type, options: TypeCheckOptions) -> bool {
        let other = match other {
            Type::Callable(other) => other,
            other => return self.is_any(other),
        };

        for (index, other_entry) in other.input.entries.iter().enumerate() {
            let Some(entry) = ty.input.entries.get(index) else {
                return false;
            };
            if !options.ignore_parameter_names && entry.name != other_entry.name {
                return false;
            }
            // Callers of `other` may omit an optional parameter.
            if !entry.optional && other_entry.optional {
                return false;
            }
            if !self.is_subtype_of_with(&other_entry.ty, &entry.ty, options) {
                return false;
            }
        }

        let extra_are_optional = ty.input.entries[other.input.len().min(ty.input.len())..]
            .iter()
            .all(|it| it.optional);
        if !extra_are_optional {
            return false;
        }

        other.output.entries.iter().enumerate().all(|(index, other_entry)| {
            ty.output
                .entries
                .get(index)
                .is_some_and(|entry| self.is_subtype_of_with(&entry.ty, &other_entry.ty, options))
        })
    }

    fn class_is_subtype_of(&self, ty: &ClassType, other: &Type, options: TypeCheckOptions) -> bool {
        if ty.nullable && !other.is_explicitly_nullable() {
            return false;
        }
        if ty.decl.id == self.model.core.nothing {
            return true;
        }
        let Type::Class(other) = other else {
            return false;
        };
        if !self
            .model
            .hierarchy
            .is_equal_to_or_subclass_of(self.model, ty.decl.id, other.decl.id)
        {
            return false;
        }

        let ast = self.model.ast;
        let type_parameters = ast.type_parameters(other.decl.id);
        if options.ignore_type_parameters || type_parameters.is_empty() {
            return true;
        }

        let Some(matching) = self
            .model
            .types()
            .compute_matching_supertype(&Type::Class(ty.clone()), other.decl.id)
        else {
            return false;
        };

        type_parameters.iter().all(|parameter| {
            let own = matching.substitutions.get(parameter).unwrap_or(&Type::Unknown);
            let expected = other.substitutions.get(parameter).unwrap_or(&Type::Unknown);
            match ast.variance(*parameter) {
                Variance::Invariant => !own.is_unknown() && own == expected,
                Variance::Covariant => self.is_subtype_of_with(own, expected, options),
                Variance::Contravariant => self.is_subtype_of_with(expected, own, options),
            }
        })
    }

    fn enum_is_subtype_of(&self, ty: &EnumType, other: &Type) -> bool {
        if ty.nullable && !other.is_explicitly_nullable() {
            return false;
        }
        match other {
            Type::Enum(other) => ty.decl == other.decl,
            other => self.is_any(other),
        }
    }

    fn enum_variant_is_subtype_of(&self, ty: &EnumVariantType, other: &Type) -> bool {
        if ty.nullable && !other.is_explicitly_nullable() {
            return false;
        }
        match other {
            Type::Enum(other) => self
                .model
                .ast
                .containing(ty.decl.id, |it| matches!(it, NodeKind::Enum { .. }))
                .is_some_and(|it| it == other.decl.id),
            Type::EnumVariant(other) => ty.decl == other.decl,
            other => self.is_any(other),
        }
    }

    fn literal_is_subtype_of(&self, ty: &LiteralType, other: &Type, options: TypeCheckOptions) -> bool {
        let nullable = ty.constants.contains(&Constant::Null);
        if nullable && !other.is_explicitly_nullable() {
            return false;
        }
        if ty.constants.iter().all(|it| *it == Constant::Null) {
            return true;
        }

        match other {
            Type::Class(_) if self.is_any(other) => true,
            Type::Class(_) => {
                let types = self.model.types();
                ty.constants.iter().all(|constant| {
                    let class_type = types.compute_class_type_for_constant(constant);
                    self.is_subtype_of_with(&class_type, other, options)
                })
            }
            Type::Literal(other) => ty.constants.iter().all(|it| other.constants.contains(it)),
            _ => false,
        }
    }

    fn named_tuple_is_subtype_of(&self, ty: &NamedTupleType, other: &Type, options: TypeCheckOptions) -> bool {
        match other {
            Type::NamedTuple(other) => {
                ty.len() == other.len()
                    && ty.entries.iter().zip(&other.entries).all(|(entry, other_entry)| {
                        entry.name == other_entry.name && self.is_subtype_of_with(&entry.ty, &other_entry.ty, options)
                    })
            }
            other => self.is_any(other),
        }
    }

    fn static_is_subtype_of(&self, ty: &StaticType, other: &Type, options: TypeCheckOptions) -> bool {
        match other {
            Type::Callable(_) => {
                let callable = self.model.types().compute_callable_type_for_static_type(ty);
                self.is_subtype_of_with(&callable, other, options)
            }
            Type::Class(_) => self.is_any(other),
            Type::Static(other) => ty == other,
            _ => false,
        }
    }

    // -----------------------------------------------------------------
    // Capabilities
    // -----------------------------------------------------------------

    pub fn can_be_accessed_by_index(&self, ty: &Type) -> bool {
        self.is_list(ty) || self.is_map(ty)
    }

    /// Whether a value of the type may be the receiver of a call.
    pub fn can_be_called(&self, ty: &Type) -> bool {
        let ast = self.model.ast;
        match self.model.types().compute_non_nullable_type(ty) {
            Type::Callable(_) => true,
            Type::Static(StaticType { instance }) => match instance.declaration().map(|it| ast.kind(it)) {
                Some(NodeKind::Class { parameters, .. }) => parameters.is_some(),
                Some(kind) => kind.is_callable(),
                None => false,
            },
            _ => false,
        }
    }

    pub fn can_be_null(&self, ty: &Type) -> bool {
        match ty {
            Type::TypeParameter(parameter) => {
                parameter.nullable
                    || self
                        .model
                        .types()
                        .compute_upper_bound(parameter, false)
                        .is_explicitly_nullable()
            }
            other => other.is_explicitly_nullable(),
        }
    }

    pub fn can_be_type_of_constant_parameter(&self, ty: &Type) -> bool {
        let core = &self.model.core;
        match ty {
            Type::Class(class) => [
                core.boolean,
                core.float,
                core.int,
                core.list,
                core.map,
                core.nothing,
                core.string,
            ]
            .contains(&class.decl.id),
            Type::Enum(_) | Type::EnumVariant(_) | Type::Literal(_) | Type::Unknown => true,
            _ => false,
        }
    }

    pub fn is_list(&self, ty: &Type) -> bool {
        let list = self.model.list_type(Type::Unknown).with_explicit_nullability(true);
        !self.is_nothing(ty) && self.is_subtype_of_with(ty, &list, Self::by_declaration())
    }

    pub fn is_map(&self, ty: &Type) -> bool {
        let map = self
            .model
            .map_type(Type::Unknown, Type::Unknown)
            .with_explicit_nullability(true);
        !self.is_nothing(ty) && self.is_subtype_of_with(ty, &map, Self::by_declaration())
    }

    fn is_nothing(&self, ty: &Type) -> bool {
        *ty == self.model.nothing_type(false) || *ty == self.model.nothing_type(true)
    }

    fn by_declaration() -> TypeCheckOptions {
        TypeCheckOptions {
            ignore_type_parameters: true,
            ..TypeCheckOptions::default()
        }
    }
}
