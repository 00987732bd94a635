//! Core classes of the language.
//!
//! The core classes are ordinary declarations inside the module
//! [`BUILTIN_PACKAGE`]. Serialized trees carry that module like any
//! other; [`install`] adds it to a tree under construction and
//! [`CoreClasses::locate`] finds it again in a loaded tree.

use crate::ast::{Ast, AstBuilder, NodeId, NodeKind, Variance};
use crate::error::CoreError;

pub const BUILTIN_PACKAGE: &str = "safeds.lang";

/// Metadata about a single core class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreClassDescriptor {
    pub name: &'static str,
    pub parent: Option<&'static str>,
    pub type_parameters: &'static [(&'static str, Variance)],
}

/// The complete list of core classes, parents before children.
pub const CORE_CLASSES: &[CoreClassDescriptor] = &[
    CoreClassDescriptor {
        name: "Any",
        parent: None,
        type_parameters: &[],
    },
    CoreClassDescriptor {
        name: "Nothing",
        parent: None,
        type_parameters: &[],
    },
    CoreClassDescriptor {
        name: "Boolean",
        parent: None,
        type_parameters: &[],
    },
    CoreClassDescriptor {
        name: "Number",
        parent: Some("Any"),
        type_parameters: &[],
    },
    CoreClassDescriptor {
        name: "Int",
        parent: Some("Number"),
        type_parameters: &[],
    },
    CoreClassDescriptor {
        name: "Float",
        parent: Some("Number"),
        type_parameters: &[],
    },
    CoreClassDescriptor {
        name: "String",
        parent: None,
        type_parameters: &[],
    },
    CoreClassDescriptor {
        name: "List",
        parent: None,
        type_parameters: &[("E", Variance::Covariant)],
    },
    CoreClassDescriptor {
        name: "Map",
        parent: None,
        type_parameters: &[("K", Variance::Invariant), ("V", Variance::Covariant)],
    },
];

/// Look up a core class descriptor by name.
pub fn find_core_class(name: &str) -> Option<&'static CoreClassDescriptor> {
    CORE_CLASSES.iter().find(|it| it.name == name)
}

/// Declarations of the core classes inside one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreClasses {
    pub any: NodeId,
    pub nothing: NodeId,
    pub boolean: NodeId,
    pub number: NodeId,
    pub int: NodeId,
    pub float: NodeId,
    pub string: NodeId,
    pub list: NodeId,
    pub map: NodeId,
}

impl CoreClasses {
    pub fn locate(ast: &Ast) -> Result<Self, CoreError> {
        let module = ast
            .modules()
            .find(|it| ast.name(*it) == Some(BUILTIN_PACKAGE))
            .ok_or_else(|| CoreError::MissingCoreDeclaration(BUILTIN_PACKAGE.to_string()))?;
        let NodeKind::Module { members, .. } = ast.kind(module) else {
            return Err(CoreError::MissingCoreDeclaration(BUILTIN_PACKAGE.to_string()));
        };

        let find = |name: &str| {
            members
                .iter()
                .copied()
                .find(|it| matches!(ast.kind(*it), NodeKind::Class { .. }) && ast.name(*it) == Some(name))
                .ok_or_else(|| CoreError::MissingCoreDeclaration(format!("{BUILTIN_PACKAGE}.{name}")))
        };

        Ok(CoreClasses {
            any: find("Any")?,
            nothing: find("Nothing")?,
            boolean: find("Boolean")?,
            number: find("Number")?,
            int: find("Int")?,
            float: find("Float")?,
            string: find("String")?,
            list: find("List")?,
            map: find("Map")?,
        })
    }
}

/// Adds the builtin module with every entry of [`CORE_CLASSES`].
pub fn install(builder: &mut AstBuilder) -> Result<CoreClasses, CoreError> {
    let mut installed: Vec<(&'static str, NodeId)> = Vec::new();

    for descriptor in CORE_CLASSES {
        let type_parameters = descriptor
            .type_parameters
            .iter()
            .map(|(name, variance)| builder.type_parameter(name, *variance, None))
            .collect();

        let parent_types = match descriptor.parent {
            Some(parent) => {
                let declaration = installed
                    .iter()
                    .find(|(name, _)| *name == parent)
                    .map(|(_, id)| *id)
                    .ok_or_else(|| CoreError::MissingCoreDeclaration(format!("{BUILTIN_PACKAGE}.{parent}")))?;
                vec![builder.named_type(declaration, false)]
            }
            None => Vec::new(),
        };

        let class = builder.add(NodeKind::Class {
            name: descriptor.name.to_string(),
            python_name: None,
            type_parameters,
            parameters: None,
            parent_types,
            members: Vec::new(),
        });
        installed.push((descriptor.name, class));
    }

    let members = installed.iter().map(|(_, id)| *id).collect();
    builder.module(BUILTIN_PACKAGE, "builtins.sdsstub", members);

    let lookup = |name: &str| {
        installed
            .iter()
            .find(|(it, _)| *it == name)
            .map(|(_, id)| *id)
            .ok_or_else(|| CoreError::MissingCoreDeclaration(format!("{BUILTIN_PACKAGE}.{name}")))
    };
    Ok(CoreClasses {
        any: lookup("Any")?,
        nothing: lookup("Nothing")?,
        boolean: lookup("Boolean")?,
        number: lookup("Number")?,
        int: lookup("Int")?,
        float: lookup("Float")?,
        string: lookup("String")?,
        list: lookup("List")?,
        map: lookup("Map")?,
    })
}
