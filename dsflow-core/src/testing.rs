//! Program builder shared by the unit tests.

use crate::ast::{Ast, AstBuilder, NodeId};
use crate::builtins::{self, CoreClasses};

pub(crate) const PACKAGE: &str = "tests.fixture";

/// An [`AstBuilder`] with the core classes installed. Declarations passed
/// to [`Fixture::members`] end up in one module of package [`PACKAGE`].
pub(crate) struct Fixture {
    pub b: AstBuilder,
    pub core: CoreClasses,
    members: Vec<NodeId>,
}

impl Fixture {
    pub fn new() -> Self {
        let mut b = AstBuilder::new();
        let core = builtins::install(&mut b).expect("core classes install");
        Fixture {
            b,
            core,
            members: Vec::new(),
        }
    }

    pub fn members(&mut self, ids: &[NodeId]) {
        self.members.extend_from_slice(ids);
    }

    pub fn finish(self) -> Ast {
        let Fixture { mut b, members, .. } = self;
        b.module(PACKAGE, "input.sds", members);
        b.finish().expect("fixture tree is complete")
    }
}
