use crate::ast::NodeId;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("core declaration `{0}` was not found in the syntax tree")]
    MissingCoreDeclaration(String),
    #[error("node {0:?} is not part of the syntax tree")]
    DanglingNode(NodeId),
    #[error("unexpected {kind} node while generating {context}")]
    UnexpectedNode { kind: &'static str, context: &'static str },
    #[error("no argument and no default value for parameter `{parameter}`")]
    MissingArgument { parameter: String },
}
