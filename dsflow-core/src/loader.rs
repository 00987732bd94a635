//! Reading serialized syntax trees from disk.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::ast::Ast;
use crate::error::CoreError;

#[derive(Debug, Clone)]
pub struct LoadedAst {
    /// Path of the JSON document, relative to the searched root.
    pub path: PathBuf,
    pub ast: Ast,
}

pub fn load_ast(path: impl AsRef<Path>) -> Result<Ast, CoreError> {
    let contents = fs::read_to_string(path.as_ref())?;
    Ast::from_json(&contents)
}

/// Every `*.json` tree at or below `root`, in path order. A file root is
/// loaded on its own.
pub fn load_asts(root: impl AsRef<Path>) -> Result<Vec<LoadedAst>, CoreError> {
    let root = root.as_ref();
    if root.is_file() {
        let path = root.file_name().map(PathBuf::from).unwrap_or_else(|| root.to_path_buf());
        return Ok(vec![LoadedAst {
            path,
            ast: load_ast(root)?,
        }]);
    }

    let mut asts = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            debug!(path = %path.display(), "loading syntax tree");
            let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
            asts.push(LoadedAst {
                path: relative,
                ast: load_ast(path)?,
            });
        }
    }
    Ok(asts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstBuilder;

    fn tree_json() -> String {
        let mut b = AstBuilder::new();
        b.module("pkg", "input.sds", vec![]);
        b.finish().expect("tree is complete").to_json().expect("serializes")
    }

    #[test]
    fn loads_json_trees_below_a_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::create_dir(dir.path().join("nested")).expect("nested dir");
        fs::write(dir.path().join("nested/b.json"), tree_json()).expect("write");
        fs::write(dir.path().join("a.json"), tree_json()).expect("write");
        fs::write(dir.path().join("notes.txt"), "not a tree").expect("write");

        let asts = load_asts(dir.path()).expect("trees load");
        let paths: Vec<_> = asts.iter().map(|it| it.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("a.json"), PathBuf::from("nested/b.json")]);
        assert_eq!(asts[0].ast.modules().count(), 1);
    }

    #[test]
    fn loads_a_single_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = dir.path().join("tree.json");
        fs::write(&file, tree_json()).expect("write");

        let asts = load_asts(&file).expect("tree loads");
        assert_eq!(asts.len(), 1);
        assert_eq!(asts[0].path, PathBuf::from("tree.json"));
    }

    #[test]
    fn reports_malformed_json() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = dir.path().join("broken.json");
        fs::write(&file, "{ nodes: ").expect("write");

        assert!(matches!(load_ast(&file), Err(CoreError::Json(_))));
    }

    #[test]
    fn reports_missing_roots() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(matches!(load_asts(dir.path().join("missing")), Err(CoreError::Io(_))));
    }
}
