use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::ast::{Ast, NodeId, NodeKind};
use crate::builtins::BUILTIN_PACKAGE;
use crate::codegen_python::{generate_module, module_file_stem, package_path};
use crate::error::CoreError;
use crate::python_runtime::generated_file_name;
use crate::semantics::{SemanticCache, SemanticModel};
use crate::sourcemap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateOptions {
    /// Also emit a `.py.map` next to each generated module.
    pub create_source_maps: bool,
    /// Indices of the pipeline statements to run. Only the statements they
    /// depend on are generated; targeted output statements are saved.
    pub target_statements: Option<Vec<usize>>,
    /// Plain calls only: no memoization and no placeholder saving.
    pub disable_runner_integration: bool,
}

/// A file to write, relative to the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub content: String,
}

/// Python files for every module of `ast` except the builtin stubs.
///
/// `input_uri` names the document the tree was read from; it is used as
/// the source of modules that do not record their own file.
pub fn generate(ast: &Ast, input_uri: &str, options: &GenerateOptions) -> Result<Vec<GeneratedFile>, CoreError> {
    let cache = SemanticCache::default();
    let model = SemanticModel::new(ast, &cache)?;

    let mut files = Vec::new();
    for module in ast.modules() {
        if is_stub(ast, module) {
            debug!(module = module.0, "skipping stub module");
            continue;
        }
        files.extend(generate_files(&model, module, input_uri, options)?);
    }

    info!(input = input_uri, files = files.len(), "generated python");
    Ok(files)
}

fn is_stub(ast: &Ast, module: NodeId) -> bool {
    match ast.kind(module) {
        NodeKind::Module { package, file, .. } => package == BUILTIN_PACKAGE || file.ends_with(".sdsstub"),
        _ => true,
    }
}

fn generate_files(
    model: &SemanticModel<'_>,
    module: NodeId,
    input_uri: &str,
    options: &GenerateOptions,
) -> Result<Vec<GeneratedFile>, CoreError> {
    let ast = model.ast;
    let source = match ast.kind(module) {
        NodeKind::Module { file, .. } if !file.is_empty() => file.as_str(),
        _ => input_uri,
    };
    let stem = match module_file_stem(ast, module) {
        stem if stem.is_empty() => file_stem(input_uri),
        stem => stem,
    };
    let name = generated_file_name(&stem);
    let directory: PathBuf = package_path(ast, module).iter().collect();

    let rendered = generate_module(model, module, options)?.render();
    let mut files = Vec::new();

    if options.create_source_maps {
        let mappings = sourcemap::collect_mappings(ast, &rendered);
        files.push(GeneratedFile {
            path: directory.join(format!("{name}.py.map")),
            content: sourcemap::encode(&format!("{name}.py"), &file_name(source), &mappings)?,
        });
    }
    files.push(GeneratedFile {
        path: directory.join(format!("{name}.py")),
        content: rendered.text,
    });

    if let NodeKind::Module { members, .. } = ast.kind(module) {
        for pipeline in members
            .iter()
            .filter(|it| matches!(ast.kind(**it), NodeKind::Pipeline { .. }))
        {
            let pipeline = ast.python_name(*pipeline);
            files.push(GeneratedFile {
                path: directory.join(format!("{name}_{pipeline}.py")),
                content: format!(
                    "from .{name} import {pipeline}\n\nif __name__ == '__main__':\n    {pipeline}()\n"
                ),
            });
        }
    }
    Ok(files)
}

fn file_stem(uri: &str) -> String {
    Path::new(uri)
        .file_stem()
        .map(|it| it.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_name(uri: &str) -> String {
    Path::new(uri)
        .file_name()
        .map(|it| it.to_string_lossy().into_owned())
        .unwrap_or_else(|| uri.to_string())
}
