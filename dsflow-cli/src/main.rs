use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use dsflow_core::{Ast, GenerateOptions, GeneratedFile, LoadedAst, generate, load_asts};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Generates Python modules from resolved dsflow syntax trees.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Syntax tree JSON file or directory of them (defaults to stdin)"
    )]
    input: Option<PathBuf>,

    #[arg(short, long, value_name = "DIR", help = "Directory the Python files are written to")]
    output: PathBuf,

    #[arg(long, help = "Write a source map next to each generated module")]
    source_maps: bool,

    #[arg(long, help = "Generate plain calls without runner memoization or placeholder saving")]
    disable_runner_integration: bool,

    #[arg(
        long = "target-statement",
        value_name = "INDEX",
        help = "Only generate what the pipeline statement at INDEX needs (repeatable)"
    )]
    target_statements: Vec<usize>,

    #[arg(short, long, action = clap::ArgAction::Count, help = "Increase log verbosity")]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    execute(cli)
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn execute(cli: Cli) -> Result<()> {
    let options = GenerateOptions {
        create_source_maps: cli.source_maps,
        target_statements: (!cli.target_statements.is_empty()).then_some(cli.target_statements),
        disable_runner_integration: cli.disable_runner_integration,
    };

    let inputs = match &cli.input {
        Some(path) => load_asts(path).with_context(|| format!("failed to read input {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            let ast = Ast::from_json(&buffer).context("failed to parse syntax tree from stdin")?;
            vec![LoadedAst {
                path: PathBuf::from("stdin.json"),
                ast,
            }]
        }
    };
    debug!(trees = inputs.len(), "loaded syntax trees");

    let mut written = 0;
    for input in &inputs {
        let uri = input.path.to_string_lossy();
        let files = generate(&input.ast, &uri, &options)
            .with_context(|| format!("failed to generate python for {uri}"))?;
        for file in &files {
            write_output(&cli.output, file)?;
        }
        written += files.len();
    }

    println!("Generated {written} files in {}", cli.output.display());
    Ok(())
}

fn write_output(root: &Path, file: &GeneratedFile) -> Result<()> {
    let path = root.join(&file.path);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("failed to create directory {parent:?}"))?;
    }
    fs::write(&path, &file.content).with_context(|| format!("failed to write output file {}", path.display()))?;
    info!(path = %path.display(), "wrote file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_cmd::Command;
    use dsflow_core::ast::InfixOperator;
    use dsflow_core::{AstBuilder, NodeKind, builtins};
    use predicates::prelude::*;
    use tempfile::tempdir;

    /// `pipeline main { a = 1; b = 2; c = a + 3; }` in package `demo`.
    fn demo_tree() -> String {
        let mut b = AstBuilder::new();
        builtins::install(&mut b).expect("core classes install");
        let one = b.int(1);
        let a = b.placeholder("a");
        let define_a = b.assignment(vec![a], one);
        let two = b.int(2);
        let placeholder_b = b.placeholder("b");
        let define_b = b.assignment(vec![placeholder_b], two);
        let read_a = b.reference(a);
        let three = b.int(3);
        let sum = b.infix(InfixOperator::Plus, read_a, three);
        let c = b.placeholder("c");
        let define_c = b.assignment(vec![c], sum);
        let body = b.block(vec![define_a, define_b, define_c]);
        let pipeline = b.pipeline("main", body);
        b.add(NodeKind::Module {
            package: "demo".to_string(),
            file: "flow.sds".to_string(),
            python_module: None,
            members: vec![pipeline],
        });
        b.finish().expect("tree is complete").to_json().expect("serializes")
    }

    fn dsflow() -> Command {
        Command::cargo_bin("dsflow").expect("binary exists")
    }

    #[test]
    fn generates_module_and_entry_point() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("flow.json");
        fs::write(&input_path, demo_tree()).expect("write input");
        let output = dir.path().join("out");

        dsflow()
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(&output)
            .assert()
            .success()
            .stdout(predicate::str::contains("Generated 2 files"));

        let module = fs::read_to_string(output.join("demo/gen_flow.py")).expect("module written");
        assert!(module.contains("def main():\n    __gen_placeholder_a = 1\n"));
        assert!(module.contains("safeds_runner.save_placeholder('b', __gen_placeholder_b)"));
        let entry = fs::read_to_string(output.join("demo/gen_flow_main.py")).expect("entry point written");
        assert!(entry.contains("from .gen_flow import main"));
    }

    #[test]
    fn target_statements_slice_the_pipeline() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("flow.json");
        fs::write(&input_path, demo_tree()).expect("write input");
        let output = dir.path().join("out");

        dsflow()
            .arg("-i")
            .arg(&input_path)
            .arg("-o")
            .arg(&output)
            .arg("--target-statement")
            .arg("2")
            .arg("--disable-runner-integration")
            .assert()
            .success();

        let module = fs::read_to_string(output.join("demo/gen_flow.py")).expect("module written");
        assert!(module.ends_with("def main():\n    __gen_placeholder_a = 1\n    __gen_placeholder_c = 4\n"));
    }

    #[test]
    fn reads_the_tree_from_stdin_and_writes_source_maps() {
        let dir = tempdir().expect("tempdir");
        let output = dir.path().join("out");

        dsflow()
            .arg("--output")
            .arg(&output)
            .arg("--source-maps")
            .write_stdin(demo_tree())
            .assert()
            .success()
            .stdout(predicate::str::contains("Generated 3 files"));

        let map = fs::read_to_string(output.join("demo/gen_flow.py.map")).expect("source map written");
        assert!(map.contains(r#""sources":["flow.sds"]"#));
    }

    #[test]
    fn reports_missing_input() {
        let dir = tempdir().expect("tempdir");

        dsflow()
            .arg("--input")
            .arg(dir.path().join("missing.json"))
            .arg("--output")
            .arg(dir.path().join("out"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed to read input"));
    }

    #[test]
    fn reports_malformed_trees() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("broken.json");
        fs::write(&input_path, "{ \"nodes\": [ { \"kind\": ").expect("write input");

        dsflow()
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(dir.path().join("out"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("malformed json"));
    }
}
