//! Lowering of one module to Python source.
//!
//! Segments become plain functions and pipelines become argument-less
//! functions whose calls may be routed through the runner's memoization
//! API. Lambdas are hoisted into local `def`s emitted before the statement
//! that uses them.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, trace};

use crate::ast::{Ast, InfixOperator, NodeId, NodeKind, PrefixOperator, TemplatePosition};
use crate::code::Code;
use crate::compiler::GenerateOptions;
use crate::error::CoreError;
use crate::evaluation::{Constant, EvaluatedNode};
use crate::purity::{ImpurityReason, PathRef};
use crate::python_runtime::{
    ABSOLUTE_PATH, BLOCK_LAMBDA_RESULT_PREFIX, CODEGEN_PREFIX, EAGER_AND, EAGER_ELVIS, EAGER_OR, FILE_MTIME,
    LAMBDA_PREFIX, MEMOIZED_DYNAMIC_CALL, MEMOIZED_STATIC_CALL, NULL_SAFE_CALL, NULL_SAFE_INDEXED_ACCESS,
    NULL_SAFE_MEMBER_ACCESS, OUTPUT_PREFIX, PLACEHOLDER_PREFIX, RECEIVER_PREFIX, RUNNER_PACKAGE, SAVE_PLACEHOLDER,
    UtilityFunction, YIELD_PREFIX, escape_string, format_float, generated_file_name,
};
use crate::semantics::SemanticModel;
use crate::slicer::Slicer;
use crate::types::Type;

/// Comment line opening a section of a generated module, padded with
/// dashes to 80 columns.
pub fn section_header(title: &str) -> String {
    let mut header = format!("# {title} ");
    while header.len() < 80 {
        header.push('-');
    }
    header
}

/// Dotted Python package of a module.
pub fn python_module_name(ast: &Ast, module: NodeId) -> String {
    match ast.kind(module) {
        NodeKind::Module {
            python_module: Some(python_module),
            ..
        } => python_module.clone(),
        NodeKind::Module { package, .. } => package.clone(),
        _ => String::new(),
    }
}

/// Directories the generated files of a module are placed in.
pub fn package_path(ast: &Ast, module: NodeId) -> Vec<String> {
    python_module_name(ast, module)
        .split('.')
        .filter(|it| !it.is_empty())
        .map(str::to_string)
        .collect()
}

/// Stem of the document a module was read from.
pub fn module_file_stem(ast: &Ast, module: NodeId) -> String {
    let NodeKind::Module { file, .. } = ast.kind(module) else {
        return String::new();
    };
    Path::new(file)
        .file_stem()
        .map(|it| it.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Python code for the segments and pipelines of `module`.
pub fn generate_module(model: &SemanticModel<'_>, module: NodeId, options: &GenerateOptions) -> Result<Code, CoreError> {
    debug!(module = %python_module_name(model.ast, module), "generating python module");
    PythonGenerator::new(model, options, module).module()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ImportData {
    path: String,
    /// `None` for `import path`.
    declaration: Option<String>,
    alias: Option<String>,
}

impl ImportData {
    fn qualified(path: &str) -> Self {
        ImportData {
            path: path.to_string(),
            declaration: None,
            alias: None,
        }
    }

    fn named(path: &str, declaration: &str) -> Self {
        ImportData {
            path: path.to_string(),
            declaration: Some(declaration.to_string()),
            alias: None,
        }
    }
}

struct PythonGenerator<'m> {
    model: &'m SemanticModel<'m>,
    options: &'m GenerateOptions,
    module: NodeId,
    imports: Vec<ImportData>,
    utilities: Vec<&'static UtilityFunction>,
    type_variables: Vec<&'static str>,
    /// Numbers of hoisted lambdas and bound receivers within the current
    /// segment or pipeline.
    ids: BTreeMap<NodeId, usize>,
    /// Statements to emit before the statement being generated, one entry
    /// per nested lambda scope.
    scopes: Vec<Vec<(NodeId, Code)>>,
    inside_pipeline: bool,
}

impl<'m> PythonGenerator<'m> {
    fn new(model: &'m SemanticModel<'m>, options: &'m GenerateOptions, module: NodeId) -> Self {
        PythonGenerator {
            model,
            options,
            module,
            imports: Vec::new(),
            utilities: Vec::new(),
            type_variables: Vec::new(),
            ids: BTreeMap::new(),
            scopes: Vec::new(),
            inside_pipeline: false,
        }
    }

    // -----------------------------------------------------------------
    // Declarations
    // -----------------------------------------------------------------

    fn module(mut self) -> Result<Code, CoreError> {
        let ast = self.model.ast;
        let NodeKind::Module { members, .. } = ast.kind(self.module) else {
            return Err(unexpected(ast, self.module, "module"));
        };

        let mut segments = Vec::new();
        for member in members {
            if matches!(ast.kind(*member), NodeKind::Segment { .. }) {
                segments.push(self.segment(*member)?);
            }
        }
        let mut pipelines = Vec::new();
        for member in members {
            if matches!(ast.kind(*member), NodeKind::Pipeline { .. }) {
                pipelines.push(self.pipeline(*member)?);
            }
        }

        let mut sections: Vec<(&str, Code)> = Vec::new();
        let imports = self.import_lines();
        if !imports.is_empty() {
            sections.push(("Imports", Code::lines(imports.into_iter().map(Code::text))));
        }
        if !self.type_variables.is_empty() {
            let declarations = self
                .type_variables
                .iter()
                .map(|it| Code::text(format!("{it} = TypeVar(\"{it}\")")));
            sections.push(("Type variables", Code::lines(declarations)));
        }
        if !self.utilities.is_empty() {
            let utilities = self.utilities.iter().map(|it| verbatim(it.code));
            sections.push(("Utils", spaced(utilities)));
        }
        if !segments.is_empty() {
            sections.push(("Segments", spaced(segments)));
        }
        if !pipelines.is_empty() {
            sections.push(("Pipelines", spaced(pipelines)));
        }

        let mut out = Code::new();
        for (index, (title, content)) in sections.into_iter().enumerate() {
            if index > 0 {
                out.push_newline();
            }
            out.push_text(section_header(title));
            out.push_newline();
            out.push_newline();
            out.push(content);
            out.push_newline();
        }
        Ok(Code::traced(self.module, out))
    }

    fn enter_declaration(&mut self, inside_pipeline: bool) {
        self.ids.clear();
        self.scopes = vec![Vec::new()];
        self.inside_pipeline = inside_pipeline;
    }

    fn segment(&mut self, segment: NodeId) -> Result<Code, CoreError> {
        let ast = self.model.ast;
        let NodeKind::Segment {
            parameters,
            results,
            body,
            ..
        } = ast.kind(segment)
        else {
            return Err(unexpected(ast, segment, "segment"));
        };
        self.enter_declaration(false);

        let parameters = self.parameters(parameters)?;
        let mut block = self.block(*body, false, None)?;
        if !results.is_empty() {
            let yields = results
                .iter()
                .map(|it| Code::traced(*it, format!("{YIELD_PREFIX}{}", ast.name_or_empty(*it))));
            block.push_newline();
            block.push(Code::text("return ").append(Code::join(yields, ", ")));
        }

        Ok(Code::traced(
            segment,
            Code::text(format!("def {}(", ast.python_name(segment)))
                .append(parameters)
                .append("):")
                .newline()
                .indented(block),
        ))
    }

    fn pipeline(&mut self, pipeline: NodeId) -> Result<Code, CoreError> {
        let ast = self.model.ast;
        let options = self.options;
        let NodeKind::Pipeline { body, .. } = ast.kind(pipeline) else {
            return Err(unexpected(ast, pipeline, "pipeline"));
        };
        self.enter_declaration(true);

        let block = self.block(*body, false, options.target_statements.as_deref())?;
        Ok(Code::traced(
            pipeline,
            Code::text(format!("def {}():", ast.python_name(pipeline)))
                .newline()
                .indented(block),
        ))
    }

    fn parameters(&mut self, parameters: &[NodeId]) -> Result<Code, CoreError> {
        let mut items = Vec::new();
        for parameter in parameters {
            items.push(self.parameter(*parameter, true)?);
        }
        Ok(Code::join(items, ", "))
    }

    fn parameter(&mut self, parameter: NodeId, with_default: bool) -> Result<Code, CoreError> {
        let ast = self.model.ast;
        let mut code = Code::text(ast.python_name(parameter));
        if with_default && let Some(default_value) = ast.default_value(parameter) {
            code.push_text("=");
            code.push(self.expression(default_value)?);
        }
        Ok(Code::traced(parameter, code))
    }

    // -----------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------

    /// `targets` are indices into the block's statements; only the
    /// statements they need are generated.
    fn block(&mut self, block: NodeId, in_lambda: bool, targets: Option<&[usize]>) -> Result<Code, CoreError> {
        let ast = self.model.ast;
        let all = ast.statements(block);
        let mut statements: Vec<NodeId> = all
            .iter()
            .copied()
            .filter(|it| self.statement_does_something(*it))
            .collect();

        if let Some(indices) = targets {
            let targets: Vec<NodeId> = indices.iter().filter_map(|it| all.get(*it).copied()).collect();
            if !targets.is_empty() {
                statements = Slicer::new(self.model).compute_backward_slice(&statements, &targets);
            }
        }

        if statements.is_empty() {
            return Ok(Code::traced(block, "pass"));
        }
        let mut lines = Vec::new();
        for statement in statements {
            lines.push(self.statement(statement, in_lambda, targets)?);
        }
        Ok(Code::traced(block, Code::lines(lines)))
    }

    fn statement_does_something(&self, statement: NodeId) -> bool {
        let ast = self.model.ast;
        let has_side_effects = |expression: NodeId| self.model.purity.expression_has_side_effects(self.model, expression);
        match ast.kind(statement) {
            NodeKind::Assignment {
                assignees,
                expression,
            } => {
                !assignees.iter().all(|it| matches!(ast.kind(*it), NodeKind::Wildcard))
                    || has_side_effects(*expression)
            }
            NodeKind::ExpressionStatement { expression } => has_side_effects(*expression),
            NodeKind::OutputStatement { .. } => true,
            _ => false,
        }
    }

    fn statement(&mut self, statement: NodeId, in_lambda: bool, targets: Option<&[usize]>) -> Result<Code, CoreError> {
        let ast = self.model.ast;
        let code = match ast.kind(statement) {
            NodeKind::Assignment { .. } => self.assignment(statement, in_lambda)?,
            NodeKind::ExpressionStatement { expression } => self.expression(*expression)?,
            NodeKind::OutputStatement { expression } => {
                let index = ast.container_index(statement);
                let is_target = targets.is_some_and(|it| it.contains(&index));
                if self.options.disable_runner_integration || !is_target {
                    self.expression(*expression)?
                } else {
                    self.output_statement(index, *expression)?
                }
            }
            _ => return Err(unexpected(ast, statement, "statement")),
        };

        let mut lines = self.take_extra_statements();
        lines.push(code);
        Ok(Code::traced(statement, Code::lines(lines)))
    }

    fn assignment(&mut self, assignment: NodeId, in_lambda: bool) -> Result<Code, CoreError> {
        let ast = self.model.ast;
        let NodeKind::Assignment {
            assignees,
            expression,
        } = ast.kind(assignment)
        else {
            return Err(unexpected(ast, assignment, "assignment"));
        };

        let required = match self.model.types().compute_type(*expression) {
            Type::NamedTuple(tuple) => tuple.len(),
            _ => 1,
        };
        // Assignees without a value are never bound.
        let assignees = &assignees[..assignees.len().min(required)];
        if assignees.iter().all(|it| matches!(ast.kind(*it), NodeKind::Wildcard)) {
            return self.expression(*expression);
        }

        let mut targets = Vec::new();
        for assignee in assignees {
            targets.push(self.assignee(*assignee)?);
        }
        while targets.len() < required {
            targets.push(Code::text("_"));
        }

        let value = self.expression(*expression)?;
        let mut lines = vec![Code::join(targets, ", ").append(" = ").append(value)];

        if self.inside_pipeline && !in_lambda && !self.options.disable_runner_integration {
            for placeholder in assignees {
                let NodeKind::Placeholder { name } = ast.kind(*placeholder) else {
                    continue;
                };
                self.add_import(ImportData::qualified(RUNNER_PACKAGE));
                lines.push(Code::traced(
                    *placeholder,
                    format!("{SAVE_PLACEHOLDER}('{name}', {PLACEHOLDER_PREFIX}{name})"),
                ));
            }
        }
        Ok(Code::traced(assignment, Code::lines(lines)))
    }

    fn assignee(&mut self, assignee: NodeId) -> Result<Code, CoreError> {
        let ast = self.model.ast;
        let text = match ast.kind(assignee) {
            NodeKind::BlockLambdaResult { name } => format!("{BLOCK_LAMBDA_RESULT_PREFIX}{name}"),
            NodeKind::Placeholder { name } => format!("{PLACEHOLDER_PREFIX}{name}"),
            NodeKind::Wildcard => "_".to_string(),
            NodeKind::Yield { result } => {
                format!("{YIELD_PREFIX}{}", result.map(|it| ast.name_or_empty(it)).unwrap_or_default())
            }
            _ => return Err(unexpected(ast, assignee, "assignee")),
        };
        Ok(Code::traced(assignee, text))
    }

    /// Evaluates `expression` and hands each of its values to the runner.
    fn output_statement(&mut self, index: usize, expression: NodeId) -> Result<Code, CoreError> {
        let ast = self.model.ast;
        let names: Vec<String> = match ast.kind(expression) {
            NodeKind::Call { .. } => match self.model.mapper.call_to_callable(self.model, expression) {
                Some(callable) if matches!(ast.kind(callable), NodeKind::Class { .. }) => vec!["instance".to_string()],
                Some(callable) => ast
                    .abstract_results(callable)
                    .iter()
                    .map(|it| ast.name_or_empty(*it).to_string())
                    .collect(),
                None => Vec::new(),
            },
            NodeKind::MemberAccess { .. } => ast
                .member_target(expression)
                .and_then(|it| ast.name(it))
                .map(|it| vec![it.to_string()])
                .unwrap_or_default(),
            _ => vec!["expression".to_string()],
        };

        let value = self.expression(expression)?;
        if names.is_empty() {
            return Ok(value);
        }

        self.add_import(ImportData::qualified(RUNNER_PACKAGE));
        let outputs = names.iter().map(|it| Code::text(format!("{OUTPUT_PREFIX}{index}_{it}")));
        let mut lines = vec![Code::join(outputs, ", ").append(" = ").append(value)];
        for name in &names {
            lines.push(Code::text(format!(
                "{SAVE_PLACEHOLDER}('{CODEGEN_PREFIX}{index}_{name}', {OUTPUT_PREFIX}{index}_{name})"
            )));
        }
        Ok(Code::lines(lines))
    }

    fn take_extra_statements(&mut self) -> Vec<Code> {
        self.scopes
            .last_mut()
            .map(std::mem::take)
            .unwrap_or_default()
            .into_iter()
            .map(|(_, code)| code)
            .collect()
    }

    fn add_extra_statement(&mut self, node: NodeId, code: Code) {
        if let Some(scope) = self.scopes.last_mut()
            && !scope.iter().any(|(it, _)| *it == node)
        {
            scope.push((node, code));
        }
    }

    fn unique_name(&mut self, prefix: &str, node: NodeId) -> String {
        let next = self.ids.len();
        let id = *self.ids.entry(node).or_insert(next);
        format!("{prefix}{id}")
    }

    // -----------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------

    fn expression(&mut self, expression: NodeId) -> Result<Code, CoreError> {
        self.expression_with_this(expression, None)
    }

    /// `this` is the code of the receiver bound for a method call, if any.
    fn expression_with_this(&mut self, expression: NodeId, this: Option<&Code>) -> Result<Code, CoreError> {
        let model = self.model;
        let ast = model.ast;

        if let NodeKind::TemplateStringPart { position, value } = ast.kind(expression) {
            let value = escape_template_text(value);
            let text = match position {
                TemplatePosition::Start => format!("{value}{{ "),
                TemplatePosition::Inner => format!(" }}{value}{{ "),
                TemplatePosition::End => format!(" }}{value}"),
            };
            return Ok(Code::traced(expression, text));
        }

        if !model.purity.expression_has_side_effects(model, expression)
            && let EvaluatedNode::Constant(constant) = model.evaluator().evaluate(expression)
        {
            return Ok(Code::traced(expression, constant_code(&constant)));
        }

        let code = match ast.kind(expression) {
            NodeKind::TemplateString { expressions } => {
                let mut parts = Vec::new();
                for it in expressions {
                    parts.push(self.expression(*it)?);
                }
                Code::text("f'").append(Code::join(parts, "")).append("'")
            }
            NodeKind::Map { entries } => {
                let mut items = Vec::new();
                for entry in entries {
                    let NodeKind::MapEntry { key, value } = ast.kind(*entry) else {
                        return Err(unexpected(ast, *entry, "map entry"));
                    };
                    let key = self.expression(*key)?;
                    let value = self.expression(*value)?;
                    items.push(Code::traced(*entry, key.append(": ").append(value)));
                }
                Code::text("{").append(Code::join(items, ", ")).append("}")
            }
            NodeKind::List { elements } => {
                let mut items = Vec::new();
                for it in elements {
                    items.push(self.expression(*it)?);
                }
                Code::text("[").append(Code::join(items, ", ")).append("]")
            }
            NodeKind::BlockLambda { .. } => self.block_lambda(expression)?,
            NodeKind::ExpressionLambda { .. } => self.expression_lambda(expression)?,
            NodeKind::Call {
                receiver,
                null_safe,
                ..
            } => self.call(expression, *receiver, *null_safe)?,
            NodeKind::InfixOperation {
                operator,
                left,
                right,
            } => self.infix_operation(*operator, *left, *right)?,
            NodeKind::IndexedAccess {
                receiver,
                index,
                null_safe,
            } => {
                let receiver = self.expression(*receiver)?;
                let index = self.expression(*index)?;
                if *null_safe {
                    self.add_utility(&NULL_SAFE_INDEXED_ACCESS);
                    helper_call(NULL_SAFE_INDEXED_ACCESS.name, receiver, index)
                } else {
                    receiver.append("[").append(index).append("]")
                }
            }
            NodeKind::MemberAccess {
                receiver,
                member,
                null_safe,
            } => self.member_access(expression, *receiver, *member, *null_safe)?,
            NodeKind::Parenthesized { expression } => self.expression(*expression)?,
            NodeKind::PrefixOperation { operator, operand } => {
                let operand_code = self.expression(*operand)?;
                let prefix = match operator {
                    PrefixOperator::Not if self.is_boolean(*operand) => "not (",
                    PrefixOperator::Not => "~(",
                    PrefixOperator::Negation => "-(",
                };
                Code::text(prefix).append(operand_code).append(")")
            }
            NodeKind::Reference { target, text } => self.reference(expression, *target, text.as_deref())?,
            NodeKind::This => this.cloned().ok_or(CoreError::UnexpectedNode {
                kind: "This",
                context: "an expression without a bound receiver",
            })?,
            NodeKind::TypeCast { expression, .. } => self.expression(*expression)?,
            _ => return Err(unexpected(ast, expression, "expression")),
        };
        Ok(Code::traced(expression, code))
    }

    fn is_boolean(&self, expression: NodeId) -> bool {
        let model = self.model;
        model
            .checker()
            .is_subtype_of(&model.types().compute_type(expression), &model.boolean_type())
    }

    fn infix_operation(&mut self, operator: InfixOperator, left: NodeId, right: NodeId) -> Result<Code, CoreError> {
        let left_code = self.expression(left)?;
        let right_code = self.expression(right)?;

        let code = match operator {
            InfixOperator::Or | InfixOperator::And if self.is_boolean(left) && self.is_boolean(right) => {
                let helper = if operator == InfixOperator::Or {
                    &EAGER_OR
                } else {
                    &EAGER_AND
                };
                self.add_utility(helper);
                helper_call(helper.name, left_code, right_code)
            }
            InfixOperator::Or => binary(left_code, "|", right_code),
            InfixOperator::And => binary(left_code, "&", right_code),
            InfixOperator::Elvis => {
                self.add_utility(&EAGER_ELVIS);
                helper_call(EAGER_ELVIS.name, left_code, right_code)
            }
            InfixOperator::IdenticalTo => binary(left_code, "is", right_code),
            InfixOperator::NotIdenticalTo => binary(left_code, "is not", right_code),
            other => binary(left_code, other.symbol(), right_code),
        };
        Ok(code)
    }

    fn member_access(&mut self, node: NodeId, receiver: NodeId, member: NodeId, null_safe: bool) -> Result<Code, CoreError> {
        let ast = self.model.ast;
        let target = ast.reference_target(member);
        let receiver_code = self.expression(receiver)?;

        match target.map(|it| (it, ast.kind(it))) {
            Some((_, NodeKind::EnumVariant { .. })) => {
                let member_code = self.expression(member)?;
                let is_called = ast
                    .parent(node)
                    .is_some_and(|it| matches!(ast.kind(it), NodeKind::Call { .. }));
                let code = receiver_code.append(".").append(member_code);
                Ok(if is_called { code } else { code.append("()") })
            }
            Some((result, NodeKind::Result { .. } | NodeKind::BlockLambdaResult { .. })) => {
                let results = ast
                    .containing(result, NodeKind::is_callable)
                    .map(|it| ast.abstract_results(it))
                    .unwrap_or_default();
                if results.len() == 1 {
                    return Ok(receiver_code);
                }
                let index = results
                    .iter()
                    .position(|it| *it == result)
                    .ok_or_else(|| unexpected(ast, result, "member access"))?;
                Ok(receiver_code
                    .append("[")
                    .append(Code::traced(member, index.to_string()))
                    .append("]"))
            }
            _ => {
                let member_code = self.expression(member)?;
                if null_safe {
                    self.add_utility(&NULL_SAFE_MEMBER_ACCESS);
                    let name = Code::text("'").append(member_code).append("'");
                    Ok(helper_call(NULL_SAFE_MEMBER_ACCESS.name, receiver_code, name))
                } else {
                    Ok(receiver_code.append(".").append(member_code))
                }
            }
        }
    }

    fn reference(&mut self, reference: NodeId, target: Option<NodeId>, text: Option<&str>) -> Result<Code, CoreError> {
        let ast = self.model.ast;
        let target = target.ok_or(CoreError::UnexpectedNode {
            kind: "Reference",
            context: "an expression (unresolved reference)",
        })?;

        let import = self.import_for(target, reference, text);
        let alias = import.as_ref().and_then(|it| it.alias.clone());
        if let Some(import) = import {
            self.add_import(import);
        }

        if let NodeKind::Placeholder { name } = ast.kind(target) {
            return Ok(Code::text(format!("{PLACEHOLDER_PREFIX}{name}")));
        }
        Ok(Code::text(alias.unwrap_or_else(|| ast.python_name(target).to_string())))
    }

    /// Import needed to refer to `declaration` from `context`. Segments and
    /// pipelines live in generated modules; other top-level declarations
    /// are imported from their package.
    fn import_for(&self, declaration: NodeId, context: NodeId, text: Option<&str>) -> Option<ImportData> {
        let ast = self.model.ast;
        let target_module = ast.containing_module(declaration)?;
        let path = match ast.kind(declaration) {
            NodeKind::Pipeline { .. } | NodeKind::Segment { .. } => {
                if ast.containing_module(context) == Some(target_module) {
                    return None;
                }
                format!(
                    "{}.{}",
                    python_module_name(ast, target_module),
                    generated_file_name(&module_file_stem(ast, target_module))
                )
            }
            _ if ast.parent(declaration) == Some(target_module) => python_module_name(ast, target_module),
            _ => return None,
        };

        let name = ast.name_or_empty(declaration);
        Some(ImportData {
            path,
            declaration: Some(ast.python_name(declaration).to_string()),
            alias: text.filter(|it| *it != name).map(str::to_string),
        })
    }

    // -----------------------------------------------------------------
    // Lambdas
    // -----------------------------------------------------------------

    fn block_lambda(&mut self, lambda: NodeId) -> Result<Code, CoreError> {
        let ast = self.model.ast;
        let NodeKind::BlockLambda { parameters, body } = ast.kind(lambda) else {
            return Err(unexpected(ast, lambda, "block lambda"));
        };

        let parameters = self.parameters(parameters)?;
        self.scopes.push(Vec::new());
        let block = self.block(*body, true, None);
        self.scopes.pop();
        let mut block = block?;

        let results = ast.block_lambda_results(lambda);
        if !results.is_empty() {
            let values = results.iter().map(|it| {
                Code::traced(
                    *it,
                    format!("{BLOCK_LAMBDA_RESULT_PREFIX}{}", ast.name_or_empty(*it)),
                )
            });
            block.push_newline();
            block.push(Code::text("return ").append(Code::join(values, ", ")));
        }

        let name = self.unique_name(LAMBDA_PREFIX, lambda);
        let definition = Code::text(format!("def {name}("))
            .append(parameters)
            .append("):")
            .newline()
            .indented(block);
        self.add_extra_statement(lambda, Code::traced(lambda, definition));
        Ok(Code::text(name))
    }

    fn expression_lambda(&mut self, lambda: NodeId) -> Result<Code, CoreError> {
        let ast = self.model.ast;
        let NodeKind::ExpressionLambda { parameters, result } = ast.kind(lambda) else {
            return Err(unexpected(ast, lambda, "expression lambda"));
        };

        let name = self.unique_name(LAMBDA_PREFIX, lambda);
        let parameters = self.parameters(parameters)?;
        self.scopes.push(Vec::new());
        let result = self.expression(*result);
        let extras = self.scopes.pop().unwrap_or_default();
        let result = result?;

        let mut lines: Vec<Code> = extras.into_iter().map(|(_, code)| code).collect();
        lines.push(Code::text("return ").append(result));
        let definition = Code::text(format!("def {name}("))
            .append(parameters)
            .append("):")
            .newline()
            .indented(Code::lines(lines));
        self.add_extra_statement(lambda, Code::traced(lambda, definition));
        Ok(Code::text(name))
    }

    // -----------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------

    fn call(&mut self, call: NodeId, receiver: NodeId, null_safe: bool) -> Result<Code, CoreError> {
        let model = self.model;
        let ast = model.ast;
        let receiver_code = if null_safe {
            Some(self.expression(receiver)?)
        } else {
            None
        };

        let member_receiver = match ast.kind(receiver) {
            NodeKind::MemberAccess { receiver, .. } => Some(*receiver),
            _ => None,
        };
        let mut code = None;
        if let Some(callable) = model.mapper.call_to_callable(model, call) {
            match ast.kind(callable) {
                NodeKind::Function {
                    python_macro: Some(template),
                    ..
                } => code = Some(self.python_macro(call, callable, template, member_receiver)?),
                NodeKind::Function { .. } | NodeKind::Class { .. }
                    if !self.options.disable_runner_integration && self.is_memoizable(call) =>
                {
                    code = Some(self.memoized_call(call, receiver, callable, member_receiver)?);
                }
                _ => {}
            }
        }
        let code = match code {
            Some(code) => code,
            None => self.plain_call(call, receiver)?,
        };

        match receiver_code {
            Some(receiver_code) => {
                self.add_utility(&NULL_SAFE_CALL);
                Ok(Code::text(format!("{}(", NULL_SAFE_CALL.name))
                    .append(receiver_code)
                    .append(", lambda: ")
                    .append(code)
                    .append(")"))
            }
            None => Ok(code),
        }
    }

    fn plain_call(&mut self, call: NodeId, receiver: NodeId) -> Result<Code, CoreError> {
        let model = self.model;
        let ast = model.ast;

        let mut arguments: Vec<(usize, NodeId)> = ast
            .arguments(call)
            .iter()
            .filter_map(|argument| {
                model
                    .mapper
                    .argument_to_parameter(model, *argument)
                    .map(|parameter| (ast.container_index(parameter), *argument))
            })
            .collect();
        arguments.sort_by_key(|(index, _)| *index);

        let receiver = self.expression(receiver)?;
        let mut items = Vec::new();
        for (_, argument) in arguments {
            items.push(self.argument(argument, true)?);
        }
        Ok(receiver.append("(").append(Code::join(items, ", ")).append(")"))
    }

    /// An argument; `keyword` prefixes arguments for optional parameters
    /// with the parameter name.
    fn argument(&mut self, argument: NodeId, keyword: bool) -> Result<Code, CoreError> {
        let model = self.model;
        let ast = model.ast;
        let value = argument_value(ast, argument).ok_or_else(|| unexpected(ast, argument, "argument"))?;

        let mut code = Code::new();
        if keyword
            && let Some(parameter) = model.mapper.argument_to_parameter(model, argument)
            && ast.is_optional_parameter(parameter)
        {
            code.push(self.parameter(parameter, false)?);
            code.push_text("=");
        }
        code.push(self.expression(value)?);
        Ok(Code::traced(argument, code))
    }

    /// Expands a `$name` template. `$this` refers to the receiver of a
    /// method call, which is bound to a fresh name first.
    fn python_macro(
        &mut self,
        call: NodeId,
        callable: NodeId,
        template: &str,
        receiver: Option<NodeId>,
    ) -> Result<Code, CoreError> {
        let model = self.model;
        let ast = model.ast;

        let mut values: BTreeMap<String, Code> = BTreeMap::new();
        for argument in ast.arguments(call) {
            if let Some(parameter) = model.mapper.argument_to_parameter(model, *argument) {
                let value = self.argument(*argument, false)?;
                values.insert(ast.name_or_empty(parameter).to_string(), value);
            }
        }
        if let Some(receiver) = receiver {
            let name = self.bind_receiver(receiver)?;
            values.insert("this".to_string(), Code::text(name));
        }

        let mut out = Code::text("(");
        for part in split_macro(template) {
            match part {
                MacroPart::Text(text) => out.push_text(text),
                MacroPart::Parameter(name) => {
                    let value = match values.get(name) {
                        Some(value) => value.clone(),
                        None => {
                            let parameter = ast
                                .parameters(callable)
                                .iter()
                                .copied()
                                .find(|it| ast.name(*it) == Some(name));
                            let default_value = parameter.and_then(|it| ast.default_value(it)).ok_or_else(|| {
                                CoreError::MissingArgument {
                                    parameter: name.to_string(),
                                }
                            })?;
                            self.expression(default_value)?
                        }
                    };
                    out.push(Code::text("(").append(value).append(")"));
                }
            }
        }
        out.push_text(")");
        Ok(out)
    }

    /// Emits `__gen_receiver_N = <receiver>` before the current statement.
    fn bind_receiver(&mut self, receiver: NodeId) -> Result<String, CoreError> {
        let name = self.unique_name(RECEIVER_PREFIX, receiver);
        let value = self.expression(receiver)?;
        self.add_extra_statement(
            receiver,
            Code::traced(receiver, Code::text(format!("{name} = ")).append(value)),
        );
        Ok(name)
    }

    /// Whether the runner may cache the result of `call`: the call only
    /// reads files whose paths are known, and no lambda passed to it calls a
    /// segment.
    fn is_memoizable(&self, call: NodeId) -> bool {
        let model = self.model;
        let ast = model.ast;

        let only_known_reads = model
            .purity
            .impurity_reasons_of_expression(model, call)
            .iter()
            .all(|it| {
                matches!(
                    it,
                    ImpurityReason::FileRead {
                        path: PathRef::Constant(_) | PathRef::Parameter(_)
                    }
                )
            });
        let passes_segment_caller = ast
            .arguments(call)
            .iter()
            .filter_map(|it| argument_value(ast, *it))
            .any(|value| match ast.kind(value) {
                NodeKind::ExpressionLambda { result, .. } => self.contains_segment_call(*result),
                NodeKind::BlockLambda { body, .. } => self.contains_segment_call(*body),
                _ => false,
            });

        let memoizable = only_known_reads && !passes_segment_caller;
        trace!(call = call.0, memoizable, "memoization check");
        memoizable
    }

    fn contains_segment_call(&self, root: NodeId) -> bool {
        let model = self.model;
        let ast = model.ast;
        std::iter::once(root)
            .chain(ast.descendants(root))
            .filter(|it| matches!(ast.kind(*it), NodeKind::Call { .. }))
            .filter_map(|it| model.mapper.call_to_callable(model, it))
            .any(|it| matches!(ast.kind(it), NodeKind::Segment { .. }))
    }

    fn memoized_call(
        &mut self,
        call: NodeId,
        receiver: NodeId,
        callable: NodeId,
        member_receiver: Option<NodeId>,
    ) -> Result<Code, CoreError> {
        let ast = self.model.ast;
        self.add_import(ImportData::qualified(RUNNER_PACKAGE));

        if let NodeKind::Function { is_static: false, .. } = ast.kind(callable)
            && let Some(member_receiver) = member_receiver
        {
            self.memoized_dynamic_call(call, callable, member_receiver)
        } else {
            self.memoized_static_call(call, receiver, callable)
        }
    }

    /// Method call dispatched by the runner on the receiver's runtime type.
    fn memoized_dynamic_call(&mut self, call: NodeId, callable: NodeId, receiver: NodeId) -> Result<Code, CoreError> {
        let ast = self.model.ast;
        let hidden = self.hidden_parameters(call, callable)?;
        let this = Code::text(self.bind_receiver(receiver)?);
        let positional = self.memoized_positional_arguments(call, callable)?;
        let keyword = self.memoized_keyword_arguments(call, callable, Some(&this))?;

        Ok(call_block(
            MEMOIZED_DYNAMIC_CALL,
            vec![
                this,
                Code::text(format!("\"{}\"", ast.python_name(callable))),
                bracketed("[", positional, "]"),
                bracketed("{", keyword, "}"),
                bracketed("[", hidden, "]"),
            ],
        ))
    }

    fn memoized_static_call(&mut self, call: NodeId, receiver: NodeId, callable: NodeId) -> Result<Code, CoreError> {
        let ast = self.model.ast;

        let target = if let NodeKind::MemberAccess { member, .. } = ast.kind(receiver) {
            if let Some(class) = outermost_class(ast, callable)
                && let Some(import) = self.import_for(class, *member, None)
            {
                self.add_import(import);
            }
            Code::traced(receiver, class_qualified_name(ast, callable))
        } else {
            self.expression(receiver)?
        };

        let hidden = self.hidden_parameters(call, callable)?;
        let positional = self.memoized_positional_arguments(call, callable)?;
        let keyword = self.memoized_keyword_arguments(call, callable, None)?;

        Ok(call_block(
            MEMOIZED_STATIC_CALL,
            vec![
                Code::text(format!("\"{}\"", ast.qualified_python_name(callable))),
                target,
                bracketed("[", positional, "]"),
                bracketed("{", keyword, "}"),
                bracketed("[", hidden, "]"),
            ],
        ))
    }

    fn memoized_positional_arguments(&mut self, call: NodeId, callable: NodeId) -> Result<Code, CoreError> {
        let model = self.model;
        let ast = model.ast;
        let parameters = ast.parameters(callable);
        let passed = model
            .mapper
            .parameters_to_arguments(model, parameters, ast.arguments(call));

        let mut items = Vec::new();
        for parameter in parameters.iter().filter(|it| !ast.is_optional_parameter(**it)) {
            items.push(self.memoized_argument(passed.get(parameter).copied(), *parameter, None)?);
        }
        Ok(Code::join(items, ", "))
    }

    fn memoized_keyword_arguments(
        &mut self,
        call: NodeId,
        callable: NodeId,
        this: Option<&Code>,
    ) -> Result<Code, CoreError> {
        let model = self.model;
        let ast = model.ast;
        let parameters = ast.parameters(callable);
        let passed = model
            .mapper
            .parameters_to_arguments(model, parameters, ast.arguments(call));

        let mut items = Vec::new();
        for parameter in parameters.iter().filter(|it| ast.is_optional_parameter(**it)) {
            let value = self.memoized_argument(passed.get(parameter).copied(), *parameter, this)?;
            items.push(Code::text(format!("\"{}\": ", ast.python_name(*parameter))).append(value));
        }
        Ok(Code::join(items, ", "))
    }

    /// Value passed for `parameter`, falling back to its default. Paths the
    /// callable reads from are made absolute so the cache key does not
    /// depend on the working directory.
    fn memoized_argument(
        &mut self,
        argument: Option<NodeId>,
        parameter: NodeId,
        this: Option<&Code>,
    ) -> Result<Code, CoreError> {
        let model = self.model;
        let ast = model.ast;
        let value = argument
            .and_then(|it| argument_value(ast, it))
            .or_else(|| ast.default_value(parameter))
            .ok_or_else(|| CoreError::MissingArgument {
                parameter: ast.name_or_empty(parameter).to_string(),
            })?;
        let code = self.expression_with_this(value, this)?;

        let is_read_path = ast.parent(parameter).is_some_and(|callable| {
            model
                .purity
                .impurity_reasons_of_callable(model, callable)
                .iter()
                .any(|it| {
                    matches!(it, ImpurityReason::FileRead { path: PathRef::Parameter(p) } if *p == parameter)
                })
        });
        if !is_read_path {
            return Ok(code);
        }
        self.add_import(ImportData::qualified(RUNNER_PACKAGE));
        Ok(Code::text(format!("{ABSOLUTE_PATH}(")).append(code).append(")"))
    }

    /// Modification times of the files the callable reads, which
    /// invalidate cached results when the files change.
    fn hidden_parameters(&mut self, call: NodeId, callable: NodeId) -> Result<Code, CoreError> {
        let model = self.model;
        let ast = model.ast;

        let mut items = Vec::new();
        for reason in model.purity.impurity_reasons_of_callable(model, callable) {
            let ImpurityReason::FileRead { path } = reason else {
                continue;
            };
            match path {
                PathRef::Constant(path) => {
                    items.push(Code::text(format!("{FILE_MTIME}('{}')", escape_string(&path))));
                }
                PathRef::Parameter(parameter) => {
                    let passed = model
                        .mapper
                        .parameters_to_arguments(model, &[parameter], ast.arguments(call));
                    let value = passed
                        .get(&parameter)
                        .and_then(|it| argument_value(ast, *it))
                        .or_else(|| ast.default_value(parameter))
                        .ok_or_else(|| CoreError::MissingArgument {
                            parameter: ast.name_or_empty(parameter).to_string(),
                        })?;
                    let value = self.expression(value)?;
                    items.push(Code::text(format!("{FILE_MTIME}(")).append(value).append(")"));
                }
                PathRef::Unknown => {}
            }
        }
        Ok(Code::join(items, ", "))
    }

    // -----------------------------------------------------------------
    // Imports and helpers
    // -----------------------------------------------------------------

    fn add_import(&mut self, import: ImportData) {
        if !self.imports.contains(&import) {
            self.imports.push(import);
        }
    }

    fn add_utility(&mut self, utility: &'static UtilityFunction) {
        if !self.utilities.iter().any(|it| it.name == utility.name) {
            self.utilities.push(utility);
        }
        for (path, name) in utility.imports {
            self.add_import(ImportData::named(path, name));
        }
        if !utility.type_variables.is_empty() {
            self.add_import(ImportData::named("typing", "TypeVar"));
        }
        for variable in utility.type_variables {
            if !self.type_variables.contains(variable) {
                self.type_variables.push(variable);
            }
        }
    }

    /// `import x` lines first, then `from x import a, b` grouped by path.
    fn import_lines(&self) -> Vec<String> {
        let mut qualified: Vec<String> = self
            .imports
            .iter()
            .filter(|it| it.declaration.is_none())
            .map(|it| match &it.alias {
                Some(alias) => format!("import {} as {alias}", it.path),
                None => format!("import {}", it.path),
            })
            .collect();
        qualified.sort_by(|a, b| natural_order(a, b));
        qualified.dedup();

        let mut grouped: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for import in &self.imports {
            let Some(declaration) = &import.declaration else {
                continue;
            };
            let entry = match &import.alias {
                Some(alias) => format!("{declaration} as {alias}"),
                None => declaration.clone(),
            };
            grouped.entry(import.path.as_str()).or_default().push(entry);
        }
        let mut paths: Vec<&str> = grouped.keys().copied().collect();
        paths.sort_by(|a, b| natural_order(a, b));

        let mut lines = qualified;
        for path in paths {
            let Some(mut names) = grouped.remove(path) else {
                continue;
            };
            names.sort_by(|a, b| natural_order(a, b));
            names.dedup();
            lines.push(format!("from {path} import {}", names.join(", ")));
        }
        lines
    }
}

/// Case-insensitive order; on ties lowercase sorts first.
fn natural_order(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| b.cmp(a))
}

fn unexpected(ast: &Ast, node: NodeId, context: &'static str) -> CoreError {
    CoreError::UnexpectedNode {
        kind: ast.kind(node).kind_name(),
        context,
    }
}

fn argument_value(ast: &Ast, argument: NodeId) -> Option<NodeId> {
    match ast.kind(argument) {
        NodeKind::Argument { value, .. } => Some(*value),
        _ => None,
    }
}

fn constant_code(constant: &Constant) -> String {
    match constant {
        Constant::Boolean(true) => "True".to_string(),
        Constant::Boolean(false) => "False".to_string(),
        Constant::Int(value) => value.to_string(),
        Constant::Float(value) => format_float(value.0),
        Constant::Null => "None".to_string(),
        Constant::String(value) => format!("'{}'", escape_string(value)),
    }
}

fn escape_template_text(value: &str) -> String {
    escape_string(value).replace('{', "{{").replace('}', "}}")
}

fn binary(left: Code, operator: &str, right: Code) -> Code {
    Code::text("(")
        .append(left)
        .append(format!(") {operator} ("))
        .append(right)
        .append(")")
}

fn helper_call(name: &str, first: Code, second: Code) -> Code {
    Code::text(format!("{name}("))
        .append(first)
        .append(", ")
        .append(second)
        .append(")")
}

fn bracketed(open: &str, inner: Code, close: &str) -> Code {
    Code::text(open).append(inner).append(close)
}

/// `function(` followed by one argument per indented line.
fn call_block(function: &str, arguments: Vec<Code>) -> Code {
    let count = arguments.len();
    let mut body = Code::new();
    for (index, argument) in arguments.into_iter().enumerate() {
        body.push(argument);
        if index + 1 < count {
            body.push_text(",");
            body.push_newline();
        }
    }
    Code::text(format!("{function}("))
        .newline()
        .indented(body)
        .newline()
        .append(")")
}

/// Multi-line text kept as is, one line per code line.
fn verbatim(text: &str) -> Code {
    Code::lines(text.lines().map(Code::text))
}

/// Items separated by a blank line.
fn spaced(items: impl IntoIterator<Item = Code>) -> Code {
    let mut code = Code::new();
    for (index, item) in items.into_iter().enumerate() {
        if index > 0 {
            code.push_newline();
            code.push_newline();
        }
        code.push(item);
    }
    code
}

fn outermost_class(ast: &Ast, node: NodeId) -> Option<NodeId> {
    std::iter::once(node)
        .chain(ast.ancestors(node))
        .filter(|it| matches!(ast.kind(*it), NodeKind::Class { .. }))
        .last()
}

/// `Outer.Inner.member`, using Python names.
fn class_qualified_name(ast: &Ast, node: NodeId) -> String {
    let mut segments = vec![ast.python_name(node)];
    segments.extend(
        ast.ancestors(node)
            .filter(|it| matches!(ast.kind(*it), NodeKind::Class { .. }))
            .map(|it| ast.python_name(it)),
    );
    segments.reverse();
    segments.join(".")
}

#[derive(Debug, PartialEq, Eq)]
enum MacroPart<'a> {
    Text(&'a str),
    Parameter(&'a str),
}

fn split_macro(template: &str) -> Vec<MacroPart<'_>> {
    let mut parts = Vec::new();
    let mut text_start = 0;
    let mut chars = template.char_indices().peekable();

    while let Some((index, it)) = chars.next() {
        if it != '$' {
            continue;
        }
        let Some(&(name_start, first)) = chars.peek() else {
            break;
        };
        if !(first.is_alphabetic() || first == '_') {
            continue;
        }
        let mut name_end = name_start;
        while let Some(&(position, next)) = chars.peek() {
            if next.is_alphanumeric() || next == '_' {
                name_end = position + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        if text_start < index {
            parts.push(MacroPart::Text(&template[text_start..index]));
        }
        parts.push(MacroPart::Parameter(&template[name_start..name_end]));
        text_start = name_end;
    }
    if text_start < template.len() {
        parts.push(MacroPart::Text(&template[text_start..]));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Purity;
    use crate::semantics::SemanticCache;
    use crate::testing::Fixture;

    fn generate(ast: &Ast, options: &GenerateOptions) -> String {
        let cache = SemanticCache::default();
        let model = SemanticModel::new(ast, &cache).expect("core classes");
        let module = ast
            .modules()
            .find(|it| ast.name(*it) == Some(crate::testing::PACKAGE))
            .expect("fixture module");
        generate_module(&model, module, options)
            .expect("module generates")
            .to_string()
    }

    fn pipeline_body(f: &mut Fixture, statements: Vec<NodeId>) -> NodeId {
        let body = f.b.block(statements);
        let pipeline = f.b.pipeline("p", body);
        f.members(&[pipeline]);
        pipeline
    }

    fn reads(parameter: NodeId) -> Purity {
        Purity::Impure {
            reasons: vec![ImpurityReason::FileRead {
                path: PathRef::Parameter(parameter),
            }],
        }
    }

    fn without_runner() -> GenerateOptions {
        GenerateOptions {
            disable_runner_integration: true,
            ..GenerateOptions::default()
        }
    }

    #[test]
    fn section_headers_span_eighty_columns() {
        let header = section_header("Imports");
        assert_eq!(header.len(), 80);
        assert!(header.starts_with("# Imports --"));
    }

    #[test]
    fn impure_calls_are_generated_with_their_imports() {
        let mut f = Fixture::new();
        let function = f.b.function("f", vec![], vec![], Purity::Unspecified);
        f.members(&[function]);
        let call = f.b.call_of(function, vec![]);
        let statement = f.b.expression_statement(call);
        pipeline_body(&mut f, vec![statement]);
        let ast = f.finish();

        let expected = format!(
            "{}\n\nfrom tests.fixture import f\n\n{}\n\ndef p():\n    f()\n",
            section_header("Imports"),
            section_header("Pipelines")
        );
        assert_eq!(generate(&ast, &GenerateOptions::default()), expected);
    }

    #[test]
    fn empty_pipelines_pass() {
        let mut f = Fixture::new();
        pipeline_body(&mut f, vec![]);
        let ast = f.finish();

        let expected = format!("{}\n\ndef p():\n    pass\n", section_header("Pipelines"));
        assert_eq!(generate(&ast, &GenerateOptions::default()), expected);
    }

    #[test]
    fn statements_without_effect_are_dropped_and_constants_folded() {
        let mut f = Fixture::new();
        let first = f.b.result("first", None);
        let second = f.b.result("second", None);
        let two = f.b.function("two", vec![], vec![first, second], Purity::Pure);
        f.members(&[two]);

        let call = f.b.call_of(two, vec![]);
        let dropped = f.b.expression_statement(call);
        let wildcard = f.b.wildcard();
        let call = f.b.call_of(two, vec![]);
        let ignored = f.b.assignment(vec![wildcard], call);
        let x = f.b.placeholder("x");
        let call = f.b.call_of(two, vec![]);
        let padded = f.b.assignment(vec![x], call);
        let one = f.b.int(1);
        let two_literal = f.b.int(2);
        let sum = f.b.infix(InfixOperator::Plus, one, two_literal);
        let y = f.b.placeholder("y");
        let folded = f.b.assignment(vec![y], sum);
        pipeline_body(&mut f, vec![dropped, ignored, padded, folded]);
        let ast = f.finish();

        let generated = generate(&ast, &without_runner());
        assert!(
            generated.ends_with("def p():\n    __gen_placeholder_x, _ = two()\n    __gen_placeholder_y = 3\n"),
            "{generated}"
        );
        assert!(!generated.contains("safeds_runner"));
    }

    #[test]
    fn assignees_beyond_the_produced_values_are_dropped() {
        let mut f = Fixture::new();
        let only = f.b.result("only", None);
        let one = f.b.function("one", vec![], vec![only], Purity::Unspecified);
        f.members(&[one]);

        let call = f.b.call_of(one, vec![]);
        let a = f.b.placeholder("a");
        let b = f.b.placeholder("b");
        let assignment = f.b.assignment(vec![a, b], call);
        pipeline_body(&mut f, vec![assignment]);
        let ast = f.finish();

        let plain = generate(&ast, &without_runner());
        assert!(plain.ends_with("def p():\n    __gen_placeholder_a = one()\n"), "{plain}");

        let generated = generate(&ast, &GenerateOptions::default());
        assert!(generated.contains("safeds_runner.save_placeholder('a', __gen_placeholder_a)"));
        assert!(!generated.contains("__gen_placeholder_b"), "{generated}");
    }

    /// `apply(callback)` with a result, and a segment `helper` yielding 1.
    fn apply_and_helper(f: &mut Fixture) -> (NodeId, NodeId) {
        let callback = f.b.parameter("callback", None);
        let applied = f.b.result("applied", None);
        let apply = f.b.function("apply", vec![callback], vec![applied], Purity::Pure);

        let r = f.b.result("r", None);
        let one = f.b.int(1);
        let yield_r = f.b.yield_to(r);
        let yielded = f.b.assignment(vec![yield_r], one);
        let body = f.b.block(vec![yielded]);
        let helper = f.b.segment("helper", vec![], vec![r], body);
        f.members(&[apply, helper]);
        (apply, helper)
    }

    fn apply_to(f: &mut Fixture, apply: NodeId, lambda: NodeId) {
        let call = f.b.call_of(apply, vec![lambda]);
        let t = f.b.placeholder("t");
        let assignment = f.b.assignment(vec![t], call);
        pipeline_body(f, vec![assignment]);
    }

    #[test]
    fn lambdas_calling_segments_prevent_memoization() {
        let mut f = Fixture::new();
        let (apply, helper) = apply_and_helper(&mut f);
        let result = f.b.call_of(helper, vec![]);
        let lambda = f.b.add(NodeKind::ExpressionLambda {
            parameters: vec![],
            result,
        });
        apply_to(&mut f, apply, lambda);
        let ast = f.finish();

        let generated = generate(&ast, &GenerateOptions::default());
        assert!(generated.contains("    __gen_placeholder_t = apply(__gen_lambda_0)\n"), "{generated}");
        assert!(!generated.contains("memoized_static_call"), "{generated}");
    }

    #[test]
    fn block_lambdas_calling_segments_prevent_memoization() {
        let mut f = Fixture::new();
        let (apply, helper) = apply_and_helper(&mut f);
        let value = f.b.call_of(helper, vec![]);
        let result = f.b.add(NodeKind::BlockLambdaResult {
            name: "value".to_string(),
        });
        let assignment = f.b.assignment(vec![result], value);
        let body = f.b.block(vec![assignment]);
        let lambda = f.b.add(NodeKind::BlockLambda {
            parameters: vec![],
            body,
        });
        apply_to(&mut f, apply, lambda);
        let ast = f.finish();

        let generated = generate(&ast, &GenerateOptions::default());
        assert!(generated.contains("    __gen_placeholder_t = apply(__gen_lambda_0)\n"), "{generated}");
        assert!(!generated.contains("memoized_static_call"), "{generated}");
    }

    #[test]
    fn pure_lambdas_keep_calls_memoizable() {
        let mut f = Fixture::new();
        let (apply, _) = apply_and_helper(&mut f);
        let result = f.b.int(1);
        let lambda = f.b.add(NodeKind::ExpressionLambda {
            parameters: vec![],
            result,
        });
        apply_to(&mut f, apply, lambda);
        let ast = f.finish();

        let generated = generate(&ast, &GenerateOptions::default());
        assert!(
            generated.contains("__gen_placeholder_t = safeds_runner.memoized_static_call(\n        \"tests.fixture.apply\","),
            "{generated}"
        );
    }

    #[test]
    fn file_reads_are_memoized_with_their_modification_time() {
        let mut f = Fixture::new();
        let path = f.b.parameter("path", None);
        let result = f.b.result("table", None);
        let read = f.b.function("read", vec![path], vec![result], reads(path));
        f.members(&[read]);

        let file = f.b.string("a.csv");
        let call = f.b.call_of(read, vec![file]);
        let t = f.b.placeholder("t");
        let assignment = f.b.assignment(vec![t], call);
        pipeline_body(&mut f, vec![assignment]);
        let ast = f.finish();

        let generated = generate(&ast, &GenerateOptions::default());
        let expected_body = "\
def p():
    __gen_placeholder_t = safeds_runner.memoized_static_call(
        \"tests.fixture.read\",
        read,
        [safeds_runner.absolute_path('a.csv')],
        {},
        [safeds_runner.file_mtime('a.csv')]
    )
    safeds_runner.save_placeholder('t', __gen_placeholder_t)
";
        assert!(generated.ends_with(expected_body), "{generated}");
        assert!(generated.contains("import safeds_runner\nfrom tests.fixture import read\n"));

        let plain = generate(&ast, &without_runner());
        assert!(plain.ends_with("def p():\n    __gen_placeholder_t = read('a.csv')\n"), "{plain}");
    }

    #[test]
    fn optional_parameters_are_passed_by_keyword_in_declaration_order() {
        let mut f = Fixture::new();
        let a = f.b.parameter("a", None);
        let default = f.b.int(0);
        let b = f.b.optional_parameter("b", None, default);
        let function = f.b.function("g", vec![a, b], vec![], Purity::Unspecified);
        f.members(&[function]);

        let two = f.b.int(2);
        let named = f.b.named_argument(b, two);
        let one = f.b.int(1);
        let positional = f.b.named_argument(a, one);
        let receiver = f.b.reference(function);
        let call = f.b.call(receiver, vec![named, positional]);
        let statement = f.b.expression_statement(call);
        pipeline_body(&mut f, vec![statement]);
        let ast = f.finish();

        let generated = generate(&ast, &GenerateOptions::default());
        assert!(generated.ends_with("    g(1, b=2)\n"), "{generated}");
    }

    #[test]
    fn boolean_operators_are_eager_only_for_booleans() {
        let mut f = Fixture::new();
        let boolean = f.b.named_type(f.core.boolean, false);
        let a = f.b.parameter("a", Some(boolean));
        let boolean = f.b.named_type(f.core.boolean, false);
        let b = f.b.parameter("b", Some(boolean));
        let c = f.b.parameter("c", None);
        let r = f.b.result("r", None);
        let s = f.b.result("s", None);

        let left = f.b.reference(a);
        let right = f.b.reference(b);
        let conjunction = f.b.infix(InfixOperator::And, left, right);
        let yield_r = f.b.yield_to(r);
        let first = f.b.assignment(vec![yield_r], conjunction);
        let left = f.b.reference(a);
        let right = f.b.reference(c);
        let disjunction = f.b.infix(InfixOperator::Or, left, right);
        let yield_s = f.b.yield_to(s);
        let second = f.b.assignment(vec![yield_s], disjunction);
        let body = f.b.block(vec![first, second]);
        let segment = f.b.segment("s", vec![a, b, c], vec![r, s], body);
        f.members(&[segment]);
        let ast = f.finish();

        let generated = generate(&ast, &GenerateOptions::default());
        assert!(generated.contains(
            "def s(a, b, c):\n    __gen_yield_r = __gen_eager_and(a, b)\n    __gen_yield_s = (a) | (c)\n    return __gen_yield_r, __gen_yield_s\n"
        ), "{generated}");
        assert!(generated.contains(&section_header("Utils")));
        assert!(generated.contains("def __gen_eager_and(left_operand: bool, right_operand: bool) -> bool:\n    return left_operand and right_operand"));
        assert!(!generated.contains("def __gen_eager_or"));
    }

    #[test]
    fn elvis_and_identity_use_python_spellings() {
        let mut f = Fixture::new();
        let a = f.b.parameter("a", None);
        let b = f.b.parameter("b", None);
        let r = f.b.result("r", None);
        let s = f.b.result("s", None);

        let left = f.b.reference(a);
        let right = f.b.reference(b);
        let elvis = f.b.infix(InfixOperator::Elvis, left, right);
        let yield_r = f.b.yield_to(r);
        let first = f.b.assignment(vec![yield_r], elvis);
        let left = f.b.reference(a);
        let right = f.b.reference(b);
        let identical = f.b.infix(InfixOperator::NotIdenticalTo, left, right);
        let yield_s = f.b.yield_to(s);
        let second = f.b.assignment(vec![yield_s], identical);
        let body = f.b.block(vec![first, second]);
        let segment = f.b.segment("s", vec![a, b], vec![r, s], body);
        f.members(&[segment]);
        let ast = f.finish();

        let generated = generate(&ast, &GenerateOptions::default());
        assert!(generated.contains("__gen_yield_r = __gen_eager_elvis(a, b)"));
        assert!(generated.contains("__gen_yield_s = (a) is not (b)"));
        assert!(generated.contains("from typing import TypeVar\n"));
        assert!(generated.contains(&format!(
            "{}\n\n__gen_T = TypeVar(\"__gen_T\")\n",
            section_header("Type variables")
        )));
    }

    #[test]
    fn lambdas_are_hoisted_before_their_statement() {
        let mut f = Fixture::new();
        let callback = f.b.parameter("callback", None);
        let function = f.b.function("f", vec![callback], vec![], Purity::Unspecified);
        f.members(&[function]);

        let x = f.b.parameter("x", None);
        let read_x = f.b.reference(x);
        let one = f.b.int(1);
        let sum = f.b.infix(InfixOperator::Plus, read_x, one);
        let lambda = f.b.add(NodeKind::ExpressionLambda {
            parameters: vec![x],
            result: sum,
        });
        let call = f.b.call_of(function, vec![lambda]);
        let statement = f.b.expression_statement(call);
        pipeline_body(&mut f, vec![statement]);
        let ast = f.finish();

        let generated = generate(&ast, &GenerateOptions::default());
        assert!(
            generated.ends_with("def p():\n    def __gen_lambda_0(x):\n        return (x) + (1)\n    f(__gen_lambda_0)\n"),
            "{generated}"
        );
    }

    #[test]
    fn macros_substitute_arguments_and_the_receiver() {
        let mut f = Fixture::new();
        let a = f.b.parameter("a", None);
        let b = f.b.parameter("b", None);
        let concat = f.b.function("concat", vec![a, b], vec![], Purity::Pure);
        if let Some(NodeKind::Function { python_macro, .. }) = f.b.kind_mut(concat) {
            *python_macro = Some("$a + $b".to_string());
        }
        let shout = f.b.function("shout", vec![], vec![], Purity::Pure);
        if let Some(NodeKind::Function { python_macro, .. }) = f.b.kind_mut(shout) {
            *python_macro = Some("$this.upper()".to_string());
        }
        let text = f.b.class("Text", None, vec![]);
        if let Some(NodeKind::Class { members, .. }) = f.b.kind_mut(text) {
            members.push(shout);
        }
        f.members(&[concat, text]);

        let text_type = f.b.named_type(text, false);
        let t = f.b.parameter("t", Some(text_type));
        let r = f.b.result("r", None);
        let s = f.b.result("s", None);

        let read_t = f.b.reference(t);
        let suffix = f.b.string("y");
        let joined = f.b.call_of(concat, vec![read_t, suffix]);
        let yield_r = f.b.yield_to(r);
        let first = f.b.assignment(vec![yield_r], joined);
        let read_t = f.b.reference(t);
        let method = f.b.member_access(read_t, shout, false);
        let shouted = f.b.call(method, vec![]);
        let yield_s = f.b.yield_to(s);
        let second = f.b.assignment(vec![yield_s], shouted);
        let body = f.b.block(vec![first, second]);
        let segment = f.b.segment("s", vec![t], vec![r, s], body);
        f.members(&[segment]);
        let ast = f.finish();

        let generated = generate(&ast, &GenerateOptions::default());
        assert!(generated.contains("    __gen_yield_r = ((t) + ('y'))\n"), "{generated}");
        assert!(
            generated.contains("    __gen_receiver_0 = t\n    __gen_yield_s = ((__gen_receiver_0).upper())\n"),
            "{generated}"
        );
    }

    #[test]
    fn pure_methods_are_memoized_on_their_receiver() {
        let mut f = Fixture::new();
        let fit = f.b.function("fit", vec![], vec![], Purity::Pure);
        let model_class = f.b.class("Model", None, vec![]);
        if let Some(NodeKind::Class { members, .. }) = f.b.kind_mut(model_class) {
            members.push(fit);
        }
        f.members(&[model_class]);

        let model_type = f.b.named_type(model_class, false);
        let m = f.b.parameter("m", Some(model_type));
        let read_m = f.b.reference(m);
        let method = f.b.member_access(read_m, fit, false);
        let call = f.b.call(method, vec![]);
        let r = f.b.result("r", None);
        let yield_r = f.b.yield_to(r);
        let assignment = f.b.assignment(vec![yield_r], call);
        let body = f.b.block(vec![assignment]);
        let segment = f.b.segment("train", vec![m], vec![r], body);
        f.members(&[segment]);
        let ast = f.finish();

        let generated = generate(&ast, &GenerateOptions::default());
        let expected = "\
def train(m):
    __gen_receiver_0 = m
    __gen_yield_r = safeds_runner.memoized_dynamic_call(
        __gen_receiver_0,
        \"fit\",
        [],
        {},
        []
    )
    return __gen_yield_r
";
        assert!(generated.contains(expected), "{generated}");
    }

    #[test]
    fn target_statements_keep_only_what_they_need() {
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
        pipeline_body(&mut f, vec![define_a, define_b, define_c]);
        let ast = f.finish();

        let options = GenerateOptions {
            target_statements: Some(vec![2]),
            disable_runner_integration: true,
            ..GenerateOptions::default()
        };
        let generated = generate(&ast, &options);
        assert!(
            generated.ends_with("def p():\n    __gen_placeholder_a = 1\n    __gen_placeholder_c = 4\n"),
            "{generated}"
        );
    }

    #[test]
    fn targeted_output_statements_save_their_values() {
        let mut f = Fixture::new();
        let one = f.b.int(1);
        let two = f.b.int(2);
        let sum = f.b.infix(InfixOperator::Plus, one, two);
        let output = f.b.add(NodeKind::OutputStatement { expression: sum });
        pipeline_body(&mut f, vec![output]);
        let ast = f.finish();

        let targeted = GenerateOptions {
            target_statements: Some(vec![0]),
            ..GenerateOptions::default()
        };
        let generated = generate(&ast, &targeted);
        assert!(
            generated.ends_with(
                "def p():\n    __gen_output_0_expression = 3\n    safeds_runner.save_placeholder('__gen_0_expression', __gen_output_0_expression)\n"
            ),
            "{generated}"
        );

        let untargeted = generate(&ast, &GenerateOptions::default());
        assert!(untargeted.ends_with("def p():\n    3\n"), "{untargeted}");
    }

    #[test]
    fn template_strings_become_f_strings() {
        let mut f = Fixture::new();
        let x = f.b.parameter("x", None);
        let start = f.b.add(NodeKind::TemplateStringPart {
            position: TemplatePosition::Start,
            value: "n = ".to_string(),
        });
        let read_x = f.b.reference(x);
        let end = f.b.add(NodeKind::TemplateStringPart {
            position: TemplatePosition::End,
            value: "!".to_string(),
        });
        let template = f.b.add(NodeKind::TemplateString {
            expressions: vec![start, read_x, end],
        });
        let r = f.b.result("r", None);
        let yield_r = f.b.yield_to(r);
        let assignment = f.b.assignment(vec![yield_r], template);
        let body = f.b.block(vec![assignment]);
        let segment = f.b.segment("s", vec![x], vec![r], body);
        f.members(&[segment]);
        let ast = f.finish();

        let generated = generate(&ast, &GenerateOptions::default());
        assert!(generated.contains("__gen_yield_r = f'n = { x }!'"), "{generated}");
    }

    #[test]
    fn splits_macro_templates() {
        assert_eq!(
            split_macro("$this.f($a_1, 2$) + $"),
            vec![
                MacroPart::Parameter("this"),
                MacroPart::Text(".f("),
                MacroPart::Parameter("a_1"),
                MacroPart::Text(", 2$) + $"),
            ]
        );
    }

    #[test]
    fn imports_are_grouped_and_sorted() {
        let mut f = Fixture::new();
        pipeline_body(&mut f, vec![]);
        let ast = f.finish();
        let cache = SemanticCache::default();
        let model = SemanticModel::new(&ast, &cache).expect("core classes");
        let options = GenerateOptions::default();
        let module = ast.modules().next().expect("a module");
        let mut generator = PythonGenerator::new(&model, &options, module);
        generator.add_import(ImportData::named("pkg", "g"));
        generator.add_import(ImportData::qualified("safeds_runner"));
        generator.add_import(ImportData::named("pkg", "Outer"));
        generator.add_import(ImportData::named("pkg", "f"));
        generator.add_import(ImportData::named("pkg", "f"));
        generator.add_import(ImportData::named("alpha", "x"));

        assert_eq!(
            generator.import_lines(),
            vec![
                "import safeds_runner".to_string(),
                "from alpha import x".to_string(),
                "from pkg import f, g, Outer".to_string(),
            ]
        );
    }
}
