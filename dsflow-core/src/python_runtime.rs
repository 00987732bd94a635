//! Names reserved in generated Python code and the helper functions the
//! generator may emit into a module.

pub const CODEGEN_PREFIX: &str = "__gen_";
pub const LAMBDA_PREFIX: &str = "__gen_lambda_";
pub const BLOCK_LAMBDA_RESULT_PREFIX: &str = "__gen_block_lambda_result_";
pub const OUTPUT_PREFIX: &str = "__gen_output_";
pub const PLACEHOLDER_PREFIX: &str = "__gen_placeholder_";
pub const RECEIVER_PREFIX: &str = "__gen_receiver_";
pub const YIELD_PREFIX: &str = "__gen_yield_";

pub const RUNNER_PACKAGE: &str = "safeds_runner";
pub const MEMOIZED_DYNAMIC_CALL: &str = "safeds_runner.memoized_dynamic_call";
pub const MEMOIZED_STATIC_CALL: &str = "safeds_runner.memoized_static_call";
pub const SAVE_PLACEHOLDER: &str = "safeds_runner.save_placeholder";
pub const ABSOLUTE_PATH: &str = "safeds_runner.absolute_path";
pub const FILE_MTIME: &str = "safeds_runner.file_mtime";

const TYPE_VARIABLE: &str = "__gen_T";

/// A helper emitted once per module that uses it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct UtilityFunction {
    pub name: &'static str,
    pub code: &'static str,
    /// `(module, name)` pairs the helper needs imported.
    pub imports: &'static [(&'static str, &'static str)],
    pub type_variables: &'static [&'static str],
}

pub static EAGER_OR: UtilityFunction = UtilityFunction {
    name: "__gen_eager_or",
    code: "def __gen_eager_or(left_operand: bool, right_operand: bool) -> bool:\n    return left_operand or right_operand",
    imports: &[],
    type_variables: &[],
};

pub static EAGER_AND: UtilityFunction = UtilityFunction {
    name: "__gen_eager_and",
    code: "def __gen_eager_and(left_operand: bool, right_operand: bool) -> bool:\n    return left_operand and right_operand",
    imports: &[],
    type_variables: &[],
};

pub static EAGER_ELVIS: UtilityFunction = UtilityFunction {
    name: "__gen_eager_elvis",
    code: "def __gen_eager_elvis(left_operand: __gen_T, right_operand: __gen_T) -> __gen_T:\n    return left_operand if left_operand is not None else right_operand",
    imports: &[],
    type_variables: &[TYPE_VARIABLE],
};

pub static NULL_SAFE_CALL: UtilityFunction = UtilityFunction {
    name: "__gen_null_safe_call",
    code: "def __gen_null_safe_call(receiver: Any, callable: Callable[[], __gen_T]) -> __gen_T | None:\n    return callable() if receiver is not None else None",
    imports: &[("typing", "Any"), ("typing", "Callable")],
    type_variables: &[TYPE_VARIABLE],
};

pub static NULL_SAFE_INDEXED_ACCESS: UtilityFunction = UtilityFunction {
    name: "__gen_null_safe_indexed_access",
    code: "def __gen_null_safe_indexed_access(receiver: Any, index: Any) -> __gen_T | None:\n    return receiver[index] if receiver is not None else None",
    imports: &[("typing", "Any")],
    type_variables: &[TYPE_VARIABLE],
};

pub static NULL_SAFE_MEMBER_ACCESS: UtilityFunction = UtilityFunction {
    name: "__gen_null_safe_member_access",
    code: "def __gen_null_safe_member_access(receiver: Any, member_name: str) -> __gen_T | None:\n    return getattr(receiver, member_name) if receiver is not None else None",
    imports: &[("typing", "Any")],
    type_variables: &[TYPE_VARIABLE],
};

/// Every helper, in the order they are emitted.
pub static UTILITY_FUNCTIONS: [&UtilityFunction; 6] = [
    &EAGER_OR,
    &EAGER_AND,
    &EAGER_ELVIS,
    &NULL_SAFE_CALL,
    &NULL_SAFE_INDEXED_ACCESS,
    &NULL_SAFE_MEMBER_ACCESS,
];

/// File name stem of the generated module for an input file stem.
pub fn generated_file_name(stem: &str) -> String {
    format!("gen_{}", sanitize_module_name(stem))
}

/// Turns a file stem into a valid Python module name: URL-encoded spaces,
/// spaces, dots and dashes become underscores; other non-word characters
/// are dropped.
pub fn sanitize_module_name(name: &str) -> String {
    name.replace("%2520", "_")
        .chars()
        .filter_map(|it| match it {
            ' ' | '.' | '-' => Some('_'),
            it if it.is_alphanumeric() || it == '_' => Some(it),
            _ => None,
        })
        .collect()
}

/// Single-line Python string content.
pub fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for it in value.chars() {
        match it {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            it => out.push(it),
        }
    }
    out
}

/// Python spelling of a float literal; integral values keep a `.0`.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "float('nan')".to_string()
    } else if value.is_infinite() {
        if value > 0.0 {
            "float('inf')".to_string()
        } else {
            "float('-inf')".to_string()
        }
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else if value.fract() == 0.0 {
        format!("{value:e}")
    } else {
        format!("{value}")
    }
}
