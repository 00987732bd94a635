//! Generated text that remembers which syntax node produced each piece.
//!
//! The code generator assembles [`Code`] values bottom-up. Rendering lays
//! out lines and indentation and yields the final text together with the
//! traced regions needed for source maps.

use std::fmt;

use crate::ast::{NodeId, Position};

const INDENT: &str = "    ";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Text(String),
    NewLine,
    /// Every line started inside is indented one level deeper.
    Indent(Code),
    Traced(NodeId, Code),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Code {
    parts: Vec<Part>,
}

/// Range of the rendered text produced for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRegion {
    pub node: NodeId,
    pub start: Position,
    pub end: Position,
    /// Byte offsets into the rendered text.
    pub offset: usize,
    pub end_offset: usize,
    pub children: Vec<TraceRegion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    pub regions: Vec<TraceRegion>,
}

impl Code {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(text: impl Into<String>) -> Self {
        let mut code = Code::new();
        code.push_text(text);
        code
    }

    pub fn traced(node: NodeId, code: impl Into<Code>) -> Self {
        Code {
            parts: vec![Part::Traced(node, code.into())],
        }
    }

    /// `items` separated by `separator`.
    pub fn join(items: impl IntoIterator<Item = Code>, separator: &str) -> Self {
        let mut code = Code::new();
        for (index, item) in items.into_iter().enumerate() {
            if index > 0 {
                code.push_text(separator);
            }
            code.push(item);
        }
        code
    }

    /// `items` on consecutive lines.
    pub fn lines(items: impl IntoIterator<Item = Code>) -> Self {
        let mut code = Code::new();
        for (index, item) in items.into_iter().enumerate() {
            if index > 0 {
                code.push_newline();
            }
            code.push(item);
        }
        code
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|part| match part {
            Part::Text(text) => text.is_empty(),
            Part::NewLine => false,
            Part::Indent(code) | Part::Traced(_, code) => code.is_empty(),
        })
    }

    pub fn push(&mut self, code: impl Into<Code>) {
        self.parts.extend(code.into().parts);
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.parts.push(Part::Text(text));
        }
    }

    pub fn push_newline(&mut self) {
        self.parts.push(Part::NewLine);
    }

    pub fn push_indented(&mut self, code: Code) {
        self.parts.push(Part::Indent(code));
    }

    pub fn append(mut self, code: impl Into<Code>) -> Self {
        self.push(code);
        self
    }

    pub fn newline(mut self) -> Self {
        self.push_newline();
        self
    }

    pub fn indented(mut self, code: Code) -> Self {
        self.push_indented(code);
        self
    }

    pub fn render(&self) -> Rendered {
        let mut renderer = Renderer {
            at_line_start: true,
            ..Renderer::default()
        };
        let regions = renderer.render(self);
        Rendered {
            text: renderer.out,
            regions,
        }
    }

    /// Whether rendering starts by writing text on the current line.
    fn starts_with_text(&self) -> bool {
        for part in &self.parts {
            match part {
                Part::Text(text) if text.is_empty() => continue,
                Part::Text(_) => return true,
                Part::NewLine | Part::Indent(_) => return false,
                Part::Traced(_, code) if code.is_empty() => continue,
                Part::Traced(_, code) => return code.starts_with_text(),
            }
        }
        false
    }
}

impl From<&str> for Code {
    fn from(text: &str) -> Self {
        Code::text(text)
    }
}

impl From<String> for Code {
    fn from(text: String) -> Self {
        Code::text(text)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render().text)
    }
}

#[derive(Default)]
struct Renderer {
    out: String,
    line: u32,
    column: u32,
    depth: usize,
    at_line_start: bool,
}

impl Renderer {
    fn render(&mut self, code: &Code) -> Vec<TraceRegion> {
        let mut regions = Vec::new();
        for part in &code.parts {
            match part {
                Part::Text(text) => self.write(text),
                Part::NewLine => {
                    self.out.push('\n');
                    self.line += 1;
                    self.column = 0;
                    self.at_line_start = true;
                }
                Part::Indent(inner) => {
                    self.depth += 1;
                    regions.extend(self.render(inner));
                    self.depth -= 1;
                }
                Part::Traced(node, inner) => {
                    if inner.starts_with_text() {
                        self.flush_indent();
                    }
                    let start = self.position();
                    let offset = self.out.len();
                    let children = self.render(inner);
                    regions.push(TraceRegion {
                        node: *node,
                        start,
                        end: self.position(),
                        offset,
                        end_offset: self.out.len(),
                        children,
                    });
                }
            }
        }
        regions
    }

    fn write(&mut self, text: &str) {
        self.flush_indent();
        self.out.push_str(text);
        self.column += text.chars().count() as u32;
    }

    fn flush_indent(&mut self) {
        if self.at_line_start {
            self.at_line_start = false;
            for _ in 0..self.depth {
                self.out.push_str(INDENT);
            }
            self.column += (self.depth * INDENT.len()) as u32;
        }
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }
}
