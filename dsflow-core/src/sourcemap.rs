//! Source Map v3 for generated Python modules.

use serde::Serialize;

use crate::ast::{Ast, Position};
use crate::code::{Rendered, TraceRegion};
use crate::error::CoreError;

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Mapping {
    pub generated: Position,
    pub original: Position,
}

#[derive(Debug, Serialize)]
struct SourceMapJson<'a> {
    version: u32,
    file: &'a str,
    sources: [&'a str; 1],
    names: [&'a str; 0],
    mappings: String,
}

/// Mappings for the traced regions of `rendered` whose nodes carry spans.
///
/// Each region maps its start. Leaf regions whose text contains no
/// whitespace also map their end.
pub fn collect_mappings(ast: &Ast, rendered: &Rendered) -> Vec<Mapping> {
    let mut mappings = Vec::new();
    let mut stack: Vec<&TraceRegion> = rendered.regions.iter().rev().collect();

    while let Some(region) = stack.pop() {
        stack.extend(region.children.iter().rev());

        let Some(span) = ast.span(region.node) else {
            continue;
        };
        if region.children.first().is_some_and(|it| it.offset == region.offset) {
            continue;
        }

        mappings.push(Mapping {
            generated: region.start,
            original: span.start,
        });

        let text = &rendered.text[region.offset..region.end_offset];
        if region.children.is_empty()
            && span.start != span.end
            && !text.is_empty()
            && !text.chars().any(char::is_whitespace)
        {
            mappings.push(Mapping {
                generated: region.end,
                original: span.end,
            });
        }
    }

    mappings.sort();
    mappings.dedup();
    mappings
}

/// JSON source map of one generated file with a single source.
pub fn encode(file: &str, source: &str, mappings: &[Mapping]) -> Result<String, CoreError> {
    let json = SourceMapJson {
        version: 3,
        file,
        sources: [source],
        names: [],
        mappings: encode_mappings(mappings),
    };
    Ok(serde_json::to_string(&json)?)
}

/// The `mappings` field: lines separated by `;`, segments by `,`. Each
/// segment holds the generated column, source index, original line and
/// original column as deltas to the previous segment.
fn encode_mappings(mappings: &[Mapping]) -> String {
    let mut out = String::new();
    let mut line = 0;
    let mut previous_generated_column = 0i64;
    let mut previous_original = (0i64, 0i64);
    let mut first_on_line = true;

    for mapping in mappings {
        while line < mapping.generated.line {
            out.push(';');
            line += 1;
            previous_generated_column = 0;
            first_on_line = true;
        }
        if !first_on_line {
            out.push(',');
        }
        first_on_line = false;

        let column = i64::from(mapping.generated.column);
        let original = (
            i64::from(mapping.original.line),
            i64::from(mapping.original.column),
        );
        encode_vlq(&mut out, column - previous_generated_column);
        encode_vlq(&mut out, 0);
        encode_vlq(&mut out, original.0 - previous_original.0);
        encode_vlq(&mut out, original.1 - previous_original.1);

        previous_generated_column = column;
        previous_original = original;
    }
    out
}

fn encode_vlq(out: &mut String, value: i64) {
    let mut rest = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };
    loop {
        let mut digit = rest & 0b11111;
        rest >>= 5;
        if rest > 0 {
            digit |= 0b100000;
        }
        out.push(char::from(BASE64[digit as usize]));
        if rest == 0 {
            break;
        }
    }
}
