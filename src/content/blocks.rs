//! `<CodeBlock />` extraction from section bodies
//!
//! Recognized props:
//! - `initialCode={`...`}` or `initialCode="..."`
//! - `isPlot` / `isPlot={true}` (default false)
//! - `showOutput={false}` (default true)

use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

use crate::core::utils::cached_regex;

/// A runnable snippet embedded in a section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlockSpec {
    pub initial_code: String,
    pub show_output: bool,
    pub is_plot: bool,
}

fn tag_start() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached_regex(&RE, r"<CodeBlock\b")
}

fn attribute() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached_regex(
        &RE,
        r#"(?s)^\s*([A-Za-z_][A-Za-z0-9_]*)(?:\s*=\s*(?:\{\s*`((?:[^`\\]|\\.)*)`\s*\}|\{([^}]*)\}|"([^"]*)"))?"#,
    )
}

fn tag_end() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached_regex(&RE, r"^\s*/?>")
}

/// Every code block in `body`, in document order
pub fn extract_code_blocks(body: &str) -> Vec<CodeBlockSpec> {
    let mut blocks = Vec::new();
    let Some(tag_start) = tag_start() else {
        return blocks;
    };
    let mut cursor = 0;

    while let Some(start) = tag_start.find_at(body, cursor) {
        match parse_tag(&body[start.end()..]) {
            Some((block, consumed)) => {
                cursor = start.end() + consumed;
                blocks.push(block);
            }
            None => {
                warn!("Skipping malformed CodeBlock at byte {}", start.start());
                cursor = start.end();
            }
        }
    }

    blocks
}

/// Parse props up to the closing `/>`, returning the block and bytes consumed
fn parse_tag(rest: &str) -> Option<(CodeBlockSpec, usize)> {
    let mut block = CodeBlockSpec {
        initial_code: String::new(),
        show_output: true,
        is_plot: false,
    };
    let (tag_end, attribute) = (tag_end()?, attribute()?);
    let mut offset = 0;

    loop {
        if let Some(end) = tag_end.find(&rest[offset..]) {
            return Some((block, offset + end.end()));
        }

        let caps = attribute.captures(&rest[offset..])?;
        let whole = caps.get(0)?;
        let name = caps.get(1)?.as_str();

        let template = caps.get(2).map(|m| unescape_template(m.as_str()));
        let expression = caps.get(3).map(|m| m.as_str().trim().to_string());
        let quoted = caps.get(4).map(|m| m.as_str().to_string());

        match name {
            "initialCode" => {
                block.initial_code = template.or(quoted).or(expression).unwrap_or_default();
            }
            "isPlot" => block.is_plot = flag(expression.as_deref()),
            "showOutput" => block.show_output = flag(expression.as_deref()),
            _ => {}
        }

        offset += whole.end();
    }
}

/// A bare prop is `true`; `{false}` is the only way to turn one off
fn flag(expression: Option<&str>) -> bool {
    !matches!(expression, Some("false"))
}

fn unescape_template(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next @ ('`' | '\\' | '$')) => out.push(next),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}
