//! Source normalization for code blocks
//!
//! Snippets embedded in content are usually indented along with the
//! surrounding markup. Python rejects unexpected indentation, so every
//! block is dedented before it reaches the interpreter.

/// Remove the minimum common leading whitespace shared by all non-blank lines.
///
/// Relative indentation is preserved, blank lines become empty, and blank
/// space around the block is dropped.
pub fn dedent(source: &str) -> String {
    let lines: Vec<&str> = source.split('\n').collect();

    // Single line with no leading indent passes through unchanged
    if lines.len() == 1 && !starts_with_whitespace(lines[0]) {
        return source.to_string();
    }

    let min_indent = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| indent_width(line))
        .min();

    let body = match min_indent {
        None => return String::new(),
        Some(0) => source.to_string(),
        Some(width) => lines
            .iter()
            .map(|line| {
                if line.trim().is_empty() {
                    ""
                } else {
                    strip_chars(line, width)
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
    };

    trim_blank_edges(&body)
}

fn starts_with_whitespace(line: &str) -> bool {
    line.chars().next().is_some_and(char::is_whitespace)
}

fn indent_width(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

fn strip_chars(line: &str, count: usize) -> &str {
    match line.char_indices().nth(count) {
        Some((idx, _)) => &line[idx..],
        None => "",
    }
}

/// Drop leading blank lines and trailing whitespace, keeping the first
/// line's own indentation intact.
fn trim_blank_edges(text: &str) -> String {
    let mut lines: Vec<&str> = text.split('\n').collect();
    while lines.first().is_some_and(|l| l.trim().is_empty()) {
        lines.remove(0);
    }
    lines.join("\n").trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedent_common_indent() {
        assert_eq!(dedent("    a\n    b\n"), "a\nb");
    }

    #[test]
    fn test_dedent_zero_min_indent() {
        assert_eq!(dedent("a\n  b\n"), "a\n  b");
    }

    #[test]
    fn test_dedent_all_blank() {
        assert_eq!(dedent("   \n\t\n  "), "");
        assert_eq!(dedent(""), "");
    }

    #[test]
    fn test_dedent_single_line_passthrough() {
        assert_eq!(dedent("print('hi')"), "print('hi')");
        assert_eq!(dedent("    print('hi')"), "print('hi')");
    }

    #[test]
    fn test_dedent_preserves_relative_indent() {
        let source = "\n    for i in range(3):\n        print(i)\n\n    print('done')\n";
        assert_eq!(dedent(source), "for i in range(3):\n    print(i)\n\nprint('done')");
    }

    #[test]
    fn test_dedent_blank_lines_with_spaces() {
        assert_eq!(dedent("  x = 1\n \n  y = 2"), "x = 1\n\ny = 2");
    }
}
