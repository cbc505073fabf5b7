// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Small helpers for composing failure messages: indentation and shortened file quotes.

/// Indent every line by two spaces.
pub fn tab(text: &str) -> String {
    text.lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Shorten text to at most `max_lines` lines of at most `max_chars` characters, keeping the
/// head and marking the elision.
pub fn short_text(text: &str, max_lines: usize, max_chars: usize) -> String {
    let mut lines: Vec<String> = text
        .lines()
        .map(|line| {
            if line.chars().count() > max_chars {
                let mut shortened: String = line.chars().take(max_chars - 1).collect();
                shortened.push('…');
                shortened
            } else {
                line.to_owned()
            }
        })
        .collect();
    if lines.len() > max_lines {
        lines.truncate(max_lines - 1);
        lines.push("[…]".to_owned());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tab_indents_every_line() {
        assert_eq!(tab("a\nb"), "  a\n  b");
    }

    #[test]
    fn short_text_truncates_lines_and_columns() {
        let long = "x".repeat(200);
        let shortened = short_text(&long, 10, 100);
        assert_eq!(shortened.chars().count(), 100);
        assert!(shortened.ends_with('…'));

        let many = (0..20).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let shortened = short_text(&many, 5, 100);
        assert_eq!(shortened.lines().count(), 5);
        assert!(shortened.ends_with("[…]"));
    }
}
