//! Markdown post-processing helpers.

/// Convert `\[...\]` / `\(...\)` math delimiters into `$$...$$` / `$...$`.
///
/// Models trained on LaTeX sources emit bracket delimiters freely; the
/// downstream renderer only understands dollar delimiters. Applied to every
/// writer draft post-generation.
pub fn normalize_math_delimiters(markdown: &str) -> String {
    markdown
        .replace("\\[", "$$")
        .replace("\\]", "$$")
        .replace("\\(", "$")
        .replace("\\)", "$")
}

/// Collapse runs of blank lines, trim trailing whitespace, and cap the
/// line count. Used when echoing drafts into logs and status lines.
pub fn trim_to_line_count(text: &str, max_lines: usize) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut previous_blank = true;
    for line in text.lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            if previous_blank {
                continue;
            }
            previous_blank = true;
        } else {
            previous_blank = false;
        }
        lines.push(trimmed);
    }
    lines.truncate(max_lines);
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracket_delimiters_become_dollars() {
        let input = "Therefore \\[ x^2 = 2q^2 \\] and \\( x \\) is even.";
        let output = normalize_math_delimiters(input);
        assert_eq!(output, "Therefore $$ x^2 = 2q^2 $$ and $ x $ is even.");
    }

    #[test]
    fn dollar_delimiters_pass_through() {
        let input = "Inline $x$ and display $$y$$ stay as-is.";
        assert_eq!(normalize_math_delimiters(input), input);
    }

    #[test]
    fn trim_collapses_blank_runs_and_caps_lines() {
        let input = "a\n\n\n\nb   \nc\nd\ne";
        assert_eq!(trim_to_line_count(input, 4), "a\n\nb\nc");
    }

    #[test]
    fn trim_drops_leading_blank_lines() {
        assert_eq!(trim_to_line_count("\n\n\nfirst\nsecond", 10), "first\nsecond");
    }
}
