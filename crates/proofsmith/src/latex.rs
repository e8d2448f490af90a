//! Static LaTeX lint for rendered proof markdown.
//!
//! A deterministic, non-model check run against every draft before the
//! critic's verdict is finalized. KaTeX silently mangles unbalanced math
//! delimiters and rejects TikZ/listings environments, so these warnings
//! are merged into the attempt's gap list unconditionally; even a critic
//! PASS becomes PASSED_WITH_WARNINGS when lint finds issues.

use std::sync::LazyLock;

use regex::Regex;

/// Unescaped `$`: either at line start or not preceded by a backslash.
static INLINE_DOLLAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^\\])\$").expect("INLINE_DOLLAR_RE regex should compile"));

/// Warnings for one draft. Empty means clean.
#[derive(Debug, Clone, Default)]
pub struct LatexLintResult {
    pub warnings: Vec<String>,
}

/// Lint a markdown draft for the renderer-compatibility failure modes.
pub fn lint_latex_markdown(markdown: &str) -> LatexLintResult {
    let mut warnings = Vec::new();

    let display_count = markdown.matches("$$").count();
    if display_count % 2 != 0 {
        warnings.push("Unbalanced $$ display math delimiters.".to_string());
    }

    let inline_count = INLINE_DOLLAR_RE.find_iter(markdown).count();
    if inline_count % 2 != 0 {
        warnings.push("Unbalanced $ inline math delimiters.".to_string());
    }

    let left_brackets = markdown.matches("\\[").count();
    let right_brackets = markdown.matches("\\]").count();
    if left_brackets != right_brackets {
        warnings.push("Unbalanced \\[ and \\] delimiters.".to_string());
    }

    if markdown.contains("\\begin{tikzpicture}") {
        warnings.push("KaTeX does not support TikZ environments.".to_string());
    }

    if markdown.contains("\\begin{lstlisting}") {
        warnings.push("KaTeX does not support lstlisting environments.".to_string());
    }

    LatexLintResult { warnings }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_markdown_has_no_warnings() {
        let result = lint_latex_markdown("Let $x$ be even. Then $$x = 2k$$ for some $k$.");
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn odd_display_delimiters_flagged() {
        let result = lint_latex_markdown("Consider $$x = 2k.");
        assert!(result
            .warnings
            .contains(&"Unbalanced $$ display math delimiters.".to_string()));
    }

    #[test]
    fn odd_inline_delimiters_flagged() {
        let result = lint_latex_markdown("Let $x be even.");
        assert!(result
            .warnings
            .contains(&"Unbalanced $ inline math delimiters.".to_string()));
    }

    #[test]
    fn escaped_dollars_do_not_count() {
        // Two escaped dollars plus a balanced inline pair.
        let result = lint_latex_markdown("Costs \\$5 and \\$10, where $n$ is the count.");
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn mismatched_brackets_flagged() {
        let result = lint_latex_markdown("\\[ x = 1 and then \\[ y = 2 \\]");
        assert!(result
            .warnings
            .contains(&"Unbalanced \\[ and \\] delimiters.".to_string()));
    }

    #[test]
    fn unsupported_environments_flagged() {
        let result =
            lint_latex_markdown("\\begin{tikzpicture}\\end{tikzpicture}\n\\begin{lstlisting}");
        assert!(result
            .warnings
            .contains(&"KaTeX does not support TikZ environments.".to_string()));
        assert!(result
            .warnings
            .contains(&"KaTeX does not support lstlisting environments.".to_string()));
    }
}
