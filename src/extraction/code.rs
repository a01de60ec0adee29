//! Source code extraction from free-form LLM responses.
//!
//! Models are asked to answer with a single fenced block but do not always
//! comply. Extraction walks a fallback ladder and tags the result so callers
//! can tell a confident extraction from a salvage.

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

const FENCE: &str = "```";

/// Code pulled out of an LLM response, tagged with how it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeExtraction {
    /// Body of a fenced block (language-tagged or not).
    Fenced(String),
    /// No fence; recovered by matching code-looking lines.
    HeuristicallyRecovered(String),
    /// Nothing recognizable; the whole text with fence markers removed.
    RawFallback(String),
}

impl CodeExtraction {
    /// The extracted code, whatever the strategy.
    pub fn code(&self) -> &str {
        match self {
            Self::Fenced(code) | Self::HeuristicallyRecovered(code) | Self::RawFallback(code) => {
                code
            }
        }
    }

    pub fn into_code(self) -> String {
        match self {
            Self::Fenced(code) | Self::HeuristicallyRecovered(code) | Self::RawFallback(code) => {
                code
            }
        }
    }

    /// Whether the code came from an explicit fence.
    pub fn is_confident(&self) -> bool {
        matches!(self, Self::Fenced(_))
    }

    pub fn strategy(&self) -> &'static str {
        match self {
            Self::Fenced(_) => "fenced",
            Self::HeuristicallyRecovered(_) => "heuristic",
            Self::RawFallback(_) => "raw",
        }
    }
}

/// Extracts code from `text`, preferring a block tagged with `language`.
///
/// Never fails: the last rung returns the sanitized raw text and logs a
/// quality warning.
pub fn extract_code(text: &str, language: &str) -> CodeExtraction {
    if let Some(code) = tagged_block(text, language) {
        return CodeExtraction::Fenced(code);
    }
    if let Some(code) = any_block(text) {
        return CodeExtraction::Fenced(code);
    }
    if let Some(code) = recover_code_lines(text) {
        warn!(
            language,
            lines = code.lines().count(),
            "No code fence in LLM response; recovered code heuristically"
        );
        return CodeExtraction::HeuristicallyRecovered(code);
    }

    warn!(
        language,
        chars = text.len(),
        "No code found in LLM response; using raw text"
    );
    CodeExtraction::RawFallback(strip_fence_markers(text))
}

fn tagged_block(text: &str, language: &str) -> Option<String> {
    if language.is_empty() {
        return None;
    }
    let opener = format!("{FENCE}{language}");
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find(&opener) {
        let start = search_from + offset + opener.len();
        // "```python3" should not satisfy "```python"; only whitespace may follow the tag
        let rest = &text[start..];
        if rest.starts_with(|c: char| c.is_whitespace()) || rest.is_empty() {
            return Some(block_body(rest));
        }
        search_from = start;
    }
    None
}

fn any_block(text: &str) -> Option<String> {
    let start = text.find(FENCE)? + FENCE.len();
    Some(block_body(&text[start..]))
}

/// Body of a block given the text right after the opening backticks:
/// skips the rest of the opener line, stops at the closing fence or at the end.
fn block_body(after_opener: &str) -> String {
    let body = match after_opener.find('\n') {
        Some(newline) => &after_opener[newline + 1..],
        None => "",
    };
    let body = match body.find(FENCE) {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim().to_string()
}

fn code_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?x)^(
                import\s+\w
              | from\s+[\w.]+\s+import\s
              | class\s+\w+\s*[(:]
              | (async\s+)?def\s+\w+\s*\(
              | @\w
              | if\s+__name__\s*==
              | \w+\s*=\s*(create_engine|declarative_base|sessionmaker|relationship|Column|Table)\s*\(
              | Base\.metadata\.
              | session\.(add|add_all|commit|flush|query)\b
            )",
        )
        .expect("code line pattern is valid")
    })
}

fn statement_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?x)^(
                [A-Za-z_][\w.]*(\[[^\]]*\])?\s*(:\s*[\w.]+(\[[^\]]*\])?\s*)?[-+*/|]?=\s*[^=\s]
              | [A-Za-z_][\w.]*\(.*\)$
            )"#,
        )
        .expect("statement pattern is valid")
    })
}

/// Lines that are code for certain: imports, definitions, assignments, calls.
fn is_statement(line: &str) -> bool {
    let trimmed = line.trim_start();
    code_line_pattern().is_match(trimmed) || statement_pattern().is_match(trimmed)
}

fn is_docstring_delimiter(trimmed: &str) -> bool {
    trimmed.starts_with("\"\"\"")
        || trimmed.starts_with("'''")
        || trimmed.ends_with("\"\"\"")
        || trimmed.ends_with("'''")
}

/// A line that may open a recovered block.
fn starts_code(line: &str) -> bool {
    let trimmed = line.trim_start();
    is_statement(line) || trimmed.starts_with('#') || is_docstring_delimiter(trimmed)
}

/// Unindented sentence-like text that is neither a statement nor a comment.
fn is_prose(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() || line.starts_with([' ', '\t']) || starts_code(line) {
        return false;
    }
    if trimmed.ends_with(['(', ')', '[', ']', '{', '}', ',', ':', '\\']) {
        return false;
    }
    trimmed.split_whitespace().count() > 1
}

/// Keeps everything from the first code line up to the last line that is
/// not prose. Prose between code lines is kept.
fn recover_code_lines(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let first = lines.iter().position(|line| starts_code(line))?;
    let last = lines
        .iter()
        .rposition(|line| !line.trim().is_empty() && !is_prose(line))
        .filter(|&last| last >= first)
        .unwrap_or(first);

    let block = &lines[first..=last];
    if !block.iter().any(|line| is_statement(line)) {
        return None;
    }
    let code = block.join("\n");
    let code = code.trim();
    (!code.is_empty()).then(|| code.to_string())
}

fn strip_fence_markers(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with(FENCE))
        .collect::<Vec<_>>()
        .join("\n")
        .replace(FENCE, "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODELS: &str = "from sqlalchemy import Column, Integer, create_engine\n\
from sqlalchemy.orm import declarative_base\n\
\n\
Base = declarative_base()\n\
\n\
class Customer(Base):\n    __tablename__ = \"customers\"\n    id = Column(Integer, primary_key=True)\n\
\n\
engine = create_engine(\"sqlite:///shop.db\")\n\
Base.metadata.create_all(engine)";

    #[test]
    fn test_tagged_fence() {
        let text = format!("Here are your models:\n```python\n{}\n```\nEnjoy!", MODELS);
        let extraction = extract_code(&text, "python");
        assert!(extraction.is_confident());
        assert_eq!(extraction.code(), MODELS);
    }

    #[test]
    fn test_tagged_fence_preferred_over_earlier_plain_fence() {
        let text = "Run:\n```\npip install sqlalchemy\n```\nThen:\n```python\nprint('ok')\n```";
        assert_eq!(
            extract_code(text, "python"),
            CodeExtraction::Fenced("print('ok')".to_string())
        );
    }

    #[test]
    fn test_similar_tag_is_not_the_language() {
        let text = "```python3\nprint(1)\n```";
        // falls through to the untagged rung, which still finds the block
        assert_eq!(
            extract_code(text, "python"),
            CodeExtraction::Fenced("print(1)".to_string())
        );
    }

    #[test]
    fn test_untagged_fence() {
        let text = "```\nimport sqlite3\n```";
        assert_eq!(
            extract_code(text, "python"),
            CodeExtraction::Fenced("import sqlite3".to_string())
        );
    }

    #[test]
    fn test_unclosed_fence_takes_rest() {
        let text = "```python\nimport os\nprint(os.getcwd())";
        assert_eq!(
            extract_code(text, "python").code(),
            "import os\nprint(os.getcwd())"
        );
    }

    #[test]
    fn test_heuristic_recovery_drops_prose() {
        let text = format!(
            "Sure! Here is the code you asked for.\n{}\nLet me know if you need anything else.",
            MODELS
        );
        let extraction = extract_code(&text, "python");
        assert_eq!(extraction.strategy(), "heuristic");
        assert_eq!(extraction.code(), MODELS);
    }

    #[test]
    fn test_raw_fallback() {
        let text = "SELECT name FROM customers;";
        let extraction = extract_code(text, "python");
        assert_eq!(
            extraction,
            CodeExtraction::RawFallback("SELECT name FROM customers;".to_string())
        );
        assert!(!extraction.is_confident());
    }

    #[test]
    fn test_raw_fallback_strips_markers() {
        assert_eq!(strip_fence_markers("``` nothing useful ```"), "");
        assert_eq!(strip_fence_markers("keep ``` this"), "keep  this");
    }

    #[test]
    fn test_extraction_is_idempotent_on_single_block() {
        let bodies = [
            MODELS,
            "# models.py\nfrom sqlalchemy import Column\nBase = declarative_base()",
            "import os\nDB_URL = 'sqlite:///shop.db'",
            "\"\"\"\nShop database models.\n\nOne class per table.\n\"\"\"\nimport sqlalchemy\nmetadata = sqlalchemy.MetaData()",
            "\"\"\"Populate the shop.\"\"\"\nimport random\nrows = 0\nfor i in range(10):\n    rows += 1\nprint(\"Inserted\", rows)",
            "SELECT 1",
        ];
        for body in bodies {
            let fenced = format!("```python\n{}\n```", body);
            assert_eq!(
                extract_code(&fenced, "python").code(),
                extract_code(body, "python").code(),
                "body: {body}"
            );
            assert_eq!(extract_code(&fenced, "python").code(), body);
        }
    }

    #[test]
    fn test_heuristic_recovery_keeps_trailing_assignment() {
        let text = "Here you go:\nimport os\nDB_URL = 'sqlite:///shop.db'\nThis uses a local file.";
        let extraction = extract_code(text, "python");
        assert_eq!(extraction.strategy(), "heuristic");
        assert_eq!(extraction.code(), "import os\nDB_URL = 'sqlite:///shop.db'");
    }

    #[test]
    fn test_comment_without_code_is_not_recovered() {
        let text = "# Summary\nNothing to run here.";
        assert_eq!(extract_code(text, "python").strategy(), "raw");
    }

    #[test]
    fn test_into_code() {
        assert_eq!(
            CodeExtraction::HeuristicallyRecovered("x = 1".into()).into_code(),
            "x = 1"
        );
    }
}
