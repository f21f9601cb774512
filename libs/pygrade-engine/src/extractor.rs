/// Source Extractor - Definition Isolation
///
/// **Core Responsibility:**
/// Reduce a submission to its top-level callable definitions so that demo
/// calls and prints left at module level never run inside the sandbox.
///
/// **Rules:**
/// - A definition starts on a line with zero indentation whose text starts
///   with a definition keyword
/// - Lines belong to the definition while blank or indented deeper than it
/// - The first non-blank line at or below the definition's indentation ends
///   it and is dropped, unless it starts a new definition
/// - Everything outside a definition is dropped (statements, blank lines,
///   comments), and so are blank lines trailing a definition

const DEFINITION_KEYWORDS: &[&str] = &["def ", "async def ", "class "];

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn drop_trailing_blank_lines(kept: &mut Vec<&str>) {
    while kept.last().is_some_and(|line| line.trim().is_empty()) {
        kept.pop();
    }
}

fn starts_definition(line: &str) -> bool {
    indentation(line) == 0
        && DEFINITION_KEYWORDS
            .iter()
            .any(|keyword| line.starts_with(keyword))
}

/// Extract top-level definitions and their bodies from submitted source
pub fn extract_definitions(source: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut definition_indent: Option<usize> = None;

    for line in source.lines() {
        let is_blank = line.trim().is_empty();

        if let Some(indent) = definition_indent {
            if is_blank || indentation(line) > indent {
                kept.push(line);
                continue;
            }
            definition_indent = None;
            drop_trailing_blank_lines(&mut kept);
        }

        if starts_definition(line) {
            definition_indent = Some(indentation(line));
            kept.push(line);
        }
    }

    drop_trailing_blank_lines(&mut kept);
    kept.join("\n")
}

/// Whether the submission contains at least one definition
pub fn has_definitions(source: &str) -> bool {
    source.lines().any(starts_definition)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drops_top_level_prints() {
        let source = "def add(a, b):\n    return a + b\n\nprint(add(5, 10))";
        assert_eq!(extract_definitions(source), "def add(a, b):\n    return a + b");
    }

    #[test]
    fn test_starter_code_shape() {
        let source = "def calculate_sum(a, b):\n    # Write your code here\n    return int(a) + int(b)\n\n# Test your function\nprint(calculate_sum(\"5\", \"10\"))";
        assert_eq!(
            extract_definitions(source),
            "def calculate_sum(a, b):\n    # Write your code here\n    return int(a) + int(b)"
        );
    }

    #[test]
    fn test_multiple_definitions_kept() {
        let source = "x = 1\ndef f():\n    return 1\nprint(f())\ndef g():\n    return 2\ng()";
        assert_eq!(
            extract_definitions(source),
            "def f():\n    return 1\ndef g():\n    return 2"
        );
    }

    #[test]
    fn test_definition_directly_after_definition() {
        let source = "def f():\n    return 1\ndef g():\n    return f() + 1";
        assert_eq!(extract_definitions(source), source);
    }

    #[test]
    fn test_nested_definitions_stay_in_outer_body() {
        let source = "def outer(n):\n    def inner(x):\n        return x * 2\n    return inner(n)\nprint(outer(3))";
        assert_eq!(
            extract_definitions(source),
            "def outer(n):\n    def inner(x):\n        return x * 2\n    return inner(n)"
        );
    }

    #[test]
    fn test_indented_def_outside_definition_is_ignored() {
        let source = "if True:\n    def hidden():\n        return 1\ndef shown():\n    return 2";
        assert_eq!(extract_definitions(source), "def shown():\n    return 2");
    }

    #[test]
    fn test_no_definitions_yields_empty() {
        let source = "# just a comment\nprint('hello')\n\nx = 5";
        assert_eq!(extract_definitions(source), "");
        assert!(!has_definitions(source));
    }

    #[test]
    fn test_top_level_comment_ends_definition() {
        let source = "def f():\n    return 1\n# demo\n    print('stray')\ndef g():\n    return 2";
        assert_eq!(
            extract_definitions(source),
            "def f():\n    return 1\ndef g():\n    return 2"
        );
    }

    #[test]
    fn test_classes_and_async_defs_are_definitions() {
        let source = "class Stack:\n    def __init__(self):\n        self.items = []\nasync def fetch():\n    return 1\ns = Stack()";
        assert_eq!(
            extract_definitions(source),
            "class Stack:\n    def __init__(self):\n        self.items = []\nasync def fetch():\n    return 1"
        );
    }

    #[test]
    fn test_keyword_prefix_must_be_exact() {
        let source = "define = 3\ndefault_value = 4\nclasses = []";
        assert_eq!(extract_definitions(source), "");
    }

    #[test]
    fn test_crlf_line_endings() {
        let source = "def f():\r\n    return 1\r\nprint(f())\r\n";
        assert_eq!(extract_definitions(source), "def f():\n    return 1");
    }

    #[test]
    fn test_extraction_idempotent() {
        let sources = [
            "def add(a, b):\n    return a + b\n\nprint(add(5, 10))",
            "x = 1\ndef f():\n    return 1\n\n\nprint(f())\ndef g():\n    return 2\n",
            "def outer(n):\n    def inner(x):\n        return x\n\n    return inner(n)\n",
            "print('no defs')",
            "",
        ];

        for source in sources {
            let once = extract_definitions(source);
            let twice = extract_definitions(&once);
            assert_eq!(once, twice, "extraction not idempotent for {:?}", source);
        }
    }
}
