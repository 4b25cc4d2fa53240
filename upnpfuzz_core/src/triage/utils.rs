use std::fmt::Write;

pub(crate) trait Colored {
    fn red(&self) -> String;
    fn yellow(&self) -> String;
}

impl Colored for str {
    fn red(&self) -> String {
        format!("\x1b[31;1m{self}\x1b[0m")
    }

    fn yellow(&self) -> String {
        format!("\x1b[33;1m{self}\x1b[0m")
    }
}

/// Prints `modified` line by line and highlights every line that differs from `original`
pub(crate) fn mark_differences(original: &str, modified: &str) -> String {
    let mut result = String::new();
    let original_lines: Vec<&str> = original.lines().collect();
    let modified_lines: Vec<&str> = modified.lines().collect();

    let max_lines = original_lines.len().max(modified_lines.len());

    for i in 0..max_lines {
        let original_line = original_lines.get(i).copied().unwrap_or_default();
        let modified_line = modified_lines.get(i).copied().unwrap_or_default();

        if original_line == modified_line {
            result.push_str(modified_line);
        } else {
            let _ = write!(result, "{}", modified_line.yellow());
        }
        result.push('\n');
    }

    result
}

/// Escapes control characters so a payload can be shown on the terminal, keeping line breaks
pub(crate) fn printable(payload: &[u8]) -> String {
    let mut result = String::with_capacity(payload.len());
    for line in payload.split_inclusive(|b| *b == b'\n') {
        for byte in line {
            match byte {
                b'\n' => result.push('\n'),
                b'\r' => {}
                0x20..=0x7e => result.push(char::from(*byte)),
                _ => {
                    let _ = write!(result, "\\x{byte:02x}");
                }
            }
        }
    }
    result
}

/// Shortens long runs of the same character, e.g. overflow values
pub(crate) fn collapse_runs(text: &str, max_run: usize) -> String {
    let mut result = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        let mut run = 1;
        while chars.peek() == Some(&c) {
            chars.next();
            run += 1;
        }
        if run > max_run {
            let _ = write!(result, "{}[{c} x {run}]", c.to_string().repeat(max_run.min(4)));
        } else {
            result.extend(std::iter::repeat_n(c, run));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printable_escapes_binary() {
        assert_eq!(printable(b"GET / HTTP/1.1\r\nX: \x00\xff\r\n"), "GET / HTTP/1.1\nX: \\x00\\xff\n");
    }

    #[test]
    fn test_collapse_runs() {
        assert_eq!(collapse_runs("abAAAAAAAAAAc", 8), "abAAAA[A x 10]c");
        assert_eq!(collapse_runs("aaa", 8), "aaa");
    }

    #[test]
    fn test_mark_differences_highlights_changed_lines() {
        let marked = mark_differences("a\nb\n", "a\nc\n");
        assert!(marked.starts_with("a\n"));
        assert!(marked.contains("\x1b[33;1mc\x1b[0m"));
    }
}
