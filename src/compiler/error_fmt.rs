//! Rustc-style error excerpts for parse and compile errors.

/// One-based line and column for a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    /// Computes the location of `offset`, clamped to the end of `source`.
    pub fn from_offset(source: &str, offset: usize) -> Self {
        let mut offset = offset.min(source.len());
        while !source.is_char_boundary(offset) {
            offset -= 1;
        }
        let before = &source[..offset];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map_or(0, |pos| pos + 1);
        let column = source[line_start..offset].chars().count() + 1;
        Self { line, column }
    }
}

/// Configuration for formatting an error with source context.
pub struct ErrorFormat<'a> {
    pub message: &'a str,
    pub source: &'a str,
    /// Byte position in source where error occurred
    pub position: usize,
    pub filename: &'a str,
    /// Added to the computed line (templates that start mid-file)
    pub line_offset: usize,
    /// Text printed after the caret, e.g. "found: 'end'"
    pub annotation: Option<String>,
    pub help: Option<&'a str>,
}

impl<'a> ErrorFormat<'a> {
    pub fn new(message: &'a str, source: &'a str, position: usize) -> Self {
        Self {
            message,
            source,
            position,
            filename: "template",
            line_offset: 0,
            annotation: None,
            help: None,
        }
    }

    pub fn filename(mut self, filename: &'a str) -> Self {
        self.filename = filename;
        self
    }

    pub fn line_offset(mut self, offset: usize) -> Self {
        self.line_offset = offset;
        self
    }

    pub fn annotation(mut self, ann: String) -> Self {
        self.annotation = Some(ann);
        self
    }

    pub fn help(mut self, help: &'a str) -> Self {
        self.help = Some(help);
        self
    }

    /// Formats the error with source context.
    ///
    /// ```text
    /// error: message
    ///  --> file:line:column
    ///  2 | offending line
    ///    |     ^ annotation
    /// help: suggestion
    /// ```
    pub fn format(&self) -> String {
        const MAX_LINE_LEN: usize = 80;
        const CONTEXT_CHARS: usize = 30;

        let loc = SourceLocation::from_offset(self.source, self.position);
        let line_no = loc.line + self.line_offset;
        let mut msg = format!("error: {}\n", self.message);
        msg.push_str(&format!(" --> {}:{}:{}\n", self.filename, line_no, loc.column));

        if let Some(line) = self.source.lines().nth(loc.line - 1) {
            let chars: Vec<char> = line.replace('\t', "    ").chars().collect();
            let indent = chars.iter().take_while(|c| c.is_whitespace()).count();
            let tabs_before = line
                .chars()
                .take(loc.column - 1)
                .filter(|&c| c == '\t')
                .count();
            let caret = (loc.column - 1 + tabs_before * 3).saturating_sub(indent);
            let content: Vec<char> = chars[indent..]
                .iter()
                .copied()
                .collect::<String>()
                .trim_end()
                .chars()
                .collect();

            let (shown, caret) = if content.len() > MAX_LINE_LEN {
                let start = caret.saturating_sub(CONTEXT_CHARS).min(content.len());
                let end = (caret + CONTEXT_CHARS).min(content.len());
                let prefix = if start > 0 { "..." } else { "" };
                let suffix = if end < content.len() { "..." } else { "" };
                let snippet: String = content[start..end].iter().collect();
                (
                    format!("{prefix}{snippet}{suffix}"),
                    caret - start + prefix.len(),
                )
            } else {
                (content.iter().collect(), caret)
            };

            let width = line_no.to_string().len();
            let annotation = self.annotation.as_deref().unwrap_or("");
            msg.push_str(&format!("{line_no:>width$} | {shown}\n"));
            msg.push_str(&format!(
                "{:>width$} | {:>caret$}^ {annotation}\n",
                "", ""
            ));
        }

        if let Some(help) = self.help {
            msg.push_str(&format!("help: {help}\n"));
        }
        msg
    }
}

/// Helper to build annotation text from found/expected values.
pub fn build_annotation(found: Option<&str>, expected: &[&str]) -> Option<String> {
    if let Some(f) = found {
        Some(format!("found: {}", f))
    } else if !expected.is_empty() {
        Some(format!("expected: {}", expected.join(" or ")))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_location() {
        let src = "div {\n  h1 x\n}";
        assert_eq!(
            SourceLocation::from_offset(src, 0),
            SourceLocation { line: 1, column: 1 }
        );
        assert_eq!(
            SourceLocation::from_offset(src, 11),
            SourceLocation { line: 2, column: 6 }
        );
        assert_eq!(SourceLocation::from_offset(src, 999).line, 3);
    }

    #[test]
    fn test_error_format_basic() {
        let formatted = ErrorFormat::new("unexpected token", "x = )", 4)
            .filename("card.tpl")
            .annotation("expected: expression".to_string())
            .format();

        assert!(formatted.contains("error: unexpected token"));
        assert!(formatted.contains("--> card.tpl:1:5"));
        assert!(formatted.contains("1 | x = )"));
        assert!(formatted.contains("^ expected: expression"));
    }

    #[test]
    fn test_error_format_line_offset_and_help() {
        let formatted = ErrorFormat::new("missing 'end'", "div do\n  p 1", 9)
            .filename("page.tpl")
            .line_offset(10)
            .help("close the block with `end`")
            .format();

        assert!(formatted.contains("--> page.tpl:12:"), "{formatted}");
        assert!(formatted.contains("12 | p 1"), "{formatted}");
        assert!(formatted.contains("help: close the block with `end`"));
    }

    #[test]
    fn test_long_line_truncation() {
        let long_line = format!("p {}", "word ".repeat(40));
        let formatted = ErrorFormat::new("test error", &long_line, 100).format();
        assert!(formatted.contains("| ..."), "{formatted}");
        assert!(formatted.matches("...").count() >= 2, "{formatted}");
    }

    #[test]
    fn test_build_annotation() {
        assert_eq!(
            build_annotation(Some("'}'"), &[]),
            Some("found: '}'".to_string())
        );
        assert_eq!(
            build_annotation(None, &["')'", "','"]),
            Some("expected: ')' or ','".to_string())
        );
        assert_eq!(build_annotation(None, &[]), None);
    }
}
