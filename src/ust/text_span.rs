use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, start + length)` into a file's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub length: usize,
}

impl TextSpan {
    pub fn new(start: usize, length: usize) -> Self {
        Self { start, length }
    }

    pub fn from_bounds(start: usize, end: usize) -> Self {
        Self {
            start,
            length: end.saturating_sub(start),
        }
    }

    pub fn end(&self) -> usize {
        self.start.saturating_add(self.length)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn contains(&self, other: &TextSpan) -> bool {
        self.start <= other.start && other.end() <= self.end()
    }

    /// Smallest span covering every span in `spans`. An empty input yields
    /// the zero span.
    pub fn union<I>(spans: I) -> TextSpan
    where
        I: IntoIterator<Item = TextSpan>,
    {
        let mut iter = spans.into_iter();
        let Some(first) = iter.next() else {
            return TextSpan::default();
        };
        let (start, end) = iter.fold((first.start, first.end()), |(s, e), span| {
            (s.min(span.start), e.max(span.end()))
        });
        TextSpan::from_bounds(start, end)
    }

    /// Text covered by this span, clamped to the buffer.
    pub fn slice<'a>(&self, code: &'a str) -> &'a str {
        let start = self.start.min(code.len());
        let end = self.end().min(code.len());
        code.get(start..end).unwrap_or("")
    }

    /// Convert to 1-based line/column coordinates.
    pub fn to_line_column(&self, code: &str) -> LineColumnTextSpan {
        let (begin_line, begin_column) = line_column(code, self.start);
        let (end_line, end_column) = line_column(code, self.end());
        LineColumnTextSpan {
            begin_line,
            begin_column,
            end_line,
            end_column,
        }
    }
}

impl std::fmt::Display for TextSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}..{})", self.start, self.end())
    }
}

/// 1-based line/column range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineColumnTextSpan {
    pub begin_line: usize,
    pub begin_column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl std::fmt::Display for LineColumnTextSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.begin_line, self.begin_column, self.end_line, self.end_column
        )
    }
}

fn line_column(code: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(code.len());
    let prefix = &code.as_bytes()[..offset];
    let line = prefix.iter().filter(|&&b| b == b'\n').count() + 1;
    let line_start = prefix
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|p| p + 1)
        .unwrap_or(0);
    let column = match code.get(line_start..offset) {
        Some(text) => text.chars().count() + 1,
        None => offset - line_start + 1,
    };
    (line, column)
}

/// Number of lines in a text buffer, as reported in run statistics.
pub fn count_lines(code: &str) -> usize {
    if code.is_empty() {
        0
    } else {
        code.lines().count()
    }
}
