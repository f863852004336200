use crate::pattern::PatternRoot;
use crate::ust::TextSpan;

/// State of one match attempt. Contexts are values: every branch works on
/// its own copy, so a failed alternative never leaks captures.
#[derive(Debug, Clone)]
pub struct MatchContext<'p> {
    pub pattern: &'p PatternRoot,
    success: bool,
    locations: Vec<TextSpan>,
}

impl<'p> MatchContext<'p> {
    pub fn new(pattern: &'p PatternRoot) -> Self {
        Self {
            pattern,
            success: true,
            locations: Vec::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn locations(&self) -> &[TextSpan] {
        &self.locations
    }

    /// The canonical failed context.
    pub fn fail(self) -> Self {
        Self {
            pattern: self.pattern,
            success: false,
            locations: Vec::new(),
        }
    }

    pub fn add_match(mut self, span: TextSpan) -> Self {
        self.locations.push(span);
        self
    }

    pub fn add_if_success(self, span: TextSpan) -> Self {
        if self.success {
            self.add_match(span)
        } else {
            self
        }
    }

    pub fn check(self, condition: bool, span: TextSpan) -> Self {
        if condition {
            self.add_match(span)
        } else {
            self.fail()
        }
    }
}
