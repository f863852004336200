use crate::matching::MatchResultDto;
use crate::workflow::{TimeBucket, WorkflowResult};

/// Render matches grouped by file, followed by run statistics.
pub fn render(result: &WorkflowResult) -> String {
    let mut output = String::new();
    let mut matches: Vec<MatchResultDto> = result.matches().iter().map(|m| m.to_dto()).collect();
    matches.sort_by(|a, b| {
        a.source_file
            .cmp(&b.source_file)
            .then(a.begin_line.cmp(&b.begin_line))
            .then(a.begin_column.cmp(&b.begin_column))
    });

    if matches.is_empty() {
        output.push_str("\n  No matches found.\n\n");
    } else {
        output.push_str(&format!("\n  {} match(es) found:\n\n", matches.len()));
        for m in &matches {
            output.push_str(&format!(
                "  [{}] {}:{}:{}\n",
                m.pattern_key, m.source_file, m.begin_line, m.begin_column
            ));
            let snippet = m.matched_code.lines().next().unwrap_or("");
            output.push_str(&format!("           {}\n\n", snippet.trim()));
        }
    }

    render_statistics(result, &mut output);
    output
}

fn render_statistics(result: &WorkflowResult, output: &mut String) {
    let stats = result.stats();
    let row = |output: &mut String, label: &str, value: String| {
        output.push_str(&format!("  {label:<22} {value}\n"));
    };

    row(output, "Files count:", stats.files.to_string());
    row(output, "Chars count:", stats.chars.to_string());
    row(output, "Lines count:", stats.lines.to_string());
    if stats.patterns > 0 {
        row(output, "Patterns count:", stats.patterns.to_string());
    }
    if stats.skipped > 0 {
        row(output, "Skipped files:", stats.skipped.to_string());
    }
    row(output, "Errors:", stats.errors.to_string());

    for timing in &stats.timings {
        let label = match timing.bucket {
            TimeBucket::Lexer | TimeBucket::Parser => format!("  {} time:", timing.bucket),
            other => format!("Total {other} time:"),
        };
        row(
            output,
            &label,
            format!("{:.3} ms {:05.2}%", timing.millis, timing.percent),
        );
    }

    if stats.cancelled {
        output.push_str("\n  Run was cancelled; results are partial.\n");
    }
    output.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::tests::sample_result;

    #[test]
    fn lists_matches_and_statistics() {
        let text = render(&sample_result());
        assert!(text.contains("1 match(es) found"));
        assert!(text.contains("[x5] src/a.ts:2:1"));
        assert!(text.contains("x = 5"));
        assert!(text.contains("Files count:"));
        assert!(text.contains("Total match time:"));
        assert!(text.contains("75.00%"));
    }

    #[test]
    fn empty_run_says_so() {
        let result = WorkflowResult::new(crate::workflow::Stage::Match, Vec::new());
        let text = render(&result);
        assert!(text.contains("No matches found."));
        assert!(!text.contains("Total read time"));
    }
}
