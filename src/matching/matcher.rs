//! Syntax-directed structural matching of one pattern node against one
//! tree node.

use std::collections::HashSet;

use super::MatchContext;
use crate::pattern::{PatternKind, PatternNode};
use crate::ust::{UstKind, UstNode};

pub fn match_node<'p>(pattern: &PatternNode, node: &UstNode, ctx: MatchContext<'p>) -> MatchContext<'p> {
    let span = node.span;
    match (&pattern.kind, &node.kind) {
        (PatternKind::Any, _) | (PatternKind::MultipleExpressions, _) => ctx.add_match(span),

        (PatternKind::IdToken { id }, UstKind::Identifier { name }) => ctx.check(id == name, span),
        (PatternKind::IdRegex { regex }, UstKind::Identifier { name }) => {
            ctx.check(regex.is_match(name), span)
        }
        (PatternKind::IntLiteral { value: expected }, UstKind::IntLiteral { value }) => {
            ctx.check(expected == value, span)
        }
        (PatternKind::IntRange { min, max }, UstKind::IntLiteral { value }) => {
            // a point range behaves like the exact literal
            let below_max = *value < *max || *max == i64::MAX || min == max;
            ctx.check(*value >= *min && below_max, span)
        }
        (PatternKind::StringLiteral { value: expected }, UstKind::StringLiteral { value }) => {
            ctx.check(expected == value, span)
        }
        (PatternKind::StringRegex { regex }, UstKind::StringLiteral { value }) => {
            ctx.check(regex.is_match(value), span)
        }
        (PatternKind::BoolLiteral { value: expected }, UstKind::BoolLiteral { value }) => {
            ctx.check(expected == value, span)
        }
        (PatternKind::NullLiteral, UstKind::NullLiteral) => ctx.add_match(span),
        (PatternKind::CommentRegex { regex }, UstKind::Comment { text }) => {
            ctx.check(regex.is_match(text), span)
        }

        (PatternKind::Not { pattern: inner }, _) => {
            if match_node(inner, node, ctx.clone()).success() {
                ctx.fail()
            } else {
                ctx
            }
        }
        (PatternKind::And { patterns }, _) => {
            let mut ctx = ctx;
            for operand in patterns {
                ctx = match_node(operand, node, ctx);
                if !ctx.success() {
                    return ctx;
                }
            }
            ctx
        }
        (PatternKind::Or { patterns }, _) => {
            for alternative in patterns {
                let attempt = match_node(alternative, node, ctx.clone());
                if attempt.success() {
                    return attempt;
                }
            }
            ctx.fail()
        }

        (PatternKind::Args { args }, UstKind::Args) => {
            match_sequence(args, &node.children, ctx).add_if_success(span)
        }

        (PatternKind::Assignment { left, right }, UstKind::Assignment { .. }) => {
            let ctx = match_slot(left, node.child(0), ctx);
            let ctx = match right {
                Some(right) if ctx.success() => match_slot(right, node.child(1), ctx),
                _ => ctx,
            };
            ctx.add_if_success(span)
        }
        (PatternKind::Invocation { target, args }, UstKind::Invocation) => {
            let ctx = match_slot(target, node.child(0), ctx);
            let ctx = if ctx.success() {
                match_slot(args, node.child(1), ctx)
            } else {
                ctx
            };
            ctx.add_if_success(span)
        }
        (PatternKind::MemberReference { target, name }, UstKind::MemberReference) => {
            let ctx = match_slot(target, node.child(0), ctx);
            let ctx = if ctx.success() {
                match_slot(name, node.child(1), ctx)
            } else {
                ctx
            };
            ctx.add_if_success(span)
        }
        (
            PatternKind::BinaryOperator {
                left,
                operator,
                right,
            },
            UstKind::BinaryOperator { operator: actual },
        ) => {
            if operator.as_ref().is_some_and(|op| op != actual) {
                return ctx.fail();
            }
            let ctx = match_slot(left, node.child(0), ctx);
            let ctx = if ctx.success() {
                match_slot(right, node.child(1), ctx)
            } else {
                ctx
            };
            ctx.add_if_success(span)
        }
        (PatternKind::Return { value }, UstKind::Return) => {
            let ctx = match value {
                Some(value) => match_slot(value, node.child(0), ctx),
                None => ctx,
            };
            ctx.add_if_success(span)
        }

        _ => ctx.fail(),
    }
}

fn match_slot<'p>(pattern: &PatternNode, node: Option<&UstNode>, ctx: MatchContext<'p>) -> MatchContext<'p> {
    match node {
        Some(node) => match_node(pattern, node, ctx),
        None => ctx.fail(),
    }
}

/// Align `patterns` against `nodes`. `MultipleExpressions` consumes as few
/// nodes as possible and backtracks when the tail does not align.
fn match_sequence<'p>(
    patterns: &[PatternNode],
    nodes: &[UstNode],
    ctx: MatchContext<'p>,
) -> MatchContext<'p> {
    let mut dead_ends = HashSet::new();
    align(patterns, nodes, 0, 0, ctx, &mut dead_ends)
}

/// Whether `patterns[pi..]` aligns with `nodes[ni..]` does not depend on the
/// captures made so far, so failed positions are remembered and never retried.
fn align<'p>(
    patterns: &[PatternNode],
    nodes: &[UstNode],
    pi: usize,
    ni: usize,
    ctx: MatchContext<'p>,
    dead_ends: &mut HashSet<(usize, usize)>,
) -> MatchContext<'p> {
    if dead_ends.contains(&(pi, ni)) {
        return ctx.fail();
    }
    let result = align_from(patterns, nodes, pi, ni, ctx, dead_ends);
    if !result.success() {
        dead_ends.insert((pi, ni));
    }
    result
}

fn align_from<'p>(
    patterns: &[PatternNode],
    nodes: &[UstNode],
    pi: usize,
    ni: usize,
    ctx: MatchContext<'p>,
    dead_ends: &mut HashSet<(usize, usize)>,
) -> MatchContext<'p> {
    let Some(first) = patterns.get(pi) else {
        return if ni == nodes.len() { ctx } else { ctx.fail() };
    };

    if matches!(first.kind, PatternKind::MultipleExpressions) {
        for end in ni..=nodes.len() {
            let mut attempt = ctx.clone();
            for node in &nodes[ni..end] {
                attempt = attempt.add_match(node.span);
            }
            let attempt = align(patterns, nodes, pi + 1, end, attempt, dead_ends);
            if attempt.success() {
                return attempt;
            }
        }
        return ctx.fail();
    }

    match nodes.get(ni) {
        Some(node) => {
            let ctx = match_node(first, node, ctx);
            if ctx.success() {
                align(patterns, nodes, pi + 1, ni + 1, ctx, dead_ends)
            } else {
                ctx
            }
        }
        None => ctx.fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternRoot;
    use crate::ust::TextSpan;

    fn id(name: &str, start: usize) -> UstNode {
        UstNode::identifier(name, TextSpan::new(start, name.len()))
    }

    fn args(names: &[&str]) -> UstNode {
        let children: Vec<UstNode> = names
            .iter()
            .enumerate()
            .map(|(i, n)| id(n, i * 3))
            .collect();
        UstNode::args(children, TextSpan::new(0, names.len() * 3))
    }

    fn matches(pattern: &PatternNode, node: &UstNode) -> bool {
        let root = PatternRoot::new("t", pattern.clone());
        match_node(pattern, node, MatchContext::new(&root)).success()
    }

    #[test]
    fn identifier_literal_and_regex() {
        let node = id("password", 0);
        assert!(matches(&PatternNode::id("password"), &node));
        assert!(!matches(&PatternNode::id("pass"), &node));
        assert!(matches(&PatternNode::id_regex("^pass").unwrap(), &node));
        assert!(!matches(&PatternNode::id("password"), &UstNode::int(1, TextSpan::default())));
    }

    #[test]
    fn integer_range_is_half_open() {
        let range = PatternNode::int_range(1, 5);
        let lit = |v| UstNode::int(v, TextSpan::default());
        assert!(matches(&range, &lit(1)));
        assert!(matches(&range, &lit(4)));
        assert!(!matches(&range, &lit(5)));
        assert!(matches(&PatternNode::int_range(0, i64::MAX), &lit(i64::MAX)));
    }

    #[test]
    fn not_inverts_without_capturing() {
        let root = PatternRoot::new("t", PatternNode::any());
        let ctx = match_node(&PatternNode::not(PatternNode::id("a")), &id("b", 0), MatchContext::new(&root));
        assert!(ctx.success());
        assert!(ctx.locations().is_empty());
        assert!(!matches(&PatternNode::not(PatternNode::id("a")), &id("a", 0)));
    }

    #[test]
    fn and_threads_captures_and_or_takes_first() {
        let root = PatternRoot::new("t", PatternNode::any());
        let both = PatternNode::and(vec![PatternNode::any(), PatternNode::id("a")]);
        let ctx = match_node(&both, &id("a", 4), MatchContext::new(&root));
        assert_eq!(ctx.locations().len(), 2);

        let either = PatternNode::or(vec![PatternNode::id("x"), PatternNode::id("a")]);
        let ctx = match_node(&either, &id("a", 4), MatchContext::new(&root));
        assert!(ctx.success());
        assert_eq!(ctx.locations(), &[TextSpan::new(4, 1)]);
    }

    #[test]
    fn failed_context_drops_captures() {
        let root = PatternRoot::new("t", PatternNode::any());
        let ctx = MatchContext::new(&root).add_match(TextSpan::new(1, 1));
        let ctx = match_node(&PatternNode::id("z"), &id("a", 0), ctx);
        assert!(!ctx.success());
        assert!(ctx.locations().is_empty());
    }

    #[test]
    fn rest_wildcard_backtracks() {
        let pattern = PatternNode::args(vec![
            PatternNode::id("x"),
            PatternNode::multiple_expressions(),
            PatternNode::id("y"),
        ]);
        assert!(matches(&pattern, &args(&["x", "y"])));
        assert!(matches(&pattern, &args(&["x", "a", "b", "y"])));
        assert!(!matches(&pattern, &args(&["x", "a", "b"])));
        assert!(!matches(&pattern, &args(&["a", "y"])));
    }

    #[test]
    fn adjacent_wildcards_match_like_one() {
        let single = PatternNode::args(vec![
            PatternNode::id("x"),
            PatternNode::multiple_expressions(),
            PatternNode::id("y"),
        ]);
        let double = PatternNode::args(vec![
            PatternNode::id("x"),
            PatternNode::multiple_expressions(),
            PatternNode::multiple_expressions(),
            PatternNode::id("y"),
        ]);
        for list in [
            vec!["x", "y"],
            vec!["x", "q", "y"],
            vec!["x", "q", "r", "y"],
            vec!["y", "x"],
            vec!["x"],
        ] {
            let node = args(&list);
            assert_eq!(matches(&single, &node), matches(&double, &node), "{list:?}");
        }
    }

    #[test]
    fn ambiguous_wildcards_find_a_split() {
        let pattern = PatternNode::args(vec![
            PatternNode::multiple_expressions(),
            PatternNode::id("k"),
            PatternNode::multiple_expressions(),
            PatternNode::id("k"),
        ]);
        assert!(matches(&pattern, &args(&["a", "k", "b", "k"])));
        assert!(matches(&pattern, &args(&["k", "k"])));
        assert!(!matches(&pattern, &args(&["k", "a"])));
    }

    #[test]
    fn assignment_captures_construct_span() {
        let node = UstNode::assignment(id("x", 0), UstNode::int(5, TextSpan::new(4, 1)), TextSpan::new(0, 5));
        let pattern = PatternNode::assignment(PatternNode::id("x"), PatternNode::int(5));
        let root = PatternRoot::new("t", pattern.clone());
        let ctx = match_node(&pattern, &node, MatchContext::new(&root));
        assert!(ctx.success());
        assert_eq!(TextSpan::union(ctx.locations().iter().copied()), TextSpan::new(0, 5));
        assert!(!matches(&PatternNode::assignment(PatternNode::id("x"), PatternNode::int(6)), &node));
    }

    #[test]
    fn point_range_matches_like_exact_literal() {
        let lit = |v| UstNode::int(v, TextSpan::default());
        for v in [-3, 0, 7, i64::MAX] {
            let range = PatternNode::int_range(v, v);
            let exact = PatternNode::int(v);
            for candidate in [v - 1, v, v.saturating_add(1)] {
                assert_eq!(
                    matches(&range, &lit(candidate)),
                    matches(&exact, &lit(candidate)),
                    "[{v}, {v}] against {candidate}"
                );
            }
        }
    }

    #[test]
    fn many_wildcards_fail_fast() {
        let mut patterns = Vec::new();
        for _ in 0..12 {
            patterns.push(PatternNode::multiple_expressions());
            patterns.push(PatternNode::id("k"));
        }
        patterns.push(PatternNode::id("z"));
        let names = vec!["k"; 40];
        let started = std::time::Instant::now();
        assert!(!matches(&PatternNode::args(patterns), &args(&names)));
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }
}
