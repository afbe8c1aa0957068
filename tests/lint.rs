//! Lint rules as seen from `.csn` text.

use csn1dsl::lint::{has_errors, lint, LintRule, Severity};

fn rules(src: &str) -> Vec<(LintRule, Severity)> {
    lint(src).expect("parse").into_iter().map(|m| (m.rule, m.severity)).collect()
}

#[test]
fn widths() {
    assert_eq!(
        rules("table T { a: uint(0); b: bitmap(65); c: fixed(64, 1); d: uint_lh(8); }"),
        vec![(LintRule::UIntWidth, Severity::Error), (LintRule::BitmapWidth, Severity::Error)]
    );
    assert_eq!(
        rules("table T { a: uint_array(20, 2); }"),
        vec![(LintRule::UIntWidth, Severity::Warning)]
    );
    assert_eq!(
        rules("table T { a: uint_array(40, 2); }"),
        vec![(LintRule::UIntWidth, Severity::Error)]
    );
}

#[test]
fn unknown_names() {
    assert_eq!(
        rules("table T { a: type_array(Nope, 2); b: split_bits(Gone); }"),
        vec![(LintRule::UnknownTable, Severity::Error), (LintRule::UnknownCrumbSpec, Severity::Error)]
    );
    assert_eq!(
        rules("crumbs S { 3, 5 } table T { a: split_crumb(S, 2); }"),
        vec![(LintRule::CrumbIndex, Severity::Error)]
    );
}

#[test]
fn crumb_widths() {
    assert_eq!(
        rules("crumbs S { 1, 64 } table T { a: split_crumb(S, 0); b: split_crumb(S, 1); v: split_bits(S); }"),
        vec![(LintRule::CrumbWidth, Severity::Error)]
    );
    assert_eq!(rules("crumbs S { 0, 65 }"), vec![(LintRule::CrumbWidth, Severity::Error); 3]);
    assert!(rules("crumbs S { 32, 32 } table T { a: split_crumb(S, 0); b: split_crumb(S, 1); v: split_bits(S); }").is_empty());
}

#[test]
fn count_field_must_come_first() {
    assert_eq!(
        rules("table T { m: var_bitmap(n); n: uint(3); }"),
        vec![(LintRule::CountFieldOrder, Severity::Warning)]
    );
    assert!(rules("table T { n: uint(3); m: var_bitmap(n); }").is_empty());
    // recursive arrays write their count field
    assert!(rules("table T { l: rec_array(3, n); m: var_array(n); }").is_empty());
}

#[test]
fn next_exists_skip_bounds() {
    assert_eq!(
        rules("table T { f: next_exists(2); a: bit; }"),
        vec![(LintRule::NextExistsSkip, Severity::Error)]
    );
    assert!(rules("table T { f: next_exists(1); a: bit; }").is_empty());
    assert_eq!(
        rules("table T { u: union { f: next_exists(1); g: bit; }; }"),
        vec![(LintRule::NextExistsSkip, Severity::Error)]
    );
}

#[test]
fn choices() {
    assert_eq!(rules("table T { c: choice { }; }"), vec![(LintRule::EmptyChoice, Severity::Error)]);
    assert_eq!(
        rules("table T { c: choice { (1, 0) => a: bit; }; }"),
        vec![(LintRule::ChoiceWithoutTrap, Severity::Warning)]
    );
}

#[test]
fn cycles_are_reported_once() {
    let src = r#"
table A { more: union { _: end; next: type(B); }; }
table B { back: type(A); }
"#;
    let messages = lint(src).expect("lint");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].rule, LintRule::NestedCycle);
    assert!(!has_errors(&messages));
}

#[test]
fn message_display() {
    let messages = lint("table Msg {\n  a: bit;\n  u: union { x: bit; } \"selector\";\n}").expect("lint");
    assert!(has_errors(&messages));
    assert_eq!(
        messages[0].to_string(),
        "error [UnionSize] table Msg #1 'selector': union of 1 candidate(s)"
    );
}

#[test]
fn syntax_errors_surface() {
    assert!(lint("table {").is_err());
}
