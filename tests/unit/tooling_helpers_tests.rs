//! Unit tests for the text helpers behind the tooling actions.

use grok_sidecar::service::tooling::{
    count_occurrences, extract_json_object, extract_urls, strip_markup, unescape_literals,
};

#[test]
fn urls_are_extracted_in_order_without_duplicates() {
    let urls = extract_urls(
        "Compare https://a.example/x, http://b.example/y? and https://a.example/x again.",
    );

    assert_eq!(urls, vec!["https://a.example/x", "http://b.example/y"]);
}

#[test]
fn prompts_without_urls_yield_nothing() {
    assert!(extract_urls("summarise ftp://old.example and example.com").is_empty());
}

#[test]
fn markup_is_reduced_to_visible_text() {
    let text = strip_markup(
        "<html><head><style>p{}</style><script>var x = 1;</script></head>\
         <body><p>Hello&nbsp;&amp; <b>world</b></p><!-- hidden --></body></html>",
    );

    assert_eq!(text, "Hello & world");
}

#[test]
fn occurrences_are_non_overlapping() {
    assert_eq!(count_occurrences("foo foo foo", "foo"), 3);
    assert_eq!(count_occurrences("aaaa", "aa"), 2);
    assert_eq!(count_occurrences("abc", ""), 0);
    assert_eq!(count_occurrences("abc", "z"), 0);
}

#[test]
fn json_objects_are_found_inside_prose_and_fences() {
    let bare = extract_json_object(r#"{"old_string":"foo"}"#).expect("bare");
    let fenced = extract_json_object("Here you go:\n```json\n{\"old_string\":\"bar\"}\n```")
        .expect("fenced");

    assert_eq!(bare["old_string"], "foo");
    assert_eq!(fenced["old_string"], "bar");
    assert!(extract_json_object("no json here").is_none());
    assert!(extract_json_object("[1,2]").is_none());
}

#[test]
fn escaped_sequences_are_unescaped() {
    assert_eq!(unescape_literals(r#"a\nb\tc\"d\\e"#), "a\nb\tc\"d\\e");
    assert_eq!(unescape_literals("plain"), "plain");
}
