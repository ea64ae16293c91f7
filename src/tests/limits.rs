//! Size-guard behavior and limit monotonicity.

use crate::error::Error;
use crate::options::{ParseOptions, UNLIMITED};
use crate::parser::Parser;

fn parse(input: &str, options: &ParseOptions) -> crate::error::Result<usize> {
    Parser::new(options.clone()).and_then(|p| p.parse_to_vec(input).map(|r| r.len()))
}

/// Lowering a limit never turns an erroring parse into a successful one.
#[test]
fn test_field_size_monotonicity() {
    let inputs = [
        "a,b\n1,2\n".to_string(),
        format!("h\n{}\n", "x".repeat(80)),
        format!("h\n\"{}\"\n", "y".repeat(200)),
    ];
    for input in &inputs {
        for (low, high) in [(10, 100), (50, 500), (1, 64)] {
            let high_result = parse(input, &ParseOptions::default().max_field_size(high));
            let low_result = parse(input, &ParseOptions::default().max_field_size(low));
            if high_result.is_err() {
                assert!(low_result.is_err(), "input {input:?}, limits {low}/{high}");
            }
        }
    }
}

#[test]
fn test_buffer_size_monotonicity() {
    let input = format!("\"{}", "z".repeat(512));
    let high = parse(&input, &ParseOptions::default().max_buffer_size(4096));
    let low = parse(&input, &ParseOptions::default().max_buffer_size(64));
    // The high-limit parse fails on the unterminated quote; the low-limit
    // parse must not succeed either.
    assert!(high.is_err());
    assert!(low.is_err());
}

#[test]
fn test_field_count_monotonicity() {
    let input = "a,b,c,d,e\n1,2,3,4,5\n";
    assert!(parse(input, &ParseOptions::default().max_field_count(5)).is_ok());
    let err = parse(input, &ParseOptions::default().max_field_count(3)).unwrap_err();
    assert!(matches!(err, Error::FieldCountExceeded { .. }));
}

#[test]
fn test_unlimited_buffer_keeps_field_cap() {
    let opts = ParseOptions::default()
        .max_buffer_size(UNLIMITED)
        .max_field_size(8);
    let err = parse("123456789", &opts).unwrap_err();
    assert!(matches!(err, Error::FieldTooLarge { .. }));
}

#[test]
fn test_unlimited_limits_accept_large_input() {
    let opts = ParseOptions::default()
        .max_buffer_size(UNLIMITED)
        .max_field_size(UNLIMITED);
    let big = format!("h\n{}\n", "w".repeat(64 * 1024));
    assert_eq!(parse(&big, &opts).unwrap(), 1);
}

#[test]
fn test_zero_binary_size_is_invalid() {
    let opts = ParseOptions::default().max_binary_size(0);
    assert!(matches!(opts.validate(), Err(Error::InvalidOption(_))));
}

#[test]
fn test_binary_cap_applies_before_decompression() {
    let opts = ParseOptions::default().max_binary_size(4);
    let err = crate::binary::decode_buffer(b"a,b\n1,2\n", &opts).unwrap_err();
    assert!(matches!(err, Error::BinaryTooLarge { .. }));
}

#[test]
fn test_limit_errors_carry_configured_cap() {
    let err = parse(
        &"q".repeat(128),
        &ParseOptions::default().max_field_size(64),
    )
    .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("64"));
    assert!(msg.contains("65") || msg.contains("128"));
}

/// Peak retained lexer buffer stays bounded when records complete
/// regularly, regardless of how many chunks flow through.
#[test]
fn test_streaming_does_not_accumulate() {
    let opts = ParseOptions::default().max_buffer_size(64);
    let parser = Parser::new(opts).unwrap();
    let chunks = (0..10_000).map(|i| format!("{i},{i}\n"));
    let records = parser
        .parse_chunks_to_vec(std::iter::once("a,b\n".to_string()).chain(chunks))
        .unwrap();
    assert_eq!(records.len(), 10_000);
}
