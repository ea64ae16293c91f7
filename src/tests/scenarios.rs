//! End-to-end behavior over the public facade.

use crate::assembler::Record;
use crate::engine::Backend;
use crate::error::Error;
use crate::options::{ColumnCountStrategy, OutputFormat, ParseOptions};
use crate::parser::{Parser, Pipeline};
use crate::tests::common::object;

fn parse(input: &str, options: &ParseOptions) -> crate::error::Result<Vec<Record>> {
    Parser::new(options.clone())?.parse_to_vec(input)
}

#[test]
fn test_simple_object_output() {
    let records = parse("a,b,c\n1,2,3\n", &ParseOptions::default()).unwrap();
    assert_eq!(records, vec![object(&[("a", "1"), ("b", "2"), ("c", "3")])]);
}

#[test]
fn test_quoted_delimiters_and_escapes() {
    let records = parse("a,b\n\"x,y\",\"a\"\"b\"\n", &ParseOptions::default()).unwrap();
    assert_eq!(records, vec![object(&[("a", "x,y"), ("b", "a\"b")])]);
}

#[test]
fn test_multiline_quoted_field_without_trailing_newline() {
    let records = parse("a,b\r\n\"multi\nline\",\"x\"", &ParseOptions::default()).unwrap();
    assert_eq!(records, vec![object(&[("a", "multi\nline"), ("b", "x")])]);
}

#[test]
fn test_strict_mismatch_reports_row_two() {
    let opts = ParseOptions::default().column_count_strategy(ColumnCountStrategy::Strict);
    let err = parse("a,b,c\n1,2\n", &opts).unwrap_err();
    match err {
        Error::Parse { row, .. } => assert_eq!(row, 2),
        other => panic!("expected Parse error, got {other:?}"),
    }
}

#[test]
fn test_fill_pads_missing_column() {
    let records = parse("a,b,c\n1,2\n", &ParseOptions::default()).unwrap();
    assert_eq!(records, vec![object(&[("a", "1"), ("b", "2"), ("c", "")])]);
}

#[test]
fn test_unterminated_quote_reports_row_and_kind() {
    let err = parse("a,b\n\"unterminated", &ParseOptions::default()).unwrap_err();
    match err {
        Error::UnexpectedEof { row, position, .. } => {
            assert_eq!(row, 2);
            let pos = position.expect("position is computed lazily on error");
            assert_eq!(pos.line, 2);
        }
        other => panic!("expected UnexpectedEof, got {other:?}"),
    }
}

#[test]
fn test_chunked_parse_equals_oneshot() {
    let parser = Parser::new(ParseOptions::default()).unwrap();
    let oneshot = parser.parse_to_vec("a,b\n1,2\n").unwrap();
    let chunked = parser
        .parse_chunks_to_vec(["a,b\n".to_string(), "1,".to_string(), "2\n".to_string()])
        .unwrap();
    assert_eq!(chunked, oneshot);
}

#[test]
fn test_field_size_limit_message() {
    let opts = ParseOptions::default().max_field_size(100);
    let field = "x".repeat(101);
    let err = parse(&field, &opts).unwrap_err();
    assert!(err.to_string().contains("Field size"));
}

#[test]
fn test_buffer_size_limit_message() {
    let opts = ParseOptions::default().max_buffer_size(1024);
    let chunk = "y".repeat(2048);
    let err = parse(&chunk, &opts).unwrap_err();
    assert!(err.to_string().contains("Buffer size"));
}

#[test]
fn test_duplicate_header_names() {
    let err = parse("a,b,a\n1,2,3\n", &ParseOptions::default()).unwrap_err();
    assert!(err.to_string().contains("duplicate headers"));
}

#[test]
fn test_empty_trailing_line_with_and_without_skip() {
    let with_skip = ParseOptions::default().skip_empty_lines(true);
    let records = parse("a,b\n1,2\n\n", &with_skip).unwrap();
    assert_eq!(records, vec![object(&[("a", "1"), ("b", "2")])]);

    let records = parse("a,b\n1,2\n\n", &ParseOptions::default()).unwrap();
    assert_eq!(
        records,
        vec![object(&[("a", "1"), ("b", "2")]), object(&[("a", ""), ("b", "")])]
    );
}

#[test]
fn test_explicit_header_never_consumes_first_row() {
    let opts = ParseOptions::default().header(vec!["x".into(), "y".into()]);
    let records = parse("1,2\n", &opts).unwrap();
    assert_eq!(records, vec![object(&[("x", "1"), ("y", "2")])]);
}

#[test]
fn test_inferred_header_appears_as_data_only_with_include_header() {
    let opts = ParseOptions::default().output_format(OutputFormat::Array);
    let records = parse("a,b\n1,2\n", &opts).unwrap();
    assert_eq!(records, vec![Record::Array(vec!["1".into(), "2".into()])]);

    let opts = opts.include_header(true);
    let records = parse("a,b\n1,2\n", &opts).unwrap();
    assert_eq!(
        records,
        vec![
            Record::Array(vec!["a".into(), "b".into()]),
            Record::Array(vec!["1".into(), "2".into()]),
        ]
    );
}

#[test]
fn test_truncate_equals_fill_for_long_rows() {
    let input = "a,b\n1,2,3,4\n";
    let fill = parse(
        input,
        &ParseOptions::default()
            .output_format(OutputFormat::Array)
            .column_count_strategy(ColumnCountStrategy::Fill),
    )
    .unwrap();
    let truncate = parse(
        input,
        &ParseOptions::default()
            .output_format(OutputFormat::Array)
            .column_count_strategy(ColumnCountStrategy::Truncate),
    )
    .unwrap();
    assert_eq!(fill, truncate);
}

/// Every backend yields identical records for inputs inside the compiled
/// envelope.
#[test]
fn test_backend_equivalence() {
    let inputs = [
        "a,b,c\n1,2,3\n",
        "a,b\n\"x,y\",\"q\"\"z\"\r\n1,2\n",
        "a,b\n\n1,2\n\n",
        "a,b\n1,",
        "h\nonly",
        "a,b,c\n1,2\n9,8,7,6\n",
    ];
    let opts = ParseOptions::default();

    for input in inputs {
        let mut outputs = Vec::new();
        for backend in [Backend::Code, Backend::Compiled, Backend::CompiledAccel] {
            let mut pipeline = Pipeline::new(backend, &opts).unwrap();
            let mut records = Vec::new();
            pipeline.push_chunk(input, &mut records).unwrap();
            pipeline.finish(&mut records).unwrap();
            outputs.push(records);
        }
        assert_eq!(outputs[0], outputs[1], "code vs compiled on {input:?}");
        assert_eq!(outputs[0], outputs[2], "code vs accelerated on {input:?}");
    }
}

#[test]
fn test_multichar_delimiter_end_to_end() {
    let opts = ParseOptions::default().delimiter("::");
    let records = parse("a::b\n1::2\n", &opts).unwrap();
    assert_eq!(records, vec![object(&[("a", "1"), ("b", "2")])]);
}

#[test]
fn test_custom_quotation() {
    let opts = ParseOptions::default().quotation("'");
    let records = parse("a,b\n'x,y',z\n", &opts).unwrap();
    assert_eq!(records, vec![object(&[("a", "x,y"), ("b", "z")])]);
}

#[test]
fn test_location_tracking_spans() {
    let opts = ParseOptions::default().track_location(true);
    let mut lexer = crate::lexer::FieldLexer::new(&opts).unwrap();
    let tokens = lexer.lex(Some("a,b\nc"), false).unwrap();
    let rows: Vec<usize> = tokens
        .iter()
        .map(|t| t.location.unwrap().row_number)
        .collect();
    assert_eq!(rows, vec![1, 1, 2]);
}
