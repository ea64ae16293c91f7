//! Property-based tests over the pipeline.

use proptest::prelude::*;

use crate::assembler::Record;
use crate::engine::Backend;
use crate::options::{ColumnCountStrategy, OutputFormat, ParseOptions};
use crate::parser::{Parser, Pipeline};
use crate::tests::common::{create_csv, escape_csv_field};

/// Printable ASCII plus a few multibyte scalars; quotes, commas and
/// newlines are introduced by escaping.
fn csv_field_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[ -~あいう]{0,12}").unwrap()
}

/// Non-empty, unique header names.
fn csv_header_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(csv_field_strategy(), 1..6).prop_map(|fields| {
        fields
            .into_iter()
            .enumerate()
            .map(|(i, f)| {
                if f.is_empty() {
                    format!("col{}", i)
                } else {
                    format!("{}_{}", f, i)
                }
            })
            .collect()
    })
}

fn csv_rows_strategy(num_columns: usize) -> impl Strategy<Value = Vec<Vec<String>>> {
    prop::collection::vec(
        prop::collection::vec(csv_field_strategy(), num_columns..=num_columns),
        0..12,
    )
}

fn header_and_rows() -> impl Strategy<Value = (Vec<String>, Vec<Vec<String>>)> {
    csv_header_strategy().prop_flat_map(|h| {
        let len = h.len();
        csv_rows_strategy(len).prop_map(move |rows| (h.clone(), rows))
    })
}

fn chunk_by_chars(input: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = input.chars().collect();
    chars
        .chunks(chunk_size.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

proptest! {
    /// Streaming arbitrary chunkings of an input yields exactly the
    /// one-shot record sequence.
    #[test]
    fn prop_chunking_equivalence(
        (headers, rows) in header_and_rows(),
        chunk_size in 1usize..17,
    ) {
        let csv = create_csv(&headers, &rows);
        let parser = Parser::new(ParseOptions::default()).unwrap();
        let oneshot = parser.parse_to_vec(&csv).unwrap();
        let chunked = parser
            .parse_chunks_to_vec(chunk_by_chars(&csv, chunk_size))
            .unwrap();
        prop_assert_eq!(oneshot, chunked);
    }

    /// One character at a time is just the smallest chunking.
    #[test]
    fn prop_one_char_at_a_time((headers, rows) in header_and_rows()) {
        let csv = create_csv(&headers, &rows);
        prop_assume!(csv.chars().count() <= 200);

        let parser = Parser::new(ParseOptions::default()).unwrap();
        let oneshot = parser.parse_to_vec(&csv).unwrap();
        let chunked = parser
            .parse_chunks_to_vec(chunk_by_chars(&csv, 1))
            .unwrap();
        prop_assert_eq!(oneshot, chunked);
    }

    /// The three backends agree record-for-record inside the compiled
    /// envelope.
    #[test]
    fn prop_backend_equivalence((headers, rows) in header_and_rows()) {
        let csv = create_csv(&headers, &rows);
        let opts = ParseOptions::default();

        let mut outputs = Vec::new();
        for backend in [Backend::Code, Backend::Compiled, Backend::CompiledAccel] {
            let mut pipeline = Pipeline::new(backend, &opts).unwrap();
            let mut records = Vec::new();
            pipeline.push_chunk(&csv, &mut records).unwrap();
            pipeline.finish(&mut records).unwrap();
            outputs.push(records);
        }
        prop_assert_eq!(&outputs[0], &outputs[1]);
        prop_assert_eq!(&outputs[0], &outputs[2]);
    }

    /// Canonical re-serialization of an array-mode parse is idempotent.
    #[test]
    fn prop_roundtrip_under_canonical_serialization(
        rows in prop::collection::vec(
            prop::collection::vec(csv_field_strategy(), 1..5),
            1..10,
        ),
    ) {
        let opts = ParseOptions::default()
            .header(vec![])
            .output_format(OutputFormat::Array)
            .column_count_strategy(ColumnCountStrategy::Keep);
        let parser = Parser::new(opts).unwrap();

        let serialize = |records: &[Record]| -> String {
            let mut out = String::new();
            for record in records {
                let Record::Array(cells) = record else {
                    panic!("array output expected");
                };
                out.push_str(
                    &cells
                        .iter()
                        .map(|f| escape_csv_field(f))
                        .collect::<Vec<_>>()
                        .join(","),
                );
                out.push('\n');
            }
            out
        };

        let input: String = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|f| escape_csv_field(f))
                    .collect::<Vec<_>>()
                    .join(",")
                    + "\n"
            })
            .collect();

        let first = parser.parse_to_vec(&input).unwrap();
        let second = parser.parse_to_vec(&serialize(&first)).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Lowering `max_field_size` never turns a failing parse into a
    /// success.
    #[test]
    fn prop_field_limit_monotonicity(
        (headers, rows) in header_and_rows(),
        low in 1usize..32,
        extra in 1usize..64,
    ) {
        let csv = create_csv(&headers, &rows);
        let high = low + extra;

        let high_result =
            Parser::new(ParseOptions::default().max_field_size(high))
                .unwrap()
                .parse_to_vec(&csv);
        if high_result.is_err() {
            let low_result =
                Parser::new(ParseOptions::default().max_field_size(low))
                    .unwrap()
                    .parse_to_vec(&csv);
            prop_assert!(low_result.is_err());
        }
    }
}
