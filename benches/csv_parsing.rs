use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use csv_flux::accel::scanner::SeparatorScanner;
use csv_flux::accel::AccelLexer;
use csv_flux::compiled::CompiledLexer;
use csv_flux::lexer::FieldLexer;
use csv_flux::{ParseOptions, Parser, StreamParser};

fn build_csv(rows: usize, cols: usize) -> String {
    let mut csv = String::new();
    csv.push_str(
        &(0..cols)
            .map(|c| format!("col{c}"))
            .collect::<Vec<_>>()
            .join(","),
    );
    csv.push('\n');
    for r in 0..rows {
        csv.push_str(
            &(0..cols)
                .map(|c| format!("value_{r}_{c}"))
                .collect::<Vec<_>>()
                .join(","),
        );
        csv.push('\n');
    }
    csv
}

fn build_quoted_csv(rows: usize) -> String {
    let mut csv = String::from("a,b,c\n");
    for r in 0..rows {
        csv.push_str(&format!("\"x,{r}\",\"say \"\"hi\"\"\",plain{r}\n"));
    }
    csv
}

fn bench_lexers(c: &mut Criterion) {
    let input = build_csv(1000, 10);
    let mut group = c.benchmark_group("lexers");
    group.throughput(Throughput::Bytes(input.len() as u64));

    group.bench_function("field_lexer", |b| {
        b.iter(|| {
            let mut lexer = FieldLexer::new(&ParseOptions::default()).unwrap();
            let tokens = lexer.lex(Some(black_box(&input)), false).unwrap();
            black_box(tokens.len())
        })
    });

    group.bench_function("compiled_lexer", |b| {
        b.iter(|| {
            let mut lexer = CompiledLexer::new(&ParseOptions::default()).unwrap();
            lexer.push_chunk(black_box(&input)).unwrap();
            lexer.finish().unwrap();
            let mut n = 0;
            while lexer.next_token().unwrap().is_some() {
                n += 1;
            }
            black_box(n)
        })
    });

    group.bench_function("accel_lexer", |b| {
        b.iter(|| {
            let mut lexer = AccelLexer::new(&ParseOptions::default()).unwrap();
            lexer.push_chunk(black_box(&input)).unwrap();
            lexer.finish();
            let mut n = 0;
            while lexer.next_token().unwrap().is_some() {
                n += 1;
            }
            black_box(n)
        })
    });

    group.finish();
}

fn bench_scanner(c: &mut Criterion) {
    let plain = build_csv(1000, 10);
    let quoted = build_quoted_csv(1000);
    let mut group = c.benchmark_group("scanner");

    group.throughput(Throughput::Bytes(plain.len() as u64));
    group.bench_function("plain", |b| {
        b.iter(|| {
            let mut scanner = SeparatorScanner::new(b',', b'"');
            let result = scanner.scan(black_box(plain.as_bytes()), 0);
            black_box(result.separators.len())
        })
    });

    group.throughput(Throughput::Bytes(quoted.len() as u64));
    group.bench_function("quoted", |b| {
        b.iter(|| {
            let mut scanner = SeparatorScanner::new(b',', b'"');
            let result = scanner.scan(black_box(quoted.as_bytes()), 0);
            black_box(result.separators.len())
        })
    });

    group.finish();
}

fn bench_full_parse(c: &mut Criterion) {
    let input = build_csv(1000, 10);
    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Bytes(input.len() as u64));

    group.bench_function("one_shot", |b| {
        let parser = Parser::new(ParseOptions::default()).unwrap();
        b.iter(|| {
            let records = parser.parse_to_vec(black_box(&input)).unwrap();
            black_box(records.len())
        })
    });

    group.bench_function("chunked_1k", |b| {
        b.iter(|| {
            let mut parser = StreamParser::new(ParseOptions::default()).unwrap();
            let mut n = 0;
            for chunk in input.as_bytes().chunks(1024) {
                let chunk = std::str::from_utf8(chunk).unwrap();
                n += parser.process_chunk(black_box(chunk), true).unwrap().len();
            }
            n += parser.flush().unwrap().len();
            black_box(n)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_lexers, bench_scanner, bench_full_parse);
criterion_main!(benches);
