#![forbid(unsafe_code)]

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use weft::metadb::{row_flags, ElementToken, MetaDb};
use weft::source::SourceResultDocument;

const ROWS_PER_BATCH: usize = 4096;

fn micro_metadb(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/metadb");
    group.throughput(Throughput::Elements(ROWS_PER_BATCH as u64));
    group.bench_function("append", |b| {
        b.iter(|| {
            let mut db = MetaDb::create_for_estimated_rows(ROWS_PER_BATCH as u32);
            for i in 0..ROWS_PER_BATCH as u32 {
                db.append(
                    ElementToken::Number,
                    i % 1000,
                    i as i32,
                    0,
                    0,
                    0,
                    row_flags::NONE,
                )
                .expect("append");
            }
            db
        });
    });
    group.finish();
}

fn micro_parse(c: &mut Criterion) {
    let mut text = String::from("[");
    for i in 0..2000 {
        if i > 0 {
            text.push(',');
        }
        text.push_str(&format!(r#"{{"id":{i},"name":"item-{i}","ok":true}}"#));
    }
    text.push(']');

    let mut group = c.benchmark_group("micro/parse");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("source_document", |b| {
        b.iter(|| SourceResultDocument::parse_text(&text).expect("parse"));
    });
    group.finish();
}

criterion_group!(benches, micro_metadb, micro_parse);
criterion_main!(benches);
