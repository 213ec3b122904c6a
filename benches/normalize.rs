use criterion::{criterion_group, criterion_main, Criterion};
use std::path::Path;

fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read(path).unwrap()
}

fn bench_normalize(c: &mut Criterion) {
    let plain = fixture("plain.eml");
    let gbk = fixture("html_gbk.eml");

    c.bench_function("normalize_plain", |b| {
        b.iter(|| mailgrab::parser::mime::normalize(&plain).unwrap())
    });
    c.bench_function("normalize_html_gbk", |b| {
        b.iter(|| mailgrab::parser::mime::normalize(&gbk).unwrap())
    });
}

fn bench_store_insert(c: &mut Criterion) {
    use mailgrab::model::email::{NormalizedEmail, Uid};

    let content = mailgrab::parser::mime::normalize(&fixture("alternative.eml")).unwrap();
    let store = mailgrab::store::EmailStore::open_in_memory().unwrap();
    let mut n = 0u64;

    c.bench_function("store_insert", |b| {
        b.iter(|| {
            n += 1;
            store
                .insert(&NormalizedEmail::new(Uid::new(n.to_string()), content.clone()))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_normalize, bench_store_insert);
criterion_main!(benches);
