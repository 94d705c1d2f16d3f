use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tclass_protocol::{decode, encode, PayloadSource, SeqNumber};

fn bench_request_encode(c: &mut Criterion) {
    let source = PayloadSource::default();
    let body = source.generate(1000);

    let mut group = c.benchmark_group("request_encode");
    group.throughput(Throughput::Bytes(body.len() as u64));
    group.bench_function("encode_1000", |b| {
        b.iter(|| {
            let bytes = encode(black_box(SeqNumber::new(42)), black_box(123_456), &body);
            black_box(bytes);
        });
    });
    group.finish();
}

fn bench_header_decode(c: &mut Criterion) {
    let bytes = encode(SeqNumber::new(42), 123_456, &PayloadSource::default().generate(1000));

    c.bench_function("header_decode", |b| {
        b.iter(|| {
            let header = decode(black_box(&bytes)).unwrap();
            black_box(header);
        });
    });
}

fn bench_payload_generate(c: &mut Criterion) {
    let straight = PayloadSource::default();
    let wrapping = PayloadSource::new(tclass_protocol::LOREM_IPSUM, 900);

    c.bench_function("payload_generate_borrowed", |b| {
        b.iter(|| black_box(straight.generate(black_box(1000))));
    });

    c.bench_function("payload_generate_wrapped", |b| {
        b.iter(|| black_box(wrapping.generate(black_box(1000))));
    });
}

criterion_group!(
    benches,
    bench_request_encode,
    bench_header_decode,
    bench_payload_generate
);
criterion_main!(benches);
