//! Benchmarks for address parsing, request planning and reply decoding.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pccc_eip::response::decode_frames;
use pccc_eip::{
    decode, encode, plan_reads, plan_writes, Address, OptimizerConfig, PlcValue, WriteItem,
    QUALITY_GOOD,
};

const SESSION: u32 = 0x0102_0304;

fn poll_list(count: usize) -> Vec<Address> {
    (0..count)
        .map(|i| match i % 5 {
            0 => format!("N7:{}", i),
            1 => format!("F8:{}", i / 2),
            2 => format!("B3:{}/{}", i / 16, i % 16),
            3 => format!("T4:{}.ACC", i / 5),
            _ => format!("N10:{},4", i * 3),
        })
        .map(|a| Address::parse(&a).unwrap())
        .collect()
}

fn read_reply(sequence: u16, data: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x07, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04, 0x4F, 0x00];
    payload.extend_from_slice(&sequence.to_le_bytes());
    payload.extend_from_slice(data);

    let total = 44 + payload.len();
    let mut frame = vec![0u8; 40];
    frame[0] = 0x6F;
    frame[2..4].copy_from_slice(&((total - 24) as u16).to_le_bytes());
    frame[4..8].copy_from_slice(&SESSION.to_le_bytes());
    frame[30] = 0x02;
    frame[36] = 0xB2;
    frame[38..40].copy_from_slice(&((total - 40) as u16).to_le_bytes());
    frame.extend_from_slice(&[0xCB, 0x00, 0x00, 0x00]);
    frame.extend_from_slice(&payload);
    frame
}

fn benchmark_address_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("address_parse");

    let addresses = [
        ("integer", "N7:0"),
        ("array", "N7:10,20"),
        ("bit", "B3:1/4"),
        ("timer_field", "T4:0.ACC"),
        ("string", "ST9:2"),
        ("io", "I:1.0/3"),
    ];

    for (name, address) in addresses {
        group.bench_function(name, |b| {
            b.iter(|| Address::parse(black_box(address)))
        });
    }

    group.finish();
}

fn benchmark_plan_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_reads");
    let config = OptimizerConfig::default();
    let unmerged = OptimizerConfig::new(220, 5, false).unwrap();

    for count in [10, 100, 1000] {
        let items = poll_list(count);
        group.bench_with_input(BenchmarkId::new("optimized", count), &items, |b, items| {
            b.iter(|| plan_reads(black_box(items), &config))
        });
        group.bench_with_input(BenchmarkId::new("unoptimized", count), &items, |b, items| {
            b.iter(|| plan_reads(black_box(items), &unmerged))
        });
    }

    group.finish();
}

fn benchmark_plan_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_writes");
    let config = OptimizerConfig::default();

    for count in [10, 100] {
        let items: Vec<WriteItem> = (0..count)
            .map(|i| {
                let address = Address::parse(&format!("N7:{}", i)).unwrap();
                let data = encode(&address, &PlcValue::Int(i as i16)).unwrap();
                WriteItem { address, data }
            })
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(count), &items, |b, items| {
            b.iter(|| plan_writes(black_box(items), &config))
        });
    }

    group.finish();
}

fn benchmark_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let data: Vec<u8> = (0..200u8).collect();
    let single = Bytes::from(read_reply(1, &data));
    group.bench_function("single_frame", |b| {
        b.iter(|| decode_frames(black_box(single.clone()), SESSION))
    });

    let batched: Vec<u8> = (1..=4).flat_map(|seq| read_reply(seq, &data)).collect();
    let batched = Bytes::from(batched);
    group.bench_function("batched_frames", |b| {
        b.iter(|| decode_frames(black_box(batched.clone()), SESSION))
    });

    let array = Address::parse("N7:0,100").unwrap();
    let quality = vec![QUALITY_GOOD; 200];
    group.bench_function("int_array", |b| {
        b.iter(|| decode(&array, black_box(&data), &quality))
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_address_parse,
    benchmark_plan_reads,
    benchmark_plan_writes,
    benchmark_decode
);
criterion_main!(benches);
