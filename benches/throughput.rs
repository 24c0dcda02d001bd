//! Frame building and validation throughput
//!
//! Measures the pure computation around a round trip: CRC16, payload
//! encoding and response validation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use voltage_modbus_session::checksum::{compute_crc16, crc16};
use voltage_modbus_session::structure::{decode, encode};
use voltage_modbus_session::{
    byte_structure, RequestBuilder, Response, RtuRequestBuilder, TcpRequestBuilder,
};

byte_structure! {
    #[derive(Debug, Clone, Copy)]
    struct ReadRequest {
        #[endian(big)]
        start_address: u16,
        #[endian(big)]
        quantity: u16,
    }
}

byte_structure! {
    #[derive(Debug, Clone, Copy)]
    struct Registers {
        byte_count: u8,
        #[endian(big)]
        values: [u16; 60],
    }
}

const REQUEST: ReadRequest = ReadRequest {
    start_address: 0x006B,
    quantity: 60,
};

fn bench_crc(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc16");

    for size in [8usize, 64, 256].iter() {
        let data: Vec<u8> = (0..*size).map(|i| i as u8).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| crc16(black_box(data)))
        });
    }

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let registers = Registers {
        byte_count: 120,
        values: [0x1234; 60],
    };
    let bytes = encode(&registers);

    c.bench_function("encode_60_registers", |b| {
        b.iter(|| encode(black_box(&registers)))
    });
    c.bench_function("decode_60_registers", |b| {
        b.iter(|| decode::<Registers>(black_box(&bytes)).unwrap())
    });
}

fn bench_frames(c: &mut Criterion) {
    c.bench_function("build_rtu_request", |b| {
        b.iter(|| {
            RtuRequestBuilder::new()
                .slave_address(0x11)
                .function_code(0x03)
                .object(black_box(&REQUEST))
                .build()
                .unwrap()
        })
    });

    c.bench_function("build_tcp_request", |b| {
        b.iter(|| {
            TcpRequestBuilder::new()
                .transaction_id(7)
                .slave_address(0x11)
                .function_code(0x03)
                .object(black_box(&REQUEST))
                .build()
                .unwrap()
        })
    });

    let request = RtuRequestBuilder::new()
        .slave_address(0x11)
        .function_code(0x03)
        .object(&REQUEST)
        .build()
        .unwrap();
    let mut frame = vec![0x11, 0x03];
    frame.extend_from_slice(&encode(&Registers {
        byte_count: 120,
        values: [0x00FF; 60],
    }));
    let crc = compute_crc16(&frame, 0, frame.len());
    frame.extend_from_slice(&crc);

    c.bench_function("validate_rtu_response", |b| {
        b.iter(|| Response::<Registers>::from_rtu_frame(black_box(&frame), &request).unwrap())
    });
}

criterion_group!(benches, bench_crc, bench_codec, bench_frames);
criterion_main!(benches);
