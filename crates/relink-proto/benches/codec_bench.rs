use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use relink_proto::{RelayMessage, SendBuffer};

fn bench_send_data_encode(c: &mut Criterion) {
    let msg = RelayMessage::SendData {
        payload: vec![0xAA; 1200],
        target: 42,
    };
    let mut buffer = SendBuffer::for_packet_size(1200);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(msg.encoded_len() as u64));

    group.bench_function("send_data_1200_bytes", |b| {
        b.iter(|| {
            let _ = buffer.encode(black_box(&msg)).map(<[u8]>::len);
        })
    });

    group.finish();
}

fn bench_get_data_decode(c: &mut Criterion) {
    let sizes: Vec<(usize, &str)> = vec![
        (16, "16_bytes"),
        (256, "256_bytes"),
        (1200, "1200_bytes"),
    ];

    let mut group = c.benchmark_group("decode_get_data");

    for (size, name) in sizes {
        let frame = RelayMessage::GetData {
            payload: vec![0x42; size],
            sender: Some(7),
        }
        .to_bytes()
        .unwrap();

        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_function(name, |b| {
            b.iter(|| RelayMessage::from_bytes(black_box(&frame)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_send_data_encode, bench_get_data_decode);
criterion_main!(benches);
