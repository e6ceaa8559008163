#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
#[cfg(not(target_arch = "wasm32"))]
use vnet_dev::transform::{offload_from_hdr, Batch4Decoder, HdrLanes};
#[cfg(not(target_arch = "wasm32"))]
use vnet_wire::hdr::{CSUM_OFFSET_TCP, CSUM_OFFSET_UDP};
#[cfg(not(target_arch = "wasm32"))]
use vnet_wire::VirtioNetHdr;

#[cfg(not(target_arch = "wasm32"))]
fn criterion_config() -> Criterion {
    match std::env::var("VNET_BENCH_PROFILE").as_deref() {
        Ok("ci") => Criterion::default()
            .warm_up_time(Duration::from_millis(200))
            .measurement_time(Duration::from_secs(1))
            .sample_size(10)
            .noise_threshold(0.05),
        _ => Criterion::default()
            .warm_up_time(Duration::from_secs(1))
            .measurement_time(Duration::from_secs(2))
            .sample_size(30)
            .noise_threshold(0.03),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn headers() -> [VirtioNetHdr; 4] {
    let hdr = |csum_start, csum_offset| VirtioNetHdr {
        csum_start,
        csum_offset,
        ..VirtioNetHdr::default()
    };
    [
        hdr(34, CSUM_OFFSET_UDP),
        hdr(34, CSUM_OFFSET_TCP),
        hdr(38, CSUM_OFFSET_UDP),
        hdr(0, 0),
    ]
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_decode_quad(c: &mut Criterion) {
    let hdrs = headers();
    let lanes = HdrLanes::from_headers(&hdrs);

    let mut group = c.benchmark_group("tx_offload_decode");
    group.throughput(Throughput::Elements(4));
    group.bench_function("scalar", |b| {
        b.iter(|| {
            let out = black_box(&hdrs).map(|h| offload_from_hdr::<false>(&h));
            black_box(out)
        })
    });
    group.bench_function("batch_portable", |b| {
        b.iter(|| black_box(Batch4Decoder::Portable.decode(black_box(&lanes))))
    });
    let detected = Batch4Decoder::detect();
    group.bench_function(format!("batch_{detected:?}").to_lowercase(), |b| {
        b.iter(|| black_box(detected.decode(black_box(&lanes))))
    });
    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
criterion_group! {
    name = benches;
    config = criterion_config();
    targets = bench_decode_quad
}
#[cfg(not(target_arch = "wasm32"))]
criterion_main!(benches);
