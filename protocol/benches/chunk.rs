use divan::Bencher;
use protocol::{compute_length, serialize_to_buf, WireMessage};
use rkyv::api::high::to_bytes_in;
use rkyv::util::AlignedVec;
use std::hint::black_box;

#[global_allocator]
static ALLOC: divan::AllocProfiler = divan::AllocProfiler::system();

fn chunk_of(payload_len: usize) -> WireMessage<'static> {
    let payload: &'static [u8] = Box::leak(vec![0x7b; payload_len].into_boxed_slice());
    WireMessage::Chunk { payload }
}

#[divan::bench(args = [64, 1024, 16384, 262144])]
fn serialize_chunk(bencher: Bencher, payload_len: usize) {
    let msg = chunk_of(payload_len);
    let required_size = compute_length(&msg).unwrap();
    let mut buf = vec![0u8; required_size];
    bencher.bench_local(|| {
        for _ in 0..1000 {
            serialize_to_buf(&msg, &mut buf).unwrap();
            black_box(&buf);
        }
    });
}

#[divan::bench(args = [64, 1024, 16384, 262144])]
fn access_chunk(bencher: Bencher, payload_len: usize) {
    let msg = chunk_of(payload_len);
    let mut buf = AlignedVec::<8>::new();
    to_bytes_in::<_, rkyv::rancor::Error>(&msg, &mut buf).unwrap();

    bencher.bench(|| {
        for _ in 0..1000 {
            let archived =
                rkyv::access::<protocol::ArchivedWireMessage, rkyv::rancor::Error>(&buf).unwrap();
            black_box(archived);
        }
    })
}

fn main() {
    divan::main();
}
