use std::sync::Arc;

use criterion::*;
use sqfs_block_processor::compressor::IdentityCompressor;
use sqfs_block_processor::{BlockFlags, BlockWriter, Config, FragmentTable, Processor};

#[derive(Default)]
struct SinkWriter {
    offset: u64,
}

impl BlockWriter for SinkWriter {
    fn write(&mut self, payload: &[u8]) -> sqfs_block_processor::Result<u64> {
        let offset = self.offset;
        self.offset += payload.len() as u64;
        Ok(offset)
    }
}

#[derive(Default)]
struct SinkFragmentTable {
    next_index: u32,
}

impl FragmentTable for SinkFragmentTable {
    fn append(&mut self, _offset: u64, _size: u32, _compressed: bool) -> sqfs_block_processor::Result<u32> {
        let index = self.next_index;
        self.next_index += 1;
        Ok(index)
    }

    fn lookup_by_checksum(&self, _size: u32, _checksum: u32) -> Option<(u32, u32)> {
        None
    }
}

fn bench_ingest(file_count: usize, file_size: usize, num_workers: usize) {
    let mut config = Config::new(131072);
    config.set_num_workers(num_workers);
    config.set_max_backlog(num_workers.max(1) * 2);
    let mut processor = Processor::new(
        config,
        Arc::new(IdentityCompressor),
        Box::new(SinkWriter::default()),
        Box::new(SinkFragmentTable::default()),
    );

    let payload = vec![0x5au8; file_size];
    for _ in 0..file_count {
        processor.begin_file(BlockFlags::empty()).unwrap();
        processor.append(&payload).unwrap();
        processor.end_file().unwrap();
    }
    processor.finish().unwrap();
    processor.shutdown();
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(10);

    group.bench_function("serial_small_files", |b| {
        b.iter(|| black_box(bench_ingest(256, 4096, 0)))
    });

    group.bench_function("serial_large_file", |b| {
        b.iter(|| black_box(bench_ingest(1, 8 * 1024 * 1024, 0)))
    });

    group.bench_function("parallel_large_file", |b| {
        b.iter(|| black_box(bench_ingest(1, 8 * 1024 * 1024, 4)))
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
