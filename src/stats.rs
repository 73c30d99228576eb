//! Read-only processor counters

/// Snapshot of [`Stats`], readable at any time but only precise once
/// `finish` has returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub input_bytes_read: u64,
    pub data_block_count: u64,
    pub frag_block_count: u64,
    pub sparse_block_count: u64,
    pub total_frag_count: u64,
    pub actual_frag_count: u64,
}

/// Monotonic counters accumulated across the life of a processor.
///
/// Field names follow `sqfs_block_processor_stats_t`; there's no on-disk
/// struct to size-prefix in this crate, so the `size` self-descriptor field
/// from the original doesn't carry over. Plain `u64`s, not atomics: every
/// increment happens on the producer thread under the same mutex that
/// guards the rest of the processor's shared state, per §5.
#[derive(Debug, Default)]
pub struct Stats {
    input_bytes_read: u64,
    data_block_count: u64,
    frag_block_count: u64,
    sparse_block_count: u64,
    total_frag_count: u64,
    actual_frag_count: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input_bytes_read(&mut self, n: u64) {
        self.input_bytes_read += n;
    }

    pub fn inc_data_block_count(&mut self) {
        self.data_block_count += 1;
    }

    pub fn inc_frag_block_count(&mut self) {
        self.frag_block_count += 1;
    }

    pub fn inc_sparse_block_count(&mut self) {
        self.sparse_block_count += 1;
    }

    pub fn inc_total_frag_count(&mut self) {
        self.total_frag_count += 1;
    }

    pub fn inc_actual_frag_count(&mut self) {
        self.actual_frag_count += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            input_bytes_read: self.input_bytes_read,
            data_block_count: self.data_block_count,
            frag_block_count: self.frag_block_count,
            sparse_block_count: self.sparse_block_count,
            total_frag_count: self.total_frag_count,
            actual_frag_count: self.actual_frag_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let mut stats = Stats::new();
        stats.add_input_bytes_read(100);
        stats.inc_data_block_count();
        stats.inc_data_block_count();
        stats.inc_total_frag_count();
        stats.inc_actual_frag_count();

        let snap = stats.snapshot();
        assert_eq!(snap.input_bytes_read, 100);
        assert_eq!(snap.data_block_count, 2);
        assert_eq!(snap.total_frag_count, 1);
        assert_eq!(snap.actual_frag_count, 1);
        assert_eq!(snap.sparse_block_count, 0);
    }
}
