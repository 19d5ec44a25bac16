/// One MiB in bytes; bucket thresholds are configured in MiB.
pub const MIB: u64 = 1024 * 1024;

/// Convert a MiB threshold to bytes, saturating instead of overflowing.
pub fn mib_to_bytes(mib: u64) -> u64 {
    mib.saturating_mul(MIB)
}

/// A scanned regular file: path relative to the source root (always `/`
/// separated) and its size at scan time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub rel_path: String,
    pub size: u64,
}

impl FileEntry {
    pub fn new(rel_path: impl Into<String>, size: u64) -> Self {
        Self { rel_path: rel_path.into(), size }
    }
}

/// Files in scan order plus their cumulative size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bucket {
    entries: Vec<FileEntry>,
    size: u64,
}

impl Bucket {
    pub fn push(&mut self, entry: FileEntry) {
        self.size = self.size.saturating_add(entry.size);
        self.entries.push(entry);
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileEntry> {
        self.entries.iter()
    }
}

impl FromIterator<FileEntry> for Bucket {
    fn from_iter<I: IntoIterator<Item = FileEntry>>(iter: I) -> Self {
        let mut b = Bucket::default();
        for e in iter {
            b.push(e);
        }
        b
    }
}

/// Streaming greedy partitioner. A bucket is sealed as soon as its size
/// reaches the threshold; whatever remains at `finish` becomes the last one.
#[derive(Debug)]
pub struct BucketBuilder {
    threshold: u64,
    current: Bucket,
    sealed: Vec<Bucket>,
}

impl BucketBuilder {
    pub fn new(threshold_bytes: u64) -> Self {
        Self { threshold: threshold_bytes, current: Bucket::default(), sealed: Vec::new() }
    }

    pub fn push(&mut self, entry: FileEntry) {
        self.current.push(entry);
        if self.current.size() >= self.threshold {
            self.sealed.push(std::mem::take(&mut self.current));
        }
    }

    pub fn finish(mut self) -> Vec<Bucket> {
        if !self.current.is_empty() {
            self.sealed.push(self.current);
        }
        self.sealed
    }
}

/// Partition `entries` in order with the given byte threshold.
pub fn distribute<I>(entries: I, threshold_bytes: u64) -> Vec<Bucket>
where
    I: IntoIterator<Item = FileEntry>,
{
    let mut builder = BucketBuilder::new(threshold_bytes);
    for e in entries {
        builder.push(e);
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(buckets: &[Bucket]) -> Vec<Vec<u64>> {
        buckets.iter().map(|b| b.iter().map(|e| e.size).collect()).collect()
    }

    #[test]
    fn seals_when_threshold_reached() {
        let entries = vec![
            FileEntry::new("a", 400 * MIB),
            FileEntry::new("b", 700 * MIB),
            FileEntry::new("c", 50 * MIB),
        ];
        let buckets = distribute(entries, mib_to_bytes(1000));
        assert_eq!(sizes(&buckets), vec![vec![400 * MIB, 700 * MIB], vec![50 * MIB]]);
        assert_eq!(buckets[0].size(), 1100 * MIB);
    }

    #[test]
    fn exact_threshold_seals_immediately() {
        let buckets = distribute(
            vec![FileEntry::new("a", 60), FileEntry::new("b", 40), FileEntry::new("c", 1)],
            100,
        );
        assert_eq!(sizes(&buckets), vec![vec![60, 40], vec![1]]);
    }

    #[test]
    fn oversized_file_sits_alone() {
        let buckets = distribute(
            vec![
                FileEntry::new("small", 10),
                FileEntry::new("huge", 5000),
                FileEntry::new("tail", 5),
            ],
            100,
        );
        // "small" is open when "huge" arrives, so they seal together
        assert_eq!(sizes(&buckets), vec![vec![10, 5000], vec![5]]);

        let alone = distribute(vec![FileEntry::new("huge", 5000), FileEntry::new("tail", 5)], 100);
        assert_eq!(sizes(&alone), vec![vec![5000], vec![5]]);
    }

    #[test]
    fn zero_threshold_gives_one_file_per_bucket() {
        let buckets = distribute(
            vec![FileEntry::new("a", 0), FileEntry::new("b", 3), FileEntry::new("c", 0)],
            0,
        );
        assert_eq!(buckets.len(), 3);
    }

    #[test]
    fn empty_input_has_no_buckets() {
        assert!(distribute(Vec::new(), 100).is_empty());
    }

    #[test]
    fn empty_files_accumulate_into_last_bucket() {
        let buckets = distribute((0..5).map(|i| FileEntry::new(format!("f{}", i), 0)), 100);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].len(), 5);
        assert_eq!(buckets[0].size(), 0);
    }

    #[test]
    fn mib_conversion_saturates() {
        assert_eq!(mib_to_bytes(1000), 1000 * 1024 * 1024);
        assert_eq!(mib_to_bytes(u64::MAX), u64::MAX);
    }
}
