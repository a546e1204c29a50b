use std::collections::BTreeMap;
use std::ops::{Range, RangeInclusive};
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::RecordId;

/// Inclusive range of line indices `[lo, hi]` within one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Interval(pub usize, pub usize);

impl Interval {
    pub fn lo(&self) -> usize {
        self.0
    }

    pub fn hi(&self) -> usize {
        self.1
    }

    pub fn len(&self) -> usize {
        self.1 - self.0 + 1
    }

    pub fn contains(&self, line: usize) -> bool {
        self.0 <= line && line <= self.1
    }

    pub fn lines(&self) -> RangeInclusive<usize> {
        self.0..=self.1
    }
}

/// Free-space entry for one record file.
/// Blocks are sorted, disjoint, and never adjacent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeSpaceFile {
    pub full: bool,
    pub blocks: Vec<Interval>,
}

impl FreeSpaceFile {
    /// A freshly created, entirely blank file.
    pub fn empty(line_limit: usize) -> Self {
        FreeSpaceFile {
            full: false,
            blocks: vec![Interval(0, line_limit - 1)],
        }
    }

    pub fn free_lines(&self) -> usize {
        self.blocks.iter().map(Interval::len).sum()
    }
}

/// Lines of one file handed out by an allocation, and which input
/// records go there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub file: String,
    pub intervals: Vec<Interval>,
    pub records: Range<usize>,
}

impl Placement {
    pub fn lines(&self) -> impl Iterator<Item = usize> + '_ {
        self.intervals.iter().flat_map(Interval::lines)
    }
}

/// Result of planning an allocation. `table` is the free-space state to
/// commit once every placement has been written.
#[derive(Debug, Clone)]
pub struct Allocation {
    pub placements: Vec<Placement>,
    pub new_files: Vec<String>,
    pub table: FreeSpaceCollection,
}

/// Free-space table of one collection, keyed by file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FreeSpaceCollection {
    pub files: BTreeMap<String, FreeSpaceFile>,
}

impl FreeSpaceCollection {
    pub fn new() -> Self {
        FreeSpaceCollection::default()
    }

    pub fn file(&self, key: &str) -> Option<&FreeSpaceFile> {
        self.files.get(key)
    }

    /// Plan placement of `n` records. Existing non-full files are filled in
    /// key order, lowest free lines first; the remainder goes to new files
    /// of `line_limit` lines whose keys come from `new_key`.
    pub fn allocate<F>(&self, n: usize, line_limit: usize, mut new_key: F) -> Result<Allocation>
    where
        F: FnMut() -> String,
    {
        if n == 0 {
            return Err(Error::new(
                ErrorKind::AllocationInvariantViolation,
                "allocation requested for zero records".to_string(),
            ));
        }
        if line_limit == 0 {
            return Err(Error::new(
                ErrorKind::AllocationInvariantViolation,
                "storage line limit is zero".to_string(),
            ));
        }

        let mut table = self.clone();
        let mut placements = Vec::new();
        let mut new_files = Vec::new();
        let mut assigned = 0;

        for (key, file) in table.files.iter_mut() {
            if assigned == n {
                break;
            }
            if file.full {
                continue;
            }
            let taken = take_lines(file, n - assigned);
            if taken.is_empty() {
                continue;
            }
            let count: usize = taken.iter().map(Interval::len).sum();
            placements.push(Placement {
                file: key.clone(),
                intervals: taken,
                records: assigned..assigned + count,
            });
            assigned += count;
        }

        while assigned < n {
            let key = new_key();
            let mut file = FreeSpaceFile::empty(line_limit);
            let taken = take_lines(&mut file, n - assigned);
            let count: usize = taken.iter().map(Interval::len).sum();
            tracing::trace!(file = %key, lines = count, "allocating new record file");
            placements.push(Placement {
                file: key.clone(),
                intervals: taken,
                records: assigned..assigned + count,
            });
            assigned += count;
            table.files.insert(key.clone(), file);
            new_files.push(key);
        }

        Ok(Allocation { placements, new_files, table })
    }

    /// Free-space state after the lines of `ids` are released.
    pub fn deallocate(&self, ids: &[RecordId]) -> Result<FreeSpaceCollection> {
        let mut table = self.clone();
        for (file_key, lines) in group_by_file(ids) {
            let file = table
                .files
                .get_mut(&file_key)
                .ok_or_else(|| Error::not_found(format!("record file {} is not allocated", file_key)))?;
            let freed = build_intervals(&lines);
            file.blocks = merge_intervals(&freed, &file.blocks);
            file.full = false;
        }
        Ok(table)
    }

    pub fn remove_file(&mut self, key: &str) -> Option<FreeSpaceFile> {
        self.files.remove(key)
    }
}

/// Consume up to `wanted` lines from the low end of `file`'s blocks.
fn take_lines(file: &mut FreeSpaceFile, wanted: usize) -> Vec<Interval> {
    let mut taken = Vec::new();
    let mut remaining = wanted;
    while remaining > 0 {
        let Some(block) = file.blocks.first_mut() else {
            break;
        };
        if block.len() > remaining {
            taken.push(Interval(block.0, block.0 + remaining - 1));
            block.0 += remaining;
            remaining = 0;
        } else {
            remaining -= block.len();
            taken.push(*block);
            file.blocks.remove(0);
        }
    }
    if file.blocks.is_empty() {
        file.full = true;
    }
    taken
}

/// Line indices grouped by file key, each group in ascending line order.
pub fn group_by_file(ids: &[RecordId]) -> BTreeMap<String, Vec<usize>> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for id in ids {
        groups.entry(id.file.clone()).or_default().push(id.line);
    }
    for lines in groups.values_mut() {
        lines.sort_unstable();
        lines.dedup();
    }
    groups
}

/// Collapse line indices into sorted, merged intervals.
pub fn build_intervals(lines: &[usize]) -> Vec<Interval> {
    let mut sorted = lines.to_vec();
    sorted.sort_unstable();

    let mut out: Vec<Interval> = Vec::new();
    for line in sorted {
        match out.last_mut() {
            Some(last) if line <= last.1 + 1 => last.1 = last.1.max(line),
            _ => out.push(Interval(line, line)),
        }
    }
    out
}

/// Union of two interval sets as sorted, disjoint, non-adjacent intervals.
pub fn merge_intervals(a: &[Interval], b: &[Interval]) -> Vec<Interval> {
    let mut all: Vec<Interval> = a.iter().chain(b.iter()).copied().collect();
    all.sort_unstable();

    let mut out: Vec<Interval> = Vec::with_capacity(all.len());
    for interval in all {
        match out.last_mut() {
            Some(last) if interval.0 <= last.1 + 1 => last.1 = last.1.max(interval.1),
            _ => out.push(interval),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn keys() -> impl FnMut() -> String {
        let mut next = 0;
        move || {
            next += 1;
            format!("file{}", next)
        }
    }

    #[test]
    fn builds_runs_of_consecutive_lines() {
        let blocks = build_intervals(&[0, 1, 2, 3, 5, 6, 7, 9, 10]);
        assert_eq!(blocks, vec![Interval(0, 3), Interval(5, 7), Interval(9, 10)]);
    }

    #[test]
    fn merges_overlapping_and_adjacent() {
        let merged = merge_intervals(
            &[Interval(0, 5), Interval(10, 16)],
            &[Interval(4, 12), Interval(20, 24)],
        );
        assert_eq!(merged, vec![Interval(0, 16), Interval(20, 24)]);

        let touching = merge_intervals(&[Interval(0, 2)], &[Interval(3, 4)]);
        assert_eq!(touching, vec![Interval(0, 4)]);
    }

    #[test]
    fn zero_record_allocation_is_an_invariant_violation() {
        let table = FreeSpaceCollection::new();
        let err = table.allocate(0, 4, keys()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AllocationInvariantViolation);
    }

    #[test]
    fn overflow_creates_full_capacity_files() {
        let table = FreeSpaceCollection::new();
        let alloc = table.allocate(6, 4, keys()).unwrap();

        assert_eq!(alloc.new_files, vec!["file1".to_string(), "file2".to_string()]);
        assert_eq!(alloc.placements[0].intervals, vec![Interval(0, 3)]);
        assert_eq!(alloc.placements[0].records, 0..4);
        assert_eq!(alloc.placements[1].intervals, vec![Interval(0, 1)]);
        assert_eq!(alloc.placements[1].records, 4..6);

        let first = alloc.table.file("file1").unwrap();
        assert!(first.full);
        assert!(first.blocks.is_empty());
        let second = alloc.table.file("file2").unwrap();
        assert!(!second.full);
        assert_eq!(second.blocks, vec![Interval(2, 3)]);
    }

    #[test]
    fn freed_lines_are_reused_before_new_files() {
        let alloc = FreeSpaceCollection::new().allocate(6, 4, keys()).unwrap();
        let table = alloc.table.deallocate(&[RecordId::new("file1", 1)]).unwrap();
        assert_eq!(table.file("file1").unwrap().blocks, vec![Interval(1, 1)]);
        assert!(!table.file("file1").unwrap().full);

        let next = table.allocate(1, 4, || panic!("no new file expected")).unwrap();
        assert_eq!(next.placements.len(), 1);
        assert_eq!(next.placements[0].file, "file1");
        assert_eq!(next.placements[0].intervals, vec![Interval(1, 1)]);
        assert!(next.table.file("file1").unwrap().full);
    }

    #[test]
    fn allocation_spans_several_blocks() {
        let mut table = FreeSpaceCollection::new();
        table.files.insert(
            "a".to_string(),
            FreeSpaceFile { full: false, blocks: vec![Interval(1, 1), Interval(5, 9)] },
        );
        let alloc = table.allocate(3, 10, keys()).unwrap();
        assert_eq!(alloc.placements[0].intervals, vec![Interval(1, 1), Interval(5, 6)]);
        assert_eq!(alloc.table.file("a").unwrap().blocks, vec![Interval(7, 9)]);
        assert!(alloc.new_files.is_empty());
    }

    #[test]
    fn planning_leaves_source_table_untouched() {
        let table = FreeSpaceCollection::new().allocate(2, 4, keys()).unwrap().table;
        let before = table.clone();
        let _ = table.allocate(5, 4, keys()).unwrap();
        assert_eq!(table, before);
    }

    #[test]
    fn deallocating_unknown_file_fails() {
        let err = FreeSpaceCollection::new()
            .deallocate(&[RecordId::new("ghost", 0)])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    fn disjoint_set() -> impl Strategy<Value = Vec<Interval>> {
        prop::collection::vec(0usize..200, 0..40).prop_map(|lines| build_intervals(&lines))
    }

    fn points(intervals: &[Interval]) -> std::collections::BTreeSet<usize> {
        intervals.iter().flat_map(Interval::lines).collect()
    }

    proptest! {
        #[test]
        fn build_is_idempotent(lines in prop::collection::vec(0usize..500, 0..100)) {
            let once = build_intervals(&lines);
            let flattened: Vec<usize> = once.iter().flat_map(Interval::lines).collect();
            let twice = build_intervals(&flattened);
            prop_assert_eq!(&once, &twice);
            prop_assert_eq!(merge_intervals(&once, &[]), once);
        }

        #[test]
        fn merge_is_sorted_disjoint_union(a in disjoint_set(), b in disjoint_set()) {
            let merged = merge_intervals(&a, &b);
            for pair in merged.windows(2) {
                prop_assert!(pair[0].1 + 1 < pair[1].0);
            }
            for interval in &merged {
                prop_assert!(interval.0 <= interval.1);
            }
            let mut expected = points(&a);
            expected.extend(points(&b));
            prop_assert_eq!(points(&merged), expected);
        }

        #[test]
        fn allocate_then_free_restores_capacity(n in 1usize..30) {
            let alloc = FreeSpaceCollection::new().allocate(n, 7, keys()).unwrap();
            let ids: Vec<RecordId> = alloc
                .placements
                .iter()
                .flat_map(|p| p.lines().map(move |l| RecordId::new(p.file.clone(), l)))
                .collect();
            prop_assert_eq!(ids.len(), n);
            let freed = alloc.table.deallocate(&ids).unwrap();
            for file in freed.files.values() {
                prop_assert_eq!(&file.blocks, &vec![Interval(0, 6)]);
            }
        }
    }
}
