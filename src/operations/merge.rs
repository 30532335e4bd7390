// Line Merger
// Two-way and three-way merge of text with conflict markers and statistics

use super::diff::{diff_lines, join_lines, split_lines, DiffBlock};
use crate::core::SyncSettings;

/// Opens the source side of a conflict
pub const SOURCE_MARKER: &str = "<<<<<<< SOURCE";
/// Opens the base section of a conflict
pub const BASE_MARKER: &str = "||||||| BASE";
/// Separates source from target
pub const SEPARATOR_MARKER: &str = "=======";
/// Closes the target side of a conflict
pub const TARGET_MARKER: &str = ">>>>>>> TARGET";

/// How a two-way merge resolves lines that differ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Take the source everywhere
    SourceWins,
    /// Keep additions from both sides, mark replacements as conflicts
    Union,
}

/// Kind of an unresolved conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Both sides changed the same lines differently
    ContentConflict,
    /// One side deleted lines the other side edited
    DeleteVsEdit,
    /// Both sides added the same file with different content
    AddVsAdd,
}

/// One conflict region; line numbers are 1-based, 0 when there is no base
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    pub base_start_line: usize,
    pub source_start_line: usize,
    pub target_start_line: usize,
    pub source_chunk: String,
    pub target_chunk: String,
    pub kind: ConflictKind,
}

/// Line counters for a merge.
///
/// `lines_processed` counts lines written to the merged text, marker lines
/// excluded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStatistics {
    pub lines_processed: usize,
    pub conflicts_found: usize,
    pub auto_merged: usize,
    pub source_only: usize,
    pub target_only: usize,
}

/// Outcome of merging one text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// Merged text, including conflict markers
    pub merged_text: String,
    pub conflicts: Vec<MergeConflict>,
    pub statistics: MergeStatistics,
}

impl MergeResult {
    fn clean(text: &str) -> Self {
        Self {
            merged_text: text.to_string(),
            conflicts: Vec::new(),
            statistics: MergeStatistics {
                lines_processed: split_lines(text).len(),
                ..MergeStatistics::default()
            },
        }
    }

    /// Whether no conflict was left for the operator
    pub fn fully_auto_merged(&self) -> bool {
        self.statistics.conflicts_found == 0
    }
}

/// Accumulates merged lines and statistics
#[derive(Default)]
struct Output<'a> {
    lines: Vec<&'a str>,
    conflicts: Vec<MergeConflict>,
    stats: MergeStatistics,
}

impl<'a> Output<'a> {
    fn keep(&mut self, lines: &[&'a str]) {
        self.lines.extend_from_slice(lines);
        self.stats.lines_processed += lines.len();
    }

    fn conflict(
        &mut self,
        source: &[&'a str],
        base: Option<&[&'a str]>,
        target: &[&'a str],
        mut conflict: MergeConflict,
    ) {
        self.lines.push(SOURCE_MARKER);
        self.lines.extend_from_slice(source);
        if let Some(base) = base {
            self.lines.push(BASE_MARKER);
            self.lines.extend_from_slice(base);
        }
        self.lines.push(SEPARATOR_MARKER);
        self.lines.extend_from_slice(target);
        self.lines.push(TARGET_MARKER);

        self.stats.lines_processed += source.len() + target.len();
        self.stats.conflicts_found += 1;
        conflict.source_chunk = join_lines(source);
        conflict.target_chunk = join_lines(target);
        self.conflicts.push(conflict);
    }

    fn finish(self) -> MergeResult {
        MergeResult {
            merged_text: join_lines(&self.lines),
            conflicts: self.conflicts,
            statistics: self.stats,
        }
    }
}

/// Line merger
#[derive(Debug, Clone, Copy, Default)]
pub struct Merger {
    /// Emit the base chunk between conflict markers
    pub include_base: bool,
}

impl Merger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merger configured from working-copy settings
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            include_base: settings.conflict_base_context,
        }
    }

    /// Merge two texts without a common ancestor.
    ///
    /// The diff runs from target to source. Under `SourceWins` the result is
    /// the source. Under `Union` insertions from source and lines only the
    /// target has are both kept; replaced regions become conflicts.
    pub fn two_way(&self, source: &str, target: &str, policy: MergePolicy) -> MergeResult {
        if source == target {
            return MergeResult::clean(source);
        }

        let source_lines = split_lines(source);
        let target_lines = split_lines(target);
        let blocks = diff_lines(&target_lines, &source_lines);

        let mut out = Output::default();
        let mut pos = 0;
        for block in &blocks {
            out.keep(&target_lines[pos..block.old_start]);
            pos = block.old_end();

            let target_chunk = &target_lines[block.old_start..block.old_end()];
            let source_chunk = &source_lines[block.new_start..block.new_end()];

            match policy {
                MergePolicy::SourceWins => {
                    out.keep(source_chunk);
                    out.stats.source_only += source_chunk.len();
                }
                MergePolicy::Union if target_chunk.is_empty() => {
                    out.keep(source_chunk);
                    out.stats.source_only += source_chunk.len();
                }
                MergePolicy::Union if source_chunk.is_empty() => {
                    out.keep(target_chunk);
                    out.stats.target_only += target_chunk.len();
                }
                MergePolicy::Union => out.conflict(
                    source_chunk,
                    None,
                    target_chunk,
                    MergeConflict {
                        base_start_line: 0,
                        source_start_line: block.new_start + 1,
                        target_start_line: block.old_start + 1,
                        source_chunk: String::new(),
                        target_chunk: String::new(),
                        kind: ConflictKind::ContentConflict,
                    },
                ),
            }
        }
        out.keep(&target_lines[pos..]);
        out.finish()
    }

    /// Merge two descendants of `base`.
    ///
    /// Changes from either side that do not touch each other are applied;
    /// overlapping changes merge when both sides made the same edit and
    /// become conflicts otherwise.
    pub fn three_way(&self, base: &str, source: &str, target: &str) -> MergeResult {
        if source == target || target == base {
            return MergeResult::clean(source);
        }
        if source == base {
            return MergeResult::clean(target);
        }

        let base_lines = split_lines(base);
        let source_lines = split_lines(source);
        let target_lines = split_lines(target);
        let source_blocks = diff_lines(&base_lines, &source_lines);
        let target_blocks = diff_lines(&base_lines, &target_lines);

        let mut out = Output::default();
        let mut pos = 0;
        for region in overlap_regions(&source_blocks, &target_blocks) {
            out.keep(&base_lines[pos..region.start]);
            pos = region.end;

            let base_chunk = &base_lines[region.start..region.end];
            let (source_start, source_chunk) = region.side_text(&region.source, &base_lines, &source_lines);
            let (target_start, target_chunk) = region.side_text(&region.target, &base_lines, &target_lines);

            if region.target.is_empty() || target_chunk == base_chunk {
                out.keep(source_chunk);
                out.stats.source_only += source_chunk.len();
            } else if region.source.is_empty() || source_chunk == base_chunk {
                out.keep(target_chunk);
                out.stats.target_only += target_chunk.len();
            } else if source_chunk == target_chunk {
                out.keep(source_chunk);
                out.stats.auto_merged += source_chunk.len();
            } else {
                let kind = if source_chunk.is_empty() || target_chunk.is_empty() {
                    ConflictKind::DeleteVsEdit
                } else {
                    ConflictKind::ContentConflict
                };
                let base_context = self.include_base.then_some(base_chunk);
                out.conflict(
                    source_chunk,
                    base_context,
                    target_chunk,
                    MergeConflict {
                        base_start_line: region.start + 1,
                        source_start_line: source_start + 1,
                        target_start_line: target_start + 1,
                        source_chunk: String::new(),
                        target_chunk: String::new(),
                        kind,
                    },
                );
            }
        }
        out.keep(&base_lines[pos..]);
        out.finish()
    }
}

/// Base range touched by one or more overlapping blocks from either side
#[derive(Debug, Default)]
struct Region {
    start: usize,
    end: usize,
    source: Vec<DiffBlock>,
    target: Vec<DiffBlock>,
}

impl Region {
    /// Text one side has in place of `base[start..end]`, with its start line
    fn side_text<'a>(
        &self,
        blocks: &[DiffBlock],
        base: &'a [&'a str],
        side: &'a [&'a str],
    ) -> (usize, &'a [&'a str]) {
        match (blocks.first(), blocks.last()) {
            (Some(first), Some(last)) => {
                let lo = first.new_start - (first.old_start - self.start);
                let hi = last.new_end() + (self.end - last.old_end());
                (lo, &side[lo..hi])
            }
            _ => (self.start, &base[self.start..self.end]),
        }
    }
}

/// Group blocks from both sides into non-overlapping regions, in base order.
///
/// A block joins the current region when it starts inside it, or when it
/// starts at the region's end and either of them is empty (an insertion at
/// the boundary of another change).
fn overlap_regions(source: &[DiffBlock], target: &[DiffBlock]) -> Vec<Region> {
    let mut regions: Vec<Region> = Vec::new();
    let (mut si, mut ti) = (0, 0);

    loop {
        let take_source = match (source.get(si), target.get(ti)) {
            (None, None) => break,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(s), Some(t)) => s.old_start <= t.old_start,
        };
        let block = if take_source {
            si += 1;
            source[si - 1]
        } else {
            ti += 1;
            target[ti - 1]
        };

        let joins = regions.last().is_some_and(|r| {
            block.old_start < r.end
                || (block.old_start == r.end && (block.old_len == 0 || r.start == r.end))
        });
        if !joins {
            regions.push(Region {
                start: block.old_start,
                end: block.old_start,
                ..Region::default()
            });
        }

        if let Some(region) = regions.last_mut() {
            region.end = region.end.max(block.old_end());
            if take_source {
                region.source.push(block);
            } else {
                region.target.push(block);
            }
        }
    }
    regions
}
