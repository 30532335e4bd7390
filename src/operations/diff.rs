// Diff Engine
// Line-level differences between two texts, as change blocks

use similar::{capture_diff_slices, Algorithm, DiffTag};

/// A region of `old` replaced by a region of `new`.
///
/// Both ranges are zero-based line indices. A zero `old_len` is a pure
/// insertion before `old_start`; a zero `new_len` is a pure deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffBlock {
    /// First replaced line in `old`
    pub old_start: usize,
    /// Lines replaced in `old`
    pub old_len: usize,
    /// First replacement line in `new`
    pub new_start: usize,
    /// Replacement lines from `new`
    pub new_len: usize,
}

impl DiffBlock {
    /// One past the last replaced line in `old`
    pub fn old_end(&self) -> usize {
        self.old_start + self.old_len
    }

    /// One past the last replacement line in `new`
    pub fn new_end(&self) -> usize {
        self.new_start + self.new_len
    }
}

/// Split text into lines on `\n`; the empty text has no lines.
///
/// A trailing newline yields a final empty line, so [`join_lines`] restores
/// the input exactly.
pub fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        Vec::new()
    } else {
        text.split('\n').collect()
    }
}

/// Inverse of [`split_lines`]
pub fn join_lines<S: AsRef<str>>(lines: &[S]) -> String {
    let mut out = String::new();
    for (index, line) in lines.iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        out.push_str(line.as_ref());
    }
    out
}

/// Change blocks turning `old` into `new`, in ascending order.
///
/// Uses Myers' linear-space diff, so edits separated by unchanged lines stay
/// in separate blocks however long the texts are. Blocks are maximal: two
/// blocks are always separated by at least one unchanged line.
pub fn diff_lines(old: &[&str], new: &[&str]) -> Vec<DiffBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<DiffBlock> = None;

    for op in capture_diff_slices(Algorithm::Myers, old, new) {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        if tag == DiffTag::Equal {
            if !old_range.is_empty() {
                blocks.extend(open.take());
            }
            continue;
        }

        let block = open.get_or_insert(DiffBlock {
            old_start: old_range.start,
            old_len: 0,
            new_start: new_range.start,
            new_len: 0,
        });
        block.old_len = old_range.end - block.old_start;
        block.new_len = new_range.end - block.new_start;
    }
    blocks.extend(open);
    blocks
}
