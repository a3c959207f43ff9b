//! Three-way line merge anchored on LCS boundaries. Edits are labelled
//! against the ancestor, grouped by the ancestor line that follows them,
//! and rendered block by block; two sides only conflict when they disagree
//! inside the same block.

use crate::agent::{Agent, ArtifactValue, MergeConflict, MergeCtxt, MergeInput, MergeResult};
use crate::error::{PolytopeError, PtResult};
use crate::id::ConflictId;
use crate::model::ArtifactKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const CONFLICT_START: &str = "<<<<<< VERSION FROM ";
pub const CONFLICT_MID: &str = "====== VERSION FROM ";
pub const CONFLICT_END: &str = ">>>>>>\n";

/// byte range of a conflict block within the proposed merge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextConflictDetails {
    pub start: usize,
    pub end: usize,
    pub source_label: String,
    pub target_label: String,
}

pub struct TextAgent;

impl Agent for TextAgent {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Text
    }

    fn encode(&self, value: &ArtifactValue) -> PtResult<Vec<u8>> {
        match value {
            ArtifactValue::Text(text) => Ok(text.clone().into_bytes()),
            value => bail!(PolytopeError::Internal(format!(
                "text agent asked to encode a {} value",
                value.kind()
            ))),
        }
    }

    fn decode(&self, bytes: &[u8]) -> PtResult<ArtifactValue> {
        match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Ok(ArtifactValue::Text(text)),
            Err(err) => bail!(PolytopeError::Corrupt(format!(
                "text content is not valid utf-8: {}",
                err
            ))),
        }
    }

    fn merge(
        &self,
        _ctxt: &mut MergeCtxt<'_>,
        input: &MergeInput,
        ancestor: &[u8],
        source: &[u8],
        target: &[u8],
    ) -> PtResult<MergeResult> {
        let ancestor = self.decode(ancestor)?.into_text()?;
        let source = self.decode(source)?.into_text()?;
        let target = self.decode(target)?.into_text()?;
        let merge = merge_text(input, &ancestor, &source, &target)?;
        debug!(
            "TextAgent::merge(artifact: {}) :: {} conflict(s)",
            input.artifact,
            merge.conflicts.len()
        );
        Ok(MergeResult {
            kind: ArtifactKind::Text,
            artifact: input.artifact.clone(),
            ancestor_version: input.ancestor_version.clone(),
            source_version: input.source_version.clone(),
            target_version: input.target_version.clone(),
            proposed: merge.proposed.into_bytes(),
            conflicts: merge.conflicts,
        })
    }

    fn can_handle(&self, _path: &Path) -> bool {
        true
    }

    fn read_from_disk(&self, path: &Path) -> PtResult<Vec<u8>> {
        let bytes = fs::read(path)?;
        // decoding validates the content is utf-8 text
        self.decode(&bytes)?;
        Ok(bytes)
    }

    fn write_to_disk(&self, bytes: &[u8], path: &Path) -> PtResult<()> {
        Ok(fs::write(path, bytes)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Deleted,
    Inserted,
    Unmodified,
}

/// A line of one side labelled against the ancestor. Indices are 1-based;
/// `anchor` is the ancestor index of the first unmodified line following
/// this one, with `len(ancestor) + 1` acting as the virtual end-of-file
/// anchor.
#[derive(Debug, Clone, Copy)]
struct LabeledLine<'a> {
    line: &'a str,
    label: Label,
    /// ancestor index; 0 for inserted lines
    base_idx: usize,
    /// modified-side index; 0 for deleted lines
    mod_idx: usize,
    anchor: usize,
}

impl LabeledLine<'_> {
    fn kept(&self) -> bool {
        self.label != Label::Deleted
    }

    // inserted lines carry no ancestor index and legitimately differ in
    // their modified-side position, so they compare on label, anchor and
    // content only
    fn matches(&self, other: &Self) -> bool {
        self.label == other.label
            && self.anchor == other.anchor
            && self.line == other.line
            && (self.label == Label::Inserted || self.base_idx == other.base_idx)
    }
}

/// splits on `\n`, retaining terminators; a trailing fragment without a
/// terminator is its own line
fn split_lines(s: &str) -> Vec<&str> {
    let mut lines = vec![];
    let mut start = 0;
    for (i, byte) in s.bytes().enumerate() {
        if byte == b'\n' {
            lines.push(&s[start..=i]);
            start = i + 1;
        }
    }
    if start < s.len() {
        lines.push(&s[start..]);
    }
    lines
}

/// longest common subsequence as 0-based `(base, modified)` index pairs,
/// strictly increasing in both coordinates
fn lcs(a: &[&str], b: &[&str]) -> Vec<(usize, usize)> {
    let n = a.len();
    let m = b.len();
    if n == 0 || m == 0 {
        return vec![];
    }
    // dp[i][j] = lcs length of a[i..] and b[j..]
    let idx = |i: usize, j: usize| i * (m + 1) + j;
    let mut dp = vec![0u32; (n + 1) * (m + 1)];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            dp[idx(i, j)] = if a[i] == b[j] {
                dp[idx(i + 1, j + 1)] + 1
            } else {
                dp[idx(i + 1, j)].max(dp[idx(i, j + 1)])
            };
        }
    }
    let mut pairs = Vec::with_capacity(dp[idx(0, 0)] as usize);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] && dp[idx(i, j)] == dp[idx(i + 1, j + 1)] + 1 {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if dp[idx(i + 1, j)] >= dp[idx(i, j + 1)] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

/// labels one modified side against the ancestor; anchors ascend in
/// emission order
fn label_lines<'a>(base: &[&'a str], modified: &[&'a str]) -> Vec<LabeledLine<'a>> {
    let pairs = lcs(base, modified);
    let mut labeled = Vec::with_capacity(base.len().max(modified.len()));
    let mut bi = 0;
    let mut mi = 0;
    for &(pb, pm) in &pairs {
        // edits preceding an LCS hit anchor on that hit
        for i in bi..pb {
            labeled.push(LabeledLine {
                line: base[i],
                label: Label::Deleted,
                base_idx: i + 1,
                mod_idx: 0,
                anchor: pb + 1,
            });
        }
        for j in mi..pm {
            labeled.push(LabeledLine {
                line: modified[j],
                label: Label::Inserted,
                base_idx: 0,
                mod_idx: j + 1,
                anchor: pb + 1,
            });
        }
        labeled.push(LabeledLine {
            line: base[pb],
            label: Label::Unmodified,
            base_idx: pb + 1,
            mod_idx: pm + 1,
            anchor: pb + 2,
        });
        bi = pb + 1;
        mi = pm + 1;
    }
    // trailing edits anchor just past the end of the ancestor
    let eof = base.len() + 1;
    for i in bi..base.len() {
        labeled.push(LabeledLine {
            line: base[i],
            label: Label::Deleted,
            base_idx: i + 1,
            mod_idx: 0,
            anchor: eof,
        });
    }
    for j in mi..modified.len() {
        labeled.push(LabeledLine {
            line: modified[j],
            label: Label::Inserted,
            base_idx: 0,
            mod_idx: j + 1,
            anchor: eof,
        });
    }
    labeled
}

#[derive(Default)]
struct MergeBlock<'a> {
    source: Vec<LabeledLine<'a>>,
    target: Vec<LabeledLine<'a>>,
}

fn all_unmodified(lines: &[LabeledLine<'_>]) -> bool {
    lines.iter().all(|line| line.label == Label::Unmodified)
}

fn identical_edits(source: &[LabeledLine<'_>], target: &[LabeledLine<'_>]) -> bool {
    source.len() == target.len()
        && source.iter().zip(target).all(|(s, t)| s.matches(t))
}

fn push_kept(out: &mut String, lines: &[LabeledLine<'_>]) {
    for line in lines.iter().filter(|line| line.kept()) {
        out.push_str(line.line);
    }
}

pub(crate) struct TextMerge {
    pub proposed: String,
    pub conflicts: Vec<MergeConflict>,
}

pub(crate) fn merge_text(
    input: &MergeInput,
    ancestor: &str,
    source: &str,
    target: &str,
) -> PtResult<TextMerge> {
    let base = split_lines(ancestor);
    let src = split_lines(source);
    let tgt = split_lines(target);

    let mut blocks = BTreeMap::<usize, MergeBlock<'_>>::new();
    for line in label_lines(&base, &src) {
        blocks.entry(line.anchor).or_default().source.push(line);
    }
    for line in label_lines(&base, &tgt) {
        blocks.entry(line.anchor).or_default().target.push(line);
    }

    let mut proposed = String::with_capacity(source.len().max(target.len()));
    let mut conflicts = vec![];
    for block in blocks.values() {
        if identical_edits(&block.source, &block.target) {
            // both sides made the same edit; keep it once
            push_kept(&mut proposed, &block.source);
        } else if all_unmodified(&block.target) {
            push_kept(&mut proposed, &block.source);
        } else if all_unmodified(&block.source) {
            push_kept(&mut proposed, &block.target);
        } else {
            let start = proposed.len();
            proposed.push_str(CONFLICT_START);
            proposed.push_str(&input.source_label);
            proposed.push('\n');
            push_kept(&mut proposed, &block.source);
            proposed.push_str(CONFLICT_MID);
            proposed.push_str(&input.target_label);
            proposed.push('\n');
            push_kept(&mut proposed, &block.target);
            proposed.push_str(CONFLICT_END);
            let details = TextConflictDetails {
                start,
                end: proposed.len(),
                source_label: input.source_label.clone(),
                target_label: input.target_label.clone(),
            };
            conflicts.push(MergeConflict {
                id: ConflictId::fresh(),
                artifact: input.artifact.clone(),
                kind: ArtifactKind::Text,
                source_version: input.source_version.clone(),
                target_version: input.target_version.clone(),
                details: serde_json::to_vec(&details)?,
            });
        }
    }

    Ok(TextMerge { proposed, conflicts })
}
