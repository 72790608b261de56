use crate::error::{try_alloc, FfmError, Result};

/// One (field, feature, value) triple
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(C)]
pub struct Node {
    pub field: u32,
    pub feature: u32,
    pub value: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Line {
    pub nodes: Vec<Node>,
    pub label: f32,
}

/// Scale used by instance-wise normalization: 1 / sum(v^2).
/// Lines without any magnitude keep a scale of 1.
#[inline]
pub fn line_scale(nodes: &[Node]) -> f32 {
    let norm: f32 = nodes.iter().map(|node| node.value * node.value).sum();
    if norm > 0.0 {
        1.0 / norm
    } else {
        1.0
    }
}

/// Maps a stored label to the training target
#[inline(always)]
pub fn target(label: f32) -> f32 {
    if label > 0.0 {
        1.0
    } else {
        -1.0
    }
}

// Indices are written as 32 bit signed integers in the binary formats
const MAX_INDEX: u32 = i32::MAX as u32 - 1;

/// Everything about a problem except the nodes themselves. Shared by the in-memory
/// conversion and by the disk writer, which streams the nodes elsewhere.
#[derive(Clone, Debug, PartialEq)]
pub struct LineIndex {
    pub n: u32,
    pub m: u32,
    pub pos: Vec<u64>,
    pub labels: Vec<f32>,
    pub scales: Option<Vec<f32>>,
}

impl LineIndex {
    pub fn new(with_scales: bool) -> LineIndex {
        LineIndex {
            n: 0,
            m: 0,
            pos: vec![0],
            labels: Vec::new(),
            scales: if with_scales { Some(Vec::new()) } else { None },
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn num_nodes(&self) -> u64 {
        // pos always holds the sentinel
        self.pos[self.pos.len() - 1]
    }

    /// Registers one line. Empty lines are legal and do not move `n` or `m`.
    pub fn push(&mut self, nodes: &[Node], label: f32) -> Result<()> {
        if !label.is_finite() {
            return Err(FfmError::invalid(format!("line {}: label {} is not finite", self.len(), label)));
        }
        if self.len() >= i32::MAX as usize {
            return Err(FfmError::invalid("too many lines for the binary problem format"));
        }
        for node in nodes {
            if node.field > MAX_INDEX || node.feature > MAX_INDEX {
                return Err(FfmError::invalid(format!(
                    "line {}: index {}:{} out of range", self.len(), node.field, node.feature)));
            }
            if !node.value.is_finite() {
                return Err(FfmError::invalid(format!(
                    "line {}: value {} of {}:{} is not finite", self.len(), node.value, node.field, node.feature)));
            }
            self.n = self.n.max(node.feature + 1);
            self.m = self.m.max(node.field + 1);
        }
        let end = self.num_nodes() + nodes.len() as u64;
        self.pos.push(end);
        self.labels.push(label);
        if let Some(scales) = self.scales.as_mut() {
            scales.push(line_scale(nodes));
        }
        Ok(())
    }
}

/// A dataset held entirely in memory as flat buffers
#[derive(Clone, Debug, PartialEq)]
pub struct Problem {
    pub n: u32,
    pub m: u32,
    pub data: Vec<Node>,
    pub pos: Vec<u64>,
    pub labels: Vec<f32>,
    pub scales: Option<Vec<f32>>,
}

impl Problem {
    pub fn from_parts(index: LineIndex, data: Vec<Node>) -> Problem {
        debug_assert_eq!(index.num_nodes(), data.len() as u64);
        Problem {
            n: index.n,
            m: index.m,
            data,
            pos: index.pos,
            labels: index.labels,
            scales: index.scales,
        }
    }

    pub fn size(&self) -> usize {
        self.labels.len()
    }

    pub fn num_nodes(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn line(&self, i: usize) -> &[Node] {
        &self.data[self.pos[i] as usize..self.pos[i + 1] as usize]
    }

    /// Checks that the buffers agree with each other and with `n` and `m`.
    /// `convert` always builds a valid problem; a hand-assembled one may not be.
    pub fn validate(&self) -> Result<()> {
        if self.pos.len() != self.labels.len() + 1 {
            return Err(FfmError::invalid(format!(
                "{} offsets for {} lines, expected one more", self.pos.len(), self.labels.len())));
        }
        if let Some(scales) = self.scales.as_ref() {
            if scales.len() != self.labels.len() {
                return Err(FfmError::invalid(format!(
                    "{} scales for {} lines", scales.len(), self.labels.len())));
            }
        }
        let last = self.pos[self.pos.len() - 1];
        if self.pos[0] != 0 || last != self.data.len() as u64 {
            return Err(FfmError::invalid(format!(
                "offsets run from {} to {}, nodes run from 0 to {}", self.pos[0], last, self.data.len())));
        }
        if let Some(i) = self.pos.windows(2).position(|w| w[0] > w[1]) {
            return Err(FfmError::invalid(format!("offset of line {} goes backwards", i + 1)));
        }
        if let Some(node) = self.data.iter().find(|node| node.feature >= self.n || node.field >= self.m) {
            return Err(FfmError::invalid(format!(
                "node {}:{} out of range for n = {}, m = {}", node.field, node.feature, self.n, self.m)));
        }
        Ok(())
    }

    pub fn view(&self) -> ProblemView<'_> {
        ProblemView {
            data: &self.data,
            pos: &self.pos,
            labels: &self.labels,
            scales: self.scales.as_deref(),
        }
    }
}

/// Concatenates lines into a `Problem`, computing `n`, `m`, offsets and,
/// when `with_scales` is set, the per-line normalization scales.
pub fn convert(lines: &[Line], with_scales: bool) -> Result<Problem> {
    let total: u128 = lines.iter().map(|l| l.nodes.len() as u128).sum();
    let mut data: Vec<Node> = try_alloc(total, "problem nodes")?;
    let mut index = LineIndex::new(with_scales);
    for line in lines {
        index.push(&line.nodes, line.label)?;
        data.extend_from_slice(&line.nodes);
    }
    Ok(Problem::from_parts(index, data))
}

/// A contiguous range of lines. `pos` holds the global offsets of the lines in the
/// range plus the closing one, `data` starts at node `pos[0]`.
#[derive(Clone, Copy, Debug)]
pub struct ProblemView<'a> {
    pub data: &'a [Node],
    pub pos: &'a [u64],
    pub labels: &'a [f32],
    pub scales: Option<&'a [f32]>,
}

impl<'a> ProblemView<'a> {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline(always)]
    pub fn line(&self, i: usize) -> &'a [Node] {
        let base = self.pos[0];
        &self.data[(self.pos[i] - base) as usize..(self.pos[i + 1] - base) as usize]
    }

    /// Scale of line `i`; 1 when normalization is off
    #[inline(always)]
    pub fn scale(&self, i: usize, normalization: bool) -> f32 {
        if !normalization {
            return 1.0;
        }
        match self.scales {
            Some(scales) => scales[i],
            None => line_scale(self.line(i)),
        }
    }
}

/// Read contract shared by in-memory and disk-backed problems. Lines are handed
/// out in blocks; an in-memory problem is a single block.
pub trait LineSource {
    /// (n, m) observed over the whole problem
    fn dimensions(&self) -> (u32, u32);
    fn len(&self) -> usize;
    fn num_blocks(&self) -> usize;
    fn block(&mut self, index: usize) -> Result<ProblemView<'_>>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LineSource for Problem {
    fn dimensions(&self) -> (u32, u32) {
        (self.n, self.m)
    }

    fn len(&self) -> usize {
        self.size()
    }

    fn num_blocks(&self) -> usize {
        1
    }

    fn block(&mut self, index: usize) -> Result<ProblemView<'_>> {
        if index != 0 {
            return Err(FfmError::invalid(format!("in-memory problem has one block, asked for block {}", index)));
        }
        self.validate()?;
        Ok(self.view())
    }
}
