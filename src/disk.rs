use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::ffi::OsString;
use std::fs;
use std::fs::File;
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{try_alloc, FfmError, Result};
use crate::parser;
use crate::problem::{LineIndex, LineSource, Node, Problem, ProblemView};

const PROBLEM_HEADER_MAGIC_STRING: &[u8; 4] = b"FFMP"; // FFM Problem
const PROBLEM_HEADER_VERSION: u32 = 1;

// Problem file layout (all little endian):
// 4 bytes: magic bytes
// u32: version of the problem format
// i32 n, i32 m, i32 size, i64 num_nodes, u8 has_scales
// i64 pos[size + 1]
// f32 labels[size]
// f32 scales[size]           -- only if has_scales
// (i32 field, i32 feature, f32 value)[num_nodes]

const HEADER_LEN: u64 = 4 + 4 + 4 + 4 + 4 + 8 + 1;
const NODE_LEN: u64 = 12;

/// Default block budget for out-of-core reads, in nodes
pub const BLOCK_NODES: u64 = 1 << 20;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProblemHeader {
    pub n: u32,
    pub m: u32,
    pub size: u32,
    pub num_nodes: u64,
    pub has_scales: bool,
}

impl ProblemHeader {
    fn from_index(index: &LineIndex) -> ProblemHeader {
        ProblemHeader {
            n: index.n,
            m: index.m,
            size: index.len() as u32,
            num_nodes: index.num_nodes(),
            has_scales: index.scales.is_some(),
        }
    }

    fn labels_offset(&self) -> u128 {
        HEADER_LEN as u128 + (self.size as u128 + 1) * 8
    }

    fn scales_offset(&self) -> u128 {
        self.labels_offset() + self.size as u128 * 4
    }

    fn nodes_offset(&self) -> u128 {
        let scales = if self.has_scales { self.size as u128 * 4 } else { 0 };
        self.scales_offset() + scales
    }

    fn file_len(&self) -> u128 {
        self.nodes_offset() + self.num_nodes as u128 * NODE_LEN as u128
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn write_header(output_bufwriter: &mut dyn io::Write, header: &ProblemHeader) -> Result<()> {
    output_bufwriter.write_all(PROBLEM_HEADER_MAGIC_STRING)?;
    output_bufwriter.write_u32::<LittleEndian>(PROBLEM_HEADER_VERSION)?;
    output_bufwriter.write_i32::<LittleEndian>(header.n as i32)?;
    output_bufwriter.write_i32::<LittleEndian>(header.m as i32)?;
    output_bufwriter.write_i32::<LittleEndian>(header.size as i32)?;
    output_bufwriter.write_i64::<LittleEndian>(header.num_nodes as i64)?;
    output_bufwriter.write_u8(header.has_scales as u8)?;
    Ok(())
}

fn write_index(output_bufwriter: &mut dyn io::Write, index: &LineIndex) -> Result<()> {
    for p in &index.pos {
        output_bufwriter.write_i64::<LittleEndian>(*p as i64)?;
    }
    for l in &index.labels {
        output_bufwriter.write_f32::<LittleEndian>(*l)?;
    }
    if let Some(scales) = &index.scales {
        for s in scales {
            output_bufwriter.write_f32::<LittleEndian>(*s)?;
        }
    }
    Ok(())
}

fn write_nodes(output_bufwriter: &mut dyn io::Write, nodes: &[Node]) -> Result<()> {
    for node in nodes {
        output_bufwriter.write_i32::<LittleEndian>(node.field as i32)?;
        output_bufwriter.write_i32::<LittleEndian>(node.feature as i32)?;
        output_bufwriter.write_f32::<LittleEndian>(node.value)?;
    }
    Ok(())
}

/// Peeks at the magic bytes, so callers can accept either text or binary problems
pub fn is_binary_problem<P: AsRef<Path>>(path: P) -> Result<bool> {
    let mut magic_string: [u8; 4] = [0; 4];
    let mut input = File::open(path)?;
    match input.read_exact(&mut magic_string) {
        Ok(()) => Ok(&magic_string == PROBLEM_HEADER_MAGIC_STRING),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub fn save_problem<P: AsRef<Path>>(problem: &Problem, path: P) -> Result<()> {
    let index = LineIndex {
        n: problem.n,
        m: problem.m,
        pos: problem.pos.clone(),
        labels: problem.labels.clone(),
        scales: problem.scales.clone(),
    };
    let tmp_path = with_suffix(path.as_ref(), ".writing");
    {
        let mut output_bufwriter = io::BufWriter::new(File::create(&tmp_path)?);
        write_header(&mut output_bufwriter, &ProblemHeader::from_index(&index))?;
        write_index(&mut output_bufwriter, &index)?;
        write_nodes(&mut output_bufwriter, &problem.data)?;
        output_bufwriter.flush()?;
    }
    fs::rename(&tmp_path, path.as_ref())?;
    Ok(())
}

/// Streams a text problem into the binary layout without holding the nodes in memory.
/// Nodes are spilled to a side file first because they go last in the layout, after
/// offsets and labels that are only known once the whole input has been read.
pub fn materialize_to_disk<P: AsRef<Path>, Q: AsRef<Path>>(
    text_path: P,
    bin_path: Q,
    with_scales: bool,
) -> Result<ProblemHeader> {
    let bin_path = bin_path.as_ref();
    let nodes_path = with_suffix(bin_path, ".nodes.writing");
    let tmp_path = with_suffix(bin_path, ".writing");

    let result = (|| -> Result<ProblemHeader> {
        let mut index = LineIndex::new(with_scales);
        {
            let mut nodes_bufwriter = io::BufWriter::new(File::create(&nodes_path)?);
            let mut input = parser::create_buffered_input(text_path.as_ref())?;
            parser::for_each_line(&mut *input, |nodes, label| {
                index.push(nodes, label)?;
                write_nodes(&mut nodes_bufwriter, nodes)
            })?;
            nodes_bufwriter.flush()?;
        }

        let header = ProblemHeader::from_index(&index);
        {
            let mut output_bufwriter = io::BufWriter::new(File::create(&tmp_path)?);
            write_header(&mut output_bufwriter, &header)?;
            write_index(&mut output_bufwriter, &index)?;
            let mut nodes_input = File::open(&nodes_path)?;
            io::copy(&mut nodes_input, &mut output_bufwriter)?;
            output_bufwriter.flush()?;
        }
        fs::remove_file(&nodes_path)?;
        fs::rename(&tmp_path, bin_path)?;
        Ok(header)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&nodes_path);
        let _ = fs::remove_file(&tmp_path);
    }
    if let Ok(header) = &result {
        log::info!(
            "materialized {} lines, {} nodes (n = {}, m = {}) to {}",
            header.size, header.num_nodes, header.n, header.m, bin_path.display()
        );
    }
    result
}

fn read_header(input_bufreader: &mut dyn io::Read, path: &Path) -> Result<ProblemHeader> {
    let mut magic_string: [u8; 4] = [0; 4];
    input_bufreader.read_exact(&mut magic_string)?;
    if &magic_string != PROBLEM_HEADER_MAGIC_STRING {
        return Err(FfmError::corrupt(path, "problem file does not begin with magic bytes FFMP"));
    }
    let version = input_bufreader.read_u32::<LittleEndian>()?;
    if version != PROBLEM_HEADER_VERSION {
        return Err(FfmError::corrupt(path, format!(
            "problem file version of this binary: {}, version of the file: {}", PROBLEM_HEADER_VERSION, version)));
    }
    let n = input_bufreader.read_i32::<LittleEndian>()?;
    let m = input_bufreader.read_i32::<LittleEndian>()?;
    let size = input_bufreader.read_i32::<LittleEndian>()?;
    let num_nodes = input_bufreader.read_i64::<LittleEndian>()?;
    let has_scales = input_bufreader.read_u8()?;
    if n < 0 || m < 0 || size < 0 || num_nodes < 0 || has_scales > 1 {
        return Err(FfmError::corrupt(path, format!(
            "invalid header: n = {}, m = {}, size = {}, num_nodes = {}", n, m, size, num_nodes)));
    }
    Ok(ProblemHeader {
        n: n as u32,
        m: m as u32,
        size: size as u32,
        num_nodes: num_nodes as u64,
        has_scales: has_scales == 1,
    })
}

fn verify_file_len(file: &File, header: &ProblemHeader, path: &Path) -> Result<()> {
    let actual = file.metadata()?.len() as u128;
    let expected = header.file_len();
    if actual != expected {
        return Err(FfmError::corrupt(path, format!(
            "header implies {} bytes, file has {}", expected, actual)));
    }
    Ok(())
}

fn read_index(input_bufreader: &mut dyn io::Read, header: &ProblemHeader, path: &Path) -> Result<LineIndex> {
    let size = header.size as usize;
    let mut pos: Vec<u64> = try_alloc(size as u128 + 1, "problem offsets")?;
    pos.resize(size + 1, 0);
    input_bufreader.read_u64_into::<LittleEndian>(&mut pos)?;
    let mut labels: Vec<f32> = try_alloc(size as u128, "problem labels")?;
    labels.resize(size, 0.0);
    input_bufreader.read_f32_into::<LittleEndian>(&mut labels)?;
    let scales = if header.has_scales {
        let mut scales: Vec<f32> = try_alloc(size as u128, "problem scales")?;
        scales.resize(size, 0.0);
        input_bufreader.read_f32_into::<LittleEndian>(&mut scales)?;
        Some(scales)
    } else {
        None
    };

    if pos[0] != 0 || pos[size] != header.num_nodes {
        return Err(FfmError::corrupt(path, format!(
            "offsets span {}..{}, expected 0..{}", pos[0], pos[size], header.num_nodes)));
    }
    if let Some(i) = pos.windows(2).position(|w| w[0] > w[1]) {
        return Err(FfmError::corrupt(path, format!("offsets decrease at line {}", i)));
    }
    Ok(LineIndex { n: header.n, m: header.m, pos, labels, scales })
}

fn decode_nodes(bytes: &[u8], n: u32, m: u32, nodes: &mut Vec<Node>, path: &Path) -> Result<()> {
    nodes.clear();
    for chunk in bytes.chunks_exact(NODE_LEN as usize) {
        let node = Node {
            field: LittleEndian::read_i32(&chunk[0..4]) as u32,
            feature: LittleEndian::read_i32(&chunk[4..8]) as u32,
            value: LittleEndian::read_f32(&chunk[8..12]),
        };
        // negative indices wrap around and fail here as well
        if node.field >= m || node.feature >= n {
            return Err(FfmError::corrupt(path, format!(
                "node {}:{} outside of n = {}, m = {}", node.field, node.feature, n, m)));
        }
        nodes.push(node);
    }
    Ok(())
}

/// Reads a binary problem file fully into memory
pub fn load_problem<P: AsRef<Path>>(path: P) -> Result<Problem> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut input_bufreader = io::BufReader::new(file);
    let header = read_header(&mut input_bufreader, path)?;
    verify_file_len(input_bufreader.get_ref(), &header, path)?;
    let index = read_index(&mut input_bufreader, &header, path)?;

    let mut bytes: Vec<u8> = try_alloc(header.num_nodes as u128 * NODE_LEN as u128, "problem nodes")?;
    bytes.resize((header.num_nodes * NODE_LEN) as usize, 0);
    input_bufreader.read_exact(&mut bytes)?;
    let mut data: Vec<Node> = try_alloc(header.num_nodes as u128, "problem nodes")?;
    decode_nodes(&bytes, header.n, header.m, &mut data, path)?;
    Ok(Problem::from_parts(index, data))
}

/// A binary problem read block by block. Only the block boundaries are kept from
/// the index; offsets, labels, scales and nodes of a block are fetched with a seek
/// and a fixed-size read each time the block is asked for.
pub struct DiskProblem {
    path: PathBuf,
    file: File,
    header: ProblemHeader,
    labels_offset: u64,
    scales_offset: u64,
    nodes_offset: u64,
    // line boundaries of the blocks, blocks[i]..blocks[i + 1]
    blocks: Vec<usize>,
    pos: Vec<u64>,
    labels: Vec<f32>,
    scales: Vec<f32>,
    bytes: Vec<u8>,
    buffer: Vec<Node>,
}

impl DiskProblem {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<DiskProblem> {
        DiskProblem::open_with_block_nodes(path, BLOCK_NODES)
    }

    pub fn open_with_block_nodes<P: AsRef<Path>>(path: P, block_nodes: u64) -> Result<DiskProblem> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mut input_bufreader = io::BufReader::new(file);
        let header = read_header(&mut input_bufreader, &path)?;
        verify_file_len(input_bufreader.get_ref(), &header, &path)?;

        // one pass over the offsets: check them and cut blocks, keep nothing else
        let size = header.size as usize;
        let mut blocks = vec![0];
        let mut block_start = 0;
        let mut block_start_pos = 0;
        let mut prev = input_bufreader.read_u64::<LittleEndian>()?;
        if prev != 0 {
            return Err(FfmError::corrupt(&path, format!("offsets start at {}", prev)));
        }
        for i in 0..size {
            let next = input_bufreader.read_u64::<LittleEndian>()?;
            if next < prev {
                return Err(FfmError::corrupt(&path, format!("offsets decrease at line {}", i)));
            }
            // a block always takes at least one line, however long
            if i > block_start && next - block_start_pos > block_nodes {
                blocks.push(i);
                block_start = i;
                block_start_pos = prev;
            }
            prev = next;
        }
        if prev != header.num_nodes {
            return Err(FfmError::corrupt(&path, format!(
                "offsets end at {}, expected {}", prev, header.num_nodes)));
        }
        if size > 0 {
            blocks.push(size);
        }
        let file = input_bufreader.into_inner();

        log::debug!("{}: {} lines in {} blocks", path.display(), size, blocks.len().saturating_sub(1));
        // the file length was checked against the header, so every offset fits a u64
        Ok(DiskProblem {
            labels_offset: header.labels_offset() as u64,
            scales_offset: header.scales_offset() as u64,
            nodes_offset: header.nodes_offset() as u64,
            path,
            file,
            header,
            blocks,
            pos: Vec::new(),
            labels: Vec::new(),
            scales: Vec::new(),
            bytes: Vec::new(),
            buffer: Vec::new(),
        })
    }

    pub fn header(&self) -> &ProblemHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole file back as an in-memory problem
    pub fn into_problem(mut self) -> Result<Problem> {
        let header = self.header;
        let mut index = LineIndex::new(header.has_scales);
        index.n = header.n;
        index.m = header.m;
        let mut data = Vec::new();
        for b in 0..self.num_blocks() {
            let view = self.block(b)?;
            index.pos.extend_from_slice(&view.pos[1..]);
            index.labels.extend_from_slice(view.labels);
            if let (Some(scales), Some(block_scales)) = (index.scales.as_mut(), view.scales) {
                scales.extend_from_slice(block_scales);
            }
            data.extend_from_slice(view.data);
        }
        Ok(Problem::from_parts(index, data))
    }
}

impl LineSource for DiskProblem {
    fn dimensions(&self) -> (u32, u32) {
        (self.header.n, self.header.m)
    }

    fn len(&self) -> usize {
        self.header.size as usize
    }

    fn num_blocks(&self) -> usize {
        self.blocks.len().saturating_sub(1)
    }

    fn block(&mut self, index: usize) -> Result<ProblemView<'_>> {
        if index >= self.num_blocks() {
            return Err(FfmError::invalid(format!(
                "{}: block {} out of {}", self.path.display(), index, self.num_blocks())));
        }
        let (begin, end) = (self.blocks[index], self.blocks[index + 1]);
        let lines = end - begin;

        self.file.seek(SeekFrom::Start(HEADER_LEN + begin as u64 * 8))?;
        self.pos.resize(lines + 1, 0);
        self.file.read_u64_into::<LittleEndian>(&mut self.pos)?;
        let (node_begin, node_end) = (self.pos[0], self.pos[lines]);
        // the file may have changed since it was opened
        if node_end > self.header.num_nodes || self.pos.windows(2).any(|w| w[0] > w[1]) {
            return Err(FfmError::corrupt(&self.path, format!("offsets of block {} are out of order", index)));
        }

        self.file.seek(SeekFrom::Start(self.labels_offset + begin as u64 * 4))?;
        self.labels.resize(lines, 0.0);
        self.file.read_f32_into::<LittleEndian>(&mut self.labels)?;
        if self.header.has_scales {
            self.file.seek(SeekFrom::Start(self.scales_offset + begin as u64 * 4))?;
            self.scales.resize(lines, 0.0);
            self.file.read_f32_into::<LittleEndian>(&mut self.scales)?;
        }

        let len = ((node_end - node_begin) * NODE_LEN) as usize;
        self.file.seek(SeekFrom::Start(self.nodes_offset + node_begin * NODE_LEN))?;
        self.bytes.resize(len, 0);
        self.file.read_exact(&mut self.bytes)?;
        decode_nodes(&self.bytes, self.header.n, self.header.m, &mut self.buffer, &self.path)?;

        Ok(ProblemView {
            data: &self.buffer,
            pos: &self.pos,
            labels: &self.labels,
            scales: if self.header.has_scales { Some(self.scales.as_slice()) } else { None },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::convert;
    use crate::problem::tests::{node, sample_lines};
    use std::io::Write;

    const TEXT: &str = "1 0:0:1 1:3:0.5\n0\n-1 2:1:2 0:4:1 1:2:-1\n1 1:1:3\n";

    fn write_text(dir: &Path) -> PathBuf {
        let path = dir.join("train.txt");
        File::create(&path).unwrap().write_all(TEXT.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_materialize_matches_convert() {
        let dir = tempfile::tempdir().unwrap();
        let text_path = write_text(dir.path());
        let bin_path = dir.path().join("train.bin");

        let header = materialize_to_disk(&text_path, &bin_path, true).unwrap();
        assert_eq!(header, ProblemHeader { n: 5, m: 3, size: 4, num_nodes: 6, has_scales: true });
        // no temporary files are left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);

        let from_text = parser::read_problem(&text_path, true).unwrap();
        let from_disk = load_problem(&bin_path).unwrap();
        assert_eq!(from_disk.pos, from_text.pos);
        assert_eq!(from_disk.labels, from_text.labels);
        assert_eq!(from_disk.data, from_text.data);
        assert_eq!(from_disk.scales, from_text.scales);
        assert_eq!((from_disk.n, from_disk.m), (from_text.n, from_text.m));

        let streamed = DiskProblem::open_with_block_nodes(&bin_path, 2).unwrap().into_problem().unwrap();
        assert_eq!(streamed, from_text);
    }

    #[test]
    fn test_save_load_without_scales() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.bin");
        let p = convert(&sample_lines(), false).unwrap();
        save_problem(&p, &path).unwrap();
        assert!(is_binary_problem(&path).unwrap());
        assert_eq!(load_problem(&path).unwrap(), p);
    }

    #[test]
    fn test_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.bin");
        let p = convert(&sample_lines(), true).unwrap();
        save_problem(&p, &path).unwrap();

        // lines have 2, 0 and 3 nodes
        let mut dp = DiskProblem::open_with_block_nodes(&path, 2).unwrap();
        assert_eq!(dp.len(), 3);
        assert_eq!(dp.dimensions(), (5, 3));
        assert_eq!(dp.num_blocks(), 2);
        {
            let b = dp.block(1).unwrap();
            assert_eq!(b.len(), 1);
            // offsets stay global, only the block's own lines are read
            assert_eq!(b.pos, &[2, 5][..]);
            assert_eq!(b.labels, &[0.0][..]);
            assert_eq!(b.line(0), p.line(2));
            assert_eq!(b.scale(0, true), 1.0 / 6.0);
        }
        {
            // blocks can be read in any order
            let b = dp.block(0).unwrap();
            assert_eq!(b.len(), 2);
            assert_eq!(b.line(0), &[node(0, 0, 1.0), node(1, 3, 0.5)]);
            assert_eq!(b.line(1), &[]);
        }
        assert!(dp.block(2).is_err());

        let mut dp = DiskProblem::open(&path).unwrap();
        assert_eq!(dp.num_blocks(), 1);
        assert_eq!(dp.block(0).unwrap().len(), 3);
    }

    #[test]
    fn test_empty_problem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.bin");
        save_problem(&convert(&[], true).unwrap(), &path).unwrap();
        let dp = DiskProblem::open(&path).unwrap();
        assert_eq!(dp.len(), 0);
        assert_eq!(dp.num_blocks(), 0);
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.bin");
        save_problem(&convert(&sample_lines(), true).unwrap(), &path).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(matches!(load_problem(&path), Err(FfmError::CorruptFile { .. })));
        assert!(matches!(DiskProblem::open(&path), Err(FfmError::CorruptFile { .. })));
    }

    #[test]
    fn test_decreasing_offsets_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.bin");
        save_problem(&convert(&sample_lines(), true).unwrap(), &path).unwrap();
        let good = fs::read(&path).unwrap();

        // pos becomes 0, 3, 2, 5
        let mut bad = good.clone();
        let at = HEADER_LEN as usize + 8;
        bad[at..at + 8].copy_from_slice(&3i64.to_le_bytes());
        fs::write(&path, &bad).unwrap();
        assert!(matches!(load_problem(&path), Err(FfmError::CorruptFile { .. })));
        assert!(matches!(DiskProblem::open(&path), Err(FfmError::CorruptFile { .. })));

        // the same damage done after opening shows up when the block is read
        fs::write(&path, &good).unwrap();
        let mut dp = DiskProblem::open_with_block_nodes(&path, 2).unwrap();
        fs::write(&path, &bad).unwrap();
        assert!(matches!(dp.block(0), Err(FfmError::CorruptFile { .. })));
    }

    #[test]
    fn test_bad_magic_and_node_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.bin");
        save_problem(&convert(&sample_lines(), true).unwrap(), &path).unwrap();
        let good = fs::read(&path).unwrap();

        let mut bad = good.clone();
        bad[0] = b'X';
        fs::write(&path, &bad).unwrap();
        assert!(matches!(load_problem(&path), Err(FfmError::CorruptFile { .. })));
        assert!(!is_binary_problem(&path).unwrap());

        // last node's feature index is beyond n
        let mut bad = good.clone();
        let at = bad.len() - 8;
        bad[at..at + 4].copy_from_slice(&99i32.to_le_bytes());
        fs::write(&path, &bad).unwrap();
        assert!(matches!(load_problem(&path), Err(FfmError::CorruptFile { .. })));
    }

    #[test]
    fn test_materialize_bad_text_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let text_path = dir.path().join("bad.txt");
        fs::write(&text_path, "1 0:0:1\n1 0:zz:1\n").unwrap();
        let bin_path = dir.path().join("bad.bin");
        assert!(matches!(materialize_to_disk(&text_path, &bin_path, true), Err(FfmError::InvalidInput(_))));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
