use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io;
use std::io::BufRead;
use std::path::Path;
use zstd::stream::read::Decoder as ZstdDecoder;

use nom::character::complete::{char, digit1, space0, space1};
use nom::combinator::{all_consuming, map_res};
use nom::multi::separated_list0;
use nom::number::complete::float;
use nom::sequence::{preceded, terminated, tuple};
use nom::IResult;

use crate::error::{FfmError, Result};
use crate::problem::{convert, Line, Node, Problem};

/*
Text format, one sample per line:
    label field:feature:value field:feature:value ...
Fields and features are non-negative integers, label and values are floats.
*/

fn parse_index(input: &str) -> IResult<&str, u32> {
    map_res(digit1, |s: &str| s.parse::<u32>())(input)
}

pub fn parse_node(input: &str) -> IResult<&str, Node> {
    let (input, (field, _, feature, _, value)) =
        tuple((parse_index, char(':'), parse_index, char(':'), float))(input)?;
    Ok((input, Node { field, feature, value }))
}

pub fn parse_line(input: &str) -> IResult<&str, (f32, Vec<Node>)> {
    let nodes = preceded(space0, separated_list0(space1, parse_node));
    let (input, (label, nodes)) = all_consuming(terminated(tuple((preceded(space0, float), nodes)), space0))(input)?;
    Ok((input, (label, nodes)))
}

/// Parses one text line into `nodes`, returning the label. `line_num` is only used for errors.
pub fn parse_text_line(text: &str, line_num: u64, nodes: &mut Vec<Node>) -> Result<f32> {
    match parse_line(text) {
        Ok((_, (label, parsed))) => {
            nodes.clear();
            nodes.extend(parsed);
            Ok(label)
        }
        Err(_) => Err(FfmError::invalid(format!("line {}: cannot parse \"{}\"", line_num, text))),
    }
}

pub fn create_buffered_input(input_filename: &Path) -> Result<Box<dyn BufRead>> {
    // Handler for different (or no) compression types
    let input = File::open(input_filename)?;
    let input_format = input_filename.extension().and_then(|ext| ext.to_str());

    match input_format {
        Some("gz") => {
            let gz_decoder = MultiGzDecoder::new(input);
            Ok(Box::new(io::BufReader::new(gz_decoder)))
        }
        Some("zst") => {
            let zstd_decoder = ZstdDecoder::new(input)?;
            Ok(Box::new(io::BufReader::new(zstd_decoder)))
        }
        _ => Ok(Box::new(io::BufReader::new(input))),
    }
}

/// Streams every non-blank line of `input` through `f` as (nodes, label)
pub fn for_each_line<F>(input: &mut dyn BufRead, mut f: F) -> Result<u64>
where
    F: FnMut(&[Node], f32) -> Result<()>,
{
    let mut text = String::new();
    let mut nodes: Vec<Node> = Vec::with_capacity(256);
    let mut line_num: u64 = 0;
    let mut examples: u64 = 0;
    loop {
        text.clear();
        if input.read_line(&mut text)? == 0 {
            break; // EOF
        }
        line_num += 1;
        let trimmed = text.trim_end_matches(|c| c == '\n' || c == '\r');
        if trimmed.trim().is_empty() {
            continue;
        }
        let label = parse_text_line(trimmed, line_num, &mut nodes)?;
        f(&nodes, label)?;
        examples += 1;
    }
    Ok(examples)
}

pub fn read_lines<P: AsRef<Path>>(path: P) -> Result<Vec<Line>> {
    let mut input = create_buffered_input(path.as_ref())?;
    let mut lines = Vec::new();
    for_each_line(&mut *input, |nodes, label| {
        lines.push(Line { nodes: nodes.to_vec(), label });
        Ok(())
    })?;
    Ok(lines)
}

/// Reads a whole text file into memory
pub fn read_problem<P: AsRef<Path>>(path: P, with_scales: bool) -> Result<Problem> {
    let lines = read_lines(path.as_ref())?;
    log::info!("read {} lines from {}", lines.len(), path.as_ref().display());
    convert(&lines, with_scales)
}
