use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::cmp::min;
use std::io;

use crate::error::Result;

#[macro_export]
macro_rules! assert_epsilon {
    ($x:expr, $y:expr) => {
        let x = $x; // Make sure we evaluate only once
        let y = $y;
        if !(x - y < 0.000005 && y - x < 0.000005) {
            println!("Expectation: {}, Got: {}", y, x);
            panic!();
        }
    };
}

const BUF_LEN: usize = 1024 * 1024;

// Weights are stored little endian. Writes go through a bounded bounce buffer,
// never a second full-size copy of the model.

pub fn read_weights_from_buf(weights: &mut [f32], input_bufreader: &mut dyn io::Read) -> Result<()> {
    for chunk in weights.chunks_mut(BUF_LEN) {
        input_bufreader.read_f32_into::<LittleEndian>(chunk)?;
    }
    Ok(())
}

pub fn write_weights_to_buf(weights: &[f32], output_bufwriter: &mut dyn io::Write) -> Result<()> {
    let mut bytes: Vec<u8> = Vec::with_capacity(min(weights.len(), BUF_LEN) * 4);
    for chunk in weights.chunks(BUF_LEN) {
        bytes.clear();
        for w in chunk {
            bytes.write_f32::<LittleEndian>(*w)?;
        }
        output_bufwriter.write_all(&bytes)?;
    }
    Ok(())
}
