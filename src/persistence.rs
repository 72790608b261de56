use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs;
use std::io;
use std::io::{Read, Write};
use std::path::Path;

use crate::block_helpers;
use crate::error::{FfmError, Result};
use crate::model::{Model, ModelShape};

const MODEL_HEADER_MAGIC_STRING: &[u8; 4] = b"FFMM"; // FFM Model
const MODEL_HEADER_VERSION: u32 = 1;
// magic, version, n, m, k, normalization
const MODEL_HEADER_LEN: u64 = 4 + 4 + 4 + 4 + 4 + 1;

pub fn save_model<P: AsRef<Path>>(model: &Model, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut output_bufwriter = io::BufWriter::new(fs::File::create(path)?);
    write_model_header(&mut output_bufwriter, model)?;
    block_helpers::write_weights_to_buf(&model.weights, &mut output_bufwriter)?;
    output_bufwriter.flush()?;
    log::debug!("saved model to {}", path.display());
    Ok(())
}

fn write_model_header(output_bufwriter: &mut dyn io::Write, model: &Model) -> Result<()> {
    output_bufwriter.write_all(MODEL_HEADER_MAGIC_STRING)?;
    output_bufwriter.write_u32::<LittleEndian>(MODEL_HEADER_VERSION)?;
    for dim in [model.n, model.m, model.k] {
        output_bufwriter.write_i32::<LittleEndian>(to_i32(dim)?)?;
    }
    output_bufwriter.write_u8(model.normalization as u8)?;
    Ok(())
}

fn to_i32(dim: u32) -> Result<i32> {
    i32::try_from(dim).map_err(|_| FfmError::invalid(format!("model dimension {} does not fit the model file", dim)))
}

pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Model> {
    let path = path.as_ref();
    let file = fs::File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut input_bufreader = io::BufReader::new(file);
    if file_len < MODEL_HEADER_LEN {
        return Err(FfmError::corrupt(path, format!("{} bytes is shorter than the header", file_len)));
    }

    let mut magic_string: [u8; 4] = [0; 4];
    input_bufreader.read_exact(&mut magic_string)?;
    if &magic_string != MODEL_HEADER_MAGIC_STRING {
        return Err(FfmError::corrupt(path, "model file does not begin with magic bytes FFMM"));
    }
    let version = input_bufreader.read_u32::<LittleEndian>()?;
    if version != MODEL_HEADER_VERSION {
        return Err(FfmError::corrupt(path, format!(
            "model file version of this binary: {}, version of the model file: {}", MODEL_HEADER_VERSION, version)));
    }

    let mut dims = [0u32; 3];
    for dim in dims.iter_mut() {
        let v = input_bufreader.read_i32::<LittleEndian>()?;
        *dim = u32::try_from(v).map_err(|_| FfmError::corrupt(path, format!("negative dimension {}", v)))?;
    }
    let [n, m, k] = dims;
    let normalization = match input_bufreader.read_u8()? {
        0 => false,
        1 => true,
        v => return Err(FfmError::corrupt(path, format!("normalization flag {}", v))),
    };

    // the header decides the buffer length, the file has to agree before anything is allocated
    let expected_len = ModelShape { n, m, k }
        .buffer_len()
        .and_then(|floats| floats.checked_mul(4))
        .and_then(|bytes| bytes.checked_add(MODEL_HEADER_LEN as u128));
    if expected_len != Some(file_len as u128) {
        return Err(FfmError::corrupt(path, format!(
            "header n = {}, m = {}, k = {} implies {:?} bytes, file has {}", n, m, k, expected_len, file_len)));
    }

    let mut model = Model::new_zeroed(n, m, k, normalization)?;
    block_helpers::read_weights_from_buf(&mut model.weights, &mut input_bufreader)?;
    log::debug!("loaded model n = {}, m = {}, k = {} from {}", n, m, k, path.display());
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::Parameters;
    use crate::problem::convert;
    use crate::problem::tests::sample_lines;
    use crate::trainer::train;
    use std::fs::OpenOptions;

    fn trained_model() -> Model {
        let mut problem = convert(&sample_lines(), true).unwrap();
        let mut params = Parameters::default();
        params.nr_iters = 2;
        train(&mut problem, None, &params).unwrap()
    }

    #[test]
    fn test_roundtrip_is_bit_identical() {
        let model = trained_model();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.model");
        save_model(&model, &path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), MODEL_HEADER_LEN + 5 * 3 * 4 * 2 * 4);

        let loaded = load_model(&path).unwrap();
        assert_eq!((loaded.n, loaded.m, loaded.k, loaded.normalization), (5, 3, 4, true));
        let bits = |m: &Model| m.weights.iter().map(|w| w.to_bits()).collect::<Vec<u32>>();
        assert_eq!(bits(&loaded), bits(&model));
    }

    #[test]
    fn test_normalization_flag_survives() {
        let mut model = Model::new_zeroed(1, 1, 1, false).unwrap();
        model.weights.copy_from_slice(&[0.5, 1.0]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.model");
        save_model(&model, &path).unwrap();
        assert_eq!(load_model(&path).unwrap(), model);
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let model = trained_model();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.model");
        save_model(&model, &path).unwrap();
        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 4).unwrap();
        assert!(matches!(load_model(&path), Err(FfmError::CorruptFile { .. })));

        // and trailing garbage
        OpenOptions::new().write(true).open(&path).unwrap().set_len(len + 4).unwrap();
        assert!(matches!(load_model(&path), Err(FfmError::CorruptFile { .. })));

        fs::write(&path, b"FFM").unwrap();
        assert!(matches!(load_model(&path), Err(FfmError::CorruptFile { .. })));
    }

    #[test]
    fn test_bad_header_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.model");
        let mut bytes = b"FWRE".to_vec();
        bytes.extend_from_slice(&[0u8; 17]);
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(load_model(&path), Err(FfmError::CorruptFile { .. })));

        let mut bytes = b"FFMM".to_vec();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 13]);
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(load_model(&path), Err(FfmError::CorruptFile { .. })));

        let mut bytes = b"FFMM".to_vec();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&(-1i32).to_le_bytes());
        bytes.extend_from_slice(&[0u8; 9]);
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(load_model(&path), Err(FfmError::CorruptFile { .. })));
    }

    #[test]
    fn test_missing_file_is_io() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_model(dir.path().join("none.model")), Err(FfmError::Io(_))));
    }
}
