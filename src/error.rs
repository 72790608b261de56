use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FfmError {
    /// Malformed input lines, bad parameters, or a problem that does not fit the model
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Header and payload of a binary file disagree
    #[error("corrupt file {path}: {reason}")]
    CorruptFile { path: String, reason: String },

    /// A dense buffer could not be allocated
    #[error("cannot allocate {bytes} bytes for {what}")]
    ResourceExhaustion { what: &'static str, bytes: u128 },

    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, FfmError>;

impl FfmError {
    pub fn invalid<S: Into<String>>(msg: S) -> FfmError {
        FfmError::InvalidInput(msg.into())
    }

    pub fn corrupt<P: AsRef<std::path::Path>, S: Into<String>>(path: P, reason: S) -> FfmError {
        FfmError::CorruptFile {
            path: path.as_ref().display().to_string(),
            reason: reason.into(),
        }
    }
}

/// Allocates an empty vector able to hold `len` elements without reallocating.
pub fn try_alloc<T>(len: u128, what: &'static str) -> Result<Vec<T>> {
    let bytes = len.saturating_mul(std::mem::size_of::<T>() as u128);
    let exhausted = || FfmError::ResourceExhaustion { what, bytes };
    let len = usize::try_from(len).map_err(|_| exhausted())?;
    let mut v: Vec<T> = Vec::new();
    v.try_reserve_exact(len).map_err(|_| exhausted())?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_alloc() {
        let v: Vec<f32> = try_alloc(16, "weights").unwrap();
        assert!(v.capacity() >= 16);
        assert_eq!(v.len(), 0);

        match try_alloc::<f32>(u128::MAX / 2, "weights") {
            Err(FfmError::ResourceExhaustion { what, .. }) => assert_eq!(what, "weights"),
            _ => panic!("expected ResourceExhaustion"),
        }
    }

    #[test]
    fn test_io_conversion() {
        let e: FfmError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(matches!(e, FfmError::Io(_)));
        assert!(format!("{}", e).starts_with("I/O failure"));
    }
}
