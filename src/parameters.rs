use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{FfmError, Result};

pub const MAX_K: u32 = 1024;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Parameters {
    #[serde(default = "default_eta")]
    pub eta: f32,
    #[serde(default = "default_lambda")]
    pub lambda: f32,
    #[serde(default = "default_nr_iters")]
    pub nr_iters: u32,
    #[serde(default = "default_k")]
    pub k: u32,
    #[serde(default = "default_bool_true")]
    pub normalization: bool,
    #[serde(default = "default_bool_false")]
    pub auto_stop: bool,
    // these two are not part of the model, they only steer a training run
    #[serde(default = "default_u64_zero")]
    pub seed: u64,
    #[serde(default = "default_nr_threads")]
    pub nr_threads: usize,
}

fn default_eta() -> f32 {0.2}
fn default_lambda() -> f32 {0.00002}
fn default_nr_iters() -> u32 {15}
fn default_k() -> u32 {4}
fn default_bool_true() -> bool {true}
fn default_bool_false() -> bool {false}
fn default_u64_zero() -> u64 {0}
fn default_nr_threads() -> usize {1}

impl Default for Parameters {
    fn default() -> Parameters {
        Parameters {
            eta: default_eta(),
            lambda: default_lambda(),
            nr_iters: default_nr_iters(),
            k: default_k(),
            normalization: default_bool_true(),
            auto_stop: default_bool_false(),
            seed: default_u64_zero(),
            nr_threads: default_nr_threads(),
        }
    }
}

fn parse_arg<T: std::str::FromStr>(cl: &clap::ArgMatches, name: &str) -> Result<Option<T>> {
    match cl.value_of(name) {
        Some(s) => s
            .parse::<T>()
            .map(Some)
            .map_err(|_| FfmError::invalid(format!("cannot parse --{} value \"{}\"", name, s))),
        None => Ok(None),
    }
}

impl Parameters {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Parameters> {
        let input = BufReader::new(File::open(path.as_ref())?);
        let params: Parameters = serde_json::from_reader(input).map_err(|e| {
            FfmError::invalid(format!("config {}: {}", path.as_ref().display(), e))
        })?;
        params.validate()?;
        Ok(params)
    }

    /// Builds parameters from the `train` subcommand. A `--config` file provides the
    /// base values, explicit flags override them.
    pub fn new_from_cmdline(cl: &clap::ArgMatches) -> Result<Parameters> {
        let mut params = match cl.value_of("config") {
            Some(path) => Parameters::from_json_file(path)?,
            None => Parameters::default(),
        };

        if let Some(v) = parse_arg(cl, "lambda")? {
            params.lambda = v;
        }
        if let Some(v) = parse_arg(cl, "factors")? {
            params.k = v;
        }
        if let Some(v) = parse_arg(cl, "iterations")? {
            params.nr_iters = v;
        }
        if let Some(v) = parse_arg(cl, "eta")? {
            params.eta = v;
        }
        if let Some(v) = parse_arg(cl, "threads")? {
            params.nr_threads = v;
        }
        if let Some(v) = parse_arg(cl, "seed")? {
            params.seed = v;
        }
        if cl.is_present("no_norm") {
            params.normalization = false;
        }
        if cl.is_present("auto_stop") {
            if !cl.is_present("validation") {
                return Err(FfmError::invalid("--auto-stop requires a validation set (-p)"));
            }
            params.auto_stop = true;
        }
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 || self.k > MAX_K {
            return Err(FfmError::invalid(format!("k must be between 1 and {}, got {}", MAX_K, self.k)));
        }
        if !self.eta.is_finite() || self.eta <= 0.0 {
            return Err(FfmError::invalid(format!("eta must be a positive number, got {}", self.eta)));
        }
        if !self.lambda.is_finite() || self.lambda < 0.0 {
            return Err(FfmError::invalid(format!("lambda must be non-negative, got {}", self.lambda)));
        }
        if self.nr_threads == 0 {
            return Err(FfmError::invalid("number of threads must be at least 1"));
        }
        Ok(())
    }
}
