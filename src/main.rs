use std::error::Error;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use ffw::disk::{is_binary_problem, load_problem, materialize_to_disk, DiskProblem};
use ffw::parameters::Parameters;
use ffw::persistence::{load_model, save_model};
use ffw::problem::{LineSource, Problem};
use ffw::{cmdline, logging_layer, parser, prediction, trainer};

fn main() {
    logging_layer::initialize_logging_layer();

    if let Err(e) = main_ffm_loop() {
        log::error!("Global error: {}", e);
        std::process::exit(1)
    }
}

fn main_ffm_loop() -> Result<(), Box<dyn Error>> {
    // We'll parse once the command line into cl and then different commands will examine it
    let cl = cmdline::parse();
    match cl.subcommand() {
        ("train", Some(sub)) => train_command(sub),
        ("predict", Some(sub)) => predict_command(sub),
        ("convert", Some(sub)) => convert_command(sub),
        (other, _) => Err(format!("Unknown command: {}", other).into()),
    }
}

/// `<basename of the training file>.model` in the working directory
fn default_model_path(tr_path: &Path) -> PathBuf {
    let mut name: OsString = tr_path.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "ffw".into());
    name.push(".model");
    PathBuf::from(name)
}

fn read_any_problem(path: &Path, with_scales: bool) -> Result<Problem, Box<dyn Error>> {
    if is_binary_problem(path)? {
        Ok(load_problem(path)?)
    } else {
        Ok(parser::read_problem(path, with_scales)?)
    }
}

/// Binary problem file for `path`, converting text input to `<path>.bin` first
fn ensure_binary(path: &Path, with_scales: bool) -> Result<PathBuf, Box<dyn Error>> {
    if is_binary_problem(path)? {
        return Ok(path.to_path_buf());
    }
    let mut bin_path = path.as_os_str().to_os_string();
    bin_path.push(".bin");
    let bin_path = PathBuf::from(bin_path);
    let now = Instant::now();
    let header = materialize_to_disk(path, &bin_path, with_scales)?;
    log::info!(
        "converted {} to {}: {} lines, {} nodes, n = {}, m = {} ({:.1}s)",
        path.display(),
        bin_path.display(),
        header.size,
        header.num_nodes,
        header.n,
        header.m,
        now.elapsed().as_secs_f64()
    );
    Ok(bin_path)
}

fn train_command(cl: &clap::ArgMatches) -> Result<(), Box<dyn Error>> {
    let params = Parameters::new_from_cmdline(cl)?;
    log::info!("parameters = {}", serde_json::to_string(&params)?);

    let tr_path = Path::new(cl.value_of("data").ok_or("training file expected")?);
    let va_path = cl.value_of("validation").map(Path::new);
    let model_path = match cl.value_of("model") {
        Some(path) => PathBuf::from(path),
        None => default_model_path(tr_path),
    };

    let now = Instant::now();
    let model = if cl.is_present("on_disk") {
        let tr_bin = ensure_binary(tr_path, params.normalization)?;
        let va_bin = match va_path {
            Some(path) => Some(ensure_binary(path, params.normalization)?),
            None => None,
        };
        trainer::train_on_disk(&tr_bin, va_bin.as_deref(), &params)?
    } else {
        let mut tr = read_any_problem(tr_path, params.normalization)?;
        let mut va = match va_path {
            Some(path) => Some(read_any_problem(path, params.normalization)?),
            None => None,
        };
        trainer::train(&mut tr, va.as_mut().map(|v| v as &mut dyn LineSource), &params)?
    };
    log::info!("training took {:.1}s", now.elapsed().as_secs_f64());

    save_model(&model, &model_path)?;
    log::info!("model = {}", model_path.display());
    Ok(())
}

fn predict_command(cl: &clap::ArgMatches) -> Result<(), Box<dyn Error>> {
    let test_path = Path::new(cl.value_of("data").ok_or("test file expected")?);
    let model_path = cl.value_of("model").ok_or("model file expected")?;
    let output_path = cl.value_of("output").ok_or("output file expected")?;

    let model = load_model(model_path)?;
    let mut output = BufWriter::new(File::create(output_path)?);

    let logloss = if is_binary_problem(test_path)? {
        let mut test = DiskProblem::open(test_path)?;
        for p in prediction::predict_source(&mut test, &model)? {
            writeln!(output, "{:.6}", p)?;
        }
        prediction::logloss(&mut test, &model)?
    } else {
        // text input is streamed, it never has to fit in memory
        let mut input = parser::create_buffered_input(test_path)?;
        let mut loss: f64 = 0.0;
        let lines = parser::for_each_line(&mut *input, |nodes, label| {
            let (p, l) = prediction::predict_with_loss(nodes, label, &model);
            loss += l;
            writeln!(output, "{:.6}", p)?;
            Ok(())
        })?;
        if lines > 0 { loss / lines as f64 } else { 0.0 }
    };
    output.flush()?;

    log::info!("logloss = {:.5}", logloss);
    Ok(())
}

fn convert_command(cl: &clap::ArgMatches) -> Result<(), Box<dyn Error>> {
    let text_path = Path::new(cl.value_of("data").ok_or("text file expected")?);
    let bin_path = Path::new(cl.value_of("output").ok_or("binary file expected")?);
    let header = materialize_to_disk(text_path, bin_path, !cl.is_present("no_norm"))?;
    log::info!(
        "{}: {} lines, {} nodes, n = {}, m = {}",
        bin_path.display(),
        header.size,
        header.num_nodes,
        header.n,
        header.m
    );
    Ok(())
}
