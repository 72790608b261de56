use clap::{App, AppSettings, Arg, SubCommand};

pub fn parse<'a>() -> clap::ArgMatches<'a> {
    create_expected_args().get_matches()
}

pub fn create_expected_args<'a>() -> App<'a, 'a> {
    App::new("ffw")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Field-aware factorization machines")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommand(SubCommand::with_name("train")
            .about("Trains a model on a text or binary problem file")
            .arg(Arg::with_name("lambda")
                .short("l")
                .value_name("lambda")
                .help("L2 regularization strength (default 0.00002)")
                .takes_value(true))
            .arg(Arg::with_name("factors")
                .short("k")
                .value_name("factor")
                .help("Number of latent factors (default 4)")
                .takes_value(true))
            .arg(Arg::with_name("iterations")
                .short("t")
                .value_name("iteration")
                .help("Number of epochs (default 15)")
                .takes_value(true))
            .arg(Arg::with_name("eta")
                .short("r")
                .value_name("eta")
                .help("Learning rate (default 0.2)")
                .takes_value(true))
            .arg(Arg::with_name("threads")
                .short("s")
                .value_name("nr_threads")
                .help("Number of hogwild threads (default 1)")
                .takes_value(true))
            .arg(Arg::with_name("validation")
                .short("p")
                .value_name("path")
                .help("Validation set, its logloss is reported every epoch")
                .takes_value(true))
            .arg(Arg::with_name("seed")
                .long("seed")
                .value_name("seed")
                .help("Seed for initialization and shuffling (default 0)")
                .takes_value(true))
            .arg(Arg::with_name("config")
                .long("config")
                .value_name("params.json")
                .help("JSON file with training parameters, explicit flags override it")
                .takes_value(true))
            .arg(Arg::with_name("no_norm")
                .long("no-norm")
                .help("Disable instance-wise normalization"))
            .arg(Arg::with_name("auto_stop")
                .long("auto-stop")
                .help("Stop at the epoch before validation logloss goes up"))
            .arg(Arg::with_name("on_disk")
                .long("on-disk")
                .help("Convert the inputs to binary files and train out of core"))
            .arg(Arg::with_name("data")
                .value_name("training_file")
                .required(true)
                .index(1))
            .arg(Arg::with_name("model")
                .value_name("model_file")
                .index(2)))
        .subcommand(SubCommand::with_name("predict")
            .about("Scores a text problem file with a trained model")
            .arg(Arg::with_name("data")
                .value_name("test_file")
                .required(true)
                .index(1))
            .arg(Arg::with_name("model")
                .value_name("model_file")
                .required(true)
                .index(2))
            .arg(Arg::with_name("output")
                .value_name("output_file")
                .required(true)
                .index(3)))
        .subcommand(SubCommand::with_name("convert")
            .about("Converts a text problem file to the binary problem format")
            .arg(Arg::with_name("no_norm")
                .long("no-norm")
                .help("Do not store per-line normalization scales"))
            .arg(Arg::with_name("data")
                .value_name("text_file")
                .required(true)
                .index(1))
            .arg(Arg::with_name("output")
                .value_name("bin_file")
                .required(true)
                .index(2)))
}
