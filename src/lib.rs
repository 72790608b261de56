pub mod block_ffm;
pub mod block_helpers;
pub mod cmdline;
pub mod disk;
pub mod error;
pub mod hogwild;
pub mod logging_layer;
pub mod loss_functions;
pub mod model;
pub mod multithread_helpers;
pub mod optimizer;
pub mod parameters;
pub mod parser;
pub mod persistence;
pub mod prediction;
pub mod problem;
pub mod trainer;

pub use disk::{materialize_to_disk, DiskProblem};
pub use error::{FfmError, Result};
pub use model::{init_model, Model};
pub use parameters::Parameters;
pub use persistence::{load_model, save_model};
pub use prediction::{predict, predict_array, predict_batch};
pub use problem::{convert, Line, LineSource, Node, Problem};
pub use trainer::{train, train_iteration, train_on_disk};
