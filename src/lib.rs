pub mod config;
pub mod ensemble;
pub mod error;
pub mod logging;
pub mod roster;
pub mod scenario;
pub mod skellam;
pub mod solver;
pub mod strength_model;
pub mod summary;
pub mod win_prob;

pub use error::{EnsembleError, Result};
