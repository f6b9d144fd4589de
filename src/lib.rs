pub mod config;
pub mod core;
pub mod diagnostics;
pub mod distributions;
pub mod empirical;
pub mod error;
pub mod experiment;
pub mod gum_marsaglia;
pub mod importance_sampling;
pub mod io;
pub mod marsaglia;
pub mod metropolis_hastings;
pub mod model;
pub mod stats;
pub mod trace;
