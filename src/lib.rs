pub mod config;
pub mod error;
pub mod relevance;
pub mod eval;
pub mod ranking;
pub mod training;
pub mod compare;

pub use config::Config;
pub use error::{RankevalError, Result};
pub use relevance::RelevanceStore;
