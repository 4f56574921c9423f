//! Parameter training: grid search on training queries, validation on test queries.

pub mod gridsearch;

pub use gridsearch::{
    select_best, test_file_name, training_file_name, CandidateScore, GridSearchTrainer, TestReport,
    TrainingGrid, TrainingOutcome,
};
