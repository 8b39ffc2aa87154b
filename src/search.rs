mod beam;
mod generator;
mod hypothesis;
pub mod numeric;

pub use crate::search::{
    beam::{apply_repetition_penalty, case_variants, repeated_indices, Beam, BeamSearch},
    generator::{BeamSearchGenerator, CancellationToken, GREEDY_STEPS},
    hypothesis::{BeamHypotheses, Hypothesis},
};
