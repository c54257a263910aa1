pub mod samples;

pub use samples::{SequenceSamples, SequenceWindow, TabularSamples};
