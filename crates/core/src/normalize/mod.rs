//! Shaping provider output into canonical bars.
//!
//! - `normalizer`: provider labels to validated, aligned [`PriceBar`](crate::bars::PriceBar)s
//! - `synthesizer`: daily to weekly roll-up

mod normalizer;
mod synthesizer;

pub use normalizer::{MalformedRecord, NormalizedBatch, Normalizer, Sample};
pub use synthesizer::WeeklySynthesizer;
