//! Byte stream generation for overwrite passes.
//!
//! A `PassPlan` is resolved per task from the algorithm's pass table. Random
//! passes carry their own seed, which makes every pass regenerable: the
//! complement pass replays the previous stream inverted, and final-pass
//! verification replays the last stream to compare against the disk.

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use crate::algorithm::{PassPattern, WipeAlgorithm};

#[derive(Debug, Clone, PartialEq, Eq)]
enum PassSource {
    Fill(u8),
    Cycle(Vec<u8>),
    Random { seed: [u8; 32] },
}

/// Concrete, reproducible description of one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassPlan {
    source: PassSource,
    invert: bool,
    label: String,
}

impl PassPlan {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// A fresh stream positioned at the start of the file.
    pub fn stream(&self) -> PatternStream {
        let inner = match &self.source {
            PassSource::Fill(b) => StreamSource::Fill(*b),
            PassSource::Cycle(bytes) => StreamSource::Cycle {
                bytes: bytes.clone(),
                position: 0,
            },
            PassSource::Random { seed } => StreamSource::Random(StdRng::from_seed(*seed)),
        };
        PatternStream {
            inner,
            invert: self.invert,
        }
    }
}

/// Resolve `repeats` passes of `algorithm` into concrete plans.
pub fn plan_passes(algorithm: &WipeAlgorithm) -> Vec<PassPlan> {
    let repeats = algorithm.repeats();
    let mut plans: Vec<PassPlan> = Vec::with_capacity(repeats as usize);
    let mut rng = rand::thread_rng();

    for pass in 0..repeats {
        let pattern = algorithm.pattern_for_pass(pass);
        let plan = match pattern {
            PassPattern::Fill(b) => PassPlan {
                source: PassSource::Fill(*b),
                invert: false,
                label: pattern.describe(),
            },
            PassPattern::Cycle(bytes) if bytes.is_empty() => PassPlan {
                source: PassSource::Fill(0x00),
                invert: false,
                label: pattern.describe(),
            },
            PassPattern::Cycle(bytes) => PassPlan {
                source: PassSource::Cycle(bytes.clone()),
                invert: false,
                label: pattern.describe(),
            },
            PassPattern::Random => PassPlan {
                source: PassSource::Random { seed: rng.gen() },
                invert: false,
                label: pattern.describe(),
            },
            PassPattern::Complement => match plans.last() {
                Some(previous) => PassPlan {
                    source: previous.source.clone(),
                    invert: !previous.invert,
                    label: format!("complement of {}", previous.label),
                },
                // complement of an implicit all-zero surface
                None => PassPlan {
                    source: PassSource::Fill(0x00),
                    invert: true,
                    label: pattern.describe(),
                },
            },
        };
        plans.push(plan);
    }
    plans
}

enum StreamSource {
    Fill(u8),
    Cycle { bytes: Vec<u8>, position: usize },
    Random(StdRng),
}

/// Sequential generator for the bytes of one pass.
pub struct PatternStream {
    inner: StreamSource,
    invert: bool,
}

impl PatternStream {
    /// Fill `buf` with the next `buf.len()` bytes of the pass.
    pub fn fill(&mut self, buf: &mut [u8]) {
        match &mut self.inner {
            StreamSource::Fill(b) => {
                let value = if self.invert { !*b } else { *b };
                buf.fill(value);
                return;
            }
            StreamSource::Cycle { bytes, position } => {
                let len = bytes.len();
                for (i, out) in buf.iter_mut().enumerate() {
                    *out = bytes[(*position + i) % len];
                }
                *position = (*position + buf.len()) % len;
            }
            StreamSource::Random(rng) => rng.fill_bytes(buf),
        }
        if self.invert {
            buf.iter_mut().for_each(|b| *b = !*b);
        }
    }
}
