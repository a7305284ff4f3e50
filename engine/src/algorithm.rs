//! Wipe algorithm registry.
//!
//! An algorithm is an ordered list of pass patterns plus a repeat count.
//! Pass `i` of a wipe uses `passes[i % passes.len()]`, so an editable
//! single-pattern algorithm such as `zero` simply repeats its pattern
//! `repeats` times, while fixed algorithms run their table once.

use serde::{Deserialize, Serialize};
use crate::config::Bounds;
use crate::error::EngineError;

/// Byte pattern written by one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassPattern {
    /// Every byte set to the same value
    Fill(u8),
    /// A short byte sequence repeated over the file
    Cycle(Vec<u8>),
    /// Cryptographically random bytes
    Random,
    /// Bitwise complement of the previous pass
    Complement,
}

impl PassPattern {
    pub fn describe(&self) -> String {
        match self {
            PassPattern::Fill(b) => format!("0x{:02X}", b),
            PassPattern::Cycle(bytes) => bytes
                .iter()
                .map(|b| format!("0x{:02X}", b))
                .collect::<Vec<_>>()
                .join(" "),
            PassPattern::Random => "random data".to_string(),
            PassPattern::Complement => "complement".to_string(),
        }
    }
}

/// Whether the repeat count can be changed by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeatPolicy {
    /// Clamped into the configured bounds on assignment
    Editable,
    /// Pinned to the length of the pass table; assignment is ignored
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WipeAlgorithm {
    pub name: String,
    pub display_label: String,
    pub description: String,
    pub passes: Vec<PassPattern>,
    pub policy: RepeatPolicy,
    repeats: u32,
}

impl WipeAlgorithm {
    /// An algorithm whose repeat count is the length of its pass table.
    pub fn fixed(name: &str, label: &str, description: &str, passes: Vec<PassPattern>) -> Self {
        let repeats = passes.len().max(1) as u32;
        WipeAlgorithm {
            name: name.to_string(),
            display_label: label.to_string(),
            description: description.to_string(),
            passes,
            policy: RepeatPolicy::Fixed,
            repeats,
        }
    }

    /// An algorithm whose repeat count the user may change.
    pub fn editable(
        name: &str,
        label: &str,
        description: &str,
        passes: Vec<PassPattern>,
        repeats: u32,
        bounds: &Bounds,
    ) -> Self {
        WipeAlgorithm {
            name: name.to_string(),
            display_label: label.to_string(),
            description: description.to_string(),
            passes,
            policy: RepeatPolicy::Editable,
            repeats: bounds.clamp_repeats(repeats),
        }
    }

    pub fn repeats(&self) -> u32 {
        self.repeats
    }

    pub fn is_editable(&self) -> bool {
        self.policy == RepeatPolicy::Editable
    }

    /// Assign a repeat count and return the value actually stored.
    ///
    /// Editable algorithms clamp into `bounds`; fixed ones keep their value.
    /// Callers should display the returned value rather than what they asked for.
    pub fn set_repeats(&mut self, repeats: u32, bounds: &Bounds) -> u32 {
        if self.is_editable() {
            self.repeats = bounds.clamp_repeats(repeats);
        }
        self.repeats
    }

    /// Pattern for a zero-based pass index.
    pub fn pattern_for_pass(&self, pass: u32) -> &PassPattern {
        static ZERO_FILL: PassPattern = PassPattern::Fill(0x00);
        match self.passes.len() {
            0 => &ZERO_FILL,
            len => &self.passes[pass as usize % len],
        }
    }

    pub(crate) fn validate(&self, bounds: &Bounds) -> Result<(), EngineError> {
        if self.passes.is_empty() {
            return Err(EngineError::config(format!(
                "algorithm '{}' has no passes",
                self.name
            )));
        }
        if self.repeats == 0 {
            return Err(EngineError::config(format!(
                "algorithm '{}' has zero repeats",
                self.name
            )));
        }
        if self.is_editable()
            && (self.repeats < bounds.repeats_minimum || self.repeats > bounds.repeats_maximum)
        {
            return Err(EngineError::config(format!(
                "algorithm '{}' repeats {} outside [{}, {}]",
                self.name, self.repeats, bounds.repeats_minimum, bounds.repeats_maximum
            )));
        }
        Ok(())
    }
}

fn gutmann_passes() -> Vec<PassPattern> {
    use PassPattern::{Cycle, Fill, Random};
    let mut passes = vec![Random, Random, Random, Random];
    passes.extend([
        Cycle(vec![0x55, 0xAA]),
        Cycle(vec![0xAA, 0x55]),
        Cycle(vec![0x92, 0x49, 0x24]),
        Cycle(vec![0x49, 0x24, 0x92]),
        Cycle(vec![0x24, 0x92, 0x49]),
    ]);
    passes.extend((0x00..=0xFFu8).step_by(0x11).map(Fill));
    passes.extend([
        Cycle(vec![0x92, 0x49, 0x24]),
        Cycle(vec![0x49, 0x24, 0x92]),
        Cycle(vec![0x24, 0x92, 0x49]),
        Cycle(vec![0x6D, 0xB6, 0xDB]),
        Cycle(vec![0xB6, 0xDB, 0x6D]),
        Cycle(vec![0xDB, 0x6D, 0xB6]),
    ]);
    passes.extend([Random, Random, Random, Random]);
    passes
}

/// The ordered set of algorithms a session can choose from.
#[derive(Debug, Clone)]
pub struct AlgorithmRegistry {
    bounds: Bounds,
    algorithms: Vec<WipeAlgorithm>,
}

impl AlgorithmRegistry {
    /// Registry pre-populated with the built-in algorithms.
    pub fn new(bounds: Bounds) -> Self {
        use PassPattern::{Complement, Fill, Random};
        let algorithms = vec![
            WipeAlgorithm::editable(
                "zero",
                "Write Zeros",
                "Overwrites the file with 0x00 bytes",
                vec![Fill(0x00)],
                1,
                &bounds,
            ),
            WipeAlgorithm::editable(
                "random",
                "Random Data",
                "Overwrites the file with cryptographically random bytes",
                vec![Random],
                1,
                &bounds,
            ),
            WipeAlgorithm::fixed(
                "dod-3",
                "DoD 5220.22-M (3 passes)",
                "Zeros, their complement, then random data",
                vec![Fill(0x00), Complement, Random],
            ),
            WipeAlgorithm::fixed(
                "dod-7",
                "DoD 5220.22-M ECE (7 passes)",
                "Two DoD 3-pass rounds around an extra random pass",
                vec![Fill(0x00), Complement, Random, Random, Fill(0x00), Complement, Random],
            ),
            WipeAlgorithm::fixed(
                "schneier",
                "Bruce Schneier (7 passes)",
                "Ones, zeros, then five passes of random data",
                vec![Fill(0xFF), Fill(0x00), Random, Random, Random, Random, Random],
            ),
            WipeAlgorithm::fixed(
                "gutmann",
                "Peter Gutmann (35 passes)",
                "Four random passes, 27 fixed patterns, four random passes",
                gutmann_passes(),
            ),
        ];
        AlgorithmRegistry { bounds, algorithms }
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn list(&self) -> &[WipeAlgorithm] {
        &self.algorithms
    }

    pub fn names(&self) -> Vec<&str> {
        self.algorithms.iter().map(|a| a.name.as_str()).collect()
    }

    /// Look up an algorithm by name (case-insensitive) and return a copy.
    pub fn select(&self, name: &str) -> Result<WipeAlgorithm, EngineError> {
        self.algorithms
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| EngineError::AlgorithmNotFound {
                name: name.to_string(),
            })
    }

    /// Clamp-and-store a repeat count using this registry's bounds.
    pub fn set_repeats(&self, algorithm: &mut WipeAlgorithm, repeats: u32) -> u32 {
        algorithm.set_repeats(repeats, &self.bounds)
    }

    /// Add a custom algorithm, replacing any existing one with the same name.
    pub fn register(&mut self, algorithm: WipeAlgorithm) -> Result<(), EngineError> {
        algorithm.validate(&self.bounds)?;
        match self
            .algorithms
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(&algorithm.name))
        {
            Some(existing) => *existing = algorithm,
            None => self.algorithms.push(algorithm),
        }
        Ok(())
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::new(Bounds::default())
    }
}
