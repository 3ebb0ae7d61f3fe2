//! Seedable randomness for puzzle generation and outcome simulation.

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Build a generator: deterministic when a seed is given, entropy-seeded otherwise.
pub fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Draw one label from `(label, weight)` pairs. Returns `None` for an empty
/// table or one whose weights are all zero.
pub fn weighted_choice<'a, R: Rng + ?Sized>(rng: &mut R, table: &'a [(String, f64)]) -> Option<&'a str> {
    let dist = WeightedIndex::new(table.iter().map(|(_, w)| *w)).ok()?;
    table.get(dist.sample(rng)).map(|(label, _)| label.as_str())
}

/// Short random identifier with a prefix, e.g. `clue-3f9a0c1d`.
pub fn short_id<R: Rng + ?Sized>(rng: &mut R, prefix: &str) -> String {
    format!("{}-{:08x}", prefix, rng.gen::<u32>())
}
