// Mapping quality
//
// MAPQ approximates -10 log10 P(misaligned) on the usual 0..=70 scale.
// With a bounded-edit-distance scorer the dominant evidence is the gap
// between the best hit and the runner-up: each extra edit in the runner-up
// makes it roughly an order of magnitude less likely to be the true origin.

pub const MAX_MAPQ: u32 = 70;

/// Values above this can never be produced here; observing one in a result
/// means an upstream component corrupted it.
pub const MAPQ_SANITY_LIMIT: u32 = 1000;

/// MAPQ threshold separating confident single hits from ambiguous ones in
/// the stats report.
pub const MAPQ_LIMIT_FOR_SINGLE_HIT: u32 = 10;

/// Compute MAPQ from the best score, the runner-up score (if any candidate
/// scored within the search depth), and the number of candidates tied at
/// the best score.
pub fn compute_mapq(best_score: u32, second_best: Option<u32>, n_best: usize) -> u32 {
    if n_best > 1 {
        // Tied best hits: the true origin is at best a coin flip.
        return match n_best {
            2 => 3,
            3 => 2,
            4 => 1,
            _ => 0,
        };
    }
    match second_best {
        None => MAX_MAPQ,
        Some(second) => {
            let gap = second.saturating_sub(best_score);
            (10 * gap).min(MAX_MAPQ)
        }
    }
}
