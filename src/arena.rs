// Sized per-worker scratch arena
//
// Aligner scratch memory is reserved up front: `reservation` computes the
// byte budget from the iteration parameters, and the arena preallocates
// every buffer against that budget when the worker starts. The hot loop
// then runs allocation-free, and dropping the arena releases all aligner
// state at once.

use crate::aligner::{AlignerConfig, Candidate, SecondaryBuffer, SingleAlignmentResult, MAX_K};
use crate::lv::LandauVishkin;

/// Longest read the scratch buffers are sized for.
pub const MAX_READ_LENGTH: usize = 512;

/// Bytes one worker's aligner scratch requires under `config`.
pub fn reservation(config: &AlignerConfig, seed_len: usize) -> usize {
    let candidates = candidate_pool_size(config, seed_len);
    candidates * std::mem::size_of::<Candidate>()
        + 2 * MAX_READ_LENGTH // encoded read, forward and reverse complement
        + (MAX_READ_LENGTH + MAX_K) // reference window
        + LandauVishkin::scratch_bytes()
        + config.max_secondary_alignments.min(4096)
            * std::mem::size_of::<SingleAlignmentResult>()
}

fn candidate_pool_size(config: &AlignerConfig, seed_len: usize) -> usize {
    // Both strands, every seed, every hit below the popularity cap.
    2 * config.seeds_for_read(MAX_READ_LENGTH, seed_len) * config.max_hits
}

/// Preallocated scratch shared by the aligners of one worker.
pub struct Arena {
    pub candidates: Vec<Candidate>,
    pub forward: Vec<u8>,
    pub reverse: Vec<u8>,
    pub ref_window: Vec<u8>,
    pub lv: LandauVishkin,
    reserved: usize,
}

impl Arena {
    pub fn new(config: &AlignerConfig, seed_len: usize) -> Arena {
        let reserved = reservation(config, seed_len);
        Arena {
            candidates: Vec::with_capacity(candidate_pool_size(config, seed_len)),
            forward: Vec::with_capacity(MAX_READ_LENGTH),
            reverse: Vec::with_capacity(MAX_READ_LENGTH),
            ref_window: Vec::with_capacity(MAX_READ_LENGTH + MAX_K),
            lv: LandauVishkin::new(),
            reserved,
        }
    }

    /// The budget this arena was constructed against.
    pub fn bytes_reserved(&self) -> usize {
        self.reserved
    }

    /// A secondary buffer honoring the configured cap.
    pub fn secondary_buffer(config: &AlignerConfig) -> SecondaryBuffer {
        SecondaryBuffer::new(config.max_secondary_alignments)
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
        self.forward.clear();
        self.reverse.clear();
        self.ref_window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_covers_candidate_pool() {
        let cfg = AlignerConfig::default();
        let bytes = reservation(&cfg, 20);
        let arena = Arena::new(&cfg, 20);
        assert_eq!(arena.bytes_reserved(), bytes);
        assert!(
            arena.candidates.capacity() * std::mem::size_of::<Candidate>() <= bytes,
            "candidate pool exceeds the reservation"
        );
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let cfg = AlignerConfig::default();
        let mut arena = Arena::new(&cfg, 20);
        let cap = arena.candidates.capacity();
        arena.candidates.push(Candidate {
            location: 0,
            direction: crate::reads::Direction::Forward,
            weight: 1,
        });
        arena.clear();
        assert!(arena.candidates.is_empty());
        assert_eq!(arena.candidates.capacity(), cap);
    }
}
