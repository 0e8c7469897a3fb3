// Index construction from a FASTA reference

use super::{GenomeIndex, IndexError};
use crate::genome::{encode_base, Genome};
use bio::io::fasta;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Instant;

/// Read a FASTA reference, pack it, and write the index directory.
pub fn build_index(fasta_path: &Path, out_dir: &Path, seed_length: usize) -> Result<(), IndexError> {
    let start = Instant::now();
    let reader = fasta::Reader::new(BufReader::new(File::open(fasta_path)?));

    let mut contigs = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| IndexError::Format(e.to_string()))?;
        let seq: Vec<u8> = record.seq().iter().map(|&b| encode_base(b)).collect();
        if seq.is_empty() {
            return Err(IndexError::Format(format!(
                "contig {} in {} is empty",
                record.id(),
                fasta_path.display()
            )));
        }
        contigs.push((record.id().to_string(), seq));
    }
    if contigs.is_empty() {
        return Err(IndexError::Format(format!(
            "no sequences found in {}",
            fasta_path.display()
        )));
    }

    let genome = Genome::from_contigs(contigs);
    let n_bases = genome.n_bases();
    if n_bases < seed_length as u64 {
        return Err(IndexError::Format(format!(
            "reference has {} bases, shorter than the seed length {}",
            n_bases, seed_length
        )));
    }

    let index = GenomeIndex::from_genome(genome, seed_length);
    index.save(out_dir)?;
    log::info!(
        "built index in {}: {} bases, seed size {}, {:.1}s",
        out_dir.display(),
        n_bases,
        seed_length,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_build_from_fasta_round_trips() {
        let dir = std::env::temp_dir().join("seedmap_build_test");
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        let fasta = dir.join("ref.fa");
        let mut f = File::create(&fasta).unwrap();
        writeln!(f, ">chr1 description text").unwrap();
        writeln!(f, "ACGTACGTTTGGCCAATTGG").unwrap();
        writeln!(f, "ACGTACGTAACCGGTTAACC").unwrap();
        writeln!(f, ">chr2").unwrap();
        writeln!(f, "TTTTGGGGCCCCAAAATTTT").unwrap();

        let out = dir.join("index");
        build_index(&fasta, &out, 8).unwrap();

        let index = GenomeIndex::load_from_directory(&out, false, false).unwrap();
        assert_eq!(index.bases_count(), 60);
        assert_eq!(index.seed_length(), 8);
        assert_eq!(index.genome().contigs().len(), 2);
        assert_eq!(index.genome().contigs()[0].name, "chr1");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_fasta_is_an_error() {
        let dir = std::env::temp_dir().join("seedmap_build_empty");
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        let fasta = dir.join("ref.fa");
        File::create(&fasta).unwrap();
        assert!(build_index(&fasta, &dir.join("index"), 8).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
