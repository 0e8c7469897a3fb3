// Process-wide index cache
//
// Long-running sessions issue several alignment runs against the same
// reference. Reloading a multi-gigabyte index per run would dominate wall
// clock, so the last-loaded index is kept in a single-slot cache keyed by
// its directory path. The special path "-" means "no alignment, I/O
// pass-through only" and yields no index at all.

use super::{GenomeIndex, IndexError, SharedIndex};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

struct CacheSlot {
    dir: PathBuf,
    index: SharedIndex,
}

static CACHE: Mutex<Option<CacheSlot>> = Mutex::new(None);

/// Return the cached index for `dir` without touching the disk, or evict
/// the previous entry and load anew. `Ok(None)` is the "-" sentinel: run
/// without an index.
///
/// On load failure the cache is left empty (the old entry was already
/// evicted; keeping a handle for a different directory would be worse than
/// keeping none).
pub fn load_or_reuse(dir: &Path, map: bool, prefetch: bool) -> Result<Option<SharedIndex>, IndexError> {
    if dir.as_os_str() == "-" {
        log::info!("no alignment, input/output only");
        return Ok(None);
    }

    let mut slot = CACHE.lock().unwrap();
    if let Some(cached) = slot.as_ref() {
        if cached.dir == dir {
            log::debug!("reusing cached index for {}", dir.display());
            return Ok(Some(cached.index.clone()));
        }
        // Different directory: release the old mapping before loading the
        // new one so peak memory stays at one index.
        *slot = None;
    }

    let index = SharedIndex::new(GenomeIndex::load_from_directory(dir, map, prefetch)?);
    *slot = Some(CacheSlot {
        dir: dir.to_path_buf(),
        index: index.clone(),
    });
    Ok(Some(index))
}

/// Drop whatever is cached, releasing the mapped memory.
pub fn shutdown() {
    *CACHE.lock().unwrap() = None;
}
