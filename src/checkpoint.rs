//! Checkpoint / Resume (§4.8): a self-describing binary checkpoint file
//! (JSON header + bincode payload, content-hashed) and the three resume
//! operations that let a run be extended to deeper geographic levels
//! without redoing upper-level work.
//!
//! The header/digest layout mirrors `Manifest { files: BTreeMap<String,
//! FileHash> }` elsewhere in this codebase, collapsed to a single file
//! since a TopDown checkpoint's state is one object graph rather than a
//! directory of typed sidecars.

use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::basis::PermutationBasis;
use crate::cancel::CancellationFlag;
use crate::config::Config;
use crate::error::EngineError;
use crate::measurement;
use crate::estimation::Estimator;
use crate::optimization::{IntegerRounder, RealProjector};
use crate::tree::{GeographicTree, NodeId, RawRecord};

pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct CheckpointHeader {
    version: u32,
    sha256: String,
}

#[derive(Serialize, Deserialize)]
struct CheckpointPayload {
    tree: GeographicTree,
    basis: PermutationBasis,
    config: Config,
    seed: [u8; 32],
}

/// Rehydrated checkpoint state, returned by `load_state`.
pub struct LoadedCheckpoint {
    pub tree: GeographicTree,
    pub basis: PermutationBasis,
    pub config: Config,
    pub seed: [u8; 32],
}

/// Writes `tree`/`basis`/`config`/`seed` to `path` as one self-describing
/// file: a little-endian header length, a JSON header (format version and
/// a sha256 digest of the payload), then the bincode-encoded payload.
/// Written via a temp file + atomic rename so a crash mid-write never
/// corrupts an existing checkpoint.
pub fn save(path: &Path, tree: &GeographicTree, basis: &PermutationBasis, config: &Config, seed: &[u8; 32]) -> Result<(), EngineError> {
    let payload = CheckpointPayload { tree: tree.clone(), basis: basis.clone(), config: config.clone(), seed: *seed };
    let encoded = bincode::serialize(&payload)
        .map_err(|e| EngineError::state("checkpoint.save", format!("failed to encode checkpoint: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    let header =
        CheckpointHeader { version: CHECKPOINT_FORMAT_VERSION, sha256: hex::encode(hasher.finalize()) };
    let header_bytes = serde_json::to_vec(&header)
        .map_err(|e| EngineError::state("checkpoint.save", format!("failed to encode checkpoint header: {e}")))?;

    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| EngineError::state("checkpoint.save", format!("failed to create temp file: {e}")))?;
    file.write_all(&(header_bytes.len() as u32).to_le_bytes())
        .and_then(|_| file.write_all(&header_bytes))
        .and_then(|_| file.write_all(&encoded))
        .map_err(|e| EngineError::state("checkpoint.save", format!("failed to write checkpoint: {e}")))?;
    file.persist(path).map_err(|e| EngineError::state("checkpoint.save", format!("failed to finalize checkpoint: {e}")))?;
    Ok(())
}

/// `load_state(path)`: rehydrates the tree, basis, configuration and RNG
/// seed. Rejects unknown format versions and digest mismatches with
/// `StateError` rather than attempting a best-effort partial read.
pub fn load_state(path: &Path) -> Result<LoadedCheckpoint, EngineError> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| EngineError::state("checkpoint.load", format!("failed to open {}: {e}", path.display())))?;

    let mut len_bytes = [0u8; 4];
    file.read_exact(&mut len_bytes)
        .map_err(|e| EngineError::state("checkpoint.load", format!("truncated checkpoint header length: {e}")))?;
    let header_len = u32::from_le_bytes(len_bytes) as usize;

    let mut header_bytes = vec![0u8; header_len];
    file.read_exact(&mut header_bytes)
        .map_err(|e| EngineError::state("checkpoint.load", format!("truncated checkpoint header: {e}")))?;
    let header: CheckpointHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| EngineError::state("checkpoint.load", format!("malformed checkpoint header: {e}")))?;

    if header.version != CHECKPOINT_FORMAT_VERSION {
        return Err(EngineError::state(
            "checkpoint.load",
            format!(
                "checkpoint format version {} is not supported (expected {})",
                header.version, CHECKPOINT_FORMAT_VERSION
            ),
        ));
    }

    let mut encoded = Vec::new();
    file.read_to_end(&mut encoded)
        .map_err(|e| EngineError::state("checkpoint.load", format!("failed to read checkpoint payload: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    if hex::encode(hasher.finalize()) != header.sha256 {
        return Err(EngineError::state("checkpoint.load", "checkpoint payload digest does not match its header"));
    }

    let payload: CheckpointPayload = bincode::deserialize(&encoded)
        .map_err(|e| EngineError::state("checkpoint.load", format!("failed to decode checkpoint payload: {e}")))?;

    Ok(LoadedCheckpoint { tree: payload.tree, basis: payload.basis, config: payload.config, seed: payload.seed })
}

/// `extend_tree(L')` (§4.8 step 2): grows the loaded tree's existing
/// leaves down to `new_depth` using the original raw records, leaving
/// every node at or above the old depth untouched.
pub fn extend_tree(
    tree: &mut GeographicTree,
    records: &[RawRecord],
    query_attrs: &[String],
    basis: &PermutationBasis,
    new_depth: usize,
) -> Result<(), EngineError> {
    tree.extend(records, query_attrs, basis, new_depth)
}

/// `resume_measurement_phase()` (§4.8 step 3): applies noise only to the
/// nodes at levels strictly deeper than `old_depth`.
pub fn resume_measurement_phase(
    tree: &mut GeographicTree,
    config: &Config,
    seed: &[u8; 32],
    old_depth: usize,
    cancel: &CancellationFlag,
) -> Result<(), EngineError> {
    measurement::measure_levels(tree, config, seed, (old_depth + 1)..=tree.depth(), cancel)
}

/// `resume_estimation_phase()` (§4.8 step 4): runs Estimation only for the
/// newly added levels, using each existing leaf's (now-internal) `v_est`
/// as the fixed right-hand side for its children's joint problem.
pub fn resume_estimation_phase<'a>(
    tree: &mut GeographicTree,
    old_depth: usize,
    projector: &'a dyn RealProjector,
    rounder: &'a dyn IntegerRounder,
    config: &'a Config,
    basis: &'a PermutationBasis,
    cancel: &CancellationFlag,
) -> Result<(), EngineError> {
    let seed_parents: Vec<NodeId> = tree
        .nodes_by_level()
        .get(&old_depth)
        .cloned()
        .unwrap_or_default();
    Estimator::new(projector, rounder, config, basis).run_from(tree, &seed_parents, cancel)
}
