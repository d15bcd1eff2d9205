#![doc = "A differentially private TopDown engine: turns raw census-style\nmicrodata into a synthetic microdata file whose geographic aggregates\nsatisfy differential privacy, by measuring noisy contingency vectors over\na geographic tree and then re-estimating them top-down under the\ndeclared constraints."]

mod basis;
mod cancel;
mod checkpoint;
mod config;
mod error;
mod estimation;
mod io;
mod measurement;
mod microdata;
mod optimization;
mod tree;

#[doc(inline)]
pub use basis::PermutationBasis;
#[doc(inline)]
pub use cancel::CancellationFlag;
#[doc(inline)]
pub use checkpoint::{
    extend_tree, load_state, resume_estimation_phase, resume_measurement_phase, save as save_checkpoint,
    LoadedCheckpoint, CHECKPOINT_FORMAT_VERSION,
};
#[doc(inline)]
pub use config::{Config, ConstraintRow, DistanceMetric, Mechanism, Sense};
#[doc(inline)]
pub use error::EngineError;
#[doc(inline)]
pub use estimation::{Estimator, DEFAULT_MAX_SOLVER_ATTEMPTS};
#[doc(inline)]
pub use microdata::SyntheticRecord;
#[doc(inline)]
pub use optimization::{
    ActiveSetProjector, ChildProblem, GoodLpRounder, IntegerRounder, JointProblem, RealProjector,
};
#[doc(inline)]
pub use tree::{GeoNode, GeographicTree, NodeId, RawRecord};

/// Runs a fresh end-to-end pass: read the input table, build the
/// geographic tree, measure, estimate, and write the synthetic microdata
/// file. Callers that need progress output should prefer driving the
/// individual phases (`io`, `measurement`, `estimation::Estimator`,
/// `microdata::build`) directly; this is the one-shot convenience used by
/// the `run` subcommand.
///
/// Never cancellable from within; equivalent to `run_cancellable` with a
/// flag that's never set.
pub fn run(config: &Config, seed: &[u8; 32]) -> Result<(), EngineError> {
    run_cancellable(config, seed, &CancellationFlag::new())
}

/// Same as `run`, but checks `cancel` between nodes during Measurement and
/// Estimation. On interruption, flushes the checkpoint built from whatever
/// the tree holds at that point before returning `EngineError::Interrupted`
/// (exit code 5), so a later `resume` can pick up where the cancelled run
/// left off.
pub fn run_cancellable(config: &Config, seed: &[u8; 32], cancel: &CancellationFlag) -> Result<(), EngineError> {
    config.validate()?;

    let records = io::read_records(&config.data_path, &config.geo_columns, &config.queries)?;
    let basis = PermutationBasis::from_records(&records, &config.queries)?;
    let mut tree =
        GeographicTree::build(&records, &config.geo_columns, &config.queries, &basis, config.process_until)?;

    if let Err(err) = measurement::run(&mut tree, config, seed, cancel) {
        return flush_on_interruption(err, &tree, &basis, config, seed);
    }

    let projector = ActiveSetProjector;
    let rounder = GoodLpRounder;
    if let Err(err) = Estimator::new(&projector, &rounder, config, &basis).run(&mut tree, cancel) {
        return flush_on_interruption(err, &tree, &basis, config, seed);
    }

    let synthetic = microdata::build(&tree, &basis)?;
    let output_path = config.output_path.join(&config.output_file);
    io::write_microdata(&output_path, &config.geo_columns, &config.queries, &synthetic)?;

    save_checkpoint(&checkpoint_path(config), &tree, &basis, config, seed)?;
    Ok(())
}

/// Resumes a prior run from its checkpoint, extends the tree to
/// `config.process_until`, measures and estimates only the newly added
/// levels, then rewrites the synthetic microdata file from the full tree.
///
/// Never cancellable from within; equivalent to `resume_cancellable` with a
/// flag that's never set.
pub fn resume(config: &Config, checkpoint_path: &std::path::Path) -> Result<(), EngineError> {
    resume_cancellable(config, checkpoint_path, &CancellationFlag::new())
}

/// Same as `resume`, but checks `cancel` between nodes and flushes the
/// checkpoint on interruption, same as `run_cancellable`.
pub fn resume_cancellable(
    config: &Config,
    checkpoint_path: &std::path::Path,
    cancel: &CancellationFlag,
) -> Result<(), EngineError> {
    config.validate()?;
    let loaded = load_state(checkpoint_path)?;
    let old_depth = loaded.tree.depth();
    if config.process_until <= old_depth {
        return Err(EngineError::config(
            "resume",
            "/",
            format!("process_until ({}) must exceed the checkpoint's depth ({old_depth})", config.process_until),
        ));
    }

    let records = io::read_records(&config.data_path, &config.geo_columns, &config.queries)?;
    let mut tree = loaded.tree;
    extend_tree(&mut tree, &records, &config.queries, &loaded.basis, config.process_until)?;
    if let Err(err) = resume_measurement_phase(&mut tree, config, &loaded.seed, old_depth, cancel) {
        return flush_on_interruption(err, &tree, &loaded.basis, config, &loaded.seed);
    }

    let projector = ActiveSetProjector;
    let rounder = GoodLpRounder;
    if let Err(err) = resume_estimation_phase(&mut tree, old_depth, &projector, &rounder, config, &loaded.basis, cancel) {
        return flush_on_interruption(err, &tree, &loaded.basis, config, &loaded.seed);
    }

    let synthetic = microdata::build(&tree, &loaded.basis)?;
    let output_path = config.output_path.join(&config.output_file);
    io::write_microdata(&output_path, &config.geo_columns, &config.queries, &synthetic)?;

    save_checkpoint(checkpoint_path, &tree, &loaded.basis, config, &loaded.seed)?;
    Ok(())
}

/// On `EngineError::Interrupted`, writes out whatever the tree holds right
/// now so a future `resume` has something to continue from, then
/// propagates the original error. Any other error passes straight through
/// without touching the checkpoint file.
fn flush_on_interruption(
    err: EngineError,
    tree: &GeographicTree,
    basis: &PermutationBasis,
    config: &Config,
    seed: &[u8; 32],
) -> Result<(), EngineError> {
    if matches!(err, EngineError::Interrupted { .. }) {
        save_checkpoint(&checkpoint_path(config), tree, basis, config, seed)?;
    }
    Err(err)
}

fn checkpoint_path(config: &Config) -> std::path::PathBuf {
    config.output_path.join(format!("{}.ckpt", config.output_file))
}
