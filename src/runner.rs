use std::{
    fs::File,
    io::{BufWriter, Write},
    num::NonZeroUsize,
    path::PathBuf,
    thread,
};

use log::{error, info};

use crate::{
    FmErr, Result,
    collective::{Collective, LocalCollective, Solo, local_group},
    config::{RunConfig, Task},
    data::{LibSvmIter, RowBlockIter, ShardSpec},
    model::FmModel,
    objective::FmObjective,
    optimization::Lbfgs,
};

/// Runs the configured task to completion.
///
/// Training with `nworker > 1` spawns one thread per worker over an in-process collective
/// group. Prediction and dumping run on the calling thread.
pub fn launch(config: &RunConfig) -> Result<()> {
    info!("task={} nworker={}", config.task, config.nworker);

    match config.task {
        Task::Train => train_group(config).map(|_| ()),
        Task::Pred => predict(config).map(|_| ()),
        Task::Dump => dump(config),
    }
}

fn train_group(config: &RunConfig) -> Result<FmModel> {
    if config.nworker.get() == 1 {
        return train(config, Solo);
    }

    run_local_group(config.nworker, |member| train(config, member))
}

/// Aborts the group of `member` when dropped armed, on error returns and panics alike.
struct AbortGuard {
    member: LocalCollective,
    armed: bool,
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if self.armed {
            self.member.abort();
        }
    }
}

/// Runs `f` on every member of an in-process group, one scoped thread each.
///
/// # Returns
/// The lead's result, or the first error that isn't a consequence of another member failing.
fn run_local_group<T, F>(nworker: NonZeroUsize, f: F) -> Result<T>
where
    T: Send,
    F: Fn(LocalCollective) -> Result<T> + Sync,
{
    let f = &f;
    let results: Vec<Result<T>> = thread::scope(|s| {
        let handles: Vec<_> = local_group(nworker)
            .into_iter()
            .map(|member| s.spawn(move || run_member(member, f)))
            .collect();

        handles
            .into_iter()
            .enumerate()
            .map(|(rank, h)| h.join().unwrap_or(Err(FmErr::WorkerPanicked { rank })))
            .collect()
    });

    let mut first_err = None;
    let mut lead = None;
    for ret in results {
        match ret {
            Ok(value) => {
                lead.get_or_insert(value);
            }
            Err(FmErr::Aborted) => {
                first_err.get_or_insert(FmErr::Aborted);
            }
            Err(e) => {
                if matches!(first_err, None | Some(FmErr::Aborted)) {
                    first_err = Some(e);
                }
            }
        }
    }

    match (first_err, lead) {
        (Some(e), _) => Err(e),
        (None, Some(value)) => Ok(value),
        (None, None) => Err(FmErr::Aborted),
    }
}

fn run_member<T, F>(member: LocalCollective, f: &F) -> Result<T>
where
    F: Fn(LocalCollective) -> Result<T>,
{
    let rank = member.context().rank;
    let mut guard = AbortGuard {
        member: member.clone(),
        armed: true,
    };

    let ret = f(member);
    match &ret {
        Ok(_) => guard.armed = false,
        Err(e) => error!("rank {rank}: training failed: {e}"),
    }
    ret
}

fn require_data(config: &RunConfig) -> Result<&PathBuf> {
    config.data.as_ref().ok_or_else(|| FmErr::InvalidParam {
        name: "data".to_string(),
        value: "NULL".to_string(),
    })
}

/// Trains a model as one worker of `collective`.
///
/// Every worker reads its own line shard of `data` (and `val_data`). Only the lead writes
/// `model_out`, every worker returns the same model.
pub fn train<C>(config: &RunConfig, collective: C) -> Result<FmModel>
where
    C: Collective + Clone,
{
    let ctx = collective.context();
    let spec = ShardSpec::from_context(ctx);

    let dtrain = LibSvmIter::open(require_data(config)?, spec, config.batch_size)?;
    let mut obj = FmObjective::new(
        config.model,
        config.objective.clone(),
        dtrain,
        collective.clone(),
    )?;

    if let Some(path) = &config.val_data {
        obj = obj.with_validation(LibSvmIter::open(path, spec, config.batch_size)?);
    }
    if let Some(path) = &config.model_in {
        info!("rank {}: warm starting from {}", ctx.rank, path.display());
        obj = obj.with_pretrained(FmModel::load_file(path)?);
    }

    let weight = Lbfgs::new(config.lbfgs.clone())
        .with_checkpoints(&config.model_out)
        .run(&mut obj, &collective)?;
    let model = obj.to_model(&weight)?;

    if ctx.is_lead() {
        model.save_file(&config.model_out)?;
        info!("saved model to {}", config.model_out.display());
    }

    Ok(model)
}

/// Writes the margin of every row of `data` to `name_pred`, one per line.
///
/// # Returns
/// The amount of rows predicted.
pub fn predict(config: &RunConfig) -> Result<usize> {
    let model_in = config
        .model_in
        .as_ref()
        .ok_or(FmErr::MissingModel { task: "pred" })?;

    let model = FmModel::load_file(model_in)?;
    let mut data = LibSvmIter::open(require_data(config)?, ShardSpec::whole(), config.batch_size)?;
    let mut writer = BufWriter::new(File::create(&config.name_pred)?);
    let mut nrow = 0;

    data.reset()?;
    while data.advance()? {
        for row in data.current_batch().rows() {
            writeln!(writer, "{}", model.predict(&row))?;
            nrow += 1;
        }
    }

    writer.flush()?;
    info!("wrote {nrow} predictions to {}", config.name_pred.display());
    Ok(nrow)
}

/// Writes the text dump of `model_in` to `name_dump`.
pub fn dump(config: &RunConfig) -> Result<()> {
    let model_in = config
        .model_in
        .as_ref()
        .ok_or(FmErr::MissingModel { task: "dump" })?;

    let model = FmModel::load_file(model_in)?;
    let mut writer = BufWriter::new(File::create(&config.name_dump)?);
    model.dump(&mut writer)?;
    writer.flush()?;

    info!(
        "dumped {} features to {}",
        model.param().num_feature,
        config.name_dump.display()
    );
    Ok(())
}
