use std::io::{Read, Write};

use log::{debug, info, warn};
use rand::{SeedableRng, rngs::StdRng};
use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};

use super::{ObjConfig, ObjFunction};
use crate::{
    FmErr, Result,
    collective::Collective,
    data::{RowBlockIter, scan_shard, shard_range},
    initialization::{ParamGen, RandParamGen},
    loss::LossFn,
    model::{
        FmModel, ModelParam, accumulate_grad, predict_margin, read_param, save_model, write_param,
    },
    storage::GradArena,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Unconfigured,
    DimensionsNegotiated,
    Initialized,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Stage::Unconfigured => "unconfigured",
            Stage::DimensionsNegotiated => "waiting for init_model",
            Stage::Initialized => "initialized",
        }
    }
}

/// The factorization machine objective over one worker's shard.
///
/// Rows of each batch are split in contiguous ranges among the threads of a private pool.
/// Threads only read the weights and write their own lane of a `GradArena`, lanes get merged
/// single-threaded at every batch boundary. The L2 penalty is only added by the lead worker,
/// since the optimizer sums what every worker returns.
pub struct FmObjective<I, C>
where
    I: RowBlockIter,
    C: Collective,
{
    param: ModelParam,
    config: ObjConfig,
    dtrain: I,
    dval: Option<I>,
    pretrained: Option<FmModel>,
    collective: C,
    pool: ThreadPool,
    arena: GradArena,
    stage: Stage,
}

impl<I, C> FmObjective<I, C>
where
    I: RowBlockIter,
    C: Collective,
{
    /// Creates a new `FmObjective`.
    ///
    /// # Arguments
    /// * `param` - The configured model hyperparameters, sizes get filled in by `init_num_dim`.
    /// * `config` - Threading and initialization settings.
    /// * `dtrain` - This worker's training shard.
    /// * `collective` - The group this worker belongs to.
    ///
    /// # Returns
    /// An error if the loss type is unknown or the thread pool can't be built.
    pub fn new(param: ModelParam, config: ObjConfig, dtrain: I, collective: C) -> Result<Self> {
        param.loss()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.nthread)
            .build()?;

        Ok(Self {
            param,
            config,
            dtrain,
            dval: None,
            pretrained: None,
            collective,
            pool,
            arena: GradArena::new(0, 0),
            stage: Stage::Unconfigured,
        })
    }

    /// Adds a validation shard, its loss gets normalized by the global validation row count.
    pub fn with_validation(mut self, dval: I) -> Self {
        self.dval = Some(dval);
        self
    }

    /// Starts from a pretrained model instead of scanning the shard and drawing random weights.
    ///
    /// The model's parameters replace the configured ones, except for `reg_l2_v`.
    pub fn with_pretrained(mut self, model: FmModel) -> Self {
        let reg_l2_v = self.param.reg_l2_v;
        self.param = *model.param();
        self.param.reg_l2_v = reg_l2_v;
        self.pretrained = Some(model);
        self
    }

    pub fn param(&self) -> &ModelParam {
        &self.param
    }

    /// Packs `weight` with the negotiated parameters into a standalone model.
    pub fn to_model(&self, weight: &[f32]) -> Result<FmModel> {
        FmModel::new(self.param, weight.to_vec())
    }

    fn require_stage(&self, stage: Stage, op: &'static str) -> Result<()> {
        if self.stage != stage {
            return Err(FmErr::InvalidState {
                op,
                stage: self.stage.name(),
            });
        }
        Ok(())
    }

    fn check_size(&self, what: &'static str, got: usize) -> Result<()> {
        if got != self.param.num_weight() {
            return Err(FmErr::SizeMismatch {
                what,
                got,
                expected: self.param.num_weight(),
            });
        }
        Ok(())
    }

    fn reset_arena(&mut self) {
        self.arena = GradArena::new(self.pool.current_num_threads(), self.param.num_weight());
    }
}

/// `0.5 * reg * sum(w^2)` over the whole weight vector, which only holds factor weights.
fn l2_penalty(reg: f32, weight: &[f32]) -> f64 {
    let sum_sqr: f64 = weight.iter().map(|&w| w as f64 * w as f64).sum();
    0.5 * reg as f64 * sum_sqr
}

impl<I, C> ObjFunction for FmObjective<I, C>
where
    I: RowBlockIter,
    C: Collective,
{
    fn init_num_dim(&mut self) -> Result<(usize, usize)> {
        self.require_stage(Stage::Unconfigured, "init_num_dim")?;
        let rank = self.collective.context().rank;

        if self.pretrained.is_none() {
            let (ncol, nrow) = scan_shard(&mut self.dtrain)?;
            info!("train shard: rank={rank} rows={nrow} max_columns={ncol}");

            let ncol = self.collective.reduce_max_u64(ncol as u64)?;
            let nrow = self.collective.reduce_sum_u64(nrow as u64)?;
            self.param.num_feature = self.param.num_feature.max(ncol);
            self.param.num_size = nrow;
            self.param.update_num_weight();
        }

        // Scanned even when warm starting, a stored count belongs to whatever set the model
        // was validated on back then.
        if let Some(dval) = self.dval.as_mut() {
            let (_, nrow) = scan_shard(dval)?;
            self.param.num_size_val = self.collective.reduce_sum_u64(nrow as u64)?;
        }

        info!(
            rank = rank,
            num_feature = self.param.num_feature,
            num_size = self.param.num_size,
            num_size_val = self.param.num_size_val;
            "negotiated dimensions"
        );

        self.reset_arena();
        self.stage = Stage::DimensionsNegotiated;
        Ok((self.param.num_weight(), self.param.num_size as usize))
    }

    fn init_model(&mut self, weight: &mut [f32]) -> Result<()> {
        self.require_stage(Stage::DimensionsNegotiated, "init_model")?;
        self.check_size("initial weights", weight.len())?;
        let ctx = self.collective.context();

        match self.pretrained.take() {
            None => {
                self.param.init_base_score()?;

                let rng = StdRng::seed_from_u64(self.config.seed);
                let mut param_gen =
                    RandParamGen::normal(rng, weight.len(), 0.0, self.config.fm_random)?;

                if ctx.is_lead() {
                    param_gen.fill(weight);
                }
            }
            Some(model) => {
                if model.weight().len() != weight.len() {
                    return Err(FmErr::SizeMismatch {
                        what: "pretrained weights",
                        got: model.weight().len(),
                        expected: weight.len(),
                    });
                }
                weight.copy_from_slice(model.weight());
            }
        }

        self.collective.broadcast_f32(weight, 0)?;
        info!("rank {}: initialized {} weights", ctx.rank, weight.len());

        self.stage = Stage::Initialized;
        Ok(())
    }

    fn eval(&mut self, weight: &[f32], validation: bool) -> Result<f64> {
        self.require_stage(Stage::Initialized, "eval")?;
        self.check_size("weights", weight.len())?;
        let is_lead = self.collective.context().is_lead();

        let Self {
            param,
            dtrain,
            dval,
            pool,
            ..
        } = self;
        let param: &ModelParam = param;
        let loss = param.loss()?;

        let iter = match validation {
            true => dval.as_mut().ok_or(FmErr::InvalidState {
                op: "eval(validation)",
                stage: "without a validation shard",
            })?,
            false => dtrain,
        };

        let nthread = pool.current_num_threads();
        let mut sum_val = 0.0;

        iter.reset()?;
        while iter.advance()? {
            let batch = iter.current_batch();

            let partials: Vec<f64> = pool.install(|| {
                (0..nthread)
                    .into_par_iter()
                    .map(|t| {
                        shard_range(batch.len(), t, nthread)
                            .map(|i| {
                                let row = batch.row(i);
                                let margin = predict_margin(param, weight, &row);
                                loss.loss(row.label, margin) as f64 * row.weight as f64
                            })
                            .sum::<f64>()
                    })
                    .collect()
            });

            sum_val += partials.iter().sum::<f64>();
        }

        if validation {
            if param.num_size_val == 0 {
                return Err(FmErr::EmptyShard { what: "validation" });
            }
            sum_val /= param.num_size_val as f64;
        } else if is_lead && param.reg_l2_v != 0.0 {
            sum_val += l2_penalty(param.reg_l2_v, weight);
        }

        if !sum_val.is_finite() {
            return Err(FmErr::NonFinite {
                what: "objective",
                value: sum_val,
            });
        }

        debug!("eval: validation={validation} value={sum_val}");
        Ok(sum_val)
    }

    fn calc_grad(&mut self, out_grad: &mut [f32], weight: &[f32]) -> Result<()> {
        self.require_stage(Stage::Initialized, "calc_grad")?;
        self.check_size("weights", weight.len())?;
        self.check_size("gradient", out_grad.len())?;
        let is_lead = self.collective.context().is_lead();

        let Self {
            param,
            dtrain,
            pool,
            arena,
            ..
        } = self;
        let param: &ModelParam = param;
        let loss = param.loss()?;

        out_grad.fill(0.0);
        arena.clear();
        let nlanes = arena.nlanes();

        dtrain.reset()?;
        while dtrain.advance()? {
            let batch = dtrain.current_batch();

            pool.install(|| {
                arena
                    .lanes_mut()
                    .par_iter_mut()
                    .enumerate()
                    .for_each(|(t, lane)| {
                        for i in shard_range(batch.len(), t, nlanes) {
                            let row = batch.row(i);
                            let margin = predict_margin(param, weight, &row);
                            let grad = loss.gradient(row.label, margin) * row.weight;
                            accumulate_grad(param, weight, &row, grad, lane);
                        }
                    });
            });

            arena.merge_into(out_grad)?;
        }

        if is_lead && param.reg_l2_v != 0.0 {
            let reg = param.reg_l2_v;
            out_grad
                .iter_mut()
                .zip(weight)
                .for_each(|(g, &w)| *g += reg * w);
        }

        debug!("calc_grad: {} weights", out_grad.len());
        Ok(())
    }

    fn has_validation(&self) -> bool {
        self.dval.is_some()
    }

    fn save(&self, writer: &mut dyn Write) -> Result<()> {
        write_param(writer, &self.param)
    }

    fn load(&mut self, reader: &mut dyn Read) -> Result<(usize, usize)> {
        self.param = read_param(reader)?;

        let stale = self
            .pretrained
            .as_ref()
            .is_some_and(|model| model.param().num_weight != self.param.num_weight);
        if stale {
            warn!("checkpoint dimensions differ from the pretrained model, dropping it");
            self.pretrained = None;
        }

        self.reset_arena();
        self.stage = Stage::DimensionsNegotiated;
        Ok((self.param.num_weight(), self.param.num_size as usize))
    }

    fn save_model(&self, writer: &mut dyn Write, weight: &[f32]) -> Result<()> {
        save_model(writer, &self.param, weight)
    }
}
