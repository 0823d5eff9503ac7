use std::{
    collections::VecDeque,
    ffi::OsString,
    fs::{self, File},
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use log::{debug, info, warn};

use super::LbfgsParam;
use crate::{
    FmErr, Result, collective::Collective, model::read_weights, objective::ObjFunction,
};

/// A correction pair: the step taken and the change in gradient it caused.
struct Correction {
    s: Vec<f64>,
    y: Vec<f64>,
    rho: f64,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// A limited-memory BFGS minimizer driving an `ObjFunction` across a collective group.
///
/// Every worker runs the same driver on its own objective. Objective values and gradients are
/// summed across the group before any decision is taken, so every worker walks through the
/// exact same iterates.
pub struct Lbfgs {
    param: LbfgsParam,
    history: VecDeque<Correction>,
    model_out: Option<PathBuf>,
}

impl Lbfgs {
    pub fn new(param: LbfgsParam) -> Self {
        Self {
            history: VecDeque::with_capacity(param.lbfgs_memory.get()),
            param,
            model_out: None,
        }
    }

    /// Checkpoints the run next to `model_out` every `save_period` iterations.
    ///
    /// The lead keeps the state to resume from in `checkpoint_path(model_out)` and writes a model
    /// snapshot to `snapshot_path(model_out, iter)`. A run that finds a checkpoint resumes from
    /// it, and removes it once it completes. Every worker reads the checkpoint, so the group
    /// must share the file system.
    pub fn with_checkpoints(mut self, model_out: impl Into<PathBuf>) -> Self {
        self.model_out = Some(model_out.into());
        self
    }

    fn checkpoint_file(&self) -> Option<PathBuf> {
        match (&self.model_out, self.param.save_period) {
            (Some(model_out), 1..) => Some(checkpoint_path(model_out)),
            _ => None,
        }
    }

    /// Whether the group resumes, decided by the lead alone.
    fn pending_checkpoint<C>(&self, collective: &C) -> Result<Option<PathBuf>>
    where
        C: Collective + ?Sized,
    {
        let Some(path) = self.checkpoint_file() else {
            return Ok(None);
        };

        let found = collective.context().is_lead() && path.is_file();
        let found = collective.reduce_max_u64(u64::from(found))? == 1;
        Ok(found.then_some(path))
    }

    /// Minimizes `obj` starting from the weights it initializes.
    ///
    /// # Arguments
    /// * `obj` - This worker's share of the objective.
    /// * `collective` - The group the objective's shards are spread over.
    ///
    /// # Returns
    /// The final weights, or the first error any step of the objective or the group raised.
    pub fn run<O, C>(&mut self, obj: &mut O, collective: &C) -> Result<Vec<f32>>
    where
        O: ObjFunction + ?Sized,
        C: Collective + ?Sized,
    {
        let ctx = collective.context();
        let rank = ctx.rank;
        self.history.clear();

        let (mut weight, start) = match self.pending_checkpoint(collective)? {
            Some(path) => {
                info!("rank {rank}: resuming from {}", path.display());
                resume(obj, &path)?
            }
            None => {
                let (dim, _) = obj.init_num_dim()?;
                let mut weight = vec![0.0; dim];
                obj.init_model(&mut weight)?;
                (weight, 0)
            }
        };

        let dim = weight.len();
        info!("rank {rank}: starting L-BFGS over {dim} weights at iteration {start}");

        let mut fx = global_eval(obj, collective, &weight, false)?;
        let mut grad = vec![0.0; dim];
        global_grad(obj, collective, &weight, &mut grad)?;

        let mut new_weight = vec![0.0; dim];
        let mut new_grad = vec![0.0; dim];

        for iter in start..self.param.max_lbfgs_iter {
            let g: Vec<f64> = grad.iter().map(|&x| x as f64).collect();
            let gnorm = dot(&g, &g).sqrt();
            if gnorm == 0.0 {
                info!("rank {rank}: gradient vanished at iteration {iter}");
                break;
            }

            let mut dir = self.direction(&g);
            let mut slope = dot(&dir, &g);
            if !(slope < 0.0) {
                debug!("rank {rank}: not a descent direction, resetting memory");
                self.history.clear();
                dir = g.iter().map(|x| -x).collect();
                slope = -gnorm * gnorm;
            }

            let mut step = match self.history.is_empty() {
                true => 1.0 / gnorm,
                false => 1.0,
            };

            let mut accepted = None;
            for _ in 0..self.param.max_linesearch_iter {
                new_weight
                    .iter_mut()
                    .zip(&weight)
                    .zip(&dir)
                    .for_each(|((nw, &w), &d)| *nw = (w as f64 + step * d) as f32);

                let fnew = global_eval(obj, collective, &new_weight, false)?;
                if fnew <= fx + self.param.linesearch_c1 * step * slope {
                    accepted = Some(fnew);
                    break;
                }

                step *= self.param.linesearch_backoff;
            }

            let Some(fnew) = accepted else {
                warn!("rank {rank}: line search failed at iteration {iter}, stopping");
                break;
            };

            global_grad(obj, collective, &new_weight, &mut new_grad)?;
            self.remember(&weight, &new_weight, &grad, &new_grad);

            let decrease = (fx - fnew) / fx.abs().max(f64::MIN_POSITIVE);
            info!(
                rank = rank,
                iter = iter,
                objective = fnew,
                step = step;
                "L-BFGS iteration"
            );

            if obj.has_validation() {
                let val = global_eval(obj, collective, &new_weight, true)?;
                info!("rank {rank}: iteration {iter} validation loss {val}");
            }

            std::mem::swap(&mut weight, &mut new_weight);
            std::mem::swap(&mut grad, &mut new_grad);
            fx = fnew;

            let done = iter + 1;
            if ctx.is_lead() && self.param.save_period > 0 && done % self.param.save_period == 0 {
                if let Some(model_out) = &self.model_out {
                    save_checkpoint(obj, model_out, done, &weight)?;
                }
            }

            if done >= self.param.min_lbfgs_iter && decrease < self.param.lbfgs_stop_tol {
                info!("rank {rank}: converged at iteration {iter}");
                break;
            }
        }

        if let Some(path) = self.checkpoint_file().filter(|_| ctx.is_lead()) {
            match fs::remove_file(&path) {
                Ok(()) => debug!("removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(weight)
    }

    /// Two-loop recursion, returns `-H * g` for the current inverse Hessian estimate.
    fn direction(&self, g: &[f64]) -> Vec<f64> {
        let mut q = g.to_vec();
        let mut alpha = Vec::with_capacity(self.history.len());

        for c in self.history.iter().rev() {
            let a = c.rho * dot(&c.s, &q);
            q.iter_mut().zip(&c.y).for_each(|(q, y)| *q -= a * y);
            alpha.push(a);
        }

        if let Some(last) = self.history.back() {
            let gamma = dot(&last.s, &last.y) / dot(&last.y, &last.y);
            q.iter_mut().for_each(|q| *q *= gamma);
        }

        for (c, a) in self.history.iter().zip(alpha.iter().rev()) {
            let b = c.rho * dot(&c.y, &q);
            q.iter_mut().zip(&c.s).for_each(|(q, s)| *q += (a - b) * s);
        }

        q.iter_mut().for_each(|q| *q = -*q);
        q
    }

    fn remember(&mut self, weight: &[f32], new_weight: &[f32], grad: &[f32], new_grad: &[f32]) {
        let s: Vec<f64> = new_weight
            .iter()
            .zip(weight)
            .map(|(&a, &b)| a as f64 - b as f64)
            .collect();
        let y: Vec<f64> = new_grad
            .iter()
            .zip(grad)
            .map(|(&a, &b)| a as f64 - b as f64)
            .collect();

        // Only pairs with positive curvature keep the estimate positive definite.
        let sy = dot(&s, &y);
        if !(sy > 0.0) {
            return;
        }

        if self.history.len() == self.param.lbfgs_memory.get() {
            self.history.pop_front();
        }
        self.history.push_back(Correction { s, y, rho: 1.0 / sy });
    }
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// The file a run writing `model_out` resumes from.
pub fn checkpoint_path(model_out: &Path) -> PathBuf {
    suffixed(model_out, ".checkpoint")
}

/// The model snapshot taken after `iter` iterations of a run writing `model_out`.
pub fn snapshot_path(model_out: &Path, iter: usize) -> PathBuf {
    suffixed(model_out, &format!("_V{iter}"))
}

/// Writes the objective's checkpoint, the iteration count and the raw weights, then a model
/// snapshot. The checkpoint is replaced atomically.
fn save_checkpoint<O>(obj: &O, model_out: &Path, done: usize, weight: &[f32]) -> Result<()>
where
    O: ObjFunction + ?Sized,
{
    let path = checkpoint_path(model_out);
    let tmp = suffixed(&path, ".tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        obj.save(&mut writer)?;
        writer.write_all(&(done as u64).to_le_bytes())?;
        writer.write_all(bytemuck::cast_slice(weight))?;
        writer.flush()?;
    }
    fs::rename(&tmp, &path)?;

    let snapshot = snapshot_path(model_out, done);
    let mut writer = BufWriter::new(File::create(&snapshot)?);
    obj.save_model(&mut writer, weight)?;
    writer.flush()?;

    info!(
        "saved checkpoint at iteration {done} and model snapshot {}",
        snapshot.display()
    );
    Ok(())
}

/// Restores the objective and the weights from a checkpoint written by `save_checkpoint`.
///
/// # Returns
/// The saved weights and the iteration to continue from.
fn resume<O>(obj: &mut O, path: &Path) -> Result<(Vec<f32>, usize)>
where
    O: ObjFunction + ?Sized,
{
    let mut reader = BufReader::new(File::open(path)?);
    let (dim, _) = obj.load(&mut reader)?;

    let mut done = [0u8; 8];
    reader.read_exact(&mut done).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            FmErr::InvalidModelParam("checkpoint ended before the iteration count".to_string())
        }
        _ => FmErr::Io(e),
    })?;
    let weight = read_weights(&mut reader, dim)?;

    // Brings the objective to its initialized stage, the weights it draws are discarded.
    obj.init_model(&mut vec![0.0; dim])?;

    Ok((weight, u64::from_le_bytes(done) as usize))
}

fn global_eval<O, C>(obj: &mut O, collective: &C, weight: &[f32], validation: bool) -> Result<f64>
where
    O: ObjFunction + ?Sized,
    C: Collective + ?Sized,
{
    let local = obj.eval(weight, validation)?;
    collective.reduce_sum_scalar(local)
}

fn global_grad<O, C>(obj: &mut O, collective: &C, weight: &[f32], out: &mut [f32]) -> Result<()>
where
    O: ObjFunction + ?Sized,
    C: Collective + ?Sized,
{
    obj.calc_grad(out, weight)?;
    collective.reduce_sum_f32(out)
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;
    use crate::collective::Solo;

    /// `0.5 * sum(a_i * (w_i - c_i)^2)`
    struct Quadratic {
        a: Vec<f32>,
        c: Vec<f32>,
        start: Vec<f32>,
        evals: usize,
    }

    impl Quadratic {
        fn new(a: Vec<f32>, c: Vec<f32>) -> Self {
            let start = vec![0.0; a.len()];
            Self {
                a,
                c,
                start,
                evals: 0,
            }
        }
    }

    impl ObjFunction for Quadratic {
        fn init_num_dim(&mut self) -> Result<(usize, usize)> {
            Ok((self.a.len(), 1))
        }

        fn init_model(&mut self, weight: &mut [f32]) -> Result<()> {
            weight.copy_from_slice(&self.start);
            Ok(())
        }

        fn eval(&mut self, weight: &[f32], _validation: bool) -> Result<f64> {
            self.evals += 1;
            Ok(weight
                .iter()
                .zip(&self.a)
                .zip(&self.c)
                .map(|((&w, &a), &c)| 0.5 * a as f64 * (w - c) as f64 * (w - c) as f64)
                .sum())
        }

        fn calc_grad(&mut self, out_grad: &mut [f32], weight: &[f32]) -> Result<()> {
            for (i, g) in out_grad.iter_mut().enumerate() {
                *g = self.a[i] * (weight[i] - self.c[i]);
            }
            Ok(())
        }

        fn save(&self, _writer: &mut dyn Write) -> Result<()> {
            Ok(())
        }

        fn load(&mut self, _reader: &mut dyn Read) -> Result<(usize, usize)> {
            Ok((self.a.len(), 1))
        }

        fn save_model(&self, writer: &mut dyn Write, weight: &[f32]) -> Result<()> {
            writer.write_all(bytemuck::cast_slice(weight))?;
            Ok(())
        }
    }

    #[test]
    fn minimizes_an_ill_conditioned_quadratic() {
        let mut obj = Quadratic::new(vec![1.0, 10.0, 100.0], vec![1.0, -2.0, 0.5]);
        let param = LbfgsParam {
            lbfgs_stop_tol: 1e-12,
            ..LbfgsParam::default()
        };

        let weight = Lbfgs::new(param).run(&mut obj, &Solo).unwrap();

        for (w, c) in weight.iter().zip(&obj.c) {
            assert!((w - c).abs() < 1e-3, "{w} != {c}");
        }
    }

    #[test]
    fn respects_max_iterations() {
        let mut obj = Quadratic::new(vec![1.0, 50.0], vec![3.0, 3.0]);
        let param = LbfgsParam {
            max_lbfgs_iter: 1,
            ..LbfgsParam::default()
        };

        let weight = Lbfgs::new(param).run(&mut obj, &Solo).unwrap();

        let start = obj.eval(&[0.0, 0.0], false).unwrap();
        let end = obj.eval(&weight, false).unwrap();
        assert!(end < start);
        assert!((weight[0] - 3.0).abs() > 1e-3);
    }

    #[test]
    fn stops_immediately_at_a_stationary_point() {
        let mut obj = Quadratic::new(vec![1.0, 1.0], vec![0.0, 0.0]);
        let weight = Lbfgs::new(LbfgsParam::default())
            .run(&mut obj, &Solo)
            .unwrap();

        assert_eq!(weight, [0.0, 0.0]);
        assert_eq!(obj.evals, 1);
    }

    #[test]
    fn checkpoint_files_sit_next_to_the_model() {
        let model_out = Path::new("out/final.model");
        assert_eq!(
            checkpoint_path(model_out),
            Path::new("out/final.model.checkpoint")
        );
        assert_eq!(
            snapshot_path(model_out, 12),
            Path::new("out/final.model_V12")
        );
    }

    #[test]
    fn direction_without_history_is_steepest_descent() {
        let lbfgs = Lbfgs::new(LbfgsParam::default());
        assert_eq!(lbfgs.direction(&[1.0, -2.0]), [-1.0, 2.0]);
    }
}
