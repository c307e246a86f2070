//! 周期境界のKorteweg–de Vries方程式と擬ハミルトニアンニューラルネットワーク。
//!
//! `u_t + eta u u_x + gamma^2 u_xxx = 0` は `u_t = ∂x δH/δu`,
//! `H = ∫ (-eta/6 u^3 + gamma^2/2 u_x^2) dx` と書けます。空間を差分で離散化すると
//! `u_t = D1 (-eta/2 u^2 - gamma^2 D2 u)` となり、`D1`は歪対称なので
//! 離散ハミルトニアンが保存されます。

use crate::dataset::{TrajectoryBatch, matrix, to_rows};
use crate::error::{self, Error};
use crate::finite_difference::{Circulant, PeriodicGrid, apply_to_rows};
use crate::integrator::{Trajectory, integrate};
use crate::model::{Model, ModelConfig};
use crate::training::{LossTerms, Objective};
use burn::config::Config;
use burn::module::Module;
use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use burn::tensor::backend::AutodiffBackend;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// KdV実験の設定。
#[derive(Config, Debug)]
pub struct KdvConfig {
    #[config(default = 6.0)]
    pub eta: f64,
    #[config(default = 1.0)]
    pub gamma: f64,
    #[config(default = 50)]
    pub points: usize,
    #[config(default = 20.0)]
    pub length: f64,
    #[config(default = 10)]
    pub n_trajectories: usize,
    #[config(default = 2.0)]
    pub t_max: f64,
    /// 学習データの時間間隔
    #[config(default = 0.1)]
    pub sample_dt: f64,
    /// 参照解を計算するRK4の刻み
    #[config(default = 0.01)]
    pub solver_dt: f64,
}

impl KdvConfig {
    pub fn system(&self) -> error::Result<KdvSystem> {
        if self.points < 3 || !(self.length > 0.0) {
            return Err(Error::invalid_parameter(format!(
                "grid needs at least 3 points and a positive length, got points={} length={}",
                self.points, self.length
            )));
        }
        KdvSystem::new(self.eta, self.gamma, PeriodicGrid::new(self.points, self.length))
    }
}

/// 差分で離散化したKdV系。
#[derive(Debug, Clone)]
pub struct KdvSystem {
    eta: f64,
    gamma: f64,
    grid: PeriodicGrid,
    d1: Circulant,
    d2: Circulant,
    df: Circulant,
}

impl KdvSystem {
    pub fn new(eta: f64, gamma: f64, grid: PeriodicGrid) -> error::Result<Self> {
        if !(eta.is_finite() && eta != 0.0) {
            return Err(Error::invalid_parameter(format!("eta must be non-zero, got {eta}")));
        }
        if !(gamma.is_finite() && gamma > 0.0) {
            return Err(Error::invalid_parameter(format!(
                "gamma must be positive, got {gamma}"
            )));
        }
        Ok(Self {
            eta,
            gamma,
            grid,
            d1: grid.central(),
            d2: grid.second_central(),
            df: grid.forward(),
        })
    }

    pub fn grid(&self) -> &PeriodicGrid {
        &self.grid
    }

    /// 離散ハミルトニアンの勾配 `-eta/2 u^2 - gamma^2 D2 u`。
    pub fn hamiltonian_gradient(&self, u: &[f64]) -> Vec<f64> {
        let g2 = self.gamma * self.gamma;
        self.d2
            .apply(u)
            .iter()
            .zip(u)
            .map(|(uxx, u)| -0.5 * self.eta * u * u - g2 * uxx)
            .collect()
    }

    /// 時間微分 `D1 ∇H`。
    pub fn rhs(&self, u: &[f64]) -> Vec<f64> {
        self.d1.apply(&self.hamiltonian_gradient(u))
    }

    /// `Σ (-eta/6 u^3 + gamma^2/2 (Df u)^2) dx`
    pub fn hamiltonian(&self, u: &[f64]) -> f64 {
        let g2 = self.gamma * self.gamma;
        let ux = self.df.apply(u);
        let density: f64 = u
            .iter()
            .zip(&ux)
            .map(|(u, ux)| -self.eta / 6.0 * u.powi(3) + 0.5 * g2 * ux * ux)
            .sum();
        density * self.grid.dx()
    }

    /// 周期区間上の最短距離で測った、波数`k`・中心`x0`の孤立波。
    ///
    /// 振幅 `12 gamma^2 k^2 / eta`、速度 `4 gamma^2 k^2` で右に進みます。
    pub fn soliton(&self, k: f64, x0: f64) -> Vec<f64> {
        let amplitude = 12.0 * self.gamma * self.gamma * k * k / self.eta;
        let length = self.grid.length;
        self.grid
            .coordinates()
            .into_iter()
            .map(|x| {
                let d = (x - x0 + 0.5 * length).rem_euclid(length) - 0.5 * length;
                amplitude / (k * d).cosh().powi(2)
            })
            .collect()
    }

    /// 波数と位置をランダムに選んだ2つの孤立波の重ね合わせ。
    pub fn initial_condition(&self, rng: &mut StdRng) -> Vec<f64> {
        let length = self.grid.length;
        let mut u = vec![0.0; self.grid.points];
        for _ in 0..2 {
            let k = rng.random_range(0.5..1.0);
            let x0 = rng.random_range(0.0..length);
            for (u, s) in u.iter_mut().zip(self.soliton(k, x0)) {
                *u += s;
            }
        }
        u
    }

    /// 参照解をRK4で計算し、`sample_dt`ごとに間引いて返します。
    pub fn reference(&self, u0: &[f64], t_max: f64, sample_dt: f64, solver_dt: f64) -> error::Result<Trajectory> {
        let stride = substeps(sample_dt, solver_dt)?;
        let fine = integrate(|_, u| self.rhs(u), u0, t_max, sample_dt / stride as f64)?;
        Ok(subsample(fine, stride))
    }
}

fn substeps(sample_dt: f64, solver_dt: f64) -> error::Result<usize> {
    if !(sample_dt > 0.0 && solver_dt > 0.0) {
        return Err(Error::invalid_argument(format!(
            "time steps must be positive, got sample_dt={sample_dt}, solver_dt={solver_dt}"
        )));
    }
    Ok(((sample_dt / solver_dt).round() as usize).max(1))
}

fn subsample(trajectory: Trajectory, stride: usize) -> Trajectory {
    let Trajectory { times, states } = trajectory;
    Trajectory {
        times: times.into_iter().step_by(stride).collect(),
        states: states.into_iter().step_by(stride).collect(),
    }
}

/// 連続する2時刻の状態の組からなる学習データ。
pub struct KdvDataset {
    pub current: TrajectoryBatch,
    pub next: TrajectoryBatch,
    pub sample_dt: f64,
    pub references: Vec<Trajectory>,
}

/// 乱数シード`seed`で初期条件を生成し、学習データを作ります。
pub fn generate(system: &KdvSystem, config: &KdvConfig, seed: u64) -> error::Result<KdvDataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut current = Vec::with_capacity(config.n_trajectories);
    let mut next = Vec::with_capacity(config.n_trajectories);
    let mut references = Vec::with_capacity(config.n_trajectories);
    for i in 0..config.n_trajectories {
        let u0 = system.initial_condition(&mut rng);
        let reference = system.reference(&u0, config.t_max, config.sample_dt, config.solver_dt)?;
        debug!(trajectory = i, samples = reference.len(), "generated KdV reference trajectory");
        let steps = reference.len();
        current.push(reference.states[..steps - 1].to_vec());
        next.push(reference.states[1..].to_vec());
        references.push(reference);
    }
    Ok(KdvDataset {
        current: TrajectoryBatch::from_trajectories(&current)?,
        next: TrajectoryBatch::from_trajectories(&next)?,
        sample_dt: config.sample_dt,
        references,
    })
}

/// 学習・推論で使う差分作用素とシフト作用素のテンソル。
#[derive(Debug, Clone)]
pub struct LatticeOperators<B: Backend> {
    pub central: Tensor<B, 2>,
    /// オフセット `-radius..=radius` の順のシフト作用素
    shifts: Vec<Tensor<B, 2>>,
    radius: usize,
}

impl<B: Backend> LatticeOperators<B> {
    pub fn new(grid: &PeriodicGrid, radius: usize, device: &B::Device) -> Self {
        let r = radius as isize;
        Self {
            central: grid.central().to_tensor(device),
            shifts: (-r..=r).map(|s| grid.shift(s).to_tensor(device)).collect(),
            radius,
        }
    }

    /// `[batch, M]`の状態から各格子点の近傍値 `[batch * M, 2 radius + 1]` を作ります。
    pub fn stencils(&self, states: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch, points] = states.dims();
        let columns: Vec<Tensor<B, 2>> = self
            .shifts
            .iter()
            .map(|shift| apply_to_rows(shift, states.clone()))
            .collect();
        Tensor::stack::<3>(columns, 2).reshape([batch * points, 2 * self.radius + 1])
    }
}

/// 格子上の状態`[batch, M]`から時間微分`[batch, M]`を返すモデル。
pub trait LatticeField<B: Backend> {
    /// 必要な近傍の半径
    fn radius(&self) -> usize;

    fn time_derivative(&self, states: Tensor<B, 2>, ops: &LatticeOperators<B>) -> Tensor<B, 2>;
}

/// 近傍値から時間微分を直接予測するベースライン。
#[derive(Module, Debug)]
pub struct KdvBaseline<B: Backend> {
    net: Model<B>,
}

impl<B: Backend> KdvBaseline<B> {
    pub const RADIUS: usize = 2;

    pub fn new(config: &ModelConfig, device: &B::Device) -> Self {
        Self {
            net: config.with_dims(2 * Self::RADIUS + 1, 1).init(device),
        }
    }
}

impl<B: Backend> LatticeField<B> for KdvBaseline<B> {
    fn radius(&self) -> usize {
        Self::RADIUS
    }

    fn time_derivative(&self, states: Tensor<B, 2>, ops: &LatticeOperators<B>) -> Tensor<B, 2> {
        let [batch, points] = states.dims();
        self.net.forward(ops.stencils(states)).reshape([batch, points])
    }
}

/// 近傍値からハミルトニアンの離散勾配を学習し、歪対称な`D1`を掛けるモデル。
#[derive(Module, Debug)]
pub struct KdvPhnn<B: Backend> {
    gradient: Model<B>,
}

impl<B: Backend> KdvPhnn<B> {
    pub const RADIUS: usize = 1;

    pub fn new(config: &ModelConfig, device: &B::Device) -> Self {
        Self {
            gradient: config.with_dims(2 * Self::RADIUS + 1, 1).init(device),
        }
    }

    /// 学習された `∇H` を`[batch, M]`で返します。
    pub fn hamiltonian_gradient(&self, states: Tensor<B, 2>, ops: &LatticeOperators<B>) -> Tensor<B, 2> {
        let [batch, points] = states.dims();
        self.gradient.forward(ops.stencils(states)).reshape([batch, points])
    }
}

impl<B: Backend> LatticeField<B> for KdvPhnn<B> {
    fn radius(&self) -> usize {
        Self::RADIUS
    }

    fn time_derivative(&self, states: Tensor<B, 2>, ops: &LatticeOperators<B>) -> Tensor<B, 2> {
        apply_to_rows(&ops.central, self.hamiltonian_gradient(states, ops))
    }
}

/// 陰的中点則に基づく損失 `(u1 - u0)/dt ≈ f((u0 + u1)/2)`。
pub struct MidpointObjective<B: Backend> {
    current: Tensor<B, 2>,
    next: Tensor<B, 2>,
    sample_dt: f64,
    ops: LatticeOperators<B>,
}

impl<B: Backend> MidpointObjective<B> {
    pub fn new(dataset: &KdvDataset, ops: LatticeOperators<B>, device: &B::Device) -> error::Result<Self> {
        let points = ops.central.dims()[0];
        if dataset.current.dim != points {
            return Err(Error::Shape {
                expected: format!("{points} grid points"),
                actual: format!("{} values per state", dataset.current.dim),
            });
        }
        Ok(Self {
            current: dataset.current.to_tensor(device),
            next: dataset.next.to_tensor(device),
            sample_dt: dataset.sample_dt,
            ops,
        })
    }
}

impl<B, M> Objective<B, M> for MidpointObjective<B>
where
    B: AutodiffBackend,
    M: LatticeField<B>,
{
    fn loss(&self, model: &M) -> LossTerms<B> {
        let target = (self.next.clone() - self.current.clone()).div_scalar(self.sample_dt);
        let midpoint = (self.current.clone() + self.next.clone()).mul_scalar(0.5);
        let prediction = model.time_derivative(midpoint, &self.ops);
        LossTerms::data_only(MseLoss::new().forward(prediction, target, Reduction::Mean))
    }
}

/// 学習済みモデルをRK4で積分し、`sample_dt`ごとの状態を返します。
pub fn rollout<B, M>(
    model: &M,
    ops: &LatticeOperators<B>,
    u0: &[f64],
    horizon: f64,
    sample_dt: f64,
    solver_dt: f64,
) -> error::Result<Trajectory>
where
    B: Backend,
    M: LatticeField<B>,
{
    let device = ops.central.device();
    let stride = substeps(sample_dt, solver_dt)?;
    let fine = integrate(
        |_, u| {
            let states = matrix::<B>(&[u.to_vec()], &device);
            to_rows(model.time_derivative(states, ops)).swap_remove(0)
        },
        u0,
        horizon,
        sample_dt / stride as f64,
    )?;
    Ok(subsample(fine, stride))
}

/// 2つの軌道の全時刻・全格子点にわたる二乗平均誤差。
pub fn mean_squared_error(a: &Trajectory, b: &Trajectory) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;
    for (x, y) in a.states.iter().zip(&b.states) {
        for (x, y) in x.iter().zip(y) {
            total += (x - y).powi(2);
            count += 1;
        }
    }
    total / count.max(1) as f64
}
