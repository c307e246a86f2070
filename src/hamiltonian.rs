//! 振動子の相空間ベクトル場を学習するモデル（ベースライン, HNN, PHNN）。
//!
//! HNNはスカラーのハミルトニアン `H(q, p)` を学習し、ベクトル場を
//! `J ∇H` として構成します。PHNNはさらに散逸行列 `R = diag(0, r^2)` を学習し、
//! `(J - R) ∇H` とします。

use crate::dataset::{TrajectoryBatch, matrix, to_rows};
use crate::derivatives::derivatives_along;
use crate::error::{self, Error};
use crate::integrator::{Trajectory, integrate};
use crate::model::{Model, ModelConfig};
use crate::oscillator::DampedOscillator;
use crate::training::{LossTerms, Objective};
use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::Backend;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// ハミルトニアン実験の設定。
#[derive(Config, Debug)]
pub struct HamiltonianConfig {
    #[config(default = 20)]
    pub n_trajectories: usize,
    /// 各軌道のサンプル数
    #[config(default = 30)]
    pub steps: usize,
    #[config(default = 3.0)]
    pub t_max: f64,
    #[config(default = 10.0)]
    pub rollout_horizon: f64,
    #[config(default = 0.01)]
    pub rollout_dt: f64,
}

impl HamiltonianConfig {
    /// 軌道数・サンプル数・時間区間が空でないことを確認します。
    pub fn validate(&self) -> error::Result<()> {
        if self.n_trajectories == 0 || self.steps == 0 {
            return Err(Error::invalid_parameter(format!(
                "n_trajectories and steps must be positive, got {} and {}",
                self.n_trajectories, self.steps
            )));
        }
        for (name, value) in [
            ("t_max", self.t_max),
            ("rollout_horizon", self.rollout_horizon),
            ("rollout_dt", self.rollout_dt),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::invalid_parameter(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// 状態`[N, 2]`から時間微分`[N, 2]`を返すモデル。
pub trait VectorField<B: Backend> {
    fn vector_field(&self, states: Tensor<B, 2>) -> Tensor<B, 2>;
}

/// 構造を持たず、状態から時間微分を直接予測するモデル。
#[derive(Module, Debug)]
pub struct BaselineField<B: Backend> {
    net: Model<B>,
}

impl<B: Backend> BaselineField<B> {
    pub fn new(config: &ModelConfig, device: &B::Device) -> Self {
        Self {
            net: config.with_dims(2, 2).init(device),
        }
    }
}

impl<B: Backend> VectorField<B> for BaselineField<B> {
    fn vector_field(&self, states: Tensor<B, 2>) -> Tensor<B, 2> {
        self.net.forward(states)
    }
}

/// ハミルトニアンをニューラルネットワークで表したモデル。
#[derive(Module, Debug)]
pub struct HamiltonianField<B: Backend> {
    hamiltonian: Model<B>,
    damping: Option<Param<Tensor<B, 1>>>,
}

impl<B: Backend> HamiltonianField<B> {
    /// 散逸なし（HNN）。
    pub fn conservative(config: &ModelConfig, device: &B::Device) -> Self {
        Self {
            hamiltonian: config.with_dims(2, 1).init(device),
            damping: None,
        }
    }

    /// 学習可能な散逸項付き（PHNN）。
    pub fn dissipative(config: &ModelConfig, device: &B::Device) -> Self {
        Self {
            damping: Some(Param::from_tensor(Tensor::from_floats([0.1f32], device))),
            ..Self::conservative(config, device)
        }
    }

    /// 学習された散逸係数 `r^2`（HNNでは0）。
    pub fn damping(&self) -> f64 {
        self.damping
            .as_ref()
            .map_or(0.0, |r| r.val().powf_scalar(2.0).into_scalar().elem())
    }

    pub fn hamiltonian(&self, states: Tensor<B, 2>) -> Tensor<B, 2> {
        self.hamiltonian.forward(states)
    }
}

impl<B: Backend> VectorField<B> for HamiltonianField<B> {
    fn vector_field(&self, states: Tensor<B, 2>) -> Tensor<B, 2> {
        let dh_dq = derivatives_along(&self.hamiltonian, states.clone(), 0).first;
        let dh_dp = derivatives_along(&self.hamiltonian, states, 1).first;
        let mut dp = dh_dq.neg();
        if let Some(r) = &self.damping {
            let rate = r.val().powf_scalar(2.0).unsqueeze::<2>();
            dp = dp - dh_dp.clone() * rate;
        }
        Tensor::cat(vec![dh_dp, dp], 1)
    }
}

/// 状態と時間微分の組。
pub struct PhaseSamples {
    pub states: TrajectoryBatch,
    pub derivatives: TrajectoryBatch,
}

/// ランダムな初期条件からの厳密解の軌道と、その時間微分を生成します。
pub fn phase_samples(
    system: &DampedOscillator,
    n_trajectories: usize,
    steps: usize,
    t_max: f64,
    seed: u64,
) -> error::Result<PhaseSamples> {
    let mut rng = StdRng::seed_from_u64(seed);
    let times = crate::oscillator::linspace(0.0, t_max, steps);
    let mut states = Vec::with_capacity(n_trajectories);
    let mut derivatives = Vec::with_capacity(n_trajectories);
    for _ in 0..n_trajectories {
        let q0 = rng.random_range(-1.0..1.0);
        let p0 = rng.random_range(-1.0..1.0);
        let trajectory: Vec<[f64; 2]> = times.iter().map(|&t| system.state_at(t, q0, p0)).collect();
        derivatives.push(trajectory.iter().map(|&s| system.vector_field(s).to_vec()).collect());
        states.push(trajectory.iter().map(|s| s.to_vec()).collect());
    }
    Ok(PhaseSamples {
        states: TrajectoryBatch::from_trajectories(&states)?,
        derivatives: TrajectoryBatch::from_trajectories(&derivatives)?,
    })
}

/// 予測された時間微分と観測値の二乗平均誤差。
pub struct VectorFieldObjective<B: Backend> {
    pub states: Tensor<B, 2>,
    pub derivatives: Tensor<B, 2>,
}

impl<B: Backend> VectorFieldObjective<B> {
    pub fn new(samples: &PhaseSamples, device: &B::Device) -> Self {
        Self {
            states: samples.states.to_tensor(device),
            derivatives: samples.derivatives.to_tensor(device),
        }
    }
}

impl<B, M> Objective<B, M> for VectorFieldObjective<B>
where
    B: AutodiffBackend,
    M: VectorField<B>,
{
    fn loss(&self, model: &M) -> LossTerms<B> {
        let prediction = model.vector_field(self.states.clone());
        LossTerms::data_only(MseLoss::new().forward(
            prediction,
            self.derivatives.clone(),
            Reduction::Mean,
        ))
    }
}

/// 学習済みベクトル場をRK4で積分します。
pub fn rollout<B, M>(
    model: &M,
    initial: [f64; 2],
    horizon: f64,
    dt: f64,
    device: &B::Device,
) -> error::Result<Trajectory>
where
    B: Backend,
    M: VectorField<B>,
{
    integrate(
        |_, y| {
            let states = matrix::<B>(&[y.to_vec()], device);
            to_rows(model.vector_field(states)).swap_remove(0)
        },
        &initial,
        horizon,
        dt,
    )
}

/// 軌道と厳密解の位置・速度の二乗平均誤差。
pub fn trajectory_error(system: &DampedOscillator, initial: [f64; 2], trajectory: &Trajectory) -> f64 {
    let total: f64 = trajectory
        .times
        .iter()
        .zip(&trajectory.states)
        .map(|(&t, state)| {
            let exact = system.state_at(t, initial[0], initial[1]);
            (state[0] - exact[0]).powi(2) + (state[1] - exact[1]).powi(2)
        })
        .sum();
    total / (2 * trajectory.len()).max(1) as f64
}
