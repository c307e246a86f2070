//! 各実験（PINN、HNN/PHNN、KdV）の実行と結果レポートの保存。

use crate::MODEL_FILENAME;
use crate::cli::{HamiltonianVariant, KdvVariant, PinnVariant};
use crate::dataset::column;
use crate::error::{Error, Result};
use crate::hamiltonian::{
    BaselineField, HamiltonianConfig, HamiltonianField, VectorField, VectorFieldObjective,
    phase_samples, rollout as rollout_field, trajectory_error,
};
use crate::kdv::{
    self, KdvBaseline, KdvConfig, KdvPhnn, LatticeField, LatticeOperators, MidpointObjective,
};
use crate::model::ModelConfig;
use crate::oscillator::{DampedOscillator, OscillatorConfig, linspace};
use crate::pinn::{CompositeLoss, DiscoveryModel, LearnedOscillatorResidual, OscillatorResidual};
use crate::training::{LossTrace, Trainer, TrainingConfig};
use burn::backend::{Autodiff, NdArray};
use burn::config::Config;
use burn::module::{AutodiffModule, Module};
use burn::optim::AdamConfig;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::{Distribution, Tensor};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub type TrainBackend = Autodiff<NdArray<f32>>;
pub type InferBackend = NdArray<f32>;

pub const OSCILLATOR_CONFIG_FILENAME: &str = "oscillator_config.json";
pub const MODEL_CONFIG_FILENAME: &str = "model_config.json";
pub const TRAINING_CONFIG_FILENAME: &str = "training_config.json";
pub const KDV_CONFIG_FILENAME: &str = "kdv_config.json";
pub const HAMILTONIAN_CONFIG_FILENAME: &str = "hamiltonian_config.json";

/// 1回の実験の結果。
#[derive(Debug, Serialize)]
pub struct Report {
    pub experiment: String,
    pub variant: String,
    pub loss: LossTrace,
    pub physics_loss: LossTrace,
    pub metrics: BTreeMap<String, f64>,
}

impl Report {
    fn new(experiment: &str, variant: &str) -> Self {
        Self {
            experiment: experiment.to_string(),
            variant: variant.to_string(),
            loss: LossTrace::default(),
            physics_loss: LossTrace::default(),
            metrics: BTreeMap::new(),
        }
    }

    fn metric(&mut self, name: &str, value: f64) {
        info!("=> {}: {:.6e}", name, value);
        self.metrics.insert(name.to_string(), value);
    }

    /// `<out>/<experiment>_<variant>_report.json` に書き出します。
    pub fn save(&self, out: &Path) -> Result<PathBuf> {
        fs::create_dir_all(out)?;
        let path = out.join(format!("{}_{}_report.json", self.experiment, self.variant));
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        info!("=> レポートを '{}' に保存しました。", path.display());
        Ok(path)
    }
}

/// 設定ファイルがあれば読み込み、なければ既定値を使います。
pub fn load_or_default<C: Config>(path: Option<&Path>, default: impl FnOnce() -> C) -> Result<C> {
    match path {
        Some(path) => {
            info!("設定を '{}' から読み込みます", path.display());
            Ok(C::load(path)?)
        }
        None => Ok(default()),
    }
}

/// 既定の設定ファイルをすべて書き出します。
///
/// 書き出し先に同名のファイルが1つでもあれば、何も書かずにエラーを返します。
pub fn write_default_configs(out: &Path) -> Result<Vec<PathBuf>> {
    let files = [
        OSCILLATOR_CONFIG_FILENAME,
        TRAINING_CONFIG_FILENAME,
        KDV_CONFIG_FILENAME,
        HAMILTONIAN_CONFIG_FILENAME,
        MODEL_CONFIG_FILENAME,
    ]
    .map(|name| out.join(name));
    if let Some(existing) = files.iter().find(|path| path.exists()) {
        return Err(Error::invalid_argument(format!(
            "'{}' already exists; refusing to overwrite",
            existing.display()
        )));
    }

    fs::create_dir_all(out)?;
    let [oscillator, training, kdv, hamiltonian, model] = &files;
    OscillatorConfig::new().save(oscillator)?;
    TrainingConfig::new().save(training)?;
    KdvConfig::new().save(kdv)?;
    HamiltonianConfig::new().save(hamiltonian)?;
    ModelConfig::new(1, 1).save(model)?;
    info!("=> 既定の設定を '{}' に書き出しました。", out.display());
    Ok(files.to_vec())
}

fn test_error<B: Backend>(
    system: &DampedOscillator,
    predict: impl Fn(Tensor<B, 2>) -> Tensor<B, 2>,
    n_test: usize,
    t_max_test: f64,
    device: &B::Device,
) -> f64 {
    let (times, exact) = system.sample(n_test, t_max_test);
    let predictions: Vec<f64> = predict(column(&times, device))
        .into_data()
        .iter::<f32>()
        .map(f64::from)
        .collect();
    let total: f64 = predictions
        .iter()
        .zip(&exact)
        .map(|(p, e)| (p - e).powi(2))
        .sum();
    total / exact.len().max(1) as f64
}

/// 減衰振動子のPINN実験を実行します。
pub fn run_pinn(
    variant: PinnVariant,
    config: &OscillatorConfig,
    model_config: &ModelConfig,
    training: &TrainingConfig,
    out: &Path,
) -> Result<Report> {
    let device = Default::default();
    TrainBackend::seed(training.seed);
    let system = config.system()?;
    let model_config = model_config.with_dims(1, 1);
    let mut report = Report::new("pinn", variant.name());

    info!(
        "学習を開始します (減衰振動子, {}) - バックエンド: NdArray (CPU)",
        variant.name()
    );
    let collocation = column::<TrainBackend>(&linspace(0.0, config.t_max_physics, config.n_physics), &device);

    match variant {
        PinnVariant::Data | PinnVariant::Physics => {
            let (times, targets) = system.sample(config.n_train, config.t_max_train);
            let objective = CompositeLoss::data_only(
                column(&times, &device),
                column(&targets, &device),
                OscillatorResidual {
                    mu: system.mu(),
                    k: system.k(),
                },
            );
            let objective = if variant == PinnVariant::Physics {
                objective.with_collocation(collocation)
            } else {
                objective
            };

            let model = model_config.init::<TrainBackend>(&device);
            let optim = AdamConfig::new().init::<TrainBackend, crate::model::Model<TrainBackend>>();
            let outcome = Trainer::new(training, optim).fit(model, &objective);
            let model = outcome.model.valid();

            let inference_device = Default::default();
            report.metric(
                "test_mse",
                test_error::<InferBackend>(
                    &system,
                    |t| model.forward(t),
                    config.n_test,
                    config.t_max_test,
                    &inference_device,
                ),
            );
            report.loss = outcome.trace;
            report.physics_loss = outcome.physics_trace;

            save_pinn_model(model, &model_config, config, out)?;
        }
        PinnVariant::Discovery => {
            let times = config.observation_times();
            let exact: Vec<f64> = times.iter().map(|&t| system.position(t)).collect();
            let exact = column::<TrainBackend>(&exact, &device);
            let noise = Tensor::<TrainBackend, 2>::random(
                exact.shape(),
                Distribution::Normal(0.0, config.noise_std),
                &device,
            );
            let objective = CompositeLoss::data_only(
                column(&times, &device),
                exact + noise,
                LearnedOscillatorResidual,
            )
            .with_collocation(collocation);

            let model = DiscoveryModel::<TrainBackend>::new(&model_config, 0.0, 1.0, &device);
            let optim = AdamConfig::new().init::<TrainBackend, DiscoveryModel<TrainBackend>>();
            let outcome = Trainer::new(training, optim).fit(model, &objective);
            let model = outcome.model.valid();

            report.metric("mu", model.mu());
            report.metric("k", model.k());
            report.metric("mu_error", (model.mu() - system.mu()).abs());
            report.metric("k_error", (model.k() - system.k()).abs());
            let inference_device = Default::default();
            report.metric(
                "test_mse",
                test_error::<InferBackend>(
                    &system,
                    |t| model.net().forward(t),
                    config.n_test,
                    config.t_max_test,
                    &inference_device,
                ),
            );
            report.loss = outcome.trace;
            report.physics_loss = outcome.physics_trace;
        }
    }

    report.save(out)?;
    Ok(report)
}

fn save_pinn_model(
    model: crate::model::Model<InferBackend>,
    model_config: &ModelConfig,
    config: &OscillatorConfig,
    out: &Path,
) -> Result<()> {
    fs::create_dir_all(out)?;
    let path = out.join(MODEL_FILENAME);
    info!("学習済みモデルを保存中...");
    model.save_file(
        path.clone(),
        &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
    )?;
    model_config.save(out.join(MODEL_CONFIG_FILENAME))?;
    config.save(out.join(OSCILLATOR_CONFIG_FILENAME))?;
    info!("=> モデルを '{}' に保存しました。", path.display());
    Ok(())
}

/// 振動子のベクトル場学習（ベースライン / HNN / PHNN）を実行します。
pub fn run_hamiltonian(
    variant: HamiltonianVariant,
    config: &HamiltonianConfig,
    oscillator: &OscillatorConfig,
    model_config: &ModelConfig,
    training: &TrainingConfig,
    out: &Path,
) -> Result<Report> {
    let device = Default::default();
    TrainBackend::seed(training.seed);
    config.validate()?;
    let system = oscillator.system()?;
    let samples = phase_samples(
        &system,
        config.n_trajectories,
        config.steps,
        config.t_max,
        training.seed,
    )?;
    let objective = VectorFieldObjective::<TrainBackend>::new(&samples, &device);
    let mut report = Report::new("hamiltonian", variant.name());
    info!(
        "学習を開始します (相空間ベクトル場, {}) - 学習サンプル数: {}",
        variant.name(),
        samples.states.rows()
    );

    match variant {
        HamiltonianVariant::Baseline => {
            let model = BaselineField::<TrainBackend>::new(model_config, &device);
            let optim = AdamConfig::new().init::<TrainBackend, BaselineField<TrainBackend>>();
            let outcome = Trainer::new(training, optim).fit(model, &objective);
            evaluate_field(&outcome.model.valid(), &system, config, &mut report)?;
            report.loss = outcome.trace;
        }
        HamiltonianVariant::Hnn | HamiltonianVariant::Phnn => {
            let model = if variant == HamiltonianVariant::Hnn {
                HamiltonianField::<TrainBackend>::conservative(model_config, &device)
            } else {
                HamiltonianField::<TrainBackend>::dissipative(model_config, &device)
            };
            let optim = AdamConfig::new().init::<TrainBackend, HamiltonianField<TrainBackend>>();
            let outcome = Trainer::new(training, optim).fit(model, &objective);
            let model = outcome.model.valid();
            report.metric("damping", model.damping());
            report.metric("damping_error", (model.damping() - system.mu()).abs());
            evaluate_field(&model, &system, config, &mut report)?;
            report.loss = outcome.trace;
        }
    }

    report.save(out)?;
    Ok(report)
}

fn evaluate_field<M: VectorField<InferBackend>>(
    model: &M,
    system: &DampedOscillator,
    config: &HamiltonianConfig,
    report: &mut Report,
) -> Result<()> {
    let device = Default::default();
    let initial = [1.0, 0.0];
    let trajectory = rollout_field::<InferBackend, _>(
        model,
        initial,
        config.rollout_horizon,
        config.rollout_dt,
        &device,
    )?;
    report.metric("rollout_mse", trajectory_error(system, initial, &trajectory));
    if let Some(last) = trajectory.last() {
        let exact = system.state_at(config.rollout_horizon, initial[0], initial[1]);
        report.metric("final_energy", system.hamiltonian([last[0], last[1]]));
        report.metric("exact_final_energy", system.hamiltonian(exact));
    }
    Ok(())
}

/// KdV方程式の擬ハミルトニアンモデルを学習します。
pub fn run_kdv(
    variant: KdvVariant,
    config: &KdvConfig,
    model_config: &ModelConfig,
    training: &TrainingConfig,
    out: &Path,
) -> Result<Report> {
    let device = Default::default();
    TrainBackend::seed(training.seed);
    let system = config.system()?;
    info!("参照解を生成中 ({} 軌道)...", config.n_trajectories);
    let dataset = kdv::generate(&system, config, training.seed)?;
    if dataset.current.rows() == 0 {
        return Err(Error::invalid_argument(
            "KdV dataset is empty; increase t_max or n_trajectories",
        ));
    }
    let mut report = Report::new("kdv", variant.name());
    info!(
        "学習を開始します (KdV, {}) - 学習ペア数: {}",
        variant.name(),
        dataset.current.rows()
    );

    match variant {
        KdvVariant::Baseline => {
            let ops = LatticeOperators::new(system.grid(), KdvBaseline::<TrainBackend>::RADIUS, &device);
            let objective = MidpointObjective::<TrainBackend>::new(&dataset, ops, &device)?;
            let model = KdvBaseline::<TrainBackend>::new(model_config, &device);
            let optim = AdamConfig::new().init::<TrainBackend, KdvBaseline<TrainBackend>>();
            let outcome = Trainer::new(training, optim).fit(model, &objective);
            evaluate_lattice(&outcome.model.valid(), &system, config, training.seed, &mut report)?;
            report.loss = outcome.trace;
        }
        KdvVariant::Phnn => {
            let ops = LatticeOperators::new(system.grid(), KdvPhnn::<TrainBackend>::RADIUS, &device);
            let objective = MidpointObjective::<TrainBackend>::new(&dataset, ops, &device)?;
            let model = KdvPhnn::<TrainBackend>::new(model_config, &device);
            let optim = AdamConfig::new().init::<TrainBackend, KdvPhnn<TrainBackend>>();
            let outcome = Trainer::new(training, optim).fit(model, &objective);
            evaluate_lattice(&outcome.model.valid(), &system, config, training.seed, &mut report)?;
            report.loss = outcome.trace;
        }
    }

    report.save(out)?;
    Ok(report)
}

fn evaluate_lattice<M: LatticeField<InferBackend>>(
    model: &M,
    system: &kdv::KdvSystem,
    config: &KdvConfig,
    seed: u64,
    report: &mut Report,
) -> Result<()> {
    let device = Default::default();
    let ops = LatticeOperators::<InferBackend>::new(system.grid(), model.radius(), &device);
    // 学習に使っていない初期条件
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    let u0 = system.initial_condition(&mut rng);
    let reference = system.reference(&u0, config.t_max, config.sample_dt, config.solver_dt)?;
    let learned = kdv::rollout(
        model,
        &ops,
        &u0,
        config.t_max,
        config.sample_dt,
        config.solver_dt,
    )?;
    report.metric("rollout_mse", kdv::mean_squared_error(&learned, &reference));
    if let Some(last) = learned.last() {
        let h0 = system.hamiltonian(&u0);
        report.metric("hamiltonian_drift", (system.hamiltonian(last) - h0).abs());
    }
    Ok(())
}
