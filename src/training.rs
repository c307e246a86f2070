//! 汎用の学習ループ。
//!
//! データ損失と物理損失を `data + λ physics` として組み合わせ、
//! 固定回数だけ勾配法で最適化します。早期終了や発散の検出は行いません。

use burn::config::Config;
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};
use serde::Serialize;
use serde::ser::SerializeSeq;
use std::time::Instant;
use tracing::{debug, info};

/// 学習ループの設定。
#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = 5000)]
    pub num_iterations: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    /// 物理損失の重み λ
    #[config(default = 1e-1)]
    pub physics_weight: f64,
    #[config(default = 500)]
    pub log_interval: usize,
    #[config(default = 42)]
    pub seed: u64,
}

/// 1ステップ分の損失項。
pub struct LossTerms<B: AutodiffBackend> {
    pub data: Tensor<B, 1>,
    pub physics: Option<Tensor<B, 1>>,
}

impl<B: AutodiffBackend> LossTerms<B> {
    pub fn data_only(data: Tensor<B, 1>) -> Self {
        Self {
            data,
            physics: None,
        }
    }

    pub fn total(&self, physics_weight: f64) -> Tensor<B, 1> {
        match &self.physics {
            Some(physics) => self.data.clone() + physics.clone().mul_scalar(physics_weight),
            None => self.data.clone(),
        }
    }
}

/// モデルに対する損失を計算する目的関数。
pub trait Objective<B: AutodiffBackend, M> {
    fn loss(&self, model: &M) -> LossTerms<B>;
}

/// 各ステップの損失を追記していく履歴。
///
/// JSONには数値の配列として書き出します。発散して有限でなくなった値は
/// `null` にならないよう `"NaN"`, `"inf"`, `"-inf"` の文字列で残します。
#[derive(Debug, Clone, Default)]
pub struct LossTrace {
    values: Vec<f32>,
}

impl LossTrace {
    pub fn push(&mut self, value: f32) {
        self.values.push(value);
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn last(&self) -> Option<f32> {
        self.values.last().copied()
    }

    /// 幅`window`の移動平均。履歴が窓より短い場合は空になります。
    pub fn moving_average(&self, window: usize) -> Vec<f32> {
        if window == 0 || self.values.len() < window {
            return Vec::new();
        }
        self.values
            .windows(window)
            .map(|w| w.iter().sum::<f32>() / window as f32)
            .collect()
    }
}

impl Serialize for LossTrace {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.values.len()))?;
        for value in &self.values {
            if value.is_finite() {
                seq.serialize_element(value)?;
            } else {
                seq.serialize_element(&value.to_string())?;
            }
        }
        seq.end()
    }
}

/// 学習ループの状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Initialized,
    Running { iteration: usize },
    Finished,
}

/// 学習の結果。
pub struct TrainingOutcome<M> {
    pub model: M,
    pub trace: LossTrace,
    pub physics_trace: LossTrace,
}

/// 固定回数の最適化を行うトレーナー。
pub struct Trainer<'a, O> {
    config: &'a TrainingConfig,
    optim: O,
    state: TrainerState,
    trace: LossTrace,
    physics_trace: LossTrace,
}

impl<'a, O> Trainer<'a, O> {
    pub fn new(config: &'a TrainingConfig, optim: O) -> Self {
        Self {
            config,
            optim,
            state: TrainerState::Initialized,
            trace: LossTrace::default(),
            physics_trace: LossTrace::default(),
        }
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn trace(&self) -> &LossTrace {
        &self.trace
    }

    /// 1回の最適化ステップを実行し、更新されたモデルを返します。
    pub fn step<B, M, J>(&mut self, model: M, objective: &J) -> M
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
        J: Objective<B, M>,
    {
        let iteration = match self.state {
            TrainerState::Initialized => 1,
            TrainerState::Running { iteration } => iteration + 1,
            TrainerState::Finished => {
                debug!("step requested after the iteration budget was exhausted");
                return model;
            }
        };

        let terms = objective.loss(&model);
        let total = terms.total(self.config.physics_weight);
        let total_value: f32 = total.clone().into_scalar().elem();
        self.trace.push(total_value);
        let physics_value = terms
            .physics
            .as_ref()
            .map(|p| p.clone().into_scalar().elem::<f32>());
        if let Some(value) = physics_value {
            self.physics_trace.push(value);
        }

        if self.config.log_interval > 0 && iteration % self.config.log_interval == 0 {
            match physics_value {
                Some(phys) => info!(
                    "[Iteration {}] Total Loss: {:.6}, Physics Loss: {:.6}",
                    iteration, total_value, phys
                ),
                None => info!("[Iteration {}] Total Loss: {:.6}", iteration, total_value),
            }
        }

        let grads = total.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        let model = self.optim.step(self.config.learning_rate, model, grads);

        self.state = if iteration >= self.config.num_iterations {
            TrainerState::Finished
        } else {
            TrainerState::Running { iteration }
        };
        model
    }

    /// 設定された回数だけ学習を実行します。
    pub fn fit<B, M, J>(mut self, mut model: M, objective: &J) -> TrainingOutcome<M>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
        J: Objective<B, M>,
    {
        let start = Instant::now();
        if self.config.num_iterations == 0 {
            self.state = TrainerState::Finished;
        }
        while self.state != TrainerState::Finished {
            model = self.step(model, objective);
        }
        info!(
            "学習が完了しました。最終損失: {:.6}, 学習時間: {:.2?}",
            self.trace.last().unwrap_or(f32::NAN),
            start.elapsed()
        );
        TrainingOutcome {
            model,
            trace: self.trace,
            physics_trace: self.physics_trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Model, ModelConfig};
    use burn::backend::{Autodiff, NdArray};
    use burn::nn::loss::{MseLoss, Reduction};
    use burn::optim::AdamConfig;

    type AD = Autodiff<NdArray<f32>>;

    /// 出力を0に近づけるだけの目的関数。
    struct Flatten {
        inputs: Tensor<AD, 2>,
        with_physics: bool,
    }

    impl Objective<AD, Model<AD>> for Flatten {
        fn loss(&self, model: &Model<AD>) -> LossTerms<AD> {
            let prediction = model.forward(self.inputs.clone());
            let target = prediction.zeros_like();
            let data = MseLoss::new().forward(prediction, target, Reduction::Mean);
            LossTerms {
                physics: self.with_physics.then(|| data.clone().mul_scalar(2.0)),
                data,
            }
        }
    }

    fn setup(with_physics: bool) -> (Model<AD>, Flatten) {
        let device = Default::default();
        let model = ModelConfig::new(1, 1).with_d_hidden(4).init::<AD>(&device);
        let inputs = Tensor::<AD, 1>::from_floats([0.1, 0.5, 0.9], &device).reshape([3, 1]);
        (
            model,
            Flatten {
                inputs,
                with_physics,
            },
        )
    }

    #[test]
    fn trainer_runs_until_budget_then_stops_updating() {
        let config = TrainingConfig::new()
            .with_num_iterations(2)
            .with_learning_rate(1e-2)
            .with_log_interval(1);
        let (model, objective) = setup(false);
        let mut trainer = Trainer::new(&config, AdamConfig::new().init::<AD, Model<AD>>());
        assert_eq!(trainer.state(), TrainerState::Initialized);
        assert!(trainer.trace().is_empty());

        let model = trainer.step(model, &objective);
        assert_eq!(trainer.state(), TrainerState::Running { iteration: 1 });
        assert_eq!(trainer.trace().len(), 1);

        let model = trainer.step(model, &objective);
        assert_eq!(trainer.state(), TrainerState::Finished);
        assert_eq!(trainer.trace().len(), 2);

        let before = model.forward(objective.inputs.clone()).into_data();
        let model = trainer.step(model, &objective);
        assert_eq!(trainer.state(), TrainerState::Finished);
        assert_eq!(trainer.trace().len(), 2);
        model
            .forward(objective.inputs.clone())
            .into_data()
            .assert_eq(&before, true);
    }

    #[test]
    fn fit_with_zero_iterations_records_nothing() {
        let config = TrainingConfig::new().with_num_iterations(0);
        let (model, objective) = setup(true);
        let before = model.forward(objective.inputs.clone()).into_data();
        let outcome =
            Trainer::new(&config, AdamConfig::new().init::<AD, Model<AD>>()).fit(model, &objective);
        assert!(outcome.trace.is_empty());
        assert!(outcome.physics_trace.is_empty());
        outcome
            .model
            .forward(objective.inputs.clone())
            .into_data()
            .assert_eq(&before, true);
    }

    #[test]
    fn fit_records_weighted_total_and_physics_term() {
        let config = TrainingConfig::new()
            .with_num_iterations(3)
            .with_physics_weight(0.5)
            .with_log_interval(0);
        let (model, objective) = setup(true);
        let first: f32 = objective.loss(&model).data.into_scalar().elem();
        let outcome =
            Trainer::new(&config, AdamConfig::new().init::<AD, Model<AD>>()).fit(model, &objective);
        assert_eq!(outcome.trace.len(), 3);
        assert_eq!(outcome.physics_trace.len(), 3);
        // total = data + 0.5 * (2 data) = 2 data, physics = 2 data
        let total = outcome.trace.values()[0];
        let physics = outcome.physics_trace.values()[0];
        assert!((total - 2.0 * first).abs() < 1e-6 * (1.0 + first));
        assert!((physics - 2.0 * first).abs() < 1e-6 * (1.0 + first));
    }

    #[test]
    fn non_finite_losses_survive_json() {
        let mut trace = LossTrace::default();
        for v in [0.5, f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            trace.push(v);
        }
        let json = serde_json::to_string(&trace).unwrap();
        assert_eq!(json, r#"[0.5,"NaN","inf","-inf"]"#);
        assert!(!json.contains("null"));
    }

    #[test]
    fn moving_average_of_short_trace_is_empty() {
        let mut trace = LossTrace::default();
        trace.push(1.0);
        assert!(trace.moving_average(2).is_empty());
        assert!(trace.moving_average(0).is_empty());
    }

    #[test]
    fn moving_average_smooths_values() {
        let mut trace = LossTrace::default();
        for v in [4.0, 2.0, 3.0, 1.0] {
            trace.push(v);
        }
        assert_eq!(trace.moving_average(2), vec![3.0, 2.5, 2.0]);
        assert_eq!(trace.len(), 4);
        assert_eq!(trace.last(), Some(1.0));
    }

    #[test]
    fn default_training_config() {
        let config = TrainingConfig::new();
        assert_eq!(config.num_iterations, 5000);
        assert_eq!(config.seed, 42);
        let config = config.with_num_iterations(10);
        assert_eq!(config.num_iterations, 10);
    }
}
