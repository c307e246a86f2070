use crate::derivatives::{DifferentiableFunction, Jet, derivatives_along};
use crate::model::{Model, ModelConfig};
use crate::training::{LossTerms, Objective};
use burn::module::{Module, Param};
use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::Backend;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};

/// 支配方程式の残差。厳密解に対しては0になります。
pub trait Residual<B: Backend, M> {
    /// コロケーション点`coords`（`[N, d_in]`）における残差`[N, 1]`を返します。
    fn evaluate(&self, model: &M, coords: Tensor<B, 2>) -> Tensor<B, 2>;
}

/// 時刻に関する1階・2階微分を使う振動子の残差 `u_tt + mu u_t + k u`。
fn oscillator_residual<B: Backend>(jet: Jet<B>, mu: Tensor<B, 2>, k: Tensor<B, 2>) -> Tensor<B, 2> {
    jet.second + jet.first * mu + jet.value * k
}

/// 物理定数が既知の振動子の残差。
#[derive(Debug, Clone, Copy)]
pub struct OscillatorResidual {
    pub mu: f64,
    pub k: f64,
}

impl<B, M> Residual<B, M> for OscillatorResidual
where
    B: Backend,
    M: DifferentiableFunction<B>,
{
    fn evaluate(&self, model: &M, coords: Tensor<B, 2>) -> Tensor<B, 2> {
        let jet = derivatives_along(model, coords, 0);
        jet.second + jet.first.mul_scalar(self.mu) + jet.value.mul_scalar(self.k)
    }
}

/// 減衰係数とばね定数を学習可能なパラメータとして持つモデル。
#[derive(Module, Debug)]
pub struct DiscoveryModel<B: Backend> {
    net: Model<B>,
    mu: Param<Tensor<B, 1>>,
    k: Param<Tensor<B, 1>>,
}

impl<B: Backend> DiscoveryModel<B> {
    /// 物理定数の初期推定値`mu`, `k`からモデルを作ります。
    pub fn new(config: &ModelConfig, mu: f64, k: f64, device: &B::Device) -> Self {
        Self {
            net: config.init(device),
            mu: Param::from_tensor(Tensor::from_floats([mu as f32], device)),
            k: Param::from_tensor(Tensor::from_floats([k as f32], device)),
        }
    }

    pub fn mu(&self) -> f64 {
        self.mu.val().into_scalar().elem()
    }

    pub fn k(&self) -> f64 {
        self.k.val().into_scalar().elem()
    }

    pub fn net(&self) -> &Model<B> {
        &self.net
    }
}

impl<B: Backend> DifferentiableFunction<B> for DiscoveryModel<B> {
    fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.net.forward(input)
    }

    fn jet(&self, input: Tensor<B, 2>, direction: Tensor<B, 2>) -> Jet<B> {
        self.net.forward_jet(input, direction)
    }
}

/// 物理定数をモデルから読み出す残差。
#[derive(Debug, Clone, Copy, Default)]
pub struct LearnedOscillatorResidual;

impl<B: Backend> Residual<B, DiscoveryModel<B>> for LearnedOscillatorResidual {
    fn evaluate(&self, model: &DiscoveryModel<B>, coords: Tensor<B, 2>) -> Tensor<B, 2> {
        let jet = derivatives_along(model, coords, 0);
        let mu = model.mu.val().unsqueeze::<2>();
        let k = model.k.val().unsqueeze::<2>();
        oscillator_residual(jet, mu, k)
    }
}

/// 残差の二乗平均。
pub fn physics_loss<B, M, R>(residual: &R, model: &M, coords: Tensor<B, 2>) -> Tensor<B, 1>
where
    B: Backend,
    R: Residual<B, M>,
{
    let r = residual.evaluate(model, coords);
    MseLoss::new().forward(r.clone(), r.zeros_like(), Reduction::Mean)
}

/// データ損失と（あれば）物理損失からなる複合損失。
pub struct CompositeLoss<B: Backend, R> {
    pub inputs: Tensor<B, 2>,
    pub targets: Tensor<B, 2>,
    pub collocation: Option<Tensor<B, 2>>,
    pub residual: R,
}

impl<B: Backend, R> CompositeLoss<B, R> {
    /// 物理損失を持たない、データのみの損失。
    pub fn data_only(inputs: Tensor<B, 2>, targets: Tensor<B, 2>, residual: R) -> Self {
        Self {
            inputs,
            targets,
            collocation: None,
            residual,
        }
    }

    pub fn with_collocation(mut self, collocation: Tensor<B, 2>) -> Self {
        self.collocation = Some(collocation);
        self
    }
}

impl<B, M, R> Objective<B, M> for CompositeLoss<B, R>
where
    B: AutodiffBackend,
    M: DifferentiableFunction<B>,
    R: Residual<B, M>,
{
    fn loss(&self, model: &M) -> LossTerms<B> {
        let prediction = model.forward(self.inputs.clone());
        let data = MseLoss::new().forward(prediction, self.targets.clone(), Reduction::Mean);
        LossTerms {
            data,
            physics: self
                .collocation
                .clone()
                .map(|coords| physics_loss(&self.residual, model, coords)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::column;
    use crate::oscillator::DampedOscillator;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    /// 厳密解そのものを返す関数（時刻に関する微分を解析的に与える）
    struct Exact(DampedOscillator);

    impl<B: Backend> DifferentiableFunction<B> for Exact {
        fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
            self.jet(input.clone(), input.zeros_like()).value
        }

        fn jet(&self, input: Tensor<B, 2>, _direction: Tensor<B, 2>) -> Jet<B> {
            let device = input.device();
            let times: Vec<f64> = input.into_data().iter::<f32>().map(f64::from).collect();
            let h = 1e-3;
            let value: Vec<f64> = times.iter().map(|&t| self.0.position(t)).collect();
            let first: Vec<f64> = times.iter().map(|&t| self.0.state_at(t, 1.0, 0.0)[1]).collect();
            let second: Vec<f64> = times
                .iter()
                .map(|&t| {
                    (self.0.state_at(t + h, 1.0, 0.0)[1] - self.0.state_at(t - h, 1.0, 0.0)[1])
                        / (2.0 * h)
                })
                .collect();
            Jet {
                value: column(&value, &device),
                first: column(&first, &device),
                second: column(&second, &device),
            }
        }
    }

    #[test]
    fn exact_solution_has_small_residual() {
        let device = Default::default();
        let system = DampedOscillator::new(0.4, 4.0).unwrap();
        let coords = column::<TestBackend>(&[0.0, 0.5, 1.3, 4.0, 7.5], &device);
        let residual = OscillatorResidual { mu: 0.4, k: 4.0 };
        let loss: f32 = physics_loss(&residual, &Exact(system), coords).into_scalar().elem();
        assert!(loss < 1e-6, "loss {loss}");
    }

    #[test]
    fn wrong_constants_give_large_residual() {
        let device = Default::default();
        let system = DampedOscillator::new(0.4, 4.0).unwrap();
        let coords = column::<TestBackend>(&[0.0, 0.5, 1.3], &device);
        let residual = OscillatorResidual { mu: 0.4, k: 9.0 };
        let loss: f32 = physics_loss(&residual, &Exact(system), coords).into_scalar().elem();
        assert!(loss > 1e-2);
    }

    #[test]
    fn learned_residual_uses_model_constants() {
        let device = Default::default();
        let config = ModelConfig::new(1, 1);
        let model = DiscoveryModel::<TestBackend>::new(&config, 0.4, 4.0, &device);
        assert!((model.mu() - 0.4).abs() < 1e-6);
        assert!((model.k() - 4.0).abs() < 1e-6);

        let coords = column::<TestBackend>(&[0.1, 0.2, 0.3], &device);
        let learned = LearnedOscillatorResidual.evaluate(&model, coords.clone());
        let fixed = OscillatorResidual { mu: 0.4, k: 4.0 }.evaluate(&model, coords);
        let diff: f32 = (learned - fixed).abs().max().into_scalar().elem();
        assert!(diff < 1e-5);
    }
}
