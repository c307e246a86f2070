use crate::derivatives::{DifferentiableFunction, Jet};
use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig, Tanh};
use burn::prelude::Backend;
use burn::tensor::Tensor;

/// 多層パーセプトロンの構成。
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 入力座標の次元
    pub d_input: usize,
    /// 出力の次元
    pub d_output: usize,
    #[config(default = 32)]
    pub d_hidden: usize,
    /// 線形層の数（出力層を含む）
    #[config(default = 4)]
    pub n_layers: usize,
}

impl ModelConfig {
    /// 隠れ層の構成はそのままに、入出力の次元だけを差し替えます。
    pub fn with_dims(&self, d_input: usize, d_output: usize) -> Self {
        Self {
            d_input,
            d_output,
            ..self.clone()
        }
    }

    /// 新しいモデルを初期化します。
    pub fn init<B: Backend>(&self, device: &B::Device) -> Model<B> {
        let n_layers = self.n_layers.max(2);
        let mut linears = Vec::with_capacity(n_layers);
        linears.push(LinearConfig::new(self.d_input, self.d_hidden).init(device));
        for _ in 1..(n_layers - 1) {
            linears.push(LinearConfig::new(self.d_hidden, self.d_hidden).init(device));
        }
        linears.push(LinearConfig::new(self.d_hidden, self.d_output).init(device));
        Model {
            linears,
            activation: Tanh::new(),
        }
    }
}

/// 近似関数の本体となるニューラルネットワークモデル。
///
/// 座標（時刻、あるいは状態）を入力とし、その点における物理量を予測する
/// tanh活性化の多層パーセプトロン（MLP）です。tanhは何回でも微分可能なので、
/// 残差損失に必要な2階微分を解析的に伝播できます。
#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    linears: Vec<Linear<B>>,
    activation: Tanh,
}

impl<B: Backend> Model<B> {
    /// モデルの順伝播を実行します。
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let (hidden, last) = self.linears.split_at(self.linears.len() - 1);
        let mut x = input;
        for linear in hidden {
            x = self.activation.forward(linear.forward(x));
        }
        last[0].forward(x)
    }

    /// 順伝播と同時に、方向`direction`に沿った1階・2階微分を伝播します。
    ///
    /// 線形層 `z = x W + b` では `dz = dx W`, `d2z = d2x W`、
    /// tanh層 `h = tanh(z)`, `s = 1 - h^2` では
    /// `dh = s dz`, `d2h = s d2z - 2 h s dz^2` となります。
    pub fn forward_jet(&self, input: Tensor<B, 2>, direction: Tensor<B, 2>) -> Jet<B> {
        let (hidden, last) = self.linears.split_at(self.linears.len() - 1);
        let mut x = input;
        let mut dx = direction;
        let mut d2x = dx.zeros_like();
        for linear in hidden {
            let weight = linear.weight.val();
            let z = linear.forward(x);
            let dz = dx.matmul(weight.clone());
            let d2z = d2x.matmul(weight);

            let h = self.activation.forward(z);
            let s = h.clone().powf_scalar(2.0).neg().add_scalar(1.0);
            d2x = s.clone() * d2z - (h.clone() * s.clone() * dz.clone().powf_scalar(2.0)).mul_scalar(2.0);
            dx = s * dz;
            x = h;
        }
        let weight = last[0].weight.val();
        Jet {
            value: last[0].forward(x),
            first: dx.matmul(weight.clone()),
            second: d2x.matmul(weight),
        }
    }
}

impl<B: Backend> DifferentiableFunction<B> for Model<B> {
    fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        Model::forward(self, input)
    }

    fn jet(&self, input: Tensor<B, 2>, direction: Tensor<B, 2>) -> Jet<B> {
        self.forward_jet(input, direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derivatives::{derivatives_along, input_gradient};
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray<f32>;

    fn to_vec<B: Backend>(t: Tensor<B, 2>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn output_shape_follows_config() {
        let device = Default::default();
        let model = ModelConfig::new(2, 3).init::<TestBackend>(&device);
        let out = model.forward(Tensor::zeros([7, 2], &device));
        assert_eq!(out.dims(), [7, 3]);
    }

    #[test]
    fn jet_matches_central_differences() {
        let device = Default::default();
        let model = ModelConfig::new(1, 1).with_d_hidden(8).init::<TestBackend>(&device);
        let ts = [-0.7f32, 0.1, 0.9];
        let h = 1e-2f32;

        let input = Tensor::<TestBackend, 1>::from_floats(ts, &device).reshape([3, 1]);
        let jet = derivatives_along(&model, input, 0);
        let first = to_vec(jet.first);
        let second = to_vec(jet.second);

        for (i, t) in ts.iter().enumerate() {
            let shifted = Tensor::<TestBackend, 1>::from_floats([t - h, *t, t + h], &device).reshape([3, 1]);
            let u = to_vec(model.forward(shifted));
            let fd_first = (u[2] - u[0]) / (2.0 * h);
            let fd_second = (u[2] - 2.0 * u[1] + u[0]) / (h * h);
            assert!((first[i] - fd_first).abs() < 1e-3, "{} vs {}", first[i], fd_first);
            assert!((second[i] - fd_second).abs() < 5e-2, "{} vs {}", second[i], fd_second);
        }
    }

    #[test]
    fn jet_agrees_with_reverse_mode_gradient() {
        type AD = Autodiff<NdArray<f32>>;
        let device = Default::default();
        let model = ModelConfig::new(2, 1).init::<AD>(&device);
        let input = Tensor::<AD, 2>::from_floats([[0.3, -0.2], [1.0, 0.5]], &device);

        let reverse = to_vec(input_gradient(&model, input.clone()));
        let d_q = to_vec(derivatives_along(&model, input.clone(), 0).first);
        let d_p = to_vec(derivatives_along(&model, input, 1).first);

        for row in 0..2 {
            assert!((reverse[2 * row] - d_q[row]).abs() < 1e-5);
            assert!((reverse[2 * row + 1] - d_p[row]).abs() < 1e-5);
        }
    }
}
