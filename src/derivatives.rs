//! 近似関数の入力に関する微分を計算します。
//!
//! 残差損失には入力に関する2階微分が必要です。`burn`の勾配抽出
//! （`grad`）は計算グラフから切り離されたテンソルを返すため、
//! 学習に使う微分は前進モード（接ベクトル伝播）で通常のテンソル演算として
//! 計算し、パラメータに関する逆伝播が可能な形を保ちます。

use burn::tensor::Tensor;
use burn::tensor::backend::{AutodiffBackend, Backend};

/// ある入力方向に沿った出力の値・1階微分・2階微分。
#[derive(Debug, Clone)]
pub struct Jet<B: Backend> {
    pub value: Tensor<B, 2>,
    pub first: Tensor<B, 2>,
    pub second: Tensor<B, 2>,
}

/// 順伝播と方向微分を提供する微分可能関数。
pub trait DifferentiableFunction<B: Backend> {
    /// `[N, d_in]`の入力に対して`[N, d_out]`を返します。
    fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2>;

    /// `direction`（入力と同じ形状）に沿った出力のジェットを返します。
    fn jet(&self, input: Tensor<B, 2>, direction: Tensor<B, 2>) -> Jet<B>;
}

/// 入力の`column`番目の座標に関する1階・2階微分を計算します。
pub fn derivatives_along<B, F>(function: &F, input: Tensor<B, 2>, column: usize) -> Jet<B>
where
    B: Backend,
    F: DifferentiableFunction<B> + ?Sized,
{
    let direction = unit_direction(&input, column);
    function.jet(input, direction)
}

/// 全ての行で`column`番目の成分だけが1となる方向テンソル。
pub fn unit_direction<B: Backend>(input: &Tensor<B, 2>, column: usize) -> Tensor<B, 2> {
    let [n, d] = input.dims();
    assert!(column < d, "column {column} out of range for input width {d}");
    let zeros = Tensor::<B, 2>::zeros([n, d], &input.device());
    let ones = Tensor::<B, 2>::ones([n, 1], &input.device());
    zeros.slice_assign([0..n, column..column + 1], ones)
}

/// 出力の総和の入力に関する勾配を逆伝播で求めます。
///
/// 返されるテンソルは計算グラフから切り離されており、診断用途に限られます。
pub fn input_gradient<B, F>(function: &F, input: Tensor<B, 2>) -> Tensor<B::InnerBackend, 2>
where
    B: AutodiffBackend,
    F: DifferentiableFunction<B> + ?Sized,
{
    let input = input.detach().require_grad();
    let output = function.forward(input.clone());
    let grads = output.sum().backward();
    input
        .grad(&grads)
        .expect("input was marked with require_grad before the forward pass")
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::ElementConversion;

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    /// f(t, s) = t^3 + 2 s
    struct Cubic;

    impl<B: Backend> DifferentiableFunction<B> for Cubic {
        fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
            let [n, _] = input.dims();
            let t = input.clone().slice([0..n, 0..1]);
            let s = input.slice([0..n, 1..2]);
            t.powf_scalar(3.0) + s.mul_scalar(2.0)
        }

        fn jet(&self, input: Tensor<B, 2>, direction: Tensor<B, 2>) -> Jet<B> {
            let [n, _] = input.dims();
            let t = input.clone().slice([0..n, 0..1]);
            let dt = direction.clone().slice([0..n, 0..1]);
            let ds = direction.slice([0..n, 1..2]);
            let value = self.forward(input);
            let first = t.clone().powf_scalar(2.0).mul_scalar(3.0) * dt.clone() + ds.mul_scalar(2.0);
            let second = t.mul_scalar(6.0) * dt.clone() * dt;
            Jet {
                value,
                first,
                second,
            }
        }
    }

    #[test]
    fn unit_direction_selects_one_column() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 2>::zeros([3, 2], &device);
        let direction = unit_direction(&input, 1);
        let values = direction.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn derivatives_along_time_column() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 2>::from_floats([[2.0, 5.0]], &device);
        let jet = derivatives_along(&Cubic, input, 0);
        let first: f32 = jet.first.into_scalar().elem();
        let second: f32 = jet.second.into_scalar().elem();
        assert!((first - 12.0).abs() < 1e-5);
        assert!((second - 12.0).abs() < 1e-5);
    }

    #[test]
    fn reverse_mode_gradient_matches_analytic() {
        let device = Default::default();
        let input = Tensor::<TestAutodiffBackend, 2>::from_floats([[1.0, 0.0], [3.0, 1.0]], &device);
        let grad = input_gradient(&Cubic, input);
        let values = grad.into_data().to_vec::<f32>().unwrap();
        let expected = [3.0, 2.0, 27.0, 2.0];
        for (v, e) in values.iter().zip(expected) {
            assert!((v - e).abs() < 1e-4, "{v} != {e}");
        }
    }
}
