//! 周期境界条件を持つ一様格子上の差分作用素。
//!
//! 作用素はすべて巡回行列（circulant）で、ステンシル（オフセットと重み）
//! として保持します。密行列やテンソルへの変換は必要なときだけ行います。

use burn::prelude::Backend;
use burn::tensor::Tensor;

/// 長さ`length`の周期区間を`points`等分した格子。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodicGrid {
    pub points: usize,
    pub length: f64,
}

impl PeriodicGrid {
    pub fn new(points: usize, length: f64) -> Self {
        assert!(points >= 3, "a periodic stencil grid needs at least 3 points");
        Self { points, length }
    }

    pub fn dx(&self) -> f64 {
        self.length / self.points as f64
    }

    pub fn coordinates(&self) -> Vec<f64> {
        (0..self.points).map(|i| i as f64 * self.dx()).collect()
    }

    /// 前進差分 `(u_{i+1} - u_i) / dx`
    pub fn forward(&self) -> Circulant {
        let dx = self.dx();
        Circulant::new(self.points, vec![(0, -1.0 / dx), (1, 1.0 / dx)])
    }

    /// 中心差分 `(u_{i+1} - u_{i-1}) / 2dx`。歪対称です。
    pub fn central(&self) -> Circulant {
        let dx = self.dx();
        Circulant::new(self.points, vec![(-1, -0.5 / dx), (1, 0.5 / dx)])
    }

    /// 2階中心差分 `(u_{i+1} - 2u_i + u_{i-1}) / dx^2`
    pub fn second_central(&self) -> Circulant {
        let dx2 = self.dx() * self.dx();
        Circulant::new(
            self.points,
            vec![(-1, 1.0 / dx2), (0, -2.0 / dx2), (1, 1.0 / dx2)],
        )
    }

    /// `(S u)_i = u_{i+offset}`
    pub fn shift(&self, offset: isize) -> Circulant {
        Circulant::new(self.points, vec![(offset, 1.0)])
    }
}

/// ステンシルで表した巡回行列。`(A u)_i = Σ w u_{(i + offset) mod n}`。
#[derive(Debug, Clone, PartialEq)]
pub struct Circulant {
    size: usize,
    stencil: Vec<(isize, f64)>,
}

impl Circulant {
    pub fn new(size: usize, stencil: Vec<(isize, f64)>) -> Self {
        Self { size, stencil }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn wrap(&self, i: usize, offset: isize) -> usize {
        (i as isize + offset).rem_euclid(self.size as isize) as usize
    }

    pub fn apply(&self, u: &[f64]) -> Vec<f64> {
        assert_eq!(u.len(), self.size, "operator size and vector length differ");
        (0..self.size)
            .map(|i| {
                self.stencil
                    .iter()
                    .map(|&(offset, w)| w * u[self.wrap(i, offset)])
                    .sum()
            })
            .collect()
    }

    pub fn transpose(&self) -> Self {
        Self::new(
            self.size,
            self.stencil.iter().map(|&(o, w)| (-o, w)).collect(),
        )
    }

    /// 行優先の密行列。
    pub fn to_dense(&self) -> Vec<f64> {
        let n = self.size;
        let mut dense = vec![0.0; n * n];
        for i in 0..n {
            for &(offset, w) in &self.stencil {
                dense[i * n + self.wrap(i, offset)] += w;
            }
        }
        dense
    }

    /// 密行列を`[n, n]`のテンソルとして返します。
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let data: Vec<f32> = self.to_dense().into_iter().map(|v| v as f32).collect();
        Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([self.size, self.size])
    }

    pub fn is_skew_symmetric(&self, tolerance: f64) -> bool {
        let n = self.size;
        let dense = self.to_dense();
        (0..n).all(|i| (0..n).all(|j| (dense[i * n + j] + dense[j * n + i]).abs() <= tolerance))
    }
}

/// 行ごとに並んだ状態のバッチ`[batch, n]`に作用素を適用します（`u Aᵀ`）。
pub fn apply_to_rows<B: Backend>(operator: &Tensor<B, 2>, states: Tensor<B, 2>) -> Tensor<B, 2> {
    states.matmul(operator.clone().transpose())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn max_error(grid: &PeriodicGrid, op: &Circulant, exact: impl Fn(f64) -> f64) -> f64 {
        let x = grid.coordinates();
        let u: Vec<f64> = x.iter().map(|&x| (2.0 * PI * x / grid.length).sin()).collect();
        op.apply(&u)
            .iter()
            .zip(&x)
            .map(|(d, &x)| (d - exact(x)).abs())
            .fold(0.0, f64::max)
    }

    #[test]
    fn derivative_error_decreases_with_resolution() {
        let length = 2.0 * PI;
        let mut previous = [f64::INFINITY; 3];
        for points in [16, 32, 64, 128] {
            let grid = PeriodicGrid::new(points, length);
            let errors = [
                max_error(&grid, &grid.forward(), f64::cos),
                max_error(&grid, &grid.central(), f64::cos),
                max_error(&grid, &grid.second_central(), |x| -x.sin()),
            ];
            for (e, p) in errors.iter().zip(previous) {
                assert!(*e < p, "error {e} did not decrease from {p} at M={points}");
            }
            previous = errors;
        }
        assert!(previous[1] < 1e-3);
        assert!(previous[2] < 1e-3);
    }

    #[test]
    fn central_is_skew_and_second_is_negative_gram_of_forward() {
        let grid = PeriodicGrid::new(10, 5.0);
        assert!(grid.central().is_skew_symmetric(1e-12));
        assert!(!grid.forward().is_skew_symmetric(1e-12));

        let n = grid.points;
        let f = grid.forward().to_dense();
        let d2 = grid.second_central().to_dense();
        for i in 0..n {
            for j in 0..n {
                let gram: f64 = (0..n).map(|k| f[k * n + i] * f[k * n + j]).sum();
                assert!((d2[i * n + j] + gram).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn wrap_around_is_periodic() {
        let grid = PeriodicGrid::new(4, 4.0);
        let shifted = grid.shift(1).apply(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(shifted, vec![2.0, 3.0, 4.0, 1.0]);
        let back = grid.shift(1).transpose().apply(&shifted);
        assert_eq!(back, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn tensor_form_matches_stencil() {
        use burn::backend::NdArray;
        let device = Default::default();
        let grid = PeriodicGrid::new(6, 3.0);
        let op = grid.central();
        let u = [0.5, -1.0, 2.0, 0.0, 1.5, 3.0];
        let expected = op.apply(&u);

        let matrix = op.to_tensor::<NdArray<f32>>(&device);
        let u_f32: Vec<f32> = u.iter().map(|&v| v as f32).collect();
        let states = Tensor::<NdArray<f32>, 1>::from_floats(u_f32.as_slice(), &device).reshape([1, 6]);
        let got = apply_to_rows(&matrix, states).into_data().to_vec::<f32>().unwrap();
        for (g, e) in got.iter().zip(expected) {
            assert!((*g as f64 - e).abs() < 1e-5);
        }
    }
}
