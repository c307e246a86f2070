//! 複数軌道をまとめて学習用テンソルに変換するためのユーティリティ。

use crate::error::{Error, Result};
use burn::prelude::Backend;
use burn::tensor::Tensor;

/// `[trajectories, steps, dim]`の軌道集合を行優先で保持します。
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryBatch {
    pub trajectories: usize,
    pub steps: usize,
    pub dim: usize,
    pub values: Vec<f64>,
}

impl TrajectoryBatch {
    /// 各軌道が同じステップ数・同じ次元であることを確認してまとめます。
    pub fn from_trajectories(trajectories: &[Vec<Vec<f64>>]) -> Result<Self> {
        let steps = trajectories.first().map_or(0, Vec::len);
        let dim = trajectories
            .first()
            .and_then(|t| t.first())
            .map_or(0, Vec::len);
        let mut values = Vec::with_capacity(trajectories.len() * steps * dim);
        for (i, trajectory) in trajectories.iter().enumerate() {
            if trajectory.len() != steps {
                return Err(Error::Shape {
                    expected: format!("{steps} steps"),
                    actual: format!("{} steps in trajectory {i}", trajectory.len()),
                });
            }
            for state in trajectory {
                if state.len() != dim {
                    return Err(Error::Shape {
                        expected: format!("state dimension {dim}"),
                        actual: format!("{} in trajectory {i}", state.len()),
                    });
                }
                values.extend_from_slice(state);
            }
        }
        Ok(Self {
            trajectories: trajectories.len(),
            steps,
            dim,
            values,
        })
    }

    pub fn rows(&self) -> usize {
        self.trajectories * self.steps
    }

    /// `[trajectories * steps, dim]`のテンソルに平坦化します。
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let data: Vec<f32> = self.values.iter().map(|&v| v as f32).collect();
        Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([self.rows(), self.dim])
    }

    /// 平坦化されたテンソルを軌道数・ステップ数を指定して元の形に戻します。
    pub fn from_tensor<B: Backend>(
        tensor: Tensor<B, 2>,
        trajectories: usize,
        steps: usize,
    ) -> Result<Self> {
        let [rows, dim] = tensor.dims();
        if rows != trajectories * steps {
            return Err(Error::Shape {
                expected: format!("{trajectories} x {steps} = {} rows", trajectories * steps),
                actual: format!("{rows} rows"),
            });
        }
        let values = tensor
            .reshape([trajectories, steps, dim])
            .into_data()
            .iter::<f32>()
            .map(f64::from)
            .collect();
        Ok(Self {
            trajectories,
            steps,
            dim,
            values,
        })
    }

    pub fn trajectory(&self, index: usize) -> Vec<Vec<f64>> {
        let stride = self.steps * self.dim;
        self.values[index * stride..(index + 1) * stride]
            .chunks(self.dim)
            .map(<[f64]>::to_vec)
            .collect()
    }
}

/// 列ベクトル`[n, 1]`を作ります。
pub fn column<B: Backend>(values: &[f64], device: &B::Device) -> Tensor<B, 2> {
    let data: Vec<f32> = values.iter().map(|&v| v as f32).collect();
    Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([values.len(), 1])
}

/// 各行が同じ長さの行列`[rows, cols]`を作ります。
pub fn matrix<B: Backend>(rows: &[Vec<f64>], device: &B::Device) -> Tensor<B, 2> {
    let cols = rows.first().map_or(0, Vec::len);
    let data: Vec<f32> = rows.iter().flatten().map(|&v| v as f32).collect();
    Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([rows.len(), cols])
}

/// テンソルを行ごとの`Vec<f64>`に戻します。
pub fn to_rows<B: Backend>(tensor: Tensor<B, 2>) -> Vec<Vec<f64>> {
    let [_, cols] = tensor.dims();
    let values: Vec<f64> = tensor.into_data().iter::<f32>().map(f64::from).collect();
    values.chunks(cols.max(1)).map(<[f64]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn trajectories(n: usize, steps: usize) -> Vec<Vec<Vec<f64>>> {
        (0..n)
            .map(|i| {
                (0..steps)
                    .map(|s| vec![i as f64, s as f64 * 0.5])
                    .collect()
            })
            .collect()
    }

    #[test]
    fn flatten_and_split_recover_counts() {
        let device = Default::default();
        let batch = TrajectoryBatch::from_trajectories(&trajectories(3, 5)).unwrap();
        let tensor = batch.to_tensor::<TestBackend>(&device);
        assert_eq!(tensor.dims(), [15, 2]);

        let restored = TrajectoryBatch::from_tensor(tensor, 3, 5).unwrap();
        assert_eq!(restored.trajectories, 3);
        assert_eq!(restored.steps, 5);
        assert_eq!(restored, batch);
        assert_eq!(restored.trajectory(2)[4], vec![2.0, 2.0]);
    }

    #[test]
    fn split_with_wrong_counts_fails() {
        let device = Default::default();
        let batch = TrajectoryBatch::from_trajectories(&trajectories(2, 4)).unwrap();
        let tensor = batch.to_tensor::<TestBackend>(&device);
        assert!(matches!(
            TrajectoryBatch::from_tensor(tensor, 3, 4),
            Err(Error::Shape { .. })
        ));
    }

    #[test]
    fn ragged_trajectories_are_rejected() {
        let mut data = trajectories(2, 3);
        data[1].pop();
        assert!(TrajectoryBatch::from_trajectories(&data).is_err());
    }

    #[test]
    fn rows_round_trip_through_tensor() {
        let device = Default::default();
        let rows = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let tensor = matrix::<TestBackend>(&rows, &device);
        assert_eq!(tensor.dims(), [2, 3]);
        assert_eq!(to_rows(tensor), rows);
        assert_eq!(column::<TestBackend>(&[1.0, 2.0], &device).dims(), [2, 1]);
    }
}
