//! 古典的な4段4次のルンゲ＝クッタ法（固定刻み）。
//!
//! ```text
//! k1 = f(t,        y)
//! k2 = f(t + dt/2, y + dt/2 k1)
//! k3 = f(t + dt/2, y + dt/2 k2)
//! k4 = f(t + dt,   y + dt k3)
//! y' = y + dt/6 (k1 + 2 k2 + 2 k3 + k4)
//! ```
//!
//! 刻み幅制御や誤差推定は行いません。学習後の軌道比較にのみ使用します。

use crate::error::{Error, Result};

/// 各ステップの時刻と状態。
#[derive(Debug, Clone)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub states: Vec<Vec<f64>>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn last(&self) -> Option<&[f64]> {
        self.states.last().map(Vec::as_slice)
    }
}

fn axpy(y: &[f64], a: f64, k: &[f64]) -> Vec<f64> {
    y.iter().zip(k).map(|(y, k)| y + a * k).collect()
}

/// 1ステップだけ進めます。
pub fn rk4_step<F>(field: &mut F, t: f64, y: &[f64], dt: f64) -> Vec<f64>
where
    F: FnMut(f64, &[f64]) -> Vec<f64>,
{
    let half = 0.5 * dt;
    let k1 = field(t, y);
    let k2 = field(t + half, &axpy(y, half, &k1));
    let k3 = field(t + half, &axpy(y, half, &k2));
    let k4 = field(t + dt, &axpy(y, dt, &k3));
    y.iter()
        .enumerate()
        .map(|(i, y)| y + dt / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]))
        .collect()
}

/// 初期状態`y0`から時刻`horizon`まで積分し、初期状態を含む全ステップの状態を返します。
///
/// ステップ数は`round(horizon / dt)`で、実際の刻みは最終時刻が`horizon`に
/// 一致するように調整されます。
pub fn integrate<F>(mut field: F, y0: &[f64], horizon: f64, dt: f64) -> Result<Trajectory>
where
    F: FnMut(f64, &[f64]) -> Vec<f64>,
{
    if !(dt.is_finite() && dt > 0.0) {
        return Err(Error::invalid_argument(format!(
            "step size must be positive and finite, got {dt}"
        )));
    }
    if !(horizon.is_finite() && horizon >= 0.0) {
        return Err(Error::invalid_argument(format!(
            "horizon must be non-negative and finite, got {horizon}"
        )));
    }

    let steps = (horizon / dt).round() as usize;
    let dt = if steps == 0 { 0.0 } else { horizon / steps as f64 };

    let mut times = Vec::with_capacity(steps + 1);
    let mut states = Vec::with_capacity(steps + 1);
    times.push(0.0);
    states.push(y0.to_vec());
    for n in 0..steps {
        let t = n as f64 * dt;
        let next = rk4_step(&mut field, t, &states[n], dt);
        if next.len() != y0.len() {
            return Err(Error::Shape {
                expected: format!("state of length {}", y0.len()),
                actual: format!("vector field output of length {}", next.len()),
            });
        }
        times.push((n + 1) as f64 * dt);
        states.push(next);
    }
    Ok(Trajectory { times, states })
}
