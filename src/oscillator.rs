//! 減衰調和振動子 `x'' + mu x' + k x = 0`（質量1）の厳密解。

use crate::error::{self, Error};
use burn::config::Config;

/// 振動子の実験設定。
#[derive(Config, Debug)]
pub struct OscillatorConfig {
    /// 減衰係数
    #[config(default = 0.4)]
    pub mu: f64,
    /// ばね定数
    #[config(default = 4.0)]
    pub k: f64,
    #[config(default = 20)]
    pub n_train: usize,
    #[config(default = 2.0)]
    pub t_max_train: f64,
    /// 物理損失のコロケーション点数
    #[config(default = 60)]
    pub n_physics: usize,
    #[config(default = 10.0)]
    pub t_max_physics: f64,
    #[config(default = 200)]
    pub n_test: usize,
    #[config(default = 10.0)]
    pub t_max_test: f64,
    /// パラメータ同定の観測データに加えるノイズの標準偏差
    #[config(default = 0.02)]
    pub noise_std: f64,
}

impl OscillatorConfig {
    /// 標本数と区間を検証してから振動子を作ります。
    pub fn system(&self) -> error::Result<DampedOscillator> {
        for (name, n) in [
            ("n_train", self.n_train),
            ("n_physics", self.n_physics),
            ("n_test", self.n_test),
        ] {
            if n == 0 {
                return Err(Error::invalid_parameter(format!("{name} must be positive")));
            }
        }
        for (name, t) in [
            ("t_max_train", self.t_max_train),
            ("t_max_physics", self.t_max_physics),
            ("t_max_test", self.t_max_test),
        ] {
            if !(t.is_finite() && t > 0.0) {
                return Err(Error::invalid_parameter(format!(
                    "{name} must be positive and finite, got {t}"
                )));
            }
        }
        if !(self.noise_std.is_finite() && self.noise_std >= 0.0) {
            return Err(Error::invalid_parameter(format!(
                "noise_std must be non-negative, got {}",
                self.noise_std
            )));
        }
        DampedOscillator::new(self.mu, self.k)
    }

    /// パラメータ同定の観測時刻。
    ///
    /// `(0, t_max_physics)` を`n_train`等分した区間の中点に取り、コロケーション点
    /// `linspace(0, t_max_physics, n_physics)` から刻みの1/4以上離します。
    pub fn observation_times(&self) -> Vec<f64> {
        let t_max = self.t_max_physics;
        let n = self.n_train.max(1) as f64;
        let spacing = if self.n_physics > 1 {
            t_max / (self.n_physics - 1) as f64
        } else {
            0.0
        };
        (0..self.n_train)
            .map(|i| {
                let t = (i as f64 + 0.5) * t_max / n;
                if spacing == 0.0 {
                    return t;
                }
                let nearest = (t / spacing).round() * spacing;
                let gap = 0.25 * spacing;
                if (t - nearest).abs() >= gap {
                    t
                } else if nearest + gap < t_max && (t >= nearest || nearest - gap <= 0.0) {
                    nearest + gap
                } else {
                    nearest - gap
                }
            })
            .collect()
    }
}

/// 不足減衰の振動子。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DampedOscillator {
    mu: f64,
    k: f64,
}

impl DampedOscillator {
    /// `k > 0`, `mu >= 0` かつ不足減衰 (`mu/2 < sqrt(k)`) でなければエラーを返します。
    pub fn new(mu: f64, k: f64) -> error::Result<Self> {
        if !(k.is_finite() && k > 0.0) {
            return Err(Error::invalid_parameter(format!("stiffness must be positive, got k={k}")));
        }
        if !(mu.is_finite() && mu >= 0.0) {
            return Err(Error::invalid_parameter(format!(
                "damping must be non-negative, got mu={mu}"
            )));
        }
        if mu / 2.0 >= k.sqrt() {
            return Err(Error::invalid_parameter(format!(
                "system is not underdamped: mu/2={} >= sqrt(k)={}",
                mu / 2.0,
                k.sqrt()
            )));
        }
        Ok(Self { mu, k })
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    fn decay(&self) -> f64 {
        self.mu / 2.0
    }

    /// 減衰振動の角振動数 `sqrt(k - mu^2/4)`
    pub fn frequency(&self) -> f64 {
        (self.k - self.decay() * self.decay()).sqrt()
    }

    /// 初期条件 `(q0, p0)`（位置、速度）からの時刻`t`の状態 `(q, p)`。
    ///
    /// `q = e^{-dt} (A cos wt + B sin wt)`, `A = q0`, `B = (p0 + d q0) / w`
    pub fn state_at(&self, t: f64, q0: f64, p0: f64) -> [f64; 2] {
        let d = self.decay();
        let w = self.frequency();
        let a = q0;
        let b = (p0 + d * q0) / w;
        let (sin, cos) = (w * t).sin_cos();
        let envelope = (-d * t).exp();
        let q = envelope * (a * cos + b * sin);
        let p = envelope * ((w * b - d * a) * cos - (d * b + w * a) * sin);
        [q, p]
    }

    /// `x(0) = 1`, `x'(0) = 0` の解。
    pub fn position(&self, t: f64) -> f64 {
        self.state_at(t, 1.0, 0.0)[0]
    }

    /// 厳密解を解析的に微分して代入した残差 `x'' + mu x' + k x`。
    pub fn residual(&self, t: f64) -> f64 {
        let [q, p] = self.state_at(t, 1.0, 0.0);
        let d = self.decay();
        let w = self.frequency();
        let b = d / w;
        let c1 = w * b - d;
        let c2 = -(d * b + w);
        let (sin, cos) = (w * t).sin_cos();
        let acceleration = -d * p + (-d * t).exp() * w * (c2 * cos - c1 * sin);
        acceleration + self.mu * p + self.k * q
    }

    /// 相空間のベクトル場 `(q', p') = (p, -k q - mu p)`。
    pub fn vector_field(&self, state: [f64; 2]) -> [f64; 2] {
        let [q, p] = state;
        [p, -self.k * q - self.mu * p]
    }

    /// 減衰がない場合に保存されるエネルギー `p^2/2 + k q^2/2`。
    pub fn hamiltonian(&self, state: [f64; 2]) -> f64 {
        let [q, p] = state;
        0.5 * p * p + 0.5 * self.k * q * q
    }

    /// `[0, t_max]`を等間隔に`n`点取った時刻と位置。
    pub fn sample(&self, n: usize, t_max: f64) -> (Vec<f64>, Vec<f64>) {
        let times = linspace(0.0, t_max, n);
        let positions = times.iter().map(|&t| self.position(t)).collect();
        (times, positions)
    }
}

/// 両端を含む等間隔の点列。
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + i as f64 * step).collect()
        }
    }
}
