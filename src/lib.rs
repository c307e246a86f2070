//! # 物理情報ニューラルネットワーク (PINN) / ハミルトニアンニューラルネットワーク ライブラリ
//!
//! `burn` フレームワークを使用して、支配方程式の残差やハミルトニアン構造を損失関数・
//! モデルに組み込むことで、純粋なデータ駆動モデルより汎化性能が向上することを
//! 確かめるための実験一式を提供します。
//!
//! - 減衰振動子のPINN（データのみ / 物理損失付き / 物理定数の同定）
//! - 振動子の相空間ベクトル場を学習するHNN / PHNN
//! - KdV方程式の擬ハミルトニアンニューラルネットワーク

pub mod cli;
pub mod dataset;
pub mod derivatives;
pub mod error;
pub mod experiment;
pub mod finite_difference;
pub mod hamiltonian;
pub mod inference;
pub mod integrator;
pub mod kdv;
pub mod model;
pub mod oscillator;
pub mod pinn;
pub mod training;

pub use error::{Error, Result};

/// モデルを保存するファイル名
pub const MODEL_FILENAME: &str = "pinn_model.mpk";
