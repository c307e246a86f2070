//! # 物理情報ニューラルネットワーク (PINN) 実験プログラム
//!
//! `burn` フレームワークを使用して、減衰振動子とKdV方程式を題材に
//! PINN・HNN・PHNNを学習するサンプルです。
//!
//! ## 使い方
//!
//! ```bash
//! cargo run --release -- pinn --variant physics
//! cargo run --release -- hamiltonian --variant phnn
//! cargo run --release -- kdv --variant phnn
//! cargo run --release -- infer
//! ```

use clap::Parser;
use phnn::cli::{Cli, Commands};
use phnn::experiment::{self, load_or_default};
use phnn::hamiltonian::HamiltonianConfig;
use phnn::inference;
use phnn::kdv::KdvConfig;
use phnn::model::ModelConfig;
use phnn::oscillator::OscillatorConfig;
use phnn::training::TrainingConfig;

/// プログラムのエントリーポイント。
///
/// コマンドライン引数を解析し、各実験の処理に振り分けます。
fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Pinn {
            variant,
            config,
            model,
            training,
        } => {
            let config = load_or_default(config.as_deref(), OscillatorConfig::new)?;
            let model = load_or_default(model.as_deref(), || ModelConfig::new(1, 1))?;
            let training = load_or_default(training.as_deref(), TrainingConfig::new)?;
            experiment::run_pinn(*variant, &config, &model, &training, &cli.out)?;
        }
        Commands::Hamiltonian {
            variant,
            config,
            oscillator,
            model,
            training,
        } => {
            let config = load_or_default(config.as_deref(), HamiltonianConfig::new)?;
            let oscillator = load_or_default(oscillator.as_deref(), OscillatorConfig::new)?;
            let model = load_or_default(model.as_deref(), || ModelConfig::new(2, 1))?;
            let training = load_or_default(training.as_deref(), || {
                TrainingConfig::new().with_num_iterations(3000)
            })?;
            experiment::run_hamiltonian(*variant, &config, &oscillator, &model, &training, &cli.out)?;
        }
        Commands::Kdv {
            variant,
            config,
            model,
            training,
        } => {
            let config = load_or_default(config.as_deref(), KdvConfig::new)?;
            let model = load_or_default(model.as_deref(), || ModelConfig::new(3, 1))?;
            let training = load_or_default(training.as_deref(), || {
                TrainingConfig::new().with_num_iterations(2000).with_log_interval(100)
            })?;
            experiment::run_kdv(*variant, &config, &model, &training, &cli.out)?;
        }
        Commands::Infer => {
            inference::run(&cli.out)?;
        }
        Commands::WriteConfig => {
            experiment::write_default_configs(&cli.out)?;
        }
    }

    Ok(())
}
