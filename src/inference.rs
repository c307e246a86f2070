use crate::MODEL_FILENAME;
use crate::dataset::column;
use crate::error::{Error, Result};
use crate::experiment::{InferBackend, MODEL_CONFIG_FILENAME, OSCILLATOR_CONFIG_FILENAME};
use crate::model::{Model, ModelConfig};
use crate::oscillator::{OscillatorConfig, linspace};
use burn::config::Config;
use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// 推論結果の要約。
#[derive(Debug, Clone)]
pub struct InferenceSummary {
    pub points: usize,
    pub mse: f64,
    pub max_abs_error: f64,
}

/// 保存済みモデルを`out`から読み込みます。
pub fn load_model(out: &Path) -> Result<(Model<InferBackend>, OscillatorConfig)> {
    let device = Default::default();
    let path = out.join(MODEL_FILENAME);
    if !path.exists() {
        return Err(Error::ModelNotFound(path));
    }
    let model_config = ModelConfig::load(out.join(MODEL_CONFIG_FILENAME))?;
    let config = OscillatorConfig::load(out.join(OSCILLATOR_CONFIG_FILENAME))?;

    info!("保存済みモデルを '{}' からロード中...", path.display());
    let model = model_config.init::<InferBackend>(&device).load_file(
        path,
        &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
        &device,
    )?;
    Ok((model, config))
}

/// `infer`サブコマンドを実行します。
///
/// テスト区間全体でモデルを評価し、厳密解との誤差を報告します。
pub fn run(out: &Path) -> Result<InferenceSummary> {
    let device = Default::default();
    let (model, config) = load_model(out)?;
    let system = config.system()?;

    info!("推論を実行します - バックエンド: NdArray (CPU)");
    let inference_start = Instant::now();

    let times = linspace(0.0, config.t_max_test, config.n_test);
    let predictions: Vec<f64> = model
        .forward(column::<InferBackend>(&times, &device))
        .into_data()
        .iter::<f32>()
        .map(f64::from)
        .collect();
    let inference_duration = inference_start.elapsed();

    let errors: Vec<f64> = times
        .iter()
        .zip(&predictions)
        .map(|(&t, p)| p - system.position(t))
        .collect();
    let summary = InferenceSummary {
        points: times.len(),
        mse: errors.iter().map(|e| e * e).sum::<f64>() / errors.len().max(1) as f64,
        max_abs_error: errors.iter().fold(0.0, |m, e| e.abs().max(m)),
    };

    info!(
        "推論が完了しました。評価点数: {}, MSE: {:.6e}, 最大誤差: {:.6e}",
        summary.points, summary.mse, summary.max_abs_error
    );
    info!("=> 推論時間: {:.2?}", inference_duration);

    Ok(summary)
}
