use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// clapでコマンドラインの構造を定義します。
#[derive(Parser, Debug)]
#[command(author, version, about = "Physics-informed and Hamiltonian neural network experiments with Burn", long_about = None)]
pub struct Cli {
    /// 結果（モデル、設定、レポート）を保存するディレクトリ
    #[arg(long, global = true, default_value = "artifacts")]
    pub out: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

/// 実行するサブコマンドを定義します。
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 減衰振動子のPINNを学習し、モデルとレポートを保存します
    Pinn {
        #[arg(long, value_enum, default_value_t = PinnVariant::Physics)]
        variant: PinnVariant,
        /// 振動子の設定ファイル（JSON）
        #[arg(long)]
        config: Option<PathBuf>,
        /// ネットワーク構成の設定ファイル（JSON、入出力次元は無視されます）
        #[arg(long)]
        model: Option<PathBuf>,
        /// 学習ループの設定ファイル（JSON）
        #[arg(long)]
        training: Option<PathBuf>,
    },
    /// 振動子の相空間ベクトル場をHNN/PHNNで学習します
    Hamiltonian {
        #[arg(long, value_enum, default_value_t = HamiltonianVariant::Phnn)]
        variant: HamiltonianVariant,
        /// 学習データとロールアウトの設定ファイル（JSON）
        #[arg(long)]
        config: Option<PathBuf>,
        /// 振動子の設定ファイル（JSON）
        #[arg(long)]
        oscillator: Option<PathBuf>,
        #[arg(long)]
        model: Option<PathBuf>,
        #[arg(long)]
        training: Option<PathBuf>,
    },
    /// KdV方程式の擬ハミルトニアンモデルを学習します
    Kdv {
        #[arg(long, value_enum, default_value_t = KdvVariant::Phnn)]
        variant: KdvVariant,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        model: Option<PathBuf>,
        #[arg(long)]
        training: Option<PathBuf>,
    },
    /// 保存されたPINNモデルを使い、推論を実行します
    Infer,
    /// 既定の設定をJSONファイルとして書き出します
    WriteConfig,
}

/// PINN実験の種類。
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinnVariant {
    /// データ損失のみ
    Data,
    /// データ損失 + 物理損失
    Physics,
    /// 物理定数も同時に推定
    Discovery,
}

impl PinnVariant {
    /// レポートのファイル名に使う名前。
    pub fn name(&self) -> &'static str {
        match self {
            PinnVariant::Data => "data",
            PinnVariant::Physics => "physics",
            PinnVariant::Discovery => "discovery",
        }
    }
}

/// 相空間ベクトル場のモデルの種類。
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HamiltonianVariant {
    /// 時間微分を直接予測するMLP
    Baseline,
    /// 保存系のハミルトニアンニューラルネットワーク
    Hnn,
    /// 学習可能な散逸項付きのHNN
    Phnn,
}

impl HamiltonianVariant {
    pub fn name(&self) -> &'static str {
        match self {
            HamiltonianVariant::Baseline => "baseline",
            HamiltonianVariant::Hnn => "hnn",
            HamiltonianVariant::Phnn => "phnn",
        }
    }
}

/// KdVモデルの種類。
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdvVariant {
    /// 近傍の値から時間微分を直接予測するMLP
    Baseline,
    /// 中心差分と学習したハミルトニアン勾配の積
    Phnn,
}

impl KdvVariant {
    pub fn name(&self) -> &'static str {
        match self {
            KdvVariant::Baseline => "baseline",
            KdvVariant::Phnn => "phnn",
        }
    }
}
