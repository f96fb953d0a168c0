use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "plinder-stratify",
    version,
    about = "Annotate and stratify a test set by similarity to its training set"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Stratify(StratifyArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StratifyArgs {
    /// Split table with `system_id` and `split` columns.
    #[arg(long)]
    pub split_file: PathBuf,

    #[arg(long)]
    pub data_dir: PathBuf,

    /// Where per-metric similarity caches and the stratified table are written.
    #[arg(long)]
    pub output_dir: PathBuf,

    #[arg(long, default_value = "train")]
    pub train_label: String,

    #[arg(long, default_value = "test")]
    pub test_label: String,

    /// Recompute per-metric similarities even when a cache entry exists.
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub similarity_db: Option<PathBuf>,

    #[arg(long)]
    pub annotation_db: Option<PathBuf>,

    #[arg(long)]
    pub fingerprint_db: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long)]
    pub output_dir: PathBuf,

    #[arg(long, default_value = "train")]
    pub train_label: String,

    #[arg(long, default_value = "test")]
    pub test_label: String,

    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl StratifyArgs {
    pub fn similarity_db_path(&self) -> PathBuf {
        self.similarity_db
            .clone()
            .unwrap_or_else(|| self.data_dir.join("scores").join("similarity.sqlite"))
    }

    pub fn annotation_db_path(&self) -> PathBuf {
        self.annotation_db
            .clone()
            .unwrap_or_else(|| self.data_dir.join("index").join("annotation_table.sqlite"))
    }

    pub fn fingerprint_db_path(&self) -> PathBuf {
        self.fingerprint_db.clone().unwrap_or_else(|| {
            self.data_dir
                .join("fingerprints")
                .join("ligands_per_system.sqlite")
        })
    }
}
