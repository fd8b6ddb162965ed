use clap::Args;
use miette::{Context, Result};
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct ExtractArgs {
    /// An input EME file
    #[arg(value_name = "ARCHIVE")]
    file: PathBuf,

    /// A target directory, created when missing
    #[arg(value_name = "OUTPUT_DIR")]
    directory: PathBuf,
}

impl ExtractArgs {
    pub fn handle(&self) -> Result<()> {
        info!(
            "extracting {} into {}",
            self.file.display(),
            self.directory.display()
        );

        emon_eme::unpack(&self.file, &self.directory)
            .context(format!("path: {}", self.file.display()))
    }
}
