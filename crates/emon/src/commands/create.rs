use clap::Args;
use miette::{miette, Context, Result};
use std::path::PathBuf;
use tracing::info;

use emon_eme::PackOptions;

#[derive(Args)]
pub struct CreateArgs {
    /// An input directory
    #[arg(value_name = "INPUT_DIR")]
    directory: PathBuf,

    /// A target EME file
    #[arg(value_name = "ARCHIVE")]
    file: PathBuf,

    /// Encrypt the index and entry headers
    ///
    /// The key stored in the directory's `_metadata.json` is used when there is one, otherwise
    /// a new key is generated and saved there.
    #[arg(long, default_value_t = false)]
    encrypt: bool,
}

impl CreateArgs {
    pub fn handle(&self) -> Result<()> {
        if !self.directory.is_dir() {
            return Err(miette!(
                "{} is not a directory",
                self.directory.display()
            ));
        }

        info!("creating {}", self.file.display());

        emon_eme::pack_directory(
            &self.directory,
            &self.file,
            PackOptions::builder().encrypt(self.encrypt).build(),
        )
        .context(format!("creating {}", self.file.display()))
    }
}
