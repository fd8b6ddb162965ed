use clap::Args;
use miette::{Context, IntoDiagnostic, Result};
use owo_colors::{OwoColorize, Stream::Stdout};
use std::{fs::File, io::BufReader, path::PathBuf};

use emon_eme::{EmeArchive, Subtype};

#[derive(Args)]
pub struct ListArgs {
    /// An input EME file
    #[arg(value_name = "ARCHIVE")]
    file: PathBuf,
}

impl ListArgs {
    pub fn handle(&self) -> Result<()> {
        let f = File::open(&self.file)
            .into_diagnostic()
            .context(format!("path: {}", self.file.display()))?;
        let eme = EmeArchive::new(BufReader::new(f))?;

        if !eme.schedule().is_zero() {
            let key = eme.schedule().to_hex();
            println!("key {}", key.if_supports_color(Stdout, |k| k.dimmed()));
        }

        for (i, entry) in eme.entries().iter().enumerate() {
            let name = format!("{:<32}", entry.name());
            let subtype = format!("{:<6}", entry.subtype());
            let subtype = match entry.subtype() {
                Subtype::Script => subtype.if_supports_color(Stdout, |s| s.green()).to_string(),
                Subtype::Bitmap => subtype.if_supports_color(Stdout, |s| s.cyan()).to_string(),
                Subtype::Audio => subtype.if_supports_color(Stdout, |s| s.yellow()).to_string(),
                Subtype::Blob => subtype.if_supports_color(Stdout, |s| s.magenta()).to_string(),
            };

            println!(
                "{:>4} {} {} {:>10} {:>10} {:#010x} {:#010x}",
                i,
                name.if_supports_color(Stdout, |n| n.bold()),
                subtype,
                entry.packed_size(),
                entry.unpacked_size(),
                entry.offset(),
                entry.magic(),
            );
        }

        Ok(())
    }
}
