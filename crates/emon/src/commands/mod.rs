pub mod create;
pub mod extract;
pub mod list;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Extract an EME archive into a directory
    Extract(extract::ExtractArgs),
    /// Create an EME archive from a directory
    Create(create::CreateArgs),
    /// List the entries of an EME archive
    List(list::ListArgs),
}

impl Commands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            Commands::Extract(extract) => extract.handle(),
            Commands::Create(create) => create.handle(),
            Commands::List(list) => list.handle(),
        }
    }
}
