pub mod sync;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "group-sync",
    author,
    version,
    about = "Mirror prefixed gsuite groups into the CI registry",
    long_about = "Fetches the registry's groups and the gsuite groups carrying the configured \
                  prefix,\nrenames registry groups linked to a gsuite group and creates registry \
                  groups\nfor unlinked gsuite groups that have members."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run one group synchronization")]
    Sync(sync::SyncArgs),
}
