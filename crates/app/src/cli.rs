use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Start serving without applying pending database migrations.
    #[arg(long, default_value_t = false)]
    pub skip_migrations: bool,
}
