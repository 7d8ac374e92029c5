use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "grapevine-server", about = "Grapevine social server")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/grapevine.toml")]
    pub config: String,
}
