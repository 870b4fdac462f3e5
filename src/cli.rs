//! Flat CLI surface, five flags, no subcommands.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "todoforai-edge", about = "Edge agent connecting local tools to the coordination server")]
pub struct Cli {
    #[arg(long, env = "TODOFORAI_API_KEY")]
    pub api_key: Option<String>,

    #[arg(long, env = "TODOFORAI_API_URL")]
    pub api_url: Option<String>,

    #[arg(long)]
    pub debug: bool,

    #[arg(long = "add-path")]
    pub add_path: Option<String>,

    #[arg(short = 'v', long)]
    pub version: bool,
}
