use crate::bitrate;
use crate::config::Config;
use crate::global;
use crate::history::EndpointHistory;
use crate::session::SessionCommands;
use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "streamcast")]
#[command(about = "Point-to-point UDP audio streaming over ffmpeg", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Print version information
    Version,
    /// Probe the incoming stream's bitrate once and print it
    Probe(ProbeCliArgs),
    /// List recently used send targets
    History,
}

#[derive(ClapArgs, Debug)]
pub struct ProbeCliArgs {
    /// Probe timeout in seconds
    #[arg(long, default_value = "4")]
    pub timeout: u64,
}

pub async fn handle_probe_command(args: ProbeCliArgs) -> Result<()> {
    let config = Config::load()?;
    let recording_file = global::recording_file()?;
    let commands = SessionCommands::from_config(&config.tools, &config.stream, &recording_file)?;

    let sample = bitrate::probe_once(
        &commands.probe,
        std::time::Duration::from_secs(args.timeout),
    )
    .await?;

    match sample.bits_per_second {
        Some(bps) => println!("{} kbps", bps / 1000),
        None => println!("N/A (is the stream running?)"),
    }
    Ok(())
}

pub fn handle_history_command() -> Result<()> {
    let history = EndpointHistory::load(&global::history_file()?);
    if history.entries().is_empty() {
        println!("No send targets recorded yet.");
        return Ok(());
    }
    for entry in history.entries() {
        match &entry.label {
            Some(label) => println!("{}  ({})", entry.endpoint, label),
            None => println!("{}", entry.endpoint),
        }
    }
    Ok(())
}
