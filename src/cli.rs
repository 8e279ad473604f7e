//! Command-line surface.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "zipline", version)]
#[clap(about = "Quick file, directory, and text transfer over the local network", long_about = None)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Share a file, directory, or text snippet
    Send(SendArgs),
    /// Receive uploads into a directory you control
    Host(HostArgs),
    /// Download from a zipline URL
    Receive(ReceiveArgs),
    /// Discover nearby zipline hosts via mDNS
    Search(SearchArgs),
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// File or directory to share
    pub path: Option<PathBuf>,

    /// Share a text snippet instead of a file
    #[clap(long, value_name = "TEXT", conflicts_with_all = ["stdin", "path"])]
    pub text: Option<String>,

    /// Read text content from stdin
    #[clap(long, conflicts_with = "path")]
    pub stdin: bool,

    /// Choose a specific port (default: random)
    #[clap(short, long, default_value_t = 0)]
    pub port: u16,

    /// Bind to a specific network interface
    #[clap(short, long)]
    pub interface: Option<String>,
}

#[derive(Args, Debug)]
pub struct HostArgs {
    /// Destination directory for uploads
    #[clap(short = 'd', long, default_value = ".")]
    pub dest: PathBuf,

    /// Choose a specific port (default: random)
    #[clap(short, long, default_value_t = 0)]
    pub port: u16,

    /// Bind to a specific network interface
    #[clap(short, long)]
    pub interface: Option<String>,
}

#[derive(Args, Debug)]
pub struct ReceiveArgs {
    /// Session URL, e.g. http://192.168.1.9:40123/d/<token>
    pub url: String,

    /// Write to a specific file or directory
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Overwrite existing files
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Seconds to wait for discovery
    #[clap(long, default_value_t = 3.0, value_name = "SECONDS")]
    pub timeout: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_send_with_path() {
        let cli = Cli::try_parse_from(["zipline", "send", "./photo.jpg"]).unwrap();
        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.path, Some(PathBuf::from("./photo.jpg")));
                assert!(args.text.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn rejects_text_combined_with_path() {
        assert!(Cli::try_parse_from(["zipline", "send", "--text", "hi", "./x"]).is_err());
    }

    #[test]
    fn parses_receive_flags() {
        let cli = Cli::try_parse_from([
            "zipline",
            "receive",
            "-f",
            "-o",
            "out.bin",
            "http://10.0.0.2:4000/d/abc",
        ])
        .unwrap();
        match cli.command {
            Command::Receive(args) => {
                assert!(args.force);
                assert_eq!(args.output, Some(PathBuf::from("out.bin")));
                assert_eq!(args.url, "http://10.0.0.2:4000/d/abc");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
