//! ipv6-dhcpctl: drive a running server over its control socket

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(name = "ipv6-dhcpctl")]
#[command(version, about = "Control a running DHCPv6 server", long_about = None)]
struct Cli {
    /// The control socket of the server
    #[arg(short = 'c', long = "control-socket", default_value = "/var/run/ipv6-dhcpd.sock")]
    socket: PathBuf,

    /// The command to send (help, shutdown, reload, stats, stats-json)
    command: String,

    /// Extra command arguments
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut line = cli.command.clone();
    for arg in &cli.args {
        line.push(' ');
        line.push_str(arg);
    }

    match run(&cli.socket, &line).await {
        Ok(success) => {
            if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(error) => {
            eprintln!("ipv6-dhcpctl: {}", error);
            ExitCode::from(2)
        }
    }
}

/// Send one command and print the response. Returns false when the server
/// answered with an error.
async fn run(socket: &std::path::Path, command: &str) -> std::io::Result<bool> {
    let mut stream = UnixStream::connect(socket).await?;
    stream.write_all(command.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.shutdown().await?;

    let mut lines = BufReader::new(stream).lines();
    let mut success = true;
    let mut saw_output = false;
    while let Some(line) = lines.next_line().await? {
        saw_output = true;
        if line == "." {
            // End of a multi-line block
            break;
        }
        if line.starts_with("ERR") {
            success = false;
        }
        println!("{}", line);
    }

    if !saw_output {
        eprintln!("ipv6-dhcpctl: server closed the connection without answering");
        return Ok(false);
    }
    Ok(success)
}
