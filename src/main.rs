use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgGroup, Parser};

use rdtp::proto::{Method, TestCase};

/// File transfer over UDP with a choice of reliability protocols.
#[derive(Debug, Parser)]
#[command(version, about, group(ArgGroup::new("role").required(true)))]
struct Args {
    /// Run as the receiving server
    #[arg(short, long, group = "role")]
    server: bool,

    /// Run as the sending client
    #[arg(short, long, group = "role")]
    client: bool,

    /// Server IP address
    #[arg(short, long)]
    ip: IpAddr,

    /// Server port number
    #[arg(short, long)]
    port: u16,

    /// File to transfer (client only)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Reliability protocol
    #[arg(short, long, value_enum)]
    reliable: Method,

    /// Fault to inject for testing
    #[arg(short, long, value_enum)]
    test: Option<TestCase>,
}

impl Args {
    fn validate(&self) -> Result<(), String> {
        match self.test {
            Some(TestCase::Lose) if self.server => {
                return Err("'lose' can only be used with --client".into());
            }
            Some(TestCase::SkipAck) if self.client => {
                return Err("'skip_ack' can only be used with --server".into());
            }
            Some(TestCase::Double) if self.server => {
                return Err("'double' can only be used with --client".into());
            }
            Some(TestCase::Double) if self.reliable == Method::StopAndWait => {
                return Err("'double' is only defined for the windowed protocols".into());
            }
            _ => {}
        }

        if self.server && self.file.is_some() {
            return Err("--file is only valid for the client".into());
        }
        if self.client && self.file.is_none() {
            return Err("--file is required for the client".into());
        }

        Ok(())
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(msg) = args.validate() {
        eprintln!("Error: {msg}");
        return ExitCode::FAILURE;
    }

    let addr = SocketAddr::new(args.ip, args.port);

    let res = if args.server {
        rdtp::run_server(addr, args.reliable, args.test, Path::new(".")).map(|_| ())
    } else {
        let file = args.file.as_deref().expect("presence checked in validate");
        rdtp::run_client(addr, file, args.reliable, args.test)
    };

    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn role_is_required_and_exclusive() {
        let base = ["rdtp", "-i", "127.0.0.1", "-p", "8088", "-r", "gbn"];

        assert!(Args::try_parse_from(base).is_err());

        let mut both = base.to_vec();
        both.extend(["-s", "-c"]);
        assert!(Args::try_parse_from(both).is_err());

        let mut server = base.to_vec();
        server.push("-s");
        assert!(Args::try_parse_from(server).is_ok());
    }

    #[test]
    fn fault_injections_are_role_bound() {
        let server = Args::try_parse_from([
            "rdtp", "-s", "-i", "127.0.0.1", "-p", "8088", "-r", "gbn", "-t", "lose",
        ])
        .unwrap();
        assert!(server.validate().is_err());

        let client = Args::try_parse_from([
            "rdtp", "-c", "-i", "127.0.0.1", "-p", "8088", "-r", "gbn", "-f", "x", "-t", "lose",
        ])
        .unwrap();
        assert!(client.validate().is_ok());

        let skip = Args::try_parse_from([
            "rdtp", "-c", "-i", "127.0.0.1", "-p", "8088", "-r", "gbn", "-f", "x", "-t",
            "skip_ack",
        ])
        .unwrap();
        assert!(skip.validate().is_err());

        let double_sw = Args::try_parse_from([
            "rdtp", "-c", "-i", "127.0.0.1", "-p", "8088", "-r", "stop_and_wait", "-f", "x",
            "-t", "double",
        ])
        .unwrap();
        assert!(double_sw.validate().is_err());
    }

    #[test]
    fn file_is_for_clients_only() {
        let server = Args::try_parse_from([
            "rdtp", "-s", "-i", "127.0.0.1", "-p", "8088", "-r", "sr", "-f", "x",
        ])
        .unwrap();
        assert!(server.validate().is_err());

        let client = Args::try_parse_from([
            "rdtp", "-c", "-i", "127.0.0.1", "-p", "8088", "-r", "sr",
        ])
        .unwrap();
        assert!(client.validate().is_err());
    }
}
