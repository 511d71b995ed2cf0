//! Command-line argument parsing (C12, §6/§10.4). Mirrors the original
//! `getopt` flag set one-for-one rather than inventing a friendlier surface,
//! since the protocol-level tools that drive this simulator script against
//! the exact short flags.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "wmediumd-rs", version, about = "802.11 wireless medium simulator")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,

    /// Per-rate packet-error-probability file, applied on top of the link model.
    #[arg(short = 'x', long = "per-file")]
    pub per_file: Option<PathBuf>,

    /// RFC 5424 numeric log level, 0 (emergency) through 7 (debug).
    #[arg(short = 'l', long = "level", default_value_t = 6)]
    pub level: u8,

    /// Unix-socket path accepting SPEED/STEP time-control commands.
    #[arg(short = 't', long = "time-socket")]
    pub time_socket: Option<PathBuf>,

    /// Vhost-user socket path.
    #[arg(short = 'u', long = "vhost-user-socket")]
    pub vhost_user_socket: Option<PathBuf>,

    /// API-socket path.
    #[arg(short = 'a', long = "api-socket")]
    pub api_socket: Option<PathBuf>,

    /// Force the kernel netlink transport even when a vhost-user socket is given.
    #[arg(short = 'n', long = "force-netlink")]
    pub force_netlink: bool,
}

/// Maps the RFC 5424 `-l` level onto a `log::LevelFilter`, per §10.1: 0-3 map
/// to `Error`, 4 to `Warn`, 5-6 to `Info`, 7 to `Debug`.
pub fn level_filter(level: u8) -> log::LevelFilter {
    match level {
        0..=3 => log::LevelFilter::Error,
        4 => log::LevelFilter::Warn,
        5 | 6 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filter_boundaries() {
        assert_eq!(level_filter(0), log::LevelFilter::Error);
        assert_eq!(level_filter(3), log::LevelFilter::Error);
        assert_eq!(level_filter(4), log::LevelFilter::Warn);
        assert_eq!(level_filter(5), log::LevelFilter::Info);
        assert_eq!(level_filter(6), log::LevelFilter::Info);
        assert_eq!(level_filter(7), log::LevelFilter::Debug);
        assert_eq!(level_filter(200), log::LevelFilter::Debug);
    }

    #[test]
    fn parses_minimal_required_args() {
        let cli = Cli::parse_from(["wmediumd-rs", "-c", "config.toml"]);
        assert_eq!(cli.config, PathBuf::from("config.toml"));
        assert_eq!(cli.level, 6);
        assert!(!cli.force_netlink);
    }

    #[test]
    fn parses_all_flags() {
        let cli = Cli::parse_from([
            "wmediumd-rs",
            "-c",
            "config.toml",
            "-x",
            "per.csv",
            "-l",
            "7",
            "-t",
            "/tmp/time.sock",
            "-u",
            "/tmp/vhost.sock",
            "-a",
            "/tmp/api.sock",
            "-n",
        ]);
        assert_eq!(cli.per_file, Some(PathBuf::from("per.csv")));
        assert_eq!(cli.level, 7);
        assert_eq!(cli.time_socket, Some(PathBuf::from("/tmp/time.sock")));
        assert_eq!(cli.vhost_user_socket, Some(PathBuf::from("/tmp/vhost.sock")));
        assert_eq!(cli.api_socket, Some(PathBuf::from("/tmp/api.sock")));
        assert!(cli.force_netlink);
    }
}
