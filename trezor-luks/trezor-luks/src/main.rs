use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use device::DeviceSession;
use device::trezor::{TrezorBackend, TrezorOptions};
use env_logger::Env;
use nix::errno::Errno;

mod channel;
mod config;
mod cryptsetup;
mod error;
mod header;
mod operation;
mod pipeline;
mod prompt;

use config::Config;
use cryptsetup::{Cryptsetup, EncryptionTool, Stdin, Step};
use error::ParseError;
use operation::Invocation;
use pipeline::Pipeline;
use prompt::TerminalConfirmer;

/// Exit status for every failure after argument parsing, `-1` as a byte.
const FAILURE_STATUS: u8 = 255;
const USAGE_STATUS: u8 = Errno::EINVAL as i32 as u8;

/// cryptsetup wrapper that keeps LUKS keys on a Trezor.
///
/// The key for a volume is derived on the device from the volume's own
/// header, so nothing secret is stored on disk. Any cryptsetup arguments
/// are accepted; luksOpen, luksFormat, luksResume, luksAddKey and
/// luksChangeKey get their key from the device.
///
/// Options of this tool go before the cryptsetup arguments. Among those,
/// name the action before the device: `luksFormat --type luks1 /dev/sdb`.
#[derive(Debug, Parser)]
#[command(name = "trezor-luks", version, disable_help_flag = true)]
struct Cli {
    /// Print this help followed by cryptsetup's own
    #[arg(short = 'h', long = "help")]
    help: bool,

    /// Key name the device mixes into the derivation [default: luks]
    #[arg(long = "trezor-key-name", value_name = "NAME")]
    trezor_key_name: Option<String>,

    /// Arguments forwarded to cryptsetup
    #[arg(
        value_name = "CRYPTSETUP_ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    args: Vec<String>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            if let Err(print) = err.print() {
                log::warn!("failed to print argument error: {print}");
            }
            return ExitCode::from(parse_failure_status(&err));
        }
    };
    match run(cli, Config::load()) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Got error: {err:#}");
            ExitCode::from(FAILURE_STATUS)
        }
    }
}

fn parse_failure_status(err: &clap::Error) -> u8 {
    match err.kind() {
        ErrorKind::DisplayVersion => 0,
        _ => USAGE_STATUS,
    }
}

fn run(cli: Cli, loaded: Result<Config>) -> Result<u8> {
    if cli.help {
        let config = loaded.unwrap_or_else(|err| {
            log::warn!("{err:#}, showing usage with the default cryptsetup");
            Config::default()
        });
        return Ok(usage(&config));
    }
    let config = loaded?.with_key_name(cli.trezor_key_name)?;

    let invocation = match Invocation::parse(cli.args) {
        Ok(invocation) => invocation,
        Err(ParseError::NoOperation) => return Ok(usage(&config)),
        Err(err) => return Err(err).context("invalid cryptsetup arguments"),
    };

    let mut tool = Cryptsetup::new(config.cryptsetup.clone());
    match invocation {
        Invocation::Passthrough(args) => {
            log::debug!("not a device key operation, passing through");
            tool.run(Step::Passthrough, &args, Stdin::Inherit)?;
        }
        Invocation::Volume(operation) => {
            let options = TrezorOptions {
                derivation_path: config.derivation_path()?,
                ask_on_decrypt: config.ask_on_decrypt,
            };
            let backend = TrezorBackend::new(options).context("failed to open the HID subsystem")?;
            let session = DeviceSession::new(backend, TerminalConfirmer::stdio());

            Pipeline::new(config, tool, session)
                .run(&operation)
                .with_context(|| format!("{} {} failed", operation.kind, operation.device_path))?;
        }
    }

    log::info!("Done");
    Ok(0)
}

fn usage(config: &Config) -> u8 {
    let mut command = Cli::command();
    if let Err(err) = command.print_help() {
        log::warn!("failed to print usage: {err}");
    }
    eprintln!("\ncryptsetup usage:\n");

    if let Err(err) = Cryptsetup::new(config.cryptsetup.clone()).help() {
        log::warn!("{err}");
    }
    USAGE_STATUS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("trezor-luks").chain(argv.iter().copied()))
            .expect("parse")
    }

    #[test]
    fn cryptsetup_arguments_are_forwarded_verbatim() {
        let cli = parse(&["luksOpen", "/dev/sda2", "root", "--allow-discards"]);
        assert!(!cli.help);
        assert_eq!(cli.trezor_key_name, None);
        assert_eq!(cli.args, ["luksOpen", "/dev/sda2", "root", "--allow-discards"]);
    }

    #[test]
    fn own_options_come_first() {
        let cli = parse(&["--trezor-key-name", "backup", "luksFormat", "-q", "/dev/sdb"]);
        assert_eq!(cli.trezor_key_name.as_deref(), Some("backup"));
        assert_eq!(cli.args, ["luksFormat", "-q", "/dev/sdb"]);
    }

    #[test]
    fn help_flag_is_ours() {
        let cli = parse(&["-h"]);
        assert!(cli.help);
        assert!(cli.args.is_empty());
    }

    fn stub_config() -> Result<Config> {
        Ok(Config {
            cryptsetup: "true".into(),
            ..Config::default()
        })
    }

    #[test]
    fn help_shows_usage_and_exits_einval() {
        assert_eq!(run(parse(&["-h"]), stub_config()).expect("run"), 22);
    }

    #[test]
    fn arguments_without_an_action_show_usage() {
        assert_eq!(run(parse(&["-v", "open", "/dev/sdc", "data"]), stub_config()).expect("run"), 22);
        assert_eq!(run(parse(&[]), stub_config()).expect("run"), 22);
    }

    #[test]
    fn help_survives_a_broken_config() {
        let broken = Err(anyhow::anyhow!("failed to parse config"));
        assert_eq!(run(parse(&["-h"]), broken).expect("run"), 22);
    }

    #[test]
    fn broken_config_fails_real_operations() {
        let broken = Err(anyhow::anyhow!("failed to parse config"));
        assert!(run(parse(&["luksDump", "/dev/sdc"]), broken).is_err());
    }

    #[test]
    fn passthrough_reports_success() {
        assert_eq!(run(parse(&["luksUUID", "/dev/sdc"]), stub_config()).expect("run"), 0);
    }

    #[test]
    fn argument_errors_exit_einval() {
        let err = Cli::try_parse_from(["trezor-luks", "--trezor-key-name"]).unwrap_err();
        assert_eq!(parse_failure_status(&err), 22);
    }

    #[test]
    fn version_exits_cleanly() {
        let err = Cli::try_parse_from(["trezor-luks", "--version"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
        assert_eq!(parse_failure_status(&err), 0);
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
