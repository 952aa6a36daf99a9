//! Service launchers

use std::{future::Future, io, path::PathBuf, process::ExitCode};

use clap::{builder::PossibleValuesParser, Arg, ArgAction, ArgMatches, Command, ValueHint};
use futures::future::{self, Either};
use tokio::runtime::{Builder, Runtime};

use crate::{
    config::{get_default_config_path, ConfigOverride},
    crypto::available_ciphers,
    monitor,
};

pub mod local;
pub mod server;

/// Options shared by both binaries
fn define_common_options(mut app: Command) -> Command {
    app = app
        .arg(
            Arg::new("CONFIG")
                .short('c')
                .long("config")
                .num_args(1)
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(ValueHint::FilePath)
                .help("Shadowsocks configuration file, defaults to config.json"),
        )
        .arg(
            Arg::new("SERVER_ADDR")
                .short('s')
                .long("server-addr")
                .num_args(1)
                .action(ArgAction::Set)
                .help("Server address, an IP address, a domain name or \"host:port\""),
        )
        .arg(
            Arg::new("SERVER_PORT")
                .short('p')
                .long("server-port")
                .num_args(1)
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(u16))
                .help("Server port"),
        )
        .arg(
            Arg::new("PASSWORD")
                .short('k')
                .long("password")
                .num_args(1)
                .action(ArgAction::Set)
                .help("Server's password"),
        )
        .arg(
            Arg::new("ENCRYPT_METHOD")
                .short('m')
                .long("encrypt-method")
                .num_args(1)
                .action(ArgAction::Set)
                .value_parser(PossibleValuesParser::new(available_ciphers()))
                .ignore_case(true)
                .help("Server's encryption method"),
        )
        .arg(
            Arg::new("TIMEOUT")
                .short('t')
                .long("timeout")
                .num_args(1)
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(u64).range(1..))
                .help("Idle timeout seconds of TCP sessions and UDP flows"),
        );

    #[cfg(feature = "logging")]
    {
        app = app
            .arg(
                Arg::new("VERBOSE")
                    .short('v')
                    .action(ArgAction::Count)
                    .help("Set log level"),
            )
            .arg(
                Arg::new("LOG_WITHOUT_TIME")
                    .long("log-without-time")
                    .action(ArgAction::SetTrue)
                    .help("Log without datetime prefix"),
            )
            .arg(
                Arg::new("LOG_CONFIG")
                    .long("log-config")
                    .num_args(1)
                    .action(ArgAction::Set)
                    .value_parser(clap::value_parser!(PathBuf))
                    .value_hint(ValueHint::FilePath)
                    .help("log4rs configuration file"),
            );
    }

    #[cfg(feature = "multi-threaded")]
    {
        app = app
            .arg(
                Arg::new("SINGLE_THREADED")
                    .long("single-threaded")
                    .action(ArgAction::SetTrue)
                    .conflicts_with("WORKER_THREADS")
                    .help("Run the program all in one thread"),
            )
            .arg(
                Arg::new("WORKER_THREADS")
                    .long("worker-threads")
                    .num_args(1)
                    .action(ArgAction::Set)
                    .value_parser(clap::value_parser!(usize))
                    .help("Run on a multi-threaded runtime with this number of worker threads"),
            );
    }

    app
}

/// Configuration file given by `-c`, or the default one if it exists
fn config_path(matches: &ArgMatches) -> Option<PathBuf> {
    matches.get_one::<PathBuf>("CONFIG").cloned().or_else(|| match get_default_config_path() {
        None => None,
        Some(p) => {
            println!("loading default config {p:?}");
            Some(p)
        }
    })
}

/// Values of the common options that override the configuration file
fn common_overrides(matches: &ArgMatches) -> ConfigOverride {
    ConfigOverride {
        server: matches.get_one::<String>("SERVER_ADDR").cloned(),
        server_port: matches.get_one::<u16>("SERVER_PORT").cloned(),
        password: matches.get_one::<String>("PASSWORD").cloned(),
        method: matches.get_one::<String>("ENCRYPT_METHOD").cloned(),
        timeout: matches.get_one::<u64>("TIMEOUT").cloned(),
        ..Default::default()
    }
}

#[cfg(feature = "logging")]
fn init_logging(bin_name: &str, matches: &ArgMatches) {
    use crate::logging;

    match matches.get_one::<PathBuf>("LOG_CONFIG") {
        Some(path) => logging::init_with_file(path),
        None => logging::init_with_config(
            bin_name,
            matches.get_count("VERBOSE"),
            matches.get_flag("LOG_WITHOUT_TIME"),
        ),
    }
}

#[cfg(not(feature = "logging"))]
fn init_logging(_: &str, _: &ArgMatches) {}

/// Current-thread runtime, unless worker threads are requested
fn create_runtime(matches: &ArgMatches) -> io::Result<Runtime> {
    #[cfg(feature = "multi-threaded")]
    if !matches.get_flag("SINGLE_THREADED") {
        if let Some(worker_threads) = matches.get_one::<usize>("WORKER_THREADS") {
            return Builder::new_multi_thread()
                .worker_threads(*worker_threads)
                .enable_all()
                .build();
        }
    }

    #[cfg(not(feature = "multi-threaded"))]
    let _ = matches;

    Builder::new_current_thread().enable_all().build()
}

/// Run `server` until it fails or a signal arrives
fn run_until_signal<F>(runtime: Runtime, server: F) -> ExitCode
where
    F: Future<Output = io::Result<()>>,
{
    runtime.block_on(async move {
        let abort_signal = monitor::create_signal_monitor();

        tokio::pin!(abort_signal);
        tokio::pin!(server);

        match future::select(server, abort_signal).await {
            // Server future resolved without an error. This should never happen.
            Either::Left((Ok(..), ..)) => {
                eprintln!("server exited unexpectedly");
                crate::EXIT_CODE_SERVER_EXIT_UNEXPECTEDLY.into()
            }
            // Server future resolved with error, which are listener errors in most cases
            Either::Left((Err(err), ..)) => {
                eprintln!("server aborted with {err}");
                crate::EXIT_CODE_SERVER_ABORTED.into()
            }
            // The abort signal future resolved. Means we should just exit.
            Either::Right(_) => ExitCode::SUCCESS,
        }
    })
}
