//! Local server launchers

use std::{net::IpAddr, process::ExitCode};

use clap::{Arg, ArgAction, ArgMatches, Command};
use log::info;

use crate::{
    config::{Config, ConfigType},
    local,
};

/// Defines command line options
pub fn define_command_line_options(mut app: Command) -> Command {
    app = super::define_common_options(app)
        .arg(
            Arg::new("LOCAL_ADDR")
                .short('b')
                .long("local-addr")
                .num_args(1)
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(IpAddr))
                .help("Local address to listen on, defaults to 127.0.0.1"),
        )
        .arg(
            Arg::new("LOCAL_PORT")
                .short('l')
                .long("local-port")
                .num_args(1)
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(u16))
                .help("Local port to listen on"),
        );

    app
}

/// Program entrance `main`
pub fn main(matches: &ArgMatches) -> ExitCode {
    let (config, runtime) = {
        let config_path_opt = super::config_path(matches);

        super::init_logging("sslocal", matches);

        let mut overrides = super::common_overrides(matches);
        overrides.local_address = matches.get_one::<IpAddr>("LOCAL_ADDR").map(|ip| ip.to_string());
        overrides.local_port = matches.get_one::<u16>("LOCAL_PORT").cloned();

        let config = match Config::load_with_override(config_path_opt.as_deref(), &overrides, ConfigType::Local) {
            Ok(cfg) => cfg,
            Err(err) => {
                eprintln!("loading config {config_path_opt:?}, {err}");
                return crate::EXIT_CODE_LOAD_CONFIG_FAILURE.into();
            }
        };

        if config.server.is_empty() {
            eprintln!(
                "missing proxy servers, consider specifying it by \
                    --server-addr, --encrypt-method, --password command line option, \
                        or configuration file, check more details in https://shadowsocks.org/guide/configs.html"
            );
            return crate::EXIT_CODE_INSUFFICIENT_PARAMS.into();
        }

        if config.local_addr.is_none() {
            eprintln!(
                "missing `local_port`, consider specifying it by --local-port command line option, \
                    or \"local_address\" and \"local_port\" in configuration file"
            );
            return crate::EXIT_CODE_INSUFFICIENT_PARAMS.into();
        }

        if let Err(err) = config.check_integrity() {
            eprintln!("config integrity check failed, {err}");
            return crate::EXIT_CODE_LOAD_CONFIG_FAILURE.into();
        }

        info!("shadowsocks local {}", crate::VERSION);

        let runtime = match super::create_runtime(matches) {
            Ok(r) => r,
            Err(err) => {
                eprintln!("create tokio runtime failed, {err}");
                return crate::EXIT_CODE_SERVER_ABORTED.into();
            }
        };

        (config, runtime)
    };

    super::run_until_signal(runtime, local::run(config))
}
