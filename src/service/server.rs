//! Server launchers

use std::process::ExitCode;

use clap::{ArgMatches, Command};
use log::info;

use crate::{
    config::{Config, ConfigType},
    server,
};

/// Defines command line options
pub fn define_command_line_options(app: Command) -> Command {
    super::define_common_options(app)
}

/// Program entrance `main`
pub fn main(matches: &ArgMatches) -> ExitCode {
    let (config, runtime) = {
        let config_path_opt = super::config_path(matches);

        super::init_logging("ssserver", matches);

        let overrides = super::common_overrides(matches);

        let config = match Config::load_with_override(config_path_opt.as_deref(), &overrides, ConfigType::Server) {
            Ok(cfg) => cfg,
            Err(err) => {
                eprintln!("loading config {config_path_opt:?}, {err}");
                return crate::EXIT_CODE_LOAD_CONFIG_FAILURE.into();
            }
        };

        if config.server.is_empty() {
            eprintln!(
                "missing server addresses, consider specifying it by \
                    --server-addr, --server-port, --encrypt-method, --password command line option, \
                        or configuration file"
            );
            return crate::EXIT_CODE_INSUFFICIENT_PARAMS.into();
        }

        if let Err(err) = config.check_integrity() {
            eprintln!("config integrity check failed, {err}");
            return crate::EXIT_CODE_LOAD_CONFIG_FAILURE.into();
        }

        info!("shadowsocks server {}", crate::VERSION);

        let runtime = match super::create_runtime(matches) {
            Ok(r) => r,
            Err(err) => {
                eprintln!("create tokio runtime failed, {err}");
                return crate::EXIT_CODE_SERVER_ABORTED.into();
            }
        };

        (config, runtime)
    };

    super::run_until_signal(runtime, server::run(config))
}

#[cfg(test)]
mod test {
    use clap::Command;

    #[test]
    fn verify_server_command() {
        let mut app = Command::new("ssserver")
            .version(crate::VERSION)
            .about("A fast tunnel proxy that helps you bypass firewalls.");
        app = super::define_command_line_options(app);
        app.debug_assert();
    }

    #[test]
    fn server_rejects_local_options() {
        let app = super::define_command_line_options(Command::new("ssserver"));
        assert!(app.try_get_matches_from(["ssserver", "-l", "1080"]).is_err());
    }
}
