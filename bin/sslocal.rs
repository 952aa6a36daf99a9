//! This is a binary running in the local environment
//!
//! You have to provide all needed configuration attributes via command line parameters,
//! or you could specify a configuration file. The format of configuration file is defined
//! in mod `config`.

use std::process::ExitCode;

use clap::Command;
use shadowsocks_stream::service::local;

fn main() -> ExitCode {
    let mut app = Command::new("sslocal")
        .version(shadowsocks_stream::VERSION)
        .about("A SOCKS5 tunnel proxy with the classic shadowsocks stream ciphers");
    app = local::define_command_line_options(app);

    let matches = app.get_matches();
    local::main(&matches)
}
