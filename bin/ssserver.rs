//! This is a binary running in the server environment
//!
//! You have to provide all needed configuration attributes via command line parameters,
//! or you could specify a configuration file. The format of configuration file is defined
//! in mod `config`.
//!
//! `port_password` in the configuration file starts one listener per port, each with its
//! own password.

use std::process::ExitCode;

use clap::Command;
use shadowsocks_stream::service::server;

fn main() -> ExitCode {
    let mut app = Command::new("ssserver")
        .version(shadowsocks_stream::VERSION)
        .about("A SOCKS5 tunnel proxy with the classic shadowsocks stream ciphers");
    app = server::define_command_line_options(app);

    let matches = app.get_matches();
    server::main(&matches)
}
