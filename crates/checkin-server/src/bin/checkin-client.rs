//! Check-in client: sends one request and waits for the server's answer

use checkin_server::{init_logging, Opts};

fn main() {
    init_logging();
    let code = match Opts::from_args() {
        Ok(opts) => checkin_ipc::client::run(&opts.config),
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}
