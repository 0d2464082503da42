//! Entry point for the `tetherd` demonstration host.

use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match tetherd::run_host() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let mut stderr = io::stderr().lock();
            if writeln!(stderr, "tetherd: {error}").is_err() {
                return ExitCode::from(2);
            }
            ExitCode::FAILURE
        }
    }
}
