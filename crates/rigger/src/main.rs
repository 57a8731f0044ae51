// gix pulls in several versions of the same transitive crates.
#![allow(clippy::multiple_crate_versions)]

use std::error::Error;

fn main() {
    match rigger_cli::run() {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("error: {error}");
            let mut source = error.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            std::process::exit(1);
        }
    }
}
