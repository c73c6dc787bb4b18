//! # qgate
//!
//! Command-line driver for the querygate gateway, serving the bundled blog
//! entities over a JSON snapshot file.
//!
//! The binary is a thin shell: argument parsing, loading the snapshot and
//! rendering live in [`cli`]; every query and action runs through
//! `querygate::Gateway`, the same facade an HTTP transport would use.
//!
//! ## Exit Status
//!
//! `0` on success. On failure the error is written to stderr and the process
//! exits with `1`; gateway errors are written as a JSON error envelope.

mod cli;

fn main() {
    if let Err(e) = cli::run() {
        cli::report(&e);
        std::process::exit(1);
    }
}
