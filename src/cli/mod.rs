pub mod evolve;
pub mod inspect;
pub mod train;
pub mod xor;

use std::fmt::Display;
use std::process;

/// Print `err` to stderr and exit with status 1.
pub fn fail(err: impl Display) -> ! {
    eprintln!("error: {}", err);
    process::exit(1);
}
