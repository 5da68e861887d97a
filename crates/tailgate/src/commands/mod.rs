//! Command implementations
//!
//! Every command except `serve` makes one service call and prints its result
//! as pretty JSON on stdout.

pub mod auth;
pub mod cert;
pub mod cleanup;
pub mod container;
pub mod routes;
pub mod serve;

use anyhow::Result;
use serde::Serialize;
use std::io::Write;

/// Print `value` as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}
