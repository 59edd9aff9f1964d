//! The `loadsim` binary.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

fn main() -> anyhow::Result<()> {
    loadsim_server::cli::execute()
}
