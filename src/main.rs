use std::io;

use anyhow::Result;
use log::info;

use heapsim::{config::HeapConfig, heap::Heap, shell::Shell};

fn main() -> Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    let config = HeapConfig::from_env()?;
    let heap = Heap::from_config(&config)?;

    let stdin = io::stdin();
    let mut shell = Shell::new(heap, stdin.lock(), io::stdout());
    shell.run()?;

    info!("Heap simulator exited.");
    Ok(())
}
