//! Rift Operation Workshop daemon
//!
//! Composition root: reads the configuration, wires the relay client, the
//! generation adapter and the hardware bridge to one workshop runtime, and
//! runs until SIGINT/SIGTERM.

mod run;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run::run().await
}
