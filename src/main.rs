//! Binary entry point: delegates to the library's `run()`.

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    ns_procon_emu::run().await
}
