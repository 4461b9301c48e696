use anyhow::Result;
use peak_valley::cli;

fn main() -> Result<()> {
    cli::handle_calls()
}
