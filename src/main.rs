use anyhow::Result;

use csopesy::console::Console;
use csopesy::{util, App};

fn main() -> Result<()> {
    env_logger::init();

    util::clear_screen();
    println!("CSOPESY CPU Scheduler Simulator");
    println!("Version: 1.00.00\n");

    let app = App::new();
    let mut console = Console::new(&app);
    console.run()?;

    println!("Cleaning up resources...");
    app.shutdown();
    println!("Cleanup complete. Exiting.");
    Ok(())
}
