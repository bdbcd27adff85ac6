//! Terminal front end: reads commands from stdin and drives a controller.

mod messages;
mod observer;
mod update;

pub use messages::{HELP, Message, parse_message};
pub use observer::ConsoleObserver;
pub use update::{App, Flow};

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Run the command loop until `q`, end of input or Ctrl-C.
pub async fn run_app(mut app: App) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!(
        "{} units loaded, cursor at {}. Type h for help.",
        app.controller.document().len(),
        app.controller.current_ordinal()
    );

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Input closed");
                    app.shutdown();
                    return Ok(());
                };
                match parse_message(&line) {
                    Ok(Some(message)) => {
                        if app.update(message) == Flow::Quit {
                            return Ok(());
                        }
                    }
                    Ok(None) => {}
                    Err(err) => println!("{err}"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!("Failed to listen for Ctrl-C: {err}");
                }
                info!("Interrupted");
                app.shutdown();
                return Ok(());
            }
        }
    }
}
