//! Chat client: connection framework, session rules and the console loop.

pub mod connection;
pub mod session;

use std::{io, sync::Arc};

use anyhow::Result;
use tokio::select;
use tracing::warn;

use crate::{
    cli::ClientArgs,
    console::{self, ChatDisplay, Console},
};

pub use connection::{ClientConnection, ClientHooks, ConnectionState};
pub use session::{ChatClient, ClientConfig, ClientSession};

/// Runs the client until `#quit`, end of input, ctrl-c, or the server going
/// away.
pub async fn run(args: ClientArgs) -> Result<()> {
    let display: Arc<dyn ChatDisplay> = Arc::new(Console::new());
    let client = match ChatClient::connect(ClientConfig::from(args), display.clone()).await {
        Ok(client) => client,
        Err(err) => {
            display.display("ERROR - Can't setup connection! Terminating client.");
            return Err(err.into());
        }
    };

    let shutdown = client.shutdown_token();
    let mut input = console::input_lines();

    loop {
        select! {
            biased;
            _ = shutdown.cancelled() => break,
            line = input.recv() => {
                if !handle_console_line(line, &client, display.as_ref()).await {
                    client.quit().await;
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                client.quit().await;
                break;
            }
        }
    }

    Ok(())
}

async fn handle_console_line(
    line: Option<io::Result<String>>,
    client: &ChatClient,
    display: &dyn ChatDisplay,
) -> bool {
    match line {
        Some(Ok(line)) => {
            let text = line.trim_end();
            if !text.is_empty() {
                client.handle_operator_input(text).await;
            }
            true
        }
        None => false,
        Some(Err(error)) => {
            warn!(?error, "failed to read console input");
            display.display("Unexpected error while reading from console!");
            false
        }
    }
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}
