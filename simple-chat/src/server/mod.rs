//! Chat server: connection framework, session rules and the console loop.

pub mod framework;
pub mod session;

use std::{io, sync::Arc};

use anyhow::Result;
use tokio::select;
use tracing::{debug, warn};

use crate::{
    cli::ServerArgs,
    console::{self, ChatDisplay, Console},
};

pub use framework::{
    ClientInfo, ConnectionId, DEFAULT_PORT, Server, ServerConfig, ServerHooks,
};
pub use session::{ChatServer, ServerSession};

/// Runs the server until the operator quits or ctrl-c is pressed.
///
/// Closing stdin does not stop the server; it keeps serving clients until it
/// is told to quit.
pub async fn run(args: ServerArgs) -> Result<()> {
    let display: Arc<dyn ChatDisplay> = Arc::new(Console::with_prefix("> "));
    let chat = ChatServer::new(ServerConfig::from(&args), display.clone());

    if let Err(err) = chat.listen().await {
        display.display("ERROR - Could not listen for clients!");
        return Err(err.into());
    }

    let shutdown = chat.shutdown_token();
    let mut input = console::input_lines();
    let mut console_open = true;

    loop {
        select! {
            biased;
            _ = shutdown.cancelled() => break,
            line = input.recv(), if console_open => {
                console_open = handle_console_line(line, &chat, display.as_ref()).await;
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                chat.quit().await;
                break;
            }
        }
    }

    Ok(())
}

async fn handle_console_line(
    line: Option<io::Result<String>>,
    chat: &ChatServer,
    display: &dyn ChatDisplay,
) -> bool {
    match line {
        Some(Ok(line)) => {
            let text = line.trim_end();
            if !text.is_empty() {
                chat.handle_operator_input(text).await;
            }
            true
        }
        None => {
            debug!("console input closed; still serving clients");
            false
        }
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
