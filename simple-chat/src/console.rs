use std::{
    io::{self, BufRead, Write},
    thread,
};

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Surface the session managers report to: the operator's terminal in the
/// binary, a recorder in tests.
pub trait ChatDisplay: Send + Sync + 'static {
    fn display(&self, message: &str);
}

/// Writes each message as one line on stdout.
#[derive(Debug, Clone, Default)]
pub struct Console {
    prefix: &'static str,
}

impl Console {
    pub fn new() -> Self {
        Self { prefix: "" }
    }

    /// The server console marks its own output with `"> "`.
    pub fn with_prefix(prefix: &'static str) -> Self {
        Self { prefix }
    }
}

impl ChatDisplay for Console {
    fn display(&self, message: &str) {
        let mut stdout = io::stdout().lock();
        let result = writeln!(stdout, "{}{}", self.prefix, message).and_then(|()| stdout.flush());
        if let Err(error) = result {
            warn!(?error, "failed to write to console");
        }
    }
}

/// Streams operator input line by line. The channel closes at end of input.
///
/// Reading happens on a plain thread rather than the runtime's blocking pool
/// so a pending read never holds up process exit.
pub fn input_lines() -> mpsc::UnboundedReceiver<io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let failed = line.is_err();
            if tx.send(line).is_err() || failed {
                break;
            }
        }
        debug!("console input finished");
    });
    rx
}
