use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);
const LISTENING_BANNER: &str = "> Server listening for connections on port ";

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("simple_chat");

    let ChatProcess {
        child: mut server,
        stdin: mut server_stdin,
        stdout: mut server_stdout,
    } = spawn_server(&binary)?;
    let port = read_listening_port(&mut server_stdout).await?;

    // Drain additional server output in the background so the pipe never fills.
    let server_log_task = tokio::spawn(drain_stdout(server_stdout));

    let mut alice = spawn_client(&binary, "alice", port).await?;
    let mut bob = spawn_client(&binary, "bob", port).await?;

    let alice_sees_bob =
        read_line_expect(&mut alice.stdout, "waiting for alice to see bob log on").await?;
    assert_eq!(alice_sees_bob, "bob has logged on.");

    // Alice greets Bob; the broadcast reaches both, sender included.
    alice.send_line("hi").await.context("alice send line")?;
    let bob_hears_alice =
        read_line_expect(&mut bob.stdout, "waiting for bob to hear alice").await?;
    assert_eq!(bob_hears_alice, "alice: hi");
    let alice_echo = read_line_expect(&mut alice.stdout, "waiting for alice echo").await?;
    assert_eq!(alice_echo, "alice: hi");

    // Unknown directives are reported locally only.
    bob.send_line("#frobnicate").await.context("bob send directive")?;
    let bob_report = read_line_expect(&mut bob.stdout, "waiting for bob's report").await?;
    assert_eq!(
        bob_report,
        "You have entered an invalid command, please try again"
    );

    bob.send_line("#setport 6000").await?;
    let rejected = read_line_expect(&mut bob.stdout, "waiting for setport refusal").await?;
    assert_eq!(
        rejected,
        "Cannot change the port number while connected. Use #logoff first."
    );

    bob.send_line("#getport").await?;
    let port_report = read_line_expect(&mut bob.stdout, "waiting for getport").await?;
    assert_eq!(port_report, format!("The port number for this server is {port}"));

    alice.send_line("#quit").await.context("alice send quit")?;
    let alice_closed = read_line_expect(&mut alice.stdout, "waiting for alice to close").await?;
    assert_eq!(alice_closed, "Connection closed");

    bob.send_line("#quit").await.context("bob send quit")?;
    let bob_closed = read_line_expect(&mut bob.stdout, "waiting for bob to close").await?;
    assert_eq!(bob_closed, "Connection closed");

    ensure_success(&mut alice.child, "alice client").await?;
    ensure_success(&mut bob.child, "bob client").await?;

    send_line(&mut server_stdin, "#quit")
        .await
        .context("server send quit")?;
    ensure_success(&mut server, "server").await?;
    let _ = server_log_task.await;

    Ok(())
}

struct ChatProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ChatProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        send_line(&mut self.stdin, line).await
    }
}

async fn send_line(stdin: &mut ChildStdin, line: &str) -> Result<()> {
    stdin
        .write_all(line.as_bytes())
        .await
        .with_context(|| format!("failed to send line '{line}'"))?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}

fn spawn_process(binary: &Path, args: &[&str]) -> Result<ChatProcess> {
    let mut cmd = Command::new(binary);
    cmd.args(args)
        .env("RUST_LOG", "warn")
        .env("RUST_LOG_STYLE", "never")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {args:?}"))?;
    let stdin = child.stdin.take().context("stdin missing after spawn")?;
    let stdout = child.stdout.take().context("stdout missing after spawn")?;

    Ok(ChatProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    })
}

fn spawn_server(binary: &Path) -> Result<ChatProcess> {
    spawn_process(binary, &["server", "0", "--host", "127.0.0.1"])
}

async fn read_listening_port(reader: &mut BufReader<ChildStdout>) -> Result<u16> {
    let banner = read_line_expect(reader, "waiting for listening banner").await?;
    let port = banner
        .strip_prefix(LISTENING_BANNER)
        .with_context(|| format!("unexpected server banner: {banner}"))?;
    port.parse()
        .with_context(|| format!("server banner has no port: {banner}"))
}

async fn spawn_client(binary: &Path, login_id: &str, port: u16) -> Result<ChatProcess> {
    let port = port.to_string();
    let mut process = spawn_process(binary, &["client", login_id, "127.0.0.1", &port])?;

    let welcome = read_line_expect(&mut process.stdout, "waiting for login broadcast").await?;
    if welcome != format!("{login_id} has logged on.") {
        return Err(anyhow!(
            "expected login broadcast for {login_id}, got '{welcome}'"
        ));
    }

    Ok(process)
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = timeout(Duration::from_secs(5), child.wait())
        .await
        .with_context(|| format!("timed out waiting for {name} to exit"))?
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
