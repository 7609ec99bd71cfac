//! Directive parsing shared by the server and client consoles.
//!
//! A line starting with `#` is a directive; anything else is chat text and is
//! passed through untouched. `#quit`, `#logoff`, `#stop` and `#close` must
//! match exactly, the remaining directives match by prefix and may carry one
//! argument separated by a single space. Which directives a side honours is
//! up to the caller: the parser only classifies.

use crate::error::DirectiveError;

pub const SENTINEL: char = '#';

/// Reported on either console for a directive that side does not handle.
pub const INVALID_COMMAND: &str = "You have entered an invalid command, please try again";

const QUIT: &str = "#quit";
const LOGOFF: &str = "#logoff";
const STOP: &str = "#stop";
const CLOSE: &str = "#close";
const SET_HOST: &str = "#sethost";
const SET_PORT: &str = "#setport";
pub const LOGIN: &str = "#login";
const GET_HOST: &str = "#gethost";
const GET_PORT: &str = "#getport";
const START: &str = "#start";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Quit,
    Logoff,
    Stop,
    Close,
    SetHost(String),
    SetPort(u16),
    Login(Option<String>),
    GetHost,
    GetPort,
    Start,
    /// `#`-prefixed text matching no known directive. Holds the raw line.
    Unknown(String),
}

impl Directive {
    /// Classifies a line of input.
    ///
    /// Returns `None` for ordinary chat text. A recognized directive whose
    /// argument is unusable (e.g. `#setport abc`) yields an error; nothing
    /// about the error is fatal to a connection.
    pub fn parse(line: &str) -> Option<Result<Self, DirectiveError>> {
        if !line.starts_with(SENTINEL) {
            return None;
        }
        Some(parse_directive(line))
    }

    /// The literal keyword for this directive, as typed by the operator.
    pub fn keyword(&self) -> &str {
        match self {
            Directive::Quit => QUIT,
            Directive::Logoff => LOGOFF,
            Directive::Stop => STOP,
            Directive::Close => CLOSE,
            Directive::SetHost(_) => SET_HOST,
            Directive::SetPort(_) => SET_PORT,
            Directive::Login(_) => LOGIN,
            Directive::GetHost => GET_HOST,
            Directive::GetPort => GET_PORT,
            Directive::Start => START,
            Directive::Unknown(raw) => raw,
        }
    }
}

fn parse_directive(line: &str) -> Result<Directive, DirectiveError> {
    match line {
        QUIT => return Ok(Directive::Quit),
        LOGOFF => return Ok(Directive::Logoff),
        STOP => return Ok(Directive::Stop),
        CLOSE => return Ok(Directive::Close),
        _ => {}
    }

    if line.starts_with(SET_HOST) {
        let host = required_argument(line, SET_HOST)?;
        return Ok(Directive::SetHost(host));
    }

    if line.starts_with(SET_PORT) {
        let port = required_argument(line, SET_PORT)?;
        return port
            .trim()
            .parse::<u16>()
            .map(Directive::SetPort)
            .map_err(|_| DirectiveError::InvalidPort(port));
    }

    if line.starts_with(LOGIN) {
        let id = argument(line, LOGIN);
        return Ok(Directive::Login((!id.is_empty()).then_some(id)));
    }

    if line.starts_with(GET_HOST) {
        return Ok(Directive::GetHost);
    }
    if line.starts_with(GET_PORT) {
        return Ok(Directive::GetPort);
    }
    if line.starts_with(START) {
        return Ok(Directive::Start);
    }

    Ok(Directive::Unknown(line.to_string()))
}

/// Strips the directive keyword and one following space.
///
/// Any later `"<keyword> "` inside the argument is removed as well, so
/// `#sethost a#sethost b` sets the host to `ab`.
fn argument(line: &str, keyword: &str) -> String {
    let rest = &line[keyword.len()..];
    let rest = rest.strip_prefix(' ').unwrap_or(rest);
    rest.replace(&format!("{keyword} "), "")
}

fn required_argument(line: &str, keyword: &'static str) -> Result<String, DirectiveError> {
    let value = argument(line, keyword);
    if value.trim().is_empty() {
        return Err(DirectiveError::MissingArgument { directive: keyword });
    }
    Ok(value)
}
