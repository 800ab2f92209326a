//! Operator commands typed on stdin while a performance runs.
//!
//! Lines starting with `#` are commands; anything else is a line for the
//! human actor, if there is one.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    /// Zero-based event index.
    Jump(usize),
    Inject {
        target: Option<String>,
        content: String,
    },
    Time(String),
    Fact(String),
    Status,
    Stop,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    /// A line spoken by the human actor.
    Speech(String),
    Empty,
}

pub const HELP: &str = "\
  #pause                  - Pause after the current turn
  #resume                 - Resume playback
  #jump <n>               - Jump to event n (1-based)
  #inject [@actor] <text> - Inject an event, optionally for one actor
  #time <when>            - Change the current event's time
  #fact <text>            - Establish a fact
  #status                 - Show playback status
  #stop                   - Stop the performance
  #help                   - Show this help";

/// Parse one line of operator input.
pub fn parse(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    let Some(rest) = line.strip_prefix('#') else {
        return Ok(Input::Speech(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name.to_lowercase().as_str() {
        "pause" => Command::Pause,
        "resume" | "play" => Command::Resume,
        "jump" => {
            let n: usize = arg
                .parse()
                .map_err(|_| format!("Usage: #jump <n>, got '{arg}'"))?;
            if n == 0 {
                return Err("Events are numbered from 1".into());
            }
            Command::Jump(n - 1)
        }
        "inject" => parse_inject(arg)?,
        "time" => Command::Time(required(arg, "#time <when>")?),
        "fact" => Command::Fact(required(arg, "#fact <text>")?),
        "status" => Command::Status,
        "stop" | "quit" | "exit" => Command::Stop,
        "help" => Command::Help,
        other => return Err(format!("Unknown command '#{other}'. Type #help for help.")),
    };
    Ok(Input::Command(command))
}

fn parse_inject(arg: &str) -> Result<Command, String> {
    let usage = "#inject [@actor] <text>";
    match arg.strip_prefix('@') {
        Some(rest) => {
            let (target, content) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| format!("Usage: {usage}"))?;
            Ok(Command::Inject {
                target: Some(target.to_string()),
                content: required(content.trim(), usage)?,
            })
        }
        None => Ok(Command::Inject {
            target: None,
            content: required(arg, usage)?,
        }),
    }
}

fn required(arg: &str, usage: &str) -> Result<String, String> {
    if arg.is_empty() {
        Err(format!("Usage: {usage}"))
    } else {
        Ok(arg.to_string())
    }
}
