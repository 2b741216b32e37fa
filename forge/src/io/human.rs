//! Human-in-the-loop input for plain-text agent replies.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanReply {
    /// Free-text answer appended as a human turn.
    Message(String),
    /// No answer; the agent is nudged to keep going.
    Continue,
    /// Stop the run.
    Quit,
}

pub trait Human {
    fn respond(&self, assistant_text: &str) -> Result<HumanReply>;
}

/// Interpret one line of user input. `None` means end of input.
pub fn interpret(line: Option<&str>) -> HumanReply {
    let Some(line) = line else {
        return HumanReply::Quit;
    };
    match line.trim() {
        "" => HumanReply::Continue,
        "quit" | "exit" | "/quit" => HumanReply::Quit,
        text => HumanReply::Message(text.to_string()),
    }
}

/// Prints the agent's text to stdout and reads one line from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinHuman;

impl Human for StdinHuman {
    fn respond(&self, assistant_text: &str) -> Result<HumanReply> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "\nAgent: {}\n", assistant_text.trim()).context("write stdout")?;
        write!(stdout, "You (enter to continue, 'quit' to stop): ").context("write stdout")?;
        stdout.flush().context("flush stdout")?;

        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line).context("read stdin")?;
        Ok(interpret((read > 0).then_some(line.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_line_continues() {
        assert_eq!(interpret(Some("  \n")), HumanReply::Continue);
    }

    #[test]
    fn end_of_input_and_quit_stop() {
        assert_eq!(interpret(None), HumanReply::Quit);
        assert_eq!(interpret(Some("quit\n")), HumanReply::Quit);
    }

    #[test]
    fn text_is_trimmed() {
        assert_eq!(
            interpret(Some("  use arrow keys \n")),
            HumanReply::Message("use arrow keys".to_string())
        );
    }
}
