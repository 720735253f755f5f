//! The interactive prompt: parse typed lines, route them to the node and
//! render everything the mesh delivers.

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::network::{Message, MessageType, Node, NodeError};

/// A parsed line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Connect(&'a str),
    Exit,
    Say(&'a str),
    Empty,
}

fn parse(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }
    if trimmed == "exit" {
        return Input::Exit;
    }
    if let Some(addr) = trimmed.strip_prefix("connect ") {
        let addr = addr.trim();
        if !addr.is_empty() {
            return Input::Connect(addr);
        }
    }
    Input::Say(trimmed)
}

/// Render one message from the mesh to stdout.
pub fn print_message(message: Message) {
    match message.kind {
        MessageType::Connect => println!("{} connected", message.user),
        MessageType::Disconnect => println!("{} disconnected", message.user),
        MessageType::Send => println!("{}> {}", message.user, message.text),
    }
}

/// Drive a started node from stdin until `exit`, end of input or Ctrl+C.
///
/// `connect <addr>` dials another node, `exit` leaves the mesh, any other
/// non-empty line is sent as chat. The departure announcement is queued
/// before this returns.
pub async fn run(mut node: Node) -> Result<(), NodeError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    log::error!("failed to read input: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        match parse(&line) {
            Input::Empty => {}
            Input::Exit => break,
            Input::Connect(addr) => {
                if let Err(e) = node.dial(addr).await {
                    eprintln!("ERROR: {}", e);
                }
            }
            Input::Say(text) => node.send_message(text, MessageType::Send).await?,
        }
    }

    node.close().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect() {
        assert_eq!(parse("connect 127.0.0.1:3000"), Input::Connect("127.0.0.1:3000"));
        assert_eq!(parse("  connect 127.0.0.1:3000  "), Input::Connect("127.0.0.1:3000"));
    }

    #[test]
    fn test_parse_exit() {
        assert_eq!(parse("exit"), Input::Exit);
        assert_eq!(parse(" exit "), Input::Exit);
    }

    #[test]
    fn test_parse_chat() {
        assert_eq!(parse("hello there"), Input::Say("hello there"));
        // Only a leading "connect " is a command.
        assert_eq!(parse("let's connect tomorrow"), Input::Say("let's connect tomorrow"));
        assert_eq!(parse("connect"), Input::Say("connect"));
        assert_eq!(parse("connect   "), Input::Say("connect"));
        assert_eq!(parse("exit now"), Input::Say("exit now"));
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(parse(""), Input::Empty);
        assert_eq!(parse("   "), Input::Empty);
    }
}
