// Interactive terminal chat driving the orchestrator.

use std::io::Write;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::modes::Mode;
use crate::orchestrator::{Orchestrator, SendOutcome};
use crate::session::{lock_store, Role};

const HELP: &str = "Commands:
  /note <text> [#tag ...]  pin the last reply with a note
  /notes                   list pinned notes
  /delnote <id>            delete a note
  /review                  review the conversation so far
  /mode <mode>             start a new session in another mode
  /reset                   forget the current session (notes are kept)
  /help                    show this help
  /quit                    leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Send(String),
    Note { text: String, tags: Vec<String> },
    Notes,
    DeleteNote(String),
    Review,
    Mode(Mode),
    Reset,
    Help,
    Quit,
    Invalid(String),
}

impl ChatCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some(command) = line.strip_prefix('/') else {
            return ChatCommand::Send(line.to_string());
        };
        let (name, rest) = match command.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (command, ""),
        };

        match name {
            "note" if !rest.is_empty() => {
                let (tags, words): (Vec<&str>, Vec<&str>) =
                    rest.split_whitespace().partition(|w| w.starts_with('#') && w.len() > 1);
                ChatCommand::Note {
                    text: words.join(" "),
                    tags: tags.iter().map(|t| t[1..].to_string()).collect(),
                }
            }
            "notes" => ChatCommand::Notes,
            "delnote" if !rest.is_empty() => ChatCommand::DeleteNote(rest.to_string()),
            "review" => ChatCommand::Review,
            "mode" => match rest.parse::<Mode>() {
                Ok(mode) => ChatCommand::Mode(mode),
                Err(e) => ChatCommand::Invalid(e.to_string()),
            },
            "reset" => ChatCommand::Reset,
            "help" => ChatCommand::Help,
            "quit" | "exit" => ChatCommand::Quit,
            _ => ChatCommand::Invalid(format!("unrecognised command '/{}'", name)),
        }
    }
}

/// Prints each update's new suffix; a non-extending update (error
/// placeholder) is printed whole on a fresh line.
fn stream_printer() -> Box<dyn FnMut(&str) + Send> {
    let mut shown = String::new();
    Box::new(move |content: &str| {
        let mut out = std::io::stdout().lock();
        let _ = match content.strip_prefix(shown.as_str()) {
            Some(delta) => write!(out, "{}", delta),
            None => write!(out, "\n{}", content),
        };
        let _ = out.flush();
        shown = content.to_string();
    })
}

/// Open a session in `mode`, resuming the persisted one if it is in the same
/// mode, then read lines from stdin until `/quit` or EOF.
pub async fn run_chat(orchestrator: Orchestrator, mode: Mode) -> Result<()> {
    let resumed = {
        let store = lock_store(orchestrator.store());
        store.mode() == Some(mode) && !store.messages().is_empty()
    };
    if resumed {
        let store = lock_store(orchestrator.store());
        info!(session_id = ?store.session_id(), "Resuming session");
        for message in store.messages() {
            print_message(message.role, &message.content);
        }
    } else {
        orchestrator.switch_mode(mode);
        print_message(Role::Assistant, mode.welcome_message());
    }
    println!("(type /help for commands)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush().context("Failed to flush stdout")?;

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            debug!("stdin closed");
            break;
        };

        match ChatCommand::parse(&line) {
            ChatCommand::Send(text) if text.is_empty() => continue,
            ChatCommand::Send(text) => {
                print!("reflector> ");
                let outcome = orchestrator.send_message_with(&text, stream_printer()).await;
                println!();
                debug!(?outcome, "Send finished");
                if outcome == SendOutcome::Ignored {
                    println!("(message not sent)");
                }
            }
            ChatCommand::Note { text, tags } => {
                let mut store = lock_store(orchestrator.store());
                let target = store
                    .messages()
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::Assistant)
                    .map(|m| (m.id.clone(), m.content.clone()));
                match target {
                    Some((message_id, original_text)) => {
                        let id = store.add_note(message_id, original_text, text, tags);
                        println!("Pinned note {}", id);
                    }
                    None => println!("Nothing to pin yet."),
                }
            }
            ChatCommand::Notes => {
                let store = lock_store(orchestrator.store());
                if store.notes().is_empty() {
                    println!("No notes yet.");
                }
                for note in store.notes() {
                    let tags = note
                        .tags
                        .iter()
                        .map(|t| format!("#{}", t))
                        .collect::<Vec<_>>()
                        .join(" ");
                    println!("[{}] {} {}", note.id, note.user_note, tags);
                }
            }
            ChatCommand::DeleteNote(id) => {
                if lock_store(orchestrator.store()).delete_note(&id) {
                    println!("Deleted note {}", id);
                } else {
                    println!("No note with id {}", id);
                }
            }
            ChatCommand::Review => match orchestrator.generate_review().await {
                Some(text) => println!("{}", text),
                None => println!("Nothing to review yet."),
            },
            ChatCommand::Mode(new_mode) => {
                orchestrator.switch_mode(new_mode);
                print_message(Role::Assistant, new_mode.welcome_message());
            }
            ChatCommand::Reset => {
                lock_store(orchestrator.store()).reset_session();
                orchestrator.switch_mode(mode);
                print_message(Role::Assistant, mode.welcome_message());
            }
            ChatCommand::Help => println!("{}", HELP),
            ChatCommand::Quit => break,
            ChatCommand::Invalid(reason) => println!("{}", reason),
        }
    }

    info!("Chat session finished");
    Ok(())
}

fn print_message(role: Role, content: &str) {
    match role {
        Role::User => println!("you> {}", content),
        Role::Assistant => println!("reflector> {}", content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_sent() {
        assert_eq!(
            ChatCommand::parse("  Hello there "),
            ChatCommand::Send("Hello there".into())
        );
    }

    #[test]
    fn test_note_with_tags() {
        assert_eq!(
            ChatCommand::parse("/note worth remembering #idea #later"),
            ChatCommand::Note {
                text: "worth remembering".into(),
                tags: vec!["idea".into(), "later".into()],
            }
        );
    }

    #[test]
    fn test_note_requires_text() {
        assert!(matches!(ChatCommand::parse("/note"), ChatCommand::Invalid(_)));
    }

    #[test]
    fn test_mode_switch() {
        assert_eq!(ChatCommand::parse("/mode kids"), ChatCommand::Mode(Mode::Kids));
        assert!(matches!(ChatCommand::parse("/mode poetry"), ChatCommand::Invalid(_)));
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(ChatCommand::parse("/notes"), ChatCommand::Notes);
        assert_eq!(ChatCommand::parse("/delnote 1_abc"), ChatCommand::DeleteNote("1_abc".into()));
        assert_eq!(ChatCommand::parse("/review"), ChatCommand::Review);
        assert_eq!(ChatCommand::parse("/reset"), ChatCommand::Reset);
        assert_eq!(ChatCommand::parse("/quit"), ChatCommand::Quit);
        assert_eq!(ChatCommand::parse("/exit"), ChatCommand::Quit);
    }
}
