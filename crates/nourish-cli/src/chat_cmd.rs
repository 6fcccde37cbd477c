//! `nourish chat` command: an interactive planning session on stdin.
//!
//! Every line goes through the session's intent routing. Slash commands act
//! on the plan on the table:
//!
//! - `/approve` saves it; `/approve!` also accepts a plan over budget
//! - `/reject <feedback>` replans from the feedback
//! - `/quit` ends the session (unapproved changes are dropped)

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use nourish_core::{SessionManager, SessionReply};

use crate::render;

/// A parsed input line.
#[derive(Debug, PartialEq)]
enum Line<'a> {
    Say(&'a str),
    Approve { over_budget: bool },
    Reject(&'a str),
    Quit,
    Help,
    Blank,
}

fn parse_line(line: &str) -> Line<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Line::Blank;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Line::Say(line);
    };
    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(n, r)| (n, r.trim()));
    match name {
        "approve" => Line::Approve { over_budget: false },
        "approve!" => Line::Approve { over_budget: true },
        "reject" => Line::Reject(rest),
        "quit" | "exit" | "q" => Line::Quit,
        _ => Line::Help,
    }
}

const HELP: &str = "Commands: /approve, /approve! (accept over budget), /reject <feedback>, /quit";

fn print_reply(reply: &SessionReply) {
    println!("{}", reply.message);
    if let Some(bundle) = &reply.plan {
        println!();
        println!("{}", render::plan(bundle));
    }
}

/// Run the chat loop until `/quit`, end of input or Ctrl+C.
pub async fn run_chat(manager: &SessionManager, user_id: &str) -> Result<()> {
    // Unknown users fail here, before any input is read.
    let snapshot = manager.snapshot(user_id).await?;
    let name = snapshot
        .profile
        .display_name
        .as_deref()
        .unwrap_or(user_id)
        .to_owned();
    println!("Hi {name}. Ask for a meal plan, or a nutrition question. {HELP}");

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        cancel_clone.cancel();
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut session: Option<Uuid> = None;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = lines.next_line() => next?,
        };
        let Some(line) = next else {
            break;
        };

        let result = match parse_line(&line) {
            Line::Blank => continue,
            Line::Quit => break,
            Line::Help => {
                println!("{HELP}");
                continue;
            }
            Line::Say(text) => manager.start_or_continue_session(user_id, text).await,
            Line::Approve { over_budget } => {
                let Some(id) = session else {
                    println!("There is no plan to approve yet.");
                    continue;
                };
                if over_budget {
                    manager.approve_over_budget(id).await
                } else {
                    manager.approve_plan(id).await
                }
            }
            Line::Reject(feedback) => {
                let Some(id) = session else {
                    println!("There is no plan to reject yet.");
                    continue;
                };
                if feedback.is_empty() {
                    println!("Tell me what to change: /reject <feedback>");
                    continue;
                }
                manager.reject_plan(id, feedback).await
            }
        };

        match result {
            Ok(reply) => {
                session = Some(reply.session_id);
                print_reply(&reply);
            }
            Err(err) => println!("error: {err}"),
        }
    }

    if let Some(id) = session {
        manager.end_session(id).await;
    }
    println!("Bye.");
    Ok(())
}
