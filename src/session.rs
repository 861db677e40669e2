//! Line-based prompt/response loop.
//!
//! States run Idle -> AwaitingInput -> (Answering -> AwaitingInput)* -> Exiting.
//! A line containing the exit keyword anywhere, in any case, ends the
//! session, as does end of input. Conversation history is owned here and
//! handed to every answering step.

use std::io::{BufRead, Write};

use tracing::{debug, error, info};

use crate::error::Result;
use crate::llm::{AnswerChain, ConversationTurn};

pub const PROMPT: &str = "Your query: ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    AwaitingInput,
    Answering(String),
    Exiting,
}

pub fn banner(exit_keyword: &str) -> String {
    format!("QA bot based on your pdf file data. Type '{exit_keyword}' to end conversation")
}

/// Case-insensitive substring match: "please EXIT now" exits.
pub fn is_exit(line: &str, keyword: &str) -> bool {
    line.to_lowercase().contains(&keyword.to_lowercase())
}

pub struct Session {
    chain: AnswerChain,
    exit_keyword: String,
    history_turns: usize,
    show_sources: bool,
}

impl Session {
    pub fn new(chain: AnswerChain, exit_keyword: impl Into<String>, history_turns: usize) -> Self {
        Self {
            chain,
            exit_keyword: exit_keyword.into(),
            history_turns,
            show_sources: false,
        }
    }

    pub fn show_sources(mut self, show: bool) -> Self {
        self.show_sources = show;
        self
    }

    /// Runs until the exit keyword or end of input. Returns the full history.
    pub async fn run<R: BufRead, W: Write>(
        &self,
        mut input: R,
        mut output: W,
    ) -> Result<Vec<ConversationTurn>> {
        let mut history: Vec<ConversationTurn> = Vec::new();
        let mut state = LoopState::Idle;

        loop {
            state = match state {
                LoopState::Idle => {
                    writeln!(output, "{}", banner(&self.exit_keyword))?;
                    LoopState::AwaitingInput
                }
                LoopState::AwaitingInput => {
                    write!(output, "{PROMPT}")?;
                    output.flush()?;
                    let mut line = String::new();
                    if input.read_line(&mut line)? == 0 {
                        writeln!(output)?;
                        LoopState::Exiting
                    } else if is_exit(&line, &self.exit_keyword) {
                        LoopState::Exiting
                    } else if line.trim().is_empty() {
                        LoopState::AwaitingInput
                    } else {
                        LoopState::Answering(line.trim().to_string())
                    }
                }
                LoopState::Answering(query) => {
                    let window = history.len().saturating_sub(self.history_turns);
                    match self.chain.answer(&query, &history[window..]).await {
                        Ok(answer) => {
                            for source in &answer.sources {
                                debug!(
                                    chunk = %source.chunk_id,
                                    page = source.page,
                                    score = source.score,
                                    "source"
                                );
                            }
                            writeln!(output, "{}", answer.text)?;
                            if self.show_sources && !answer.sources.is_empty() {
                                let pages: Vec<String> =
                                    answer.pages().iter().map(|p| format!("p.{p}")).collect();
                                writeln!(output, "Sources: {}", pages.join(", "))?;
                            }
                            history.push(ConversationTurn {
                                query,
                                answer: answer.text,
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "query failed");
                            writeln!(output, "Error: {e}")?;
                        }
                    }
                    LoopState::AwaitingInput
                }
                LoopState::Exiting => {
                    info!(turns = history.len(), "session ended");
                    return Ok(history);
                }
            };
        }
    }
}
