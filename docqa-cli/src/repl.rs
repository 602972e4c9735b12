//! Interactive question loop.

use std::fmt::Write as _;

use docqa_rag::{AnswerResponse, RagPipeline};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::warn;

const PROMPT: &str = "You: ";
const RULE_WIDTH: usize = 70;
const MODE_PREFIXES: [&str; 3] = ["vector", "keyword", "hybrid"];

/// One parsed line of user input.
#[derive(Debug, PartialEq, Eq)]
pub enum Line<'a> {
    Quit,
    Blank,
    Ask { mode: &'a str, question: &'a str },
}

/// Parse a line typed at the prompt.
///
/// `quit`, `exit` and `q` end the session. A `vector:`, `keyword:` or
/// `hybrid:` prefix (any case) overrides `default_mode` for that question.
pub fn parse_line<'a>(line: &'a str, default_mode: &'a str) -> Line<'a> {
    let line = line.trim();
    if line.is_empty() {
        return Line::Blank;
    }
    if ["quit", "exit", "q"].iter().any(|cmd| line.eq_ignore_ascii_case(cmd)) {
        return Line::Quit;
    }

    for mode in MODE_PREFIXES {
        let Some(head) = line.get(..mode.len() + 1) else { continue };
        if head.ends_with(':') && head[..mode.len()].eq_ignore_ascii_case(mode) {
            let question = line[mode.len() + 1..].trim();
            if question.is_empty() {
                return Line::Blank;
            }
            return Line::Ask { mode, question };
        }
    }

    Line::Ask { mode: default_mode, question: line }
}

/// Render an answer the way `ask` and `chat` print it.
pub fn render_response(response: &AnswerResponse) -> String {
    let rule = "-".repeat(RULE_WIDTH);
    let mut out = String::new();
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Answer:\n");
    let _ = writeln!(out, "{}\n", response.answer.trim_end());
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "Retrieved {} chunks from {} file(s)",
        response.chunks_used,
        response.sources.len()
    );
    if !response.sources.is_empty() {
        let _ = writeln!(out, "Sources: {}", response.sources.join(", "));
    }
    let _ = write!(out, "{rule}");
    out
}

fn banner(default_mode: &str) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    format!(
        "{rule}\nDocument Q&A\n{rule}\n\n\
         Ask questions about your documents, or type 'quit' to exit.\n\n\
         Commands:\n  \
         'quit', 'exit' or 'q'      exit the program\n  \
         'hybrid: <question>'       hybrid search\n  \
         'keyword: <question>'      keyword search\n  \
         'vector: <question>'       vector search\n\n\
         Default search mode: {default_mode}\n{rule}\n"
    )
}

/// Run the prompt loop until the user quits or closes stdin.
///
/// A failed question is reported and the loop continues.
pub async fn run(pipeline: &RagPipeline, default_mode: &str, top_k: usize) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!("{}", banner(default_mode));

    loop {
        let read = tokio::task::block_in_place(|| editor.readline(PROMPT));
        let input = match read {
            Ok(input) => input,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        match parse_line(&input, default_mode) {
            Line::Quit => break,
            Line::Blank => continue,
            Line::Ask { mode, question } => {
                let _ = editor.add_history_entry(input.trim());
                match pipeline.answer_question(question, mode, top_k).await {
                    Ok(response) => println!("\n{}\n", render_response(&response)),
                    Err(e) => {
                        warn!(error = %e, mode, "question failed");
                        println!("\nError: {e}\nPlease try again.\n");
                    }
                }
            }
        }
    }

    println!("\nGoodbye!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quit_commands_end_the_session() {
        for input in ["quit", "EXIT", " q "] {
            assert_eq!(parse_line(input, "vector"), Line::Quit);
        }
    }

    #[test]
    fn mode_prefix_overrides_default() {
        assert_eq!(
            parse_line("hybrid: what about cats?", "vector"),
            Line::Ask { mode: "hybrid", question: "what about cats?" }
        );
        assert_eq!(
            parse_line("Keyword:startups", "vector"),
            Line::Ask { mode: "keyword", question: "startups" }
        );
        assert_eq!(
            parse_line("tell me about rust", "vector"),
            Line::Ask { mode: "vector", question: "tell me about rust" }
        );
    }

    #[test]
    fn blank_input_and_bare_prefix_are_ignored() {
        assert_eq!(parse_line("   ", "hybrid"), Line::Blank);
        assert_eq!(parse_line("hybrid:   ", "vector"), Line::Blank);
    }

    #[test]
    fn colon_elsewhere_is_part_of_the_question() {
        assert_eq!(
            parse_line("note: read later", "hybrid"),
            Line::Ask { mode: "hybrid", question: "note: read later" }
        );
        assert_eq!(parse_line("é", "hybrid"), Line::Ask { mode: "hybrid", question: "é" });
    }

    #[test]
    fn render_lists_chunk_and_source_counts() {
        let response = AnswerResponse {
            answer: "Cats sleep a lot.".into(),
            sources: vec!["pets.txt".into(), "notes.pdf".into()],
            chunks_used: 3,
            passages: Vec::new(),
        };
        let out = render_response(&response);
        assert!(out.contains("Cats sleep a lot."));
        assert!(out.contains("Retrieved 3 chunks from 2 file(s)"));
        assert!(out.contains("Sources: pets.txt, notes.pdf"));
    }

    #[test]
    fn render_omits_sources_line_when_nothing_matched() {
        let response = AnswerResponse {
            answer: "nothing".into(),
            sources: Vec::new(),
            chunks_used: 0,
            passages: Vec::new(),
        };
        let out = render_response(&response);
        assert!(out.contains("Retrieved 0 chunks from 0 file(s)"));
        assert!(!out.contains("Sources:"));
    }
}
