//! Interactive quiz on a terminal (`dslearn quiz`)
//!
//! Commands at the prompt:
//! - an option id, `true`/`false`, or a comma separated list of ids
//! - empty line: next question (submits on the last one)
//! - `p`: previous question
//! - `s`: submit now

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::quiz::{Answer, QuestionKind, QuestionReport, QuizQuestion, QuizSession};

enum Command {
    Next,
    Previous,
    Submit,
    Select(Answer),
}

fn parse_command(kind: &QuestionKind, line: &str) -> Option<Command> {
    let line = line.trim();
    match line {
        "" => return Some(Command::Next),
        "p" => return Some(Command::Previous),
        "s" => return Some(Command::Submit),
        _ => {}
    }

    let answer = match kind {
        QuestionKind::TrueFalse { .. } => match line.to_ascii_lowercase().as_str() {
            "t" | "true" => Answer::Bool(true),
            "f" | "false" => Answer::Bool(false),
            _ => return None,
        },
        QuestionKind::Multi { .. } if line.contains(',') => Answer::Choices(
            line.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        _ => Answer::Choice(line.to_string()),
    };
    Some(Command::Select(answer))
}

fn render_question(session: &QuizSession, question: &QuizQuestion) -> String {
    let mut out = format!(
        "\nQuestion {} of {}\n{}\n",
        session.current_index() + 1,
        session.total(),
        question.text
    );
    let answer = session.answer(&question.id);

    match &question.kind {
        QuestionKind::TrueFalse { .. } => {
            let current = match answer {
                Some(Answer::Bool(b)) => b.to_string(),
                _ => "-".to_string(),
            };
            out.push_str(&format!("  [true/false] current: {}\n", current));
        }
        kind => {
            for option in kind.options() {
                let selected = match answer {
                    Some(Answer::Choice(id)) => *id == option.id,
                    Some(Answer::Choices(ids)) => ids.contains(&option.id),
                    _ => false,
                };
                let marker = if selected { "x" } else { " " };
                out.push_str(&format!("  [{}] {}) {}\n", marker, option.id, option.text));
            }
        }
    }

    let hint = if session.is_last() { "submit" } else { "next" };
    out.push_str(&format!("(enter: {}, p: previous, s: submit) > ", hint));
    out
}

fn render_results(session: &QuizSession) -> String {
    let mut out = format!(
        "\n{}\nYou scored {} out of {}\n",
        session.quiz().title,
        session.score(),
        session.total()
    );
    for report in session.results() {
        out.push_str(&render_report(&report));
    }
    out
}

fn render_report(report: &QuestionReport) -> String {
    let verdict = if report.is_correct { "correct" } else { "wrong" };
    let mut out = format!(
        "\n{}. {} ({})\n   Your answer: {}\n",
        report.number, report.text, verdict, report.user_answer
    );
    if let Some(correct) = &report.correct_answer {
        out.push_str(&format!("   Correct answer: {}\n", correct));
    }
    if let Some(explanation) = &report.explanation {
        out.push_str(&format!("   {}\n", explanation));
    }
    out
}

/// Drive `session` from line input until the learner stops retrying
///
/// End of input submits the current attempt. Returns the last score.
pub async fn run_quiz<R, W>(session: &mut QuizSession, input: R, output: &mut W) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    loop {
        while !session.show_results() {
            let Some(question) = session.current_question() else {
                session.submit();
                break;
            };
            let prompt = render_question(session, question);
            let kind = question.kind.clone();
            let question_id = question.id.clone();
            output.write_all(prompt.as_bytes()).await?;
            output.flush().await?;

            let Some(line) = lines.next_line().await? else {
                debug!("Input closed, submitting quiz");
                session.submit();
                break;
            };

            match parse_command(&kind, &line) {
                Some(Command::Next) => session.next(),
                Some(Command::Previous) => session.previous(),
                Some(Command::Submit) => {
                    session.submit();
                }
                Some(Command::Select(answer)) => {
                    if let Err(e) = session.select_option(&question_id, answer) {
                        output.write_all(format!("! {}\n", e).as_bytes()).await?;
                    }
                }
                None => {
                    output.write_all(b"! answer with true or false\n").await?;
                }
            }
        }

        output.write_all(render_results(session).as_bytes()).await?;
        output.write_all(b"\nRetry? [y/N] > ").await?;
        output.flush().await?;

        match lines.next_line().await? {
            Some(line) if line.trim().eq_ignore_ascii_case("y") => session.retry(),
            _ => return Ok(session.score()),
        }
    }
}
