//! Line-based terminal interaction for the survey and the chat.

use std::io::{self, BufRead, Write};

use crate::chat::{ChatSession, Sender};
use crate::survey::{Question, QuestionKind, Wizard};

pub struct Console<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Next trimmed input line, `None` at end of input.
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    pub fn confirm(&mut self, question: &str) -> io::Result<bool> {
        write!(self.output, "{question} [y/N] ")?;
        self.output.flush()?;
        let answer = self.read_line()?.unwrap_or_default();
        Ok(matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"))
    }

    fn show_question(&mut self, question: &Question, current: Option<&str>) -> io::Result<()> {
        writeln!(self.output)?;
        writeln!(self.output, "{}", question.text)?;
        match question.kind {
            QuestionKind::Choice(choices) => {
                for choice in choices {
                    writeln!(self.output, "  [{}] {}", choice.value, choice.label)?;
                }
            }
            QuestionKind::Numeric { min, max, unit, .. } => {
                let mut hint = String::new();
                if let Some(unit) = unit {
                    hint.push_str(unit);
                }
                if let (Some(min), Some(max)) = (min, max) {
                    if !hint.is_empty() {
                        hint.push_str(", ");
                    }
                    hint.push_str(&format!("usually {min}-{max}"));
                }
                if !hint.is_empty() {
                    writeln!(self.output, "  ({hint})")?;
                }
            }
        }
        match current {
            Some(value) => write!(self.output, "[{value}] > ")?,
            None => write!(self.output, "> ")?,
        }
        self.output.flush()
    }

    /// Walks the user through the survey until the last step is complete.
    ///
    /// Enter keeps the current answer, `-` clears it, `b` goes back and `q`
    /// quits. Returns `false` when the user quit or input ended.
    pub fn fill_wizard(&mut self, wizard: &mut Wizard) -> anyhow::Result<bool> {
        writeln!(
            self.output,
            "Answer each question. Enter keeps an answer, '-' clears it, 'b' goes back, 'q' quits."
        )?;
        if let Some(error) = wizard.last_error() {
            writeln!(self.output, "Last attempt failed: {error}")?;
        }

        'steps: loop {
            let step = wizard.current_step();
            writeln!(self.output)?;
            writeln!(
                self.output,
                "Step {}/{}: {} - {}",
                wizard.step_index() + 1,
                wizard.step_count(),
                step.label,
                step.title
            )?;
            if let Some(description) = step.description {
                writeln!(self.output, "{description}")?;
            }

            let mut index = 0;
            while index < step.questions.len() {
                let question = &step.questions[index];
                self.show_question(question, wizard.answer(question.id))?;
                let Some(input) = self.read_line()? else {
                    return Ok(false);
                };

                match input.as_str() {
                    "q" => return Ok(false),
                    "b" if index > 0 => index -= 1,
                    "b" => match wizard.back() {
                        Ok(()) => continue 'steps,
                        Err(err) => writeln!(self.output, "{err}")?,
                    },
                    "" if wizard.answer(question.id).is_some() => index += 1,
                    "" => writeln!(self.output, "An answer is required.")?,
                    "-" => wizard.set_answer(question.id, "")?,
                    value => match wizard.set_answer(question.id, value) {
                        Ok(()) => index += 1,
                        Err(err) => writeln!(self.output, "{err}")?,
                    },
                }
            }

            if wizard.is_last_step() {
                return Ok(true);
            }
            wizard.next()?;
        }
    }

    pub fn run_chat(&mut self, chat: &mut ChatSession) -> io::Result<()> {
        for message in chat.messages() {
            write_message(&mut self.output, message.sender, &message.text)?;
        }
        writeln!(self.output, "(type 'quit' to leave)")?;

        loop {
            write!(self.output, "you> ")?;
            self.output.flush()?;
            let Some(line) = self.read_line()? else {
                break;
            };
            if line.eq_ignore_ascii_case("quit") {
                break;
            }
            if let Some(reply) = chat.send(&line) {
                write_message(&mut self.output, reply.sender, &reply.text)?;
            }
        }
        Ok(())
    }
}

fn write_message(output: &mut impl Write, sender: Sender, text: &str) -> io::Result<()> {
    let name = match sender {
        Sender::User => "you",
        Sender::Assistant => "assistant",
    };
    writeln!(output, "{name}> {text}")
}
