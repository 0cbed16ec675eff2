//! Line-oriented prediction loop
//!
//! Reads the three request fields from any `BufRead`, writes prompts and
//! labels to any `Write`. Typing `exit` at any prompt, or reaching end of
//! input, ends the session.

use crate::error::{AppError, Result};
use crate::ml::{InferencePipeline, PriorityService};
use crate::models::{ComplaintRecord, InferenceRequest, Priority};
use std::io::{BufRead, Write};
use tracing::debug;

pub const EXIT_SENTINEL: &str = "exit";

/// Anything that can answer a single-record prediction request
pub trait Predictor {
    fn predict_request(&self, request: &InferenceRequest) -> Result<Priority>;
}

impl Predictor for InferencePipeline {
    fn predict_request(&self, request: &InferenceRequest) -> Result<Priority> {
        InferencePipeline::predict_request(self, request)
    }
}

impl Predictor for PriorityService {
    fn predict_request(&self, request: &InferenceRequest) -> Result<Priority> {
        self.predict(request)
    }
}

pub struct InteractiveSession<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> InteractiveSession<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Print `prompt` and read one trimmed line; `None` on exit or end of input
    fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.writer, "{}", prompt)?;
        self.writer.flush()?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let line = line.trim();
        if line.eq_ignore_ascii_case(EXIT_SENTINEL) {
            return Ok(None);
        }
        Ok(Some(line.to_string()))
    }

    /// Ask until the answer is a valid attachment count
    fn ask_attachments(&mut self) -> Result<Option<i64>> {
        loop {
            let Some(raw) = self.ask("Number of attachments: ")? else {
                return Ok(None);
            };
            match ComplaintRecord::parse_attachments(&raw) {
                Ok(value) => return Ok(Some(value)),
                Err(e) if e.is_recoverable_input() => writeln!(self.writer, "{}", e)?,
                Err(e) => return Err(e),
            }
        }
    }

    /// Run until exit; returns the number of predictions made
    pub fn run<P: Predictor + ?Sized>(&mut self, predictor: &P) -> Result<usize> {
        writeln!(
            self.writer,
            "Enter complaint details (type '{}' to quit).",
            EXIT_SENTINEL
        )?;

        let mut served = 0;
        loop {
            let Some(issue_type) = self.ask("Issue type: ")? else {
                break;
            };
            let Some(complaint_text) = self.ask("Complaint text: ")? else {
                break;
            };
            let Some(attachments) = self.ask_attachments()? else {
                break;
            };

            let request = InferenceRequest::new(issue_type, complaint_text, attachments);
            match predictor.predict_request(&request) {
                Ok(priority) => {
                    writeln!(self.writer, "Predicted priority: {}", priority)?;
                    served += 1;
                }
                Err(e @ AppError::InvalidInput(_)) => writeln!(self.writer, "{}", e)?,
                Err(e) => return Err(e),
            }
        }

        debug!(served, "Interactive session ended");
        writeln!(self.writer, "Goodbye.")?;
        Ok(served)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor;

    /// Records requests and answers by attachment count
    struct StubPredictor {
        seen: RefCell<Vec<InferenceRequest>>,
    }

    impl StubPredictor {
        fn new() -> Self {
            Self {
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl Predictor for StubPredictor {
        fn predict_request(&self, request: &InferenceRequest) -> Result<Priority> {
            self.seen.borrow_mut().push(request.clone());
            Ok(if request.attachments > 1 {
                Priority::High
            } else {
                Priority::Low
            })
        }
    }

    fn run(input: &str) -> (usize, String, Vec<InferenceRequest>) {
        let predictor = StubPredictor::new();
        let mut output = Vec::new();
        let served = InteractiveSession::new(Cursor::new(input), &mut output)
            .run(&predictor)
            .unwrap();
        (
            served,
            String::from_utf8(output).unwrap(),
            predictor.seen.into_inner(),
        )
    }

    #[test]
    fn test_single_prediction_then_exit() {
        let (served, output, seen) = run("Water Leakage\npipe burst on road\n2\nexit\n");
        assert_eq!(served, 1);
        assert!(output.contains("Predicted priority: High"));
        assert!(output.ends_with("Goodbye.\n"));
        assert_eq!(seen[0].issue_type, "Water Leakage");
        assert_eq!(seen[0].complaint_text, "pipe burst on road");
    }

    #[test]
    fn test_invalid_attachments_reprompts() {
        let (served, output, seen) = run("Garbage\nbins full\nmany\n-1\n0\nEXIT\n");
        assert_eq!(served, 1);
        assert_eq!(output.matches("Number of attachments: ").count(), 3);
        assert!(output.contains("Invalid input"));
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].attachments, 0);
    }

    #[test]
    fn test_end_of_input_stops_cleanly() {
        let (served, _, seen) = run("Garbage\n");
        assert_eq!(served, 0);
        assert!(seen.is_empty());
    }

    #[test]
    fn test_exit_mid_record() {
        let (served, _, seen) = run("Noise\nexit\n");
        assert_eq!(served, 0);
        assert!(seen.is_empty());
    }
}
