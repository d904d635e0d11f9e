// Copyright 2026 Cornell University
// released under MIT License

use std::io::Write;

use clap::ColorChoice;
use codespan_reporting::diagnostic::{
    Diagnostic as CodespanDiagnostic, Label as CodespanLabel, LabelStyle, Severity,
};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{Buffer, Color, ColorSpec, WriteColor};
use pest::iterators::Pair;
use pest::RuleType;
use rustc_hash::FxHashSet;

use crate::action::{ActionIdx, ActionLog};
use crate::report::{SessionReport, TestResult};

/// Severity of diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
    Note,
}

/// A label representing a part of the source code
#[derive(Debug, Clone, PartialEq, Eq)]
struct Label {
    message: Option<String>,
    range: (usize, usize),
}

impl Label {
    fn to_codespan_label(&self, fileid: usize) -> CodespanLabel<usize> {
        CodespanLabel::new(LabelStyle::Primary, fileid, self.range.0..self.range.1)
            .with_message(self.message.clone().unwrap_or_default())
    }
}

/// Diagnostic of a particular part of a script
struct Diagnostic {
    title: String,
    message: String,
    level: Level,
    location: Option<(usize, Label)>,
}

impl Diagnostic {
    fn emit(
        &self,
        buffer: &mut Buffer,
        files: &SimpleFiles<String, String>,
    ) -> Result<(), codespan_reporting::files::Error> {
        if let Some((fileid, label)) = &self.location {
            let severity = match self.level {
                Level::Error => Severity::Error,
                Level::Warning => Severity::Warning,
                Level::Note => Severity::Note,
            };
            let diagnostic = CodespanDiagnostic::new(severity)
                .with_message(&self.message)
                .with_labels(vec![label.to_codespan_label(*fileid)]);
            term::emit(buffer, &term::Config::default(), files, &diagnostic)
        } else {
            let color = match self.level {
                Level::Error => Color::Red,
                Level::Warning => Color::Yellow,
                Level::Note => Color::Blue,
            };
            buffer.set_color(ColorSpec::new().set_bold(true).set_fg(Some(color)))?;
            write!(buffer, "{}", self.title)?;
            buffer.set_color(&ColorSpec::new())?;
            writeln!(buffer, ": {}", self.message)?;
            Ok(())
        }
    }
}

pub struct DiagnosticHandler {
    files: SimpleFiles<String, String>,
    /// Messages already reported per action
    reported: FxHashSet<(ActionIdx, String)>,
    error_string: String,
    error_count: usize,
    /// `color_choice` indicates whether to emit messages w/ ANSI colors
    color_choice: ColorChoice,
    /// Diagnostics are always collected, printing them is optional
    echo: bool,
}

impl Default for DiagnosticHandler {
    /// Default `DiagnosticHandler` does not emit colored messages
    fn default() -> Self {
        Self::new(ColorChoice::Never)
    }
}

impl DiagnosticHandler {
    pub fn new(color_choice: ColorChoice) -> Self {
        Self {
            files: SimpleFiles::new(),
            reported: FxHashSet::default(),
            error_string: String::new(),
            error_count: 0,
            color_choice,
            echo: true,
        }
    }

    /// Collects diagnostics without printing them
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    fn create_buffer(&self) -> Buffer {
        if self.color_choice == ColorChoice::Never {
            Buffer::no_color()
        } else {
            Buffer::ansi()
        }
    }

    pub fn add_file(&mut self, name: String, content: String) -> usize {
        self.files.add(name, content)
    }

    pub fn error_string(&self) -> &str {
        &self.error_string
    }

    /// Number of `Level::Error` diagnostics emitted so far
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    fn emit(&mut self, diagnostic: Diagnostic) {
        if diagnostic.level == Level::Error {
            self.error_count += 1;
        }
        let mut buffer = self.create_buffer();
        let msg = match diagnostic.emit(&mut buffer, &self.files) {
            Ok(()) => String::from_utf8_lossy(buffer.as_slice()).to_string(),
            // unknown file or span, fall back to the bare message
            Err(_) => format!("{}: {}\n", diagnostic.title, diagnostic.message),
        };
        self.error_string.push_str(&msg);
        if self.echo {
            print!("{msg}");
        }
    }

    fn spanned(&mut self, message: &str, fileid: usize, start: usize, end: usize, level: Level) {
        let label = Label {
            message: Some(message.to_string()),
            range: (start, end),
        };
        self.emit(Diagnostic {
            title: format!("{:?} in file {}", level, fileid),
            message: message.to_string(),
            level,
            location: Some((fileid, label)),
        });
    }

    /// Generic over the rule type so that both grammars can report through it
    pub fn emit_diagnostic_parsing<R: RuleType>(
        &mut self,
        message: &str,
        fileid: usize,
        pair: &Pair<'_, R>,
        level: Level,
    ) {
        let span = pair.as_span();
        self.spanned(message, fileid, span.start(), span.end(), level);
    }

    pub fn emit_diagnostic_lexing(
        &mut self,
        message: &str,
        fileid: usize,
        start: usize,
        end: usize,
        level: Level,
    ) {
        self.spanned(message, fileid, start, end, level);
    }

    /// Points at the script statement that produced `action`. Actions built
    /// through the API have no location and get a plain message.
    pub fn emit_diagnostic_action(
        &mut self,
        log: &ActionLog,
        action: ActionIdx,
        message: &str,
        level: Level,
    ) {
        if !self.reported.insert((action, message.to_string())) {
            return;
        }
        match log.location(action) {
            Some((start, end, fileid)) => self.spanned(message, fileid, start, end, level),
            None => self.emit_general_message(&format!("{action}: {message}"), level),
        }
    }

    pub fn emit_diagnostic_result(&mut self, log: &ActionLog, result: &TestResult) {
        let message = format!(
            "[{}] expect {}: {}",
            result.locator.backend, result.locator.signal, result.outcome
        );
        self.emit_diagnostic_action(log, result.locator.action, &message, Level::Error);
    }

    /// One diagnostic per failing expectation
    pub fn emit_report(&mut self, log: &ActionLog, report: &SessionReport) {
        for result in report.failures() {
            self.emit_diagnostic_result(log, result);
        }
    }

    pub fn emit_general_message(&mut self, message: &str, level: Level) {
        self.emit(Diagnostic {
            title: format!("{:?}", level),
            message: message.to_string(),
            level,
            location: None,
        });
    }
}
