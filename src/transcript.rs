//! Line-oriented rendering of the transcript to a terminal.

use std::io::{self, Write};

use crate::app::{App, Speaker, TranscriptEntry};

/// Prints transcript entries once, in order, streaming the newest one.
///
/// An entry that is still streaming holds back the entries after it, so
/// replies from several models never interleave mid-line.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    epoch: u64,
    next: usize,
    /// Content of the open entry written so far.
    shown: String,
    open: bool,
}

impl TranscriptPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render<W: Write>(&mut self, app: &App, out: &mut W) -> io::Result<()> {
        if app.transcript_epoch() != self.epoch || app.transcript.len() < self.next {
            if self.open {
                writeln!(out)?;
            }
            writeln!(out)?;
            *self = Self {
                epoch: app.transcript_epoch(),
                ..Self::default()
            };
        }

        while let Some(entry) = app.transcript.get(self.next) {
            if !self.open {
                out.write_all(prefix(entry).as_bytes())?;
                self.open = true;
                self.shown.clear();
            }

            let content = entry.content.as_str();
            if !content.starts_with(self.shown.as_str()) {
                writeln!(out)?;
                out.write_all(prefix(entry).as_bytes())?;
                self.shown.clear();
            }
            out.write_all(content[self.shown.len()..].as_bytes())?;
            self.shown.clear();
            self.shown.push_str(content);

            if entry.streaming {
                break;
            }
            writeln!(out)?;
            self.next += 1;
            self.open = false;
        }

        out.flush()
    }
}

fn prefix(entry: &TranscriptEntry) -> String {
    match &entry.speaker {
        Speaker::User => "you> ".to_string(),
        Speaker::Model(model) => format!("[{model}] "),
        Speaker::Notice => "-- ".to_string(),
        Speaker::Error => "!! ".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn entry(speaker: Speaker, content: &str, streaming: bool, run_id: Option<u64>) -> TranscriptEntry {
        TranscriptEntry {
            speaker,
            content: content.to_string(),
            streaming,
            run_id,
        }
    }

    fn render(printer: &mut TranscriptPrinter, app: &App) -> String {
        let mut out = Vec::new();
        printer.render(app, &mut out).expect("render to memory");
        String::from_utf8(out).expect("utf8 output")
    }

    #[test]
    fn streaming_entry_prints_deltas_and_holds_back_later_entries() {
        let mut app = App::new(["a", "b"]);
        let mut printer = TranscriptPrinter::new();
        app.transcript.push(entry(Speaker::User, "hi", false, None));
        app.transcript
            .push(entry(Speaker::Model("a".to_string()), "Hel", true, Some(1)));
        app.transcript
            .push(entry(Speaker::Model("b".to_string()), "Yo", true, Some(2)));

        assert_eq!(render(&mut printer, &app), "you> hi\n[a] Hel");

        app.transcript[1].content.push_str("lo");
        app.transcript[1].streaming = false;
        app.transcript[2].streaming = false;
        assert_eq!(render(&mut printer, &app), "lo\n[b] Yo\n");
        assert_eq!(render(&mut printer, &app), "");
    }

    #[test]
    fn replaced_content_is_reprinted() {
        let mut app = App::new(["a"]);
        let mut printer = TranscriptPrinter::new();
        app.transcript
            .push(entry(Speaker::Model("a".to_string()), "partial", true, Some(1)));
        render(&mut printer, &app);

        app.transcript[0].content = "[no]".to_string();
        app.transcript[0].streaming = false;

        assert_eq!(render(&mut printer, &app), "\n[a] [no]\n");
    }

    #[test]
    fn whitespace_reply_replaced_by_longer_placeholder_is_reprinted() {
        let mut app = App::new(["a"]);
        let mut printer = TranscriptPrinter::new();
        app.transcript
            .push(entry(Speaker::Model("a".to_string()), "  ", true, Some(1)));
        assert_eq!(render(&mut printer, &app), "[a]   ");

        app.transcript[0].content = crate::app::NO_REPLY_PLACEHOLDER.to_string();
        app.transcript[0].streaming = false;

        assert_eq!(render(&mut printer, &app), "\n[a] [no reply]\n");
    }
}
