//! Display variants fed by the update aggregator.
//!
//! The monitor only needs four things from a display, so variants are
//! trait objects chosen at construction: a scrolling text transcript, or a
//! plotter that turns numeric lines into sample rows.

use std::collections::VecDeque;
use std::io::Write;

pub trait MonitorDisplay: Send {
    /// Show a batch of decoded text.
    fn render_incoming(&mut self, text: &str);

    /// The port is usable again.
    fn on_enable(&mut self);

    /// The port went away; input controls should be greyed out.
    fn on_disable(&mut self);

    fn clear(&mut self);

    fn is_enabled(&self) -> bool;

    /// Current content as text, for snapshots and tests.
    fn contents(&self) -> String;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Text transcript
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lines kept by the CLI transcript.
pub const DEFAULT_SCROLLBACK_LINES: usize = 10_000;

/// Upper bound on retained transcript text, whatever the line cap.
pub const DEFAULT_MAX_TRANSCRIPT_BYTES: usize = 4 * 1024 * 1024;

/// Append-only transcript, optionally capped to the last `max_lines` lines
/// and mirrored to a writer (stdout for the CLI). Retained text never
/// exceeds the byte cap; the oldest text goes first.
pub struct TextDisplay {
    transcript: String,
    max_lines: Option<usize>,
    max_bytes: usize,
    enabled: bool,
    mirror: Option<Box<dyn Write + Send>>,
}

impl TextDisplay {
    pub fn new(max_lines: Option<usize>) -> Self {
        Self {
            transcript: String::new(),
            max_lines,
            max_bytes: DEFAULT_MAX_TRANSCRIPT_BYTES,
            enabled: false,
            mirror: None,
        }
    }

    pub fn with_byte_cap(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_mirror(mut self, mirror: Box<dyn Write + Send>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    fn trim_to_cap(&mut self) {
        if let Some(max) = self.max_lines {
            let newlines = self.transcript.matches('\n').count();
            if newlines > max {
                let excess = newlines - max;
                if let Some((cut, _)) = self.transcript.match_indices('\n').nth(excess - 1) {
                    self.transcript.drain(..=cut);
                }
            }
        }
        if self.transcript.len() > self.max_bytes {
            let mut cut = self.transcript.len() - self.max_bytes;
            while !self.transcript.is_char_boundary(cut) {
                cut += 1;
            }
            self.transcript.drain(..cut);
        }
    }
}

impl MonitorDisplay for TextDisplay {
    fn render_incoming(&mut self, text: &str) {
        self.transcript.push_str(text);
        self.trim_to_cap();
        if let Some(mirror) = self.mirror.as_mut() {
            if let Err(e) = mirror.write_all(text.as_bytes()).and_then(|_| mirror.flush()) {
                log::warn!("Display mirror write failed: {}", e);
            }
        }
    }

    fn on_enable(&mut self) {
        self.enabled = true;
    }

    fn on_disable(&mut self) {
        self.enabled = false;
    }

    fn clear(&mut self) {
        self.transcript.clear();
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn contents(&self) -> String {
        self.transcript.clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Plotter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const DEFAULT_PLOT_WINDOW: usize = 500;

/// Longest unterminated line the plotter holds on to. Anything longer is
/// not a sample row and is skipped up to its newline.
pub const MAX_PARTIAL_LINE: usize = 4096;

/// Collects one row of values per incoming line. Fields are separated by
/// spaces, tabs or commas; anything that does not parse as a number is
/// skipped, and a line without any number produces no row.
pub struct PlotterDisplay {
    partial: String,
    /// Inside an over-long line; drop text until the next newline.
    skipping: bool,
    samples: VecDeque<Vec<f64>>,
    window: usize,
    enabled: bool,
}

impl PlotterDisplay {
    pub fn new(window: usize) -> Self {
        Self {
            partial: String::new(),
            skipping: false,
            samples: VecDeque::with_capacity(window.max(1)),
            window: window.max(1),
            enabled: false,
        }
    }

    /// Oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &[f64]> {
        self.samples.iter().map(Vec::as_slice)
    }

    pub fn parse_line(line: &str) -> Option<Vec<f64>> {
        let row: Vec<f64> = line
            .split(|c: char| c == ' ' || c == '\t' || c == ',')
            .filter(|f| !f.is_empty())
            .filter_map(|f| f.parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .collect();
        (!row.is_empty()).then_some(row)
    }

    fn push_row(&mut self, row: Vec<f64>) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(row);
    }
}

impl Default for PlotterDisplay {
    fn default() -> Self {
        Self::new(DEFAULT_PLOT_WINDOW)
    }
}

impl MonitorDisplay for PlotterDisplay {
    fn render_incoming(&mut self, text: &str) {
        let mut text = text;
        if self.skipping {
            let Some(end) = text.find('\n') else {
                return;
            };
            self.skipping = false;
            text = &text[end + 1..];
        }
        self.partial.push_str(text);
        if let Some(last_newline) = self.partial.rfind('\n') {
            let complete: String = self.partial.drain(..=last_newline).collect();
            for line in complete.lines() {
                if let Some(row) = Self::parse_line(line.trim_end_matches('\r')) {
                    self.push_row(row);
                }
            }
        }
        if self.partial.len() > MAX_PARTIAL_LINE {
            log::debug!("Plotter dropping {}-byte unterminated line", self.partial.len());
            self.partial.clear();
            self.skipping = true;
        }
    }

    fn on_enable(&mut self) {
        self.enabled = true;
    }

    fn on_disable(&mut self) {
        self.enabled = false;
    }

    fn clear(&mut self) {
        self.partial.clear();
        self.skipping = false;
        self.samples.clear();
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// One comma-separated line per sample row.
    fn contents(&self) -> String {
        let mut out = String::new();
        for row in &self.samples {
            let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            out.push_str(&line.join(","));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_text_display_appends_and_mirrors() {
        let buf = SharedBuf::default();
        let mut display = TextDisplay::new(None).with_mirror(Box::new(buf.clone()));
        display.render_incoming("boot ok\n");
        display.render_incoming("temp=21\n");
        assert_eq!(display.transcript(), "boot ok\ntemp=21\n");
        assert_eq!(buf.0.lock().unwrap().as_slice(), b"boot ok\ntemp=21\n");
        display.clear();
        assert!(display.contents().is_empty());
    }

    #[test]
    fn test_text_display_line_cap() {
        let mut display = TextDisplay::new(Some(2));
        display.render_incoming("one\ntwo\nthree\nfour");
        assert_eq!(display.transcript(), "two\nthree\nfour");
        display.render_incoming("\n");
        assert_eq!(display.transcript(), "three\nfour\n");
    }

    #[test]
    fn test_text_display_byte_cap_keeps_newest_text() {
        let mut display = TextDisplay::new(None).with_byte_cap(8);
        display.render_incoming("abcdef");
        display.render_incoming("ghij");
        assert_eq!(display.transcript(), "cdefghij");

        // Never cuts inside a character.
        let mut display = TextDisplay::new(None).with_byte_cap(4);
        display.render_incoming("€€");
        assert_eq!(display.transcript(), "€");
    }

    #[test]
    fn test_text_display_without_newlines_stays_bounded() {
        let mut display = TextDisplay::new(Some(DEFAULT_SCROLLBACK_LINES));
        let chunk = "x".repeat(64 * 1024);
        for _ in 0..100 {
            display.render_incoming(&chunk);
        }
        assert_eq!(display.transcript().len(), DEFAULT_MAX_TRANSCRIPT_BYTES);
    }

    #[test]
    fn test_enable_disable() {
        let mut display = TextDisplay::new(None);
        assert!(!display.is_enabled());
        display.on_enable();
        assert!(display.is_enabled());
        display.on_disable();
        assert!(!display.is_enabled());
    }

    #[test]
    fn test_parse_line_separators() {
        assert_eq!(PlotterDisplay::parse_line("1 2.5\t-3,4e2"), Some(vec![1.0, 2.5, -3.0, 400.0]));
        assert_eq!(PlotterDisplay::parse_line("temp: 21.5"), Some(vec![21.5]));
        assert_eq!(PlotterDisplay::parse_line("booting..."), None);
        assert_eq!(PlotterDisplay::parse_line(""), None);
    }

    #[test]
    fn test_plotter_carries_partial_lines() {
        let mut plot = PlotterDisplay::default();
        plot.render_incoming("10,2");
        assert_eq!(plot.samples().count(), 0);
        plot.render_incoming("0\r\n30,");
        plot.render_incoming("40\nnoise\n");
        let rows: Vec<Vec<f64>> = plot.samples().map(|r| r.to_vec()).collect();
        assert_eq!(rows, vec![vec![10.0, 20.0], vec![30.0, 40.0]]);
        assert_eq!(plot.contents(), "10,20\n30,40\n");
    }

    #[test]
    fn test_plotter_drops_overlong_unterminated_line() {
        let mut plot = PlotterDisplay::default();
        plot.render_incoming("1\n");
        for _ in 0..10 {
            plot.render_incoming(&"9".repeat(1024));
        }
        assert!(plot.partial.len() <= MAX_PARTIAL_LINE);

        // The tail of the dropped line must not turn into a sample.
        plot.render_incoming("99\n2\n");
        let rows: Vec<Vec<f64>> = plot.samples().map(|r| r.to_vec()).collect();
        assert_eq!(rows, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_plotter_window_is_bounded() {
        let mut plot = PlotterDisplay::new(3);
        for i in 0..5 {
            plot.render_incoming(&format!("{i}\n"));
        }
        let firsts: Vec<f64> = plot.samples().map(|r| r[0]).collect();
        assert_eq!(firsts, vec![2.0, 3.0, 4.0]);
    }
}
