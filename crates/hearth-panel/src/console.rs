use crate::logs::{LogRecord, classify, classify_value};
use crate::presence::{Presence, PresenceFeed};

/// The console buffer a panel holds for one server: the latest
/// realtime-output window plus locally injected command echoes.
///
/// The backend has no push channel, so each fetch replaces the output
/// window wholesale; presence is re-derived from the merged buffer
/// after every change, which makes it resilient to window truncation
/// and out-of-order delivery. Everything is bounded by `max_lines`
/// with the oldest lines evicted first.
#[derive(Debug)]
pub struct Console {
    max_lines: usize,
    synced: Vec<LogRecord>,
    injected: Vec<LogRecord>,
    presence: PresenceFeed,
}

impl Console {
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            synced: Vec::new(),
            injected: Vec::new(),
            presence: PresenceFeed::new(),
        }
    }

    /// Replaces the output window with the latest fetch. Returns the
    /// newly derived presence only when it changed.
    pub fn sync_output(&mut self, values: &[serde_json::Value]) -> Option<Presence> {
        self.synced = values.iter().map(classify_value).collect();
        self.enforce_cap();
        self.rederive()
    }

    /// Merges a locally issued console command: a `"> {command}"` echo
    /// line followed by whatever output the backend returned for it.
    pub fn record_command(
        &mut self,
        command: &str,
        output: &[serde_json::Value],
    ) -> Option<Presence> {
        self.injected.push(classify(&format!("> {command}")));
        self.injected.extend(output.iter().map(classify_value));
        self.enforce_cap();
        self.rederive()
    }

    /// Merged view: the synced window first, injected lines after.
    pub fn records(&self) -> Vec<LogRecord> {
        let mut out = Vec::with_capacity(self.synced.len() + self.injected.len());
        out.extend_from_slice(&self.synced);
        out.extend_from_slice(&self.injected);
        out
    }

    pub fn presence(&self) -> &Presence {
        self.presence.current()
    }

    pub fn is_empty(&self) -> bool {
        self.synced.is_empty() && self.injected.is_empty()
    }

    pub fn clear(&mut self) {
        self.synced.clear();
        self.injected.clear();
        self.rederive();
    }

    fn enforce_cap(&mut self) {
        // Injected lines are few; trim the synced window first.
        let total = self.synced.len() + self.injected.len();
        if total <= self.max_lines {
            return;
        }
        let overflow = total - self.max_lines;
        if overflow >= self.synced.len() {
            let rest = overflow - self.synced.len();
            self.synced.clear();
            self.injected.drain(0..rest.min(self.injected.len()));
        } else {
            self.synced.drain(0..overflow);
        }
    }

    fn rederive(&mut self) -> Option<Presence> {
        let lines: Vec<&str> = self
            .synced
            .iter()
            .chain(self.injected.iter())
            .map(|r| r.clean.as_str())
            .collect();
        self.presence.update(lines)
    }
}
