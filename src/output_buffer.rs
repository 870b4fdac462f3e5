//! Bounded "first N + last N chars" record of a block's combined
//! stdout/stderr, mirroring the truncation discipline the teacher's tmux
//! and shell tools apply to long-running process output.

const DEFAULT_FIRST_LIMIT: usize = 10_000;
const DEFAULT_LAST_LIMIT: usize = 10_000;

#[derive(Debug, Default)]
pub struct OutputBuffer {
    first_limit: usize,
    last_limit: usize,
    first_part: String,
    last_part: String,
    total_length: usize,
    truncated: bool,
    truncation_notice_sent: bool,
    saved_segments: Vec<String>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_FIRST_LIMIT, DEFAULT_LAST_LIMIT)
    }

    pub fn with_limits(first_limit: usize, last_limit: usize) -> Self {
        Self {
            first_limit,
            last_limit,
            first_part: String::new(),
            last_part: String::new(),
            total_length: 0,
            truncated: false,
            truncation_notice_sent: false,
            saved_segments: Vec::new(),
        }
    }

    /// Feed `text` in; returns the prefix that should be streamed live to
    /// the caller. Anything beyond `first_limit` is folded into the rolling
    /// `last_part` window instead and never streamed.
    pub fn append(&mut self, text: &str) -> String {
        self.total_length += text.chars().count();

        if self.first_part.chars().count() >= self.first_limit {
            self.truncated = true;
            self.push_last(text);
            return String::new();
        }

        let remaining = self.first_limit - self.first_part.chars().count();
        let mut chars = text.chars();
        let to_stream: String = chars.by_ref().take(remaining).collect();
        self.first_part.push_str(&to_stream);

        let overflow: String = chars.collect();
        if !overflow.is_empty() {
            self.truncated = true;
            self.push_last(&overflow);
        }

        to_stream
    }

    fn push_last(&mut self, text: &str) {
        self.last_part.push_str(text);
        let count = self.last_part.chars().count();
        if count > self.last_limit {
            let drop = count - self.last_limit;
            self.last_part = self.last_part.chars().skip(drop).collect();
        }
    }

    /// First-call-only truncation notice; empty on every subsequent call.
    pub fn truncation_notice(&mut self) -> String {
        if !self.truncated || self.truncation_notice_sent {
            return String::new();
        }
        self.truncation_notice_sent = true;
        let omitted = self.total_length.saturating_sub(self.first_part.chars().count());
        format!(
            "\n\n... [truncated {omitted} chars] ...\n\n{}",
            self.last_part
        )
    }

    /// Freeze the current segment (with its truncation marker, if any) and
    /// reset rolling state. Called before injecting interactive input.
    pub fn reset_for_interaction(&mut self) {
        let mut frozen = std::mem::take(&mut self.first_part);
        let notice = self.truncation_notice();
        frozen.push_str(&notice);
        self.saved_segments.push(frozen);

        self.last_part.clear();
        self.total_length = 0;
        self.truncated = false;
        self.truncation_notice_sent = false;
    }

    /// Full output so far: all saved segments plus the live segment,
    /// including an inline truncation note rather than the stream-only one.
    pub fn get_output(&self) -> String {
        let mut out = self.saved_segments.concat();
        out.push_str(&self.first_part);
        if self.truncated {
            let omitted = self.total_length.saturating_sub(self.first_part.chars().count());
            out.push_str(&format!(
                "\n\n... [truncated {omitted} chars] ...\n\n{}",
                self.last_part
            ));
        }
        out
    }

    pub fn saved_segment_count(&self) -> usize {
        self.saved_segments.len()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}
