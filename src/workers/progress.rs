use std::collections::VecDeque;

/// Highest value reported while the tool is still running; 100 is reserved for success.
pub const RUNNING_CEILING: u8 = 99;

/// Turns ffmpeg `-progress` key/value lines (and stderr `time=` stats) into a
/// monotonic percentage against an expected duration.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_secs: Option<f64>,
    last: u8,
}

impl ProgressTracker {
    pub fn new(total_secs: Option<f64>) -> Self {
        Self {
            total_secs: total_secs.filter(|t| t.is_finite() && *t > 0.0),
            last: 0,
        }
    }

    pub fn last(&self) -> u8 {
        self.last
    }

    /// Lines from `-progress pipe:1`. Returns a value only when progress advanced.
    pub fn observe_progress_line(&mut self, line: &str) -> Option<u8> {
        let (key, value) = line.trim().split_once('=')?;
        let elapsed = match key {
            // out_time_ms is in microseconds as well.
            "out_time_us" | "out_time_ms" => value.trim().parse::<i64>().ok().map(|us| us as f64 / 1_000_000.0),
            "out_time" => parse_clock(value.trim()),
            _ => None,
        }?;
        self.advance(elapsed)
    }

    /// `frame=... time=00:00:12.34 bitrate=...` lines some builds still print on stderr.
    pub fn observe_stats_line(&mut self, line: &str) -> Option<u8> {
        let start = line.find("time=")? + "time=".len();
        let token = line[start..].split_whitespace().next()?;
        let elapsed = parse_clock(token)?;
        self.advance(elapsed)
    }

    fn advance(&mut self, elapsed_secs: f64) -> Option<u8> {
        let total = self.total_secs?;
        if !elapsed_secs.is_finite() || elapsed_secs < 0.0 {
            return None;
        }
        let pct = ((elapsed_secs / total) * 100.0).floor().min(RUNNING_CEILING as f64) as u8;
        if pct > self.last {
            self.last = pct;
            Some(pct)
        } else {
            None
        }
    }
}

/// `HH:MM:SS(.frac)`. Negative or `N/A` values yield `None`.
pub fn parse_clock(value: &str) -> Option<f64> {
    if value.starts_with('-') {
        return None;
    }
    let mut parts = value.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Last `capacity` non-empty diagnostic lines.
#[derive(Debug, Clone)]
pub struct DiagnosticTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl DiagnosticTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: &str) {
        let line = line.trim_end();
        if line.is_empty() || self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    pub fn into_vec(self) -> Vec<String> {
        self.lines.into()
    }
}
