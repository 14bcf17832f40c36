// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// Stop-sequence detection over a fragment stream.
//
// Text is released only once it can no longer be the start of a stop
// sequence, so a sequence split across fragments is still caught and
// nothing after it leaks out.

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pushed {
    /// Text safe to emit.
    pub emit: String,
    /// A stop sequence matched; nothing further may be emitted.
    pub stopped: bool,
}

#[derive(Debug, Clone)]
pub struct StopMatcher {
    stops: Vec<String>,
    tail: String,
    stopped: bool,
}

impl StopMatcher {
    pub fn new(stops: &[String]) -> Self {
        Self {
            stops: stops.iter().filter(|s| !s.is_empty()).cloned().collect(),
            tail: String::new(),
            stopped: false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn push(&mut self, fragment: &str) -> Pushed {
        if self.stopped {
            return Pushed {
                emit: String::new(),
                stopped: true,
            };
        }
        if self.stops.is_empty() {
            return Pushed {
                emit: fragment.to_string(),
                stopped: false,
            };
        }

        let mut buf = std::mem::take(&mut self.tail);
        buf.push_str(fragment);

        let first_match = self.stops.iter().filter_map(|s| buf.find(s.as_str())).min();
        if let Some(at) = first_match {
            buf.truncate(at);
            self.stopped = true;
            return Pushed {
                emit: buf,
                stopped: true,
            };
        }

        let hold_from = self.hold_from(&buf);
        self.tail = buf.split_off(hold_from);
        Pushed {
            emit: buf,
            stopped: false,
        }
    }

    /// Release whatever was held back. Called once the stream ends.
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.tail)
    }

    /// Start of the longest suffix of `buf` that is a proper prefix of a
    /// stop sequence, or `buf.len()` if there is none.
    fn hold_from(&self, buf: &str) -> usize {
        let longest = self.stops.iter().map(String::len).max().unwrap_or(0);
        let earliest = buf.len().saturating_sub(longest.saturating_sub(1));
        (earliest..buf.len())
            .filter(|&i| buf.is_char_boundary(i))
            .find(|&i| {
                let suffix = &buf[i..];
                self.stops.iter().any(|s| s.starts_with(suffix))
            })
            .unwrap_or(buf.len())
    }
}
