// src/tools/matcher.rs
//! Structural marker detection over buffer deltas.
//!
//! The matcher only looks at the bytes appended since the last check, so the
//! cost of a growth event stays proportional to the growth itself.

pub const FUNCTION_CALLS_OPEN: &str = "<function_calls>";
pub const FUNCTION_CALLS_CLOSE: &str = "</function_calls>";
pub const INVOKE_OPEN: &str = "<invoke";
pub const INVOKE_CLOSE: &str = "</invoke>";
pub const PARAMETER_OPEN: &str = "<parameter";
pub const PARAMETER_CLOSE: &str = "</parameter>";

/// Longest marker we look for; a delta is extended backwards by
/// `MAX_MARKER_LEN - 1` bytes so split markers are still seen.
pub const MAX_MARKER_LEN: usize = FUNCTION_CALLS_CLOSE.len();

pub const DEFAULT_SIGNIFICANCE_THRESHOLD: usize = 20;

/// Kind of marker found in a delta, ordered outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TagKind {
    FunctionStart,
    Invoke,
    Parameter,
    Closing,
    Content,
    None,
}

impl TagKind {
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            TagKind::FunctionStart | TagKind::Invoke | TagKind::Parameter | TagKind::Closing
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub kind: TagKind,
    pub significant: bool,
}

impl Detection {
    const NONE: Detection = Detection {
        kind: TagKind::None,
        significant: false,
    };
}

#[derive(Debug, Clone, Copy)]
pub struct TagMatcher {
    significance_threshold: usize,
}

impl Default for TagMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNIFICANCE_THRESHOLD)
    }
}

impl TagMatcher {
    pub fn new(significance_threshold: usize) -> Self {
        Self {
            significance_threshold,
        }
    }

    /// Classify a delta. The earliest marker wins; markers starting at the
    /// same offset resolve to the outermost kind.
    pub fn detect(&self, delta: &str) -> Detection {
        self.detect_with_lookback("", delta)
    }

    /// Same as [`detect`](Self::detect), but `prev_tail` (the end of the buffer
    /// before this delta) is searched too so a marker split across two growth
    /// events is found. Markers lying entirely inside `prev_tail` are ignored
    /// since they were reported by an earlier call.
    pub fn detect_with_lookback(&self, prev_tail: &str, delta: &str) -> Detection {
        if delta.is_empty() {
            return Detection::NONE;
        }
        let window = if prev_tail.is_empty() {
            std::borrow::Cow::Borrowed(delta)
        } else {
            std::borrow::Cow::Owned(format!("{prev_tail}{delta}"))
        };

        if let Some(kind) = earliest_marker(&window, prev_tail.len()) {
            return Detection {
                kind,
                significant: true,
            };
        }

        Detection {
            kind: TagKind::Content,
            significant: delta.chars().count() > self.significance_threshold,
        }
    }
}

/// Convenience wrapper using the default significance threshold.
pub fn detect(delta: &str) -> Detection {
    TagMatcher::default().detect(delta)
}

/// Suffix of `buffer` to pass as `prev_tail`, cut on a char boundary.
pub fn lookback_tail(buffer: &str) -> &str {
    let keep = MAX_MARKER_LEN - 1;
    if buffer.len() <= keep {
        return buffer;
    }
    let mut start = buffer.len() - keep;
    while !buffer.is_char_boundary(start) {
        start += 1;
    }
    &buffer[start..]
}

fn earliest_marker(window: &str, min_end: usize) -> Option<TagKind> {
    const MARKERS: [(&str, TagKind); 6] = [
        (FUNCTION_CALLS_OPEN, TagKind::FunctionStart),
        (INVOKE_OPEN, TagKind::Invoke),
        (PARAMETER_OPEN, TagKind::Parameter),
        (FUNCTION_CALLS_CLOSE, TagKind::Closing),
        (INVOKE_CLOSE, TagKind::Closing),
        (PARAMETER_CLOSE, TagKind::Closing),
    ];

    let mut best: Option<(usize, TagKind)> = None;
    for (marker, kind) in MARKERS {
        let Some(pos) = find_marker(window, marker, min_end) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((best_pos, best_kind)) => (pos, kind) < (best_pos, best_kind),
        };
        if better {
            best = Some((pos, kind));
        }
    }
    best.map(|(_, kind)| kind)
}

/// First occurrence of `marker` ending past `min_end`. Open markers without a
/// closing `>` (`<invoke`, `<parameter`) must be followed by whitespace, `>`
/// or the end of the window so `<invoker>` does not match.
fn find_marker(window: &str, marker: &str, min_end: usize) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = window[from..].find(marker) {
        let pos = from + rel;
        let end = pos + marker.len();
        from = pos + 1;
        if end <= min_end {
            continue;
        }
        if marker.ends_with('>') {
            return Some(pos);
        }
        match window[end..].chars().next() {
            None => return Some(pos),
            Some(c) if c.is_whitespace() || c == '>' => return Some(pos),
            Some(_) => {}
        }
    }
    None
}
