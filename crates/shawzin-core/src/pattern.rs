//! Repeated-run detection over resolved or mapped events

use serde::{Deserialize, Serialize};

use crate::chord::ResolvedEvent;

/// Something with an identity, a length and a position on the timeline
pub trait PatternElement {
    type Key: PartialEq;

    fn key(&self) -> Self::Key;
    fn onset(&self) -> u64;
    fn duration(&self) -> u64;
}

impl PatternElement for ResolvedEvent {
    type Key = (u8, Option<char>);

    fn key(&self) -> Self::Key {
        (self.pitch, self.chord_symbol)
    }

    fn onset(&self) -> u64 {
        self.onset
    }

    fn duration(&self) -> u64 {
        self.duration
    }
}

/// A run `start..end` that repeats the run beginning at `source`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub start: usize,
    pub end: usize,
    pub source: usize,
}

impl Pattern {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternSettings {
    /// Shortest run worth reporting
    pub min_length: usize,
    /// Longest run considered (None = unbounded)
    pub max_length: Option<usize>,
}

impl Default for PatternSettings {
    fn default() -> Self {
        Self {
            min_length: 4,
            max_length: Some(64),
        }
    }
}

/// Element `a` matches element `b`, including the step from its predecessor
/// unless it opens the window
fn same_step<E: PatternElement>(events: &[E], a: usize, b: usize, first: bool) -> bool {
    if events[a].key() != events[b].key() || events[a].duration() != events[b].duration() {
        return false;
    }
    if first {
        return true;
    }
    let step_a = events[a].onset() - events[a - 1].onset();
    let step_b = events[b].onset() - events[b - 1].onset();
    step_a == step_b
}

/// Greedy longest-first, left-to-right search. Returned patterns never overlap
/// each other and each one's source region ends at or before its start.
pub fn detect_patterns<E: PatternElement>(events: &[E], settings: &PatternSettings) -> Vec<Pattern> {
    let n = events.len();
    let min_len = settings.min_length.max(1);
    let max_len = settings.max_length.unwrap_or(n).max(min_len);
    let mut patterns = Vec::new();

    let mut pos = 0;
    while pos + min_len <= n {
        let mut best: Option<(usize, usize)> = None;
        for src in 0..pos {
            let limit = max_len.min(pos - src).min(n - pos);
            if limit < min_len || best.is_some_and(|(len, _)| len >= limit) {
                continue;
            }
            let mut len = 0;
            while len < limit && same_step(events, src + len, pos + len, len == 0) {
                len += 1;
            }
            if len >= min_len && best.is_none_or(|(best_len, _)| len > best_len) {
                best = Some((len, src));
            }
        }

        match best {
            Some((len, src)) => {
                patterns.push(Pattern {
                    start: pos,
                    end: pos + len,
                    source: src,
                });
                pos += len;
            }
            None => pos += 1,
        }
    }
    patterns
}

/// Headline numbers for a set of patterns
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub count: usize,
    pub covered: usize,
    pub total: usize,
    /// Fraction of events inside a repeat (0.0-1.0)
    pub ratio: f64,
}

impl PatternSummary {
    pub fn new(patterns: &[Pattern], total: usize) -> Self {
        let covered: usize = patterns.iter().map(Pattern::len).sum();
        Self {
            count: patterns.len(),
            covered,
            total,
            ratio: if total == 0 { 0.0 } else { covered as f64 / total as f64 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(pitch: u8, onset: u64, duration: u64) -> ResolvedEvent {
        ResolvedEvent {
            pitch,
            onset,
            duration,
            source: 0,
            chord_symbol: None,
        }
    }

    /// Evenly spaced eighth notes
    fn line(pitches: &[u8]) -> Vec<ResolvedEvent> {
        pitches
            .iter()
            .enumerate()
            .map(|(i, &p)| ev(p, i as u64 * 240, 240))
            .collect()
    }

    fn assert_valid(events: &[ResolvedEvent], patterns: &[Pattern]) {
        for w in patterns.windows(2) {
            assert!(w[0].end <= w[1].start);
        }
        for p in patterns {
            assert!(p.source + p.len() <= p.start);
            for k in 0..p.len() {
                assert!(same_step(events, p.source + k, p.start + k, k == 0));
            }
        }
    }

    #[test]
    fn test_exact_repeat_is_found() {
        let events = line(&[60, 62, 64, 65, 60, 62, 64, 65]);
        let patterns = detect_patterns(&events, &PatternSettings::default());
        assert_eq!(patterns, vec![Pattern { start: 4, end: 8, source: 0 }]);
        assert_valid(&events, &patterns);
    }

    #[test]
    fn test_short_repeats_are_ignored() {
        let events = line(&[60, 62, 64, 60, 62, 64]);
        assert!(detect_patterns(&events, &PatternSettings::default()).is_empty());
    }

    #[test]
    fn test_transposed_run_does_not_match() {
        let events = line(&[60, 62, 64, 65, 62, 64, 66, 67]);
        assert!(detect_patterns(&events, &PatternSettings::default()).is_empty());
    }

    #[test]
    fn test_rhythm_must_match() {
        let mut events = line(&[60, 62, 64, 65]);
        let shifted: Vec<ResolvedEvent> = [60, 62, 64, 65]
            .iter()
            .enumerate()
            .map(|(i, &p)| ev(p, 2000 + i as u64 * 480, 240))
            .collect();
        events.extend(shifted);
        let patterns = detect_patterns(&events, &PatternSettings::default());
        assert!(patterns.is_empty());
    }

    #[test]
    fn test_longest_match_wins_and_regions_skip() {
        let a = [60, 62, 64, 65, 67];
        let mut pitches = a.to_vec();
        pitches.extend_from_slice(&a);
        pitches.extend_from_slice(&a);
        let events = line(&pitches);
        let patterns = detect_patterns(&events, &PatternSettings::default());
        assert_eq!(
            patterns,
            vec![
                Pattern { start: 5, end: 10, source: 0 },
                Pattern { start: 10, end: 15, source: 0 },
            ]
        );
        assert_valid(&events, &patterns);
    }

    #[test]
    fn test_max_length_caps_window() {
        let events = line(&[1, 2, 3, 4, 5, 6, 1, 2, 3, 4, 5, 6]);
        let settings = PatternSettings {
            min_length: 4,
            max_length: Some(4),
        };
        let patterns = detect_patterns(&events, &settings);
        assert_eq!(patterns[0], Pattern { start: 6, end: 10, source: 0 });
        assert_valid(&events, &patterns);
    }

    #[test]
    fn test_summary() {
        let events = line(&[60, 62, 64, 65, 60, 62, 64, 65, 70, 71]);
        let patterns = detect_patterns(&events, &PatternSettings::default());
        let summary = PatternSummary::new(&patterns, events.len());
        assert_eq!(summary.count, 1);
        assert_eq!(summary.covered, 4);
        assert!((summary.ratio - 0.4).abs() < 1e-12);
        assert_eq!(PatternSummary::new(&[], 0).ratio, 0.0);
    }
}
