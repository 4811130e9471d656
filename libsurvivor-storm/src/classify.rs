//! Response classification.
//!
//! Pure decision logic: no I/O happens here. The prober asks
//! [`Classifier::needs_body`] before reading a response body so bodies are
//! only buffered when a baseline comparison will actually run.

use crate::types::ScanConfig;

/// Jaro-Winkler boost threshold: scores at or below this get no prefix bonus.
pub const JW_BOOST_THRESHOLD: f64 = 0.7;
/// Jaro-Winkler maximum common-prefix length.
pub const JW_PREFIX_SIZE: usize = 4;

const JW_PREFIX_SCALE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Classification {
    Alive,
    StatusMatch,
    /// Status matched and the body differs enough from the catch-all baseline.
    Distinct { similarity: f64 },
    /// Status matched but the body looks like the catch-all baseline.
    CatchAll { similarity: f64 },
    StatusMismatch { status: u16 },
}

impl Classification {
    pub fn is_match(&self) -> bool {
        matches!(
            self,
            Classification::Alive | Classification::StatusMatch | Classification::Distinct { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classifier {
    check_alive: bool,
    target_status: u16,
    use_baseline: bool,
    threshold: f64,
}

impl Classifier {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            check_alive: config.check_alive,
            target_status: config.target_status,
            use_baseline: config.use_baseline,
            threshold: config.baseline_threshold,
        }
    }

    pub fn needs_body(&self, status: u16) -> bool {
        !self.check_alive && self.use_baseline && status == self.target_status
    }

    /// Evaluates a received response. `body` is only consulted when
    /// [`needs_body`](Self::needs_body) returned true; a missing body or
    /// baseline there compares as empty.
    pub fn classify(&self, status: u16, body: Option<&[u8]>, baseline: Option<&[u8]>) -> Classification {
        if self.check_alive {
            return Classification::Alive;
        }

        if status != self.target_status {
            return Classification::StatusMismatch { status };
        }

        if !self.use_baseline {
            return Classification::StatusMatch;
        }

        let similarity = jaro_winkler(
            baseline.unwrap_or_default(),
            body.unwrap_or_default(),
            JW_BOOST_THRESHOLD,
            JW_PREFIX_SIZE,
        );
        if similarity < self.threshold {
            Classification::Distinct { similarity }
        } else {
            Classification::CatchAll { similarity }
        }
    }
}

/// Jaro similarity over raw bytes, in `[0, 1]`.
pub fn jaro(a: &[u8], b: &[u8]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let window = (a.len().max(b.len()) / 2).saturating_sub(1);
    let mut a_matched = vec![false; a.len()];
    let mut b_matched = vec![false; b.len()];
    let mut matches = 0usize;

    for (i, &ca) in a.iter().enumerate() {
        let start = i.saturating_sub(window);
        let end = (i + window + 1).min(b.len());
        for j in start..end {
            if b_matched[j] || b[j] != ca {
                continue;
            }
            a_matched[i] = true;
            b_matched[j] = true;
            matches += 1;
            break;
        }
    }

    if matches == 0 {
        return 0.0;
    }

    let mut transpositions = 0usize;
    let mut k = 0usize;
    for (i, &ca) in a.iter().enumerate() {
        if !a_matched[i] {
            continue;
        }
        while !b_matched[k] {
            k += 1;
        }
        if ca != b[k] {
            transpositions += 1;
        }
        k += 1;
    }

    let m = matches as f64;
    let t = transpositions as f64 / 2.0;
    (m / a.len() as f64 + m / b.len() as f64 + (m - t) / m) / 3.0
}

/// Jaro-Winkler similarity with an explicit boost threshold and prefix cap.
pub fn jaro_winkler(a: &[u8], b: &[u8], boost_threshold: f64, prefix_size: usize) -> f64 {
    let j = jaro(a, b);
    if j <= boost_threshold {
        return j;
    }

    let limit = prefix_size.min(a.len()).min(b.len());
    let prefix = a
        .iter()
        .zip(b)
        .take(limit)
        .take_while(|(x, y)| x == y)
        .count();

    j + JW_PREFIX_SCALE * prefix as f64 * (1.0 - j)
}
