//! Reproducible marker insertion, used to test how downstream consumers cope with noisy text.

use crate::config::PerturbConfig;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Inserts markers after words with a fixed probability, from a dedicated seeded stream.
///
/// Build one per process and share it: the stream advances across calls.
#[derive(Debug)]
pub struct Perturber {
    cfg: PerturbConfig,
    rng: Mutex<StdRng>,
}

impl Perturber {
    pub fn new(cfg: PerturbConfig) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self {
            cfg,
            rng: Mutex::new(rng),
        }
    }

    pub fn disabled() -> Self {
        Self::new(PerturbConfig::default())
    }

    pub fn from_env() -> Self {
        Self::new(PerturbConfig::from_env())
    }

    pub fn is_enabled(&self) -> bool {
        self.cfg.enabled && !self.cfg.pool.is_empty()
    }

    pub fn apply(&self, text: &str) -> String {
        if !self.is_enabled() || text.is_empty() {
            return text.to_string();
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = String::with_capacity(text.len() + text.len() / 8);
        for seg in split_runs(text) {
            out.push_str(seg);
            if seg.starts_with(char::is_whitespace) {
                continue;
            }
            if rng.gen::<f64>() < self.cfg.rate {
                if let Some(marker) = self.cfg.pool.choose(&mut *rng) {
                    out.push(' ');
                    out.push_str(marker);
                    out.push(' ');
                }
            }
        }
        out
    }
}

/// Split into maximal runs of whitespace / non-whitespace, in order.
fn split_runs(text: &str) -> Vec<&str> {
    let mut runs = Vec::new();
    let mut start = 0usize;
    let mut in_ws: Option<bool> = None;
    for (i, ch) in text.char_indices() {
        let ws = ch.is_whitespace();
        match in_ws {
            Some(prev) if prev != ws => {
                runs.push(&text[start..i]);
                start = i;
            }
            _ => {}
        }
        in_ws = Some(ws);
    }
    if start < text.len() {
        runs.push(&text[start..]);
    }
    runs
}
