//! commentary.rs — Event key → commentary clip selection
//!
//! Playback stays with the client; this only resolves which clip to play.

use std::collections::BTreeMap;

use course_types::CommentaryKey;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::warn;

const ALL_KEYS: [CommentaryKey; 8] = [
    CommentaryKey::StartOver50,
    CommentaryKey::Start30To50,
    CommentaryKey::StartUnder30,
    CommentaryKey::TurnOptimalTightGood,
    CommentaryKey::TurnOptimalTightLate,
    CommentaryKey::TurnOptimalWideGood,
    CommentaryKey::TurnOptimalWideLate,
    CommentaryKey::TurnGeneric,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommentaryConfig {
    /// Event key → clip paths
    pub clips: BTreeMap<String, Vec<String>>,
}

impl Default for CommentaryConfig {
    fn default() -> Self {
        let clip = |dir: &str, files: &[&str]| -> Vec<String> {
            files.iter().map(|f| format!("commentary/ak/{dir}/{f}.mp3")).collect()
        };
        let clips = BTreeMap::from([
            (
                "start_over50".to_string(),
                clip("start_over50", &["start_over50_1", "start_over50_2", "start_over50_3"]),
            ),
            (
                "start_30_50".to_string(),
                clip("start_30_50", &["start_30_50_1", "start_30_50_2", "start_30_50_3"]),
            ),
            (
                "start_under30".to_string(),
                clip("start_under30", &["start_under30_1", "start_under30_2", "start_under30_3"]),
            ),
            (
                "turn_optimalspeed_tightline_good".to_string(),
                clip("turn_optimalspeed_tightline_goodthrottle", &["throttle_good_1", "throttle_good_2"]),
            ),
            (
                "turn_optimalspeed_tightline_late".to_string(),
                clip("turn_optimalspeed_tightline_latethrottle", &["throttle_late_1", "throttle_late_2"]),
            ),
            (
                "turn_optimalspeed_wideline_good".to_string(),
                clip("turn_optimalspeed_wideline_goodthrottle", &["wideline_1"]),
            ),
            (
                "turn_optimalspeed_wideline_late".to_string(),
                clip("turn_optimalspeed_wideline_latethrottle", &["tightline_1"]),
            ),
            ("turn_generic".to_string(), clip("turn_generic", &["ok_1", "herewego_1"])),
        ]);
        Self { clips }
    }
}

#[derive(Debug)]
pub struct CommentarySelector {
    clips: BTreeMap<String, Vec<String>>,
    rng: StdRng,
}

impl CommentarySelector {
    pub fn new(cfg: &CommentaryConfig) -> Self {
        Self::with_rng(cfg, StdRng::from_entropy())
    }

    /// Deterministic selection, for replays and tests.
    pub fn seeded(cfg: &CommentaryConfig, seed: u64) -> Self {
        Self::with_rng(cfg, StdRng::seed_from_u64(seed))
    }

    fn with_rng(cfg: &CommentaryConfig, rng: StdRng) -> Self {
        for key in cfg.clips.keys() {
            if !ALL_KEYS.iter().any(|k| k.as_str() == key) {
                warn!("Commentary clips configured for unknown event '{key}'");
            }
        }
        Self { clips: cfg.clips.clone(), rng }
    }

    /// A random clip for the event, or `None` when none is configured.
    pub fn pick(&mut self, key: CommentaryKey) -> Option<String> {
        let clip = self.clips.get(key.as_str()).and_then(|c| c.choose(&mut self.rng)).cloned();
        if clip.is_none() {
            warn!("No commentary clips for event '{}'", key.as_str());
        }
        clip
    }
}
