use std::collections::BTreeMap;

use super::color::{self, ColorRange};
use super::frame::{Frame, Mask, Roi};
use super::regions::{self, Region};
use crate::config::{ConfigError, TrayCfg};
use crate::emotion::{EmotionMap, EmotionSet, MAX_EMOTIONS};

/// Detection parameters, usually taken from [`TrayCfg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorCfg {
    pub roi: Roi,
    /// Regions must be strictly larger than this (pixels).
    pub min_region_area: usize,
    /// Qualifying frames before a color is confirmed.
    pub debounce_frames: u32,
    pub max_emotions: usize,
}

impl From<&TrayCfg> for DetectorCfg {
    fn from(cfg: &TrayCfg) -> Self {
        Self {
            roi: cfg.roi(),
            min_region_area: cfg.min_region_area,
            debounce_frames: cfg.debounce_frames.max(1),
            max_emotions: cfg.max_emotions.clamp(1, MAX_EMOTIONS),
        }
    }
}

impl Default for DetectorCfg {
    fn default() -> Self {
        Self::from(&TrayCfg::default())
    }
}

/// Per-color count of qualifying frames in the current detection phase.
/// Never decremented; cleared only by [`DetectionCounter::reset`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionCounter {
    counts: BTreeMap<String, u32>,
}

impl DetectionCounter {
    pub fn get(&self, color: &str) -> u32 {
        self.counts.get(color).copied().unwrap_or(0)
    }

    /// Count one more qualifying frame for `color`; returns the new count.
    fn bump(&mut self, color: &str) -> u32 {
        let n = self.counts.entry(color.to_owned()).or_insert(0);
        *n = n.saturating_add(1);
        *n
    }

    pub fn reset(&mut self) {
        self.counts.clear();
    }
}

/// Outcome of one observed frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Mapped, not yet confirmed colors counted on this frame.
    pub present: Vec<String>,
    /// Emotions added to the set on this frame.
    pub newly_confirmed: Vec<String>,
}

/// Tray-masked, debounced card detector. One instance per detection phase;
/// call [`CardDetector::reset`] before reusing it.
#[derive(Debug)]
pub struct CardDetector {
    ranges: Vec<ColorRange>,
    emotions: EmotionMap,
    cfg: DetectorCfg,
    counter: DetectionCounter,
    confirmed: Vec<String>,
    set: EmotionSet,
    frames_seen: u64,
}

impl CardDetector {
    /// A cap outside `1..=MAX_EMOTIONS` is clamped, so a phase never ends empty.
    pub fn new(ranges: Vec<ColorRange>, emotions: EmotionMap, cfg: DetectorCfg) -> Self {
        let cfg = DetectorCfg {
            debounce_frames: cfg.debounce_frames.max(1),
            max_emotions: cfg.max_emotions.clamp(1, MAX_EMOTIONS),
            ..cfg
        };
        for range in &ranges {
            if emotions.emotion_for(range.name()).is_none() {
                tracing::warn!(color = range.name(), "color has no emotion mapping and will be ignored");
            }
        }
        Self {
            ranges,
            emotions,
            cfg,
            counter: DetectionCounter::default(),
            confirmed: Vec::new(),
            set: EmotionSet::new(),
            frames_seen: 0,
        }
    }

    /// Detector over the configured range file and emotion map.
    pub fn from_config(cfg: &TrayCfg) -> Result<Self, ConfigError> {
        let ranges = color::load_ranges(&cfg.hsv_ranges_path)?;
        let emotions = EmotionMap::load_or_default(cfg.emotion_map_path.as_deref())?;
        Ok(Self::new(ranges, emotions, DetectorCfg::from(cfg)))
    }

    /// Colors with a qualifying region inside the ROI of `frame`, with that region.
    /// Pure: does not touch the counters.
    pub fn classify(&self, frame: &Frame) -> Vec<(String, Region)> {
        let within = Mask::roi(frame.width(), frame.height(), &self.cfg.roi);
        let hsv = frame.to_hsv(&within);
        self.ranges
            .iter()
            .filter_map(|range| {
                let membership = range.membership(&hsv);
                regions::first_qualifying(&membership, self.cfg.min_region_area)
                    .map(|region| (range.name().to_owned(), region))
            })
            .collect()
    }

    /// Feed one frame through the debounce stage.
    pub fn observe(&mut self, frame: &Frame) -> FrameReport {
        self.frames_seen += 1;
        let mut report = FrameReport::default();
        if self.is_full() {
            return report;
        }

        for (color, region) in self.classify(frame) {
            let Some(emotion) = self.emotions.emotion_for(&color).map(str::to_owned) else {
                tracing::debug!(color = %color, "unmapped color ignored");
                continue;
            };
            if self.confirmed.contains(&color) {
                continue;
            }

            let count = self.counter.bump(&color);
            report.present.push(color.clone());
            tracing::trace!(color = %color, count, area = region.area, "qualifying region");

            if count == self.cfg.debounce_frames {
                self.confirmed.push(color.clone());
                if self.set.insert(&emotion, self.cfg.max_emotions) {
                    tracing::info!(
                        color = %color,
                        emotion = %emotion,
                        frame = self.frames_seen,
                        "card confirmed"
                    );
                    report.newly_confirmed.push(emotion);
                }
                if self.is_full() {
                    break;
                }
            }
        }
        report
    }

    pub fn emotions(&self) -> &EmotionSet {
        &self.set
    }

    pub fn counter(&self) -> &DetectionCounter {
        &self.counter
    }

    pub fn is_full(&self) -> bool {
        self.set.len() >= self.cfg.max_emotions
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Start a fresh detection phase.
    pub fn reset(&mut self) {
        self.counter.reset();
        self.confirmed.clear();
        self.set.clear();
        self.frames_seen = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::color::HsvBand;

    const BLUE: [u8; 3] = [0, 0, 255];
    const GREEN: [u8; 3] = [0, 255, 0];
    const YELLOW: [u8; 3] = [255, 255, 0];
    const PURPLE: [u8; 3] = [128, 0, 255];
    const RED: [u8; 3] = [255, 0, 0];
    const WINE: [u8; 3] = [255, 0, 30];

    fn ranges() -> Vec<ColorRange> {
        vec![
            ColorRange::single("blue", HsvBand::new([110, 100, 100], [130, 255, 255])),
            ColorRange::single("green", HsvBand::new([50, 100, 100], [70, 255, 255])),
            ColorRange::single("yellow", HsvBand::new([25, 100, 100], [35, 255, 255])),
            ColorRange::single("purple", HsvBand::new([131, 100, 100], [150, 255, 255])),
            ColorRange::split(
                "red",
                HsvBand::new([0, 120, 70], [10, 255, 255]),
                HsvBand::new([170, 120, 70], [179, 255, 255]),
            ),
            ColorRange::single("orange", HsvBand::new([11, 100, 100], [20, 255, 255])),
        ]
    }

    fn cfg() -> DetectorCfg {
        DetectorCfg {
            roi: Roi::new(10, 10, 90, 90),
            min_region_area: 50,
            debounce_frames: 4,
            max_emotions: 3,
        }
    }

    fn detector() -> CardDetector {
        CardDetector::new(ranges(), EmotionMap::default(), cfg())
    }

    /// 100x100 gray frame with 10x10 cards at the given top-left corners.
    fn frame(cards: &[([u8; 3], u32, u32)]) -> Frame {
        let mut f = Frame::solid(100, 100, [128, 128, 128]);
        for &(rgb, x, y) in cards {
            f.fill_rect(x, y, 10, 10, rgb);
        }
        f
    }

    #[test]
    fn classify_finds_cards_inside_roi() {
        let d = detector();
        let found = d.classify(&frame(&[(BLUE, 20, 20), (GREEN, 50, 50)]));
        let names: Vec<&str> = found.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(names, ["blue", "green"]);
        assert_eq!(found[0].1.area, 100);
    }

    #[test]
    fn pixels_outside_roi_never_count() {
        let d = detector();
        // Entirely outside the ROI.
        assert!(d.classify(&frame(&[(BLUE, 0, 0), (GREEN, 90, 90)])).is_empty());
        // Straddling the edge: only 5x10 = 50 px inside, not above the threshold.
        assert!(d.classify(&frame(&[(BLUE, 5, 40)])).is_empty());
    }

    #[test]
    fn small_regions_are_filtered() {
        let mut f = Frame::solid(100, 100, [128, 128, 128]);
        f.fill_rect(20, 20, 5, 5, BLUE);
        assert!(detector().classify(&f).is_empty());
    }

    #[test]
    fn wraparound_color_matches_either_band() {
        let d = detector();
        assert_eq!(d.classify(&frame(&[(RED, 20, 20)]))[0].0, "red");
        assert_eq!(d.classify(&frame(&[(WINE, 20, 20)]))[0].0, "red");
    }

    #[test]
    fn confirms_on_fourth_frame_exactly_once() {
        let mut d = detector();
        let f = frame(&[(BLUE, 20, 20)]);
        for n in 1..=3 {
            let report = d.observe(&f);
            assert_eq!(report.present, ["blue"]);
            assert!(report.newly_confirmed.is_empty());
            assert_eq!(d.counter().get("blue"), n);
        }
        let report = d.observe(&f);
        assert_eq!(report.newly_confirmed, ["Relieved"]);
        assert_eq!(d.emotions().labels(), ["Relieved"]);

        for _ in 0..5 {
            assert!(d.observe(&f).newly_confirmed.is_empty());
        }
        assert_eq!(d.emotions().len(), 1);
        assert_eq!(d.counter().get("blue"), 4);
    }

    #[test]
    fn two_cards_of_one_color_count_once_per_frame() {
        let mut d = detector();
        let f = frame(&[(BLUE, 20, 20), (BLUE, 60, 60)]);
        d.observe(&f);
        assert_eq!(d.counter().get("blue"), 1);
    }

    #[test]
    fn occlusion_does_not_lose_progress() {
        let mut d = detector();
        let card = frame(&[(GREEN, 30, 30)]);
        let empty = frame(&[]);
        d.observe(&card);
        d.observe(&card);
        d.observe(&empty);
        assert_eq!(d.counter().get("green"), 2);
        d.observe(&card);
        let report = d.observe(&card);
        assert_eq!(report.newly_confirmed, ["Satisfied"]);
    }

    #[test]
    fn counters_are_non_decreasing_until_reset() {
        let mut d = detector();
        let frames = [
            frame(&[(BLUE, 20, 20)]),
            frame(&[]),
            frame(&[(BLUE, 20, 20), (GREEN, 50, 50)]),
            frame(&[(GREEN, 50, 50)]),
        ];
        let mut last = (0, 0);
        for f in frames.iter().cycle().take(12) {
            d.observe(f);
            let now = (d.counter().get("blue"), d.counter().get("green"));
            assert!(now.0 >= last.0 && now.1 >= last.1);
            last = now;
        }
        d.reset();
        assert_eq!(d.counter().get("blue"), 0);
        assert!(d.emotions().is_empty());
    }

    #[test]
    fn unmapped_colors_are_ignored() {
        let mut d = detector();
        let f = frame(&[(RED, 20, 20)]);
        // Orange-ish hue: 255,100,0 -> hue ~12.
        let mut f2 = f.clone();
        f2.fill_rect(50, 50, 10, 10, [255, 100, 0]);
        for _ in 0..6 {
            d.observe(&f2);
        }
        assert_eq!(d.counter().get("orange"), 0);
        assert_eq!(d.emotions().labels(), ["Frustrated"]);
    }

    #[test]
    fn set_is_capped_at_three() {
        let mut d = detector();
        let f = frame(&[(BLUE, 15, 15), (GREEN, 35, 15), (YELLOW, 55, 15), (PURPLE, 15, 50)]);
        for _ in 0..10 {
            d.observe(&f);
        }
        assert_eq!(d.emotions().len(), 3);
        assert!(d.is_full());
        // Detection order follows range order on the confirming frame.
        assert_eq!(d.emotions().labels(), ["Relieved", "Satisfied", "Confident"]);
    }

    #[test]
    fn zero_cap_still_detects_one_card() {
        let zero = TrayCfg { max_emotions: 0, ..TrayCfg::default() };
        assert_eq!(DetectorCfg::from(&zero).max_emotions, 1);

        let mut d = CardDetector::new(ranges(), EmotionMap::default(), DetectorCfg { max_emotions: 0, ..cfg() });
        d.observe(&frame(&[]));
        assert!(!d.is_full());
        let f = frame(&[(BLUE, 20, 20), (GREEN, 50, 50)]);
        for _ in 0..4 {
            d.observe(&f);
        }
        assert_eq!(d.emotions().labels(), ["Relieved"]);
        assert!(d.is_full());
    }

    #[test]
    fn reset_starts_a_new_phase() {
        let mut d = detector();
        let f = frame(&[(BLUE, 20, 20)]);
        for _ in 0..4 {
            d.observe(&f);
        }
        assert_eq!(d.emotions().len(), 1);
        d.reset();
        assert_eq!(d.frames_seen(), 0);
        for _ in 0..3 {
            d.observe(&f);
        }
        assert!(d.emotions().is_empty());
        assert_eq!(d.observe(&f).newly_confirmed, ["Relieved"]);
    }
}
