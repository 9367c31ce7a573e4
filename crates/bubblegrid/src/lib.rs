//! bubblegrid — pure-Rust detector for multiple-choice answer sheets.
//!
//! Reads which bubble(s) a respondent marked per question from a
//! photographed or scanned sheet. The pipeline stages are:
//!
//! 1. **Rectify** – fiducial marker detection, perspective transform
//!    estimation, resampling into the template's canonical frame.
//! 2. **Locate** – template geometry → per-bubble sampling regions.
//! 3. **Classify** – per-bubble fill ratio and mark state with confidence.
//! 4. **Resolve** – per-question reduction to a choice, blank, or an
//!    explicitly ambiguous answer.
//!
//! # Public API
//! - [`Scanner`] and [`SheetTemplate`] as primary entry points
//! - [`ScanConfig`] for tuning thresholds and rectifier tolerances
//! - [`ScanReport`] / [`QuestionAnswer`] as the structured answer map
//! - [`render_sheet`](render::render_sheet) and [`synth`] as collaborators
//!   for producing printable and simulated test sheets

pub mod classify;
pub mod debug_dump;
pub mod grid;
pub mod pipeline;
pub mod rectify;
pub mod render;
pub mod resolve;
pub mod synth;
pub mod template;

pub use classify::{BinarizeMode, BubbleState, ClassifyConfig};
pub use debug_dump::{DebugArtifacts, DebugDump};
pub use grid::{bubble_regions, BubbleRegion};
pub use pipeline::{ScanConfig, ScanError, Scanner};
pub use rectify::{FiducialStats, GeometryError, RectifyConfig};
pub use resolve::{Answer, QuestionAnswer};
pub use template::{SheetTemplate, TemplateError, TemplateSpecV1};

/// Full scan result for a single image: exactly one [`QuestionAnswer`] per
/// template question, ordered by question index, plus run metadata.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScanReport {
    /// Template name the sheet was read against.
    pub template: String,
    /// Raw input dimensions `[width, height]`.
    pub image_size: [u32; 2],
    /// Canonical frame dimensions `[width, height]`.
    pub canonical_size: [u32; 2],
    /// Ordered answer map.
    pub answers: Vec<QuestionAnswer>,
    /// Canonical → raw homography (row-major), absent for canonical scans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homography: Option<[[f64; 3]; 3]>,
    /// Fiducial-stage statistics, absent for canonical scans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiducials: Option<FiducialStats>,
    pub n_choice: usize,
    pub n_blank: usize,
    pub n_ambiguous: usize,
    pub n_low_confidence: usize,
}

impl ScanReport {
    pub(crate) fn new(
        template: String,
        image_size: [u32; 2],
        canonical_size: [u32; 2],
        answers: Vec<QuestionAnswer>,
        homography: Option<[[f64; 3]; 3]>,
        fiducials: Option<FiducialStats>,
    ) -> Self {
        let n_blank = answers.iter().filter(|a| a.answer.is_blank()).count();
        let n_ambiguous = answers.iter().filter(|a| a.answer.is_ambiguous()).count();
        let n_low_confidence = answers.iter().filter(|a| a.low_confidence).count();
        Self {
            template,
            image_size,
            canonical_size,
            n_choice: answers.len() - n_blank - n_ambiguous,
            n_blank,
            n_ambiguous,
            n_low_confidence,
            answers,
            homography,
            fiducials,
        }
    }

    /// Option index per question; `None` covers blank and ambiguous answers.
    pub fn choices(&self) -> Vec<Option<usize>> {
        self.answers
            .iter()
            .map(|a| match a.answer {
                Answer::Choice(k) => Some(k),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::BubbleState;

    fn answer(question: usize, answer: Answer) -> QuestionAnswer {
        QuestionAnswer {
            question,
            answer,
            confidence: 1.0,
            low_confidence: false,
            bubbles: Vec::<BubbleState>::new(),
        }
    }

    #[test]
    fn report_counts_outcomes() {
        let answers = vec![
            answer(0, Answer::Choice(1)),
            answer(1, Answer::Blank),
            answer(2, Answer::Ambiguous(vec![0, 2])),
            answer(3, Answer::Choice(3)),
        ];
        let report = ScanReport::new(
            "t".to_string(),
            [100, 100],
            [100, 100],
            answers,
            None,
            None,
        );
        assert_eq!(report.n_choice, 2);
        assert_eq!(report.n_blank, 1);
        assert_eq!(report.n_ambiguous, 1);
        assert_eq!(report.choices(), vec![Some(1), None, None, Some(3)]);
    }

    #[test]
    fn report_round_trips_through_json() {
        let report = ScanReport::new(
            "t".to_string(),
            [10, 10],
            [10, 10],
            vec![answer(0, Answer::Blank)],
            None,
            None,
        );
        let json = serde_json::to_string(&report).expect("serialize");
        let back: ScanReport = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, report);
    }
}
