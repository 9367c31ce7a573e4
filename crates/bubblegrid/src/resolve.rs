//! Answer resolver: per-question reduction of bubble states.
//!
//! A pure deterministic reduction; ambiguity is a data outcome, never an
//! error, so a full answer map is always produced once alignment succeeded.

use crate::classify::BubbleState;

/// Resolved outcome for one question.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Answer {
    /// Exactly one bubble marked: the selected option index.
    Choice(usize),
    /// No bubble marked.
    Blank,
    /// More than one bubble marked (or a threshold tie); all marked options,
    /// ascending, retained for the grading layer to score.
    Ambiguous(Vec<usize>),
}

impl Answer {
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Ambiguous(_))
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Blank)
    }
}

/// One question's resolved answer plus the contributing states for audit.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QuestionAnswer {
    pub question: usize,
    pub answer: Answer,
    /// Confidence of the resolved outcome, in [0, 1].
    pub confidence: f32,
    /// Set when any contributing marked bubble sat in the low-confidence band.
    pub low_confidence: bool,
    /// All bubble states for this question, ordered by option index.
    pub bubbles: Vec<BubbleState>,
}

/// Reduce one question's bubble states to a final answer.
///
/// `states` must hold this question's bubbles ordered by option index.
/// Two marked bubbles whose fill ratios lie within `epsilon` of each other are
/// always ambiguous, never arbitrarily resolved to one option.
pub fn resolve_question(question: usize, states: &[BubbleState], epsilon: f32) -> QuestionAnswer {
    debug_assert!(states.iter().all(|s| s.question == question));

    let marked: Vec<&BubbleState> = states.iter().filter(|s| s.marked).collect();
    let low_confidence = marked.iter().any(|s| s.low_confidence);

    let (answer, confidence) = match marked.as_slice() {
        [] => {
            let confidence = states
                .iter()
                .map(|s| s.confidence)
                .fold(1.0f32, f32::min);
            (Answer::Blank, confidence)
        }
        [single] => {
            // Tie at the threshold boundary: a runner-up within epsilon of
            // the marked bubble means the mark/no-mark split is not trusted.
            let runner_up = states
                .iter()
                .filter(|s| s.option != single.option)
                .max_by(|a, b| a.fill_ratio.total_cmp(&b.fill_ratio));
            match runner_up {
                Some(other) if single.fill_ratio - other.fill_ratio <= epsilon => {
                    let mut options = vec![single.option, other.option];
                    options.sort_unstable();
                    (Answer::Ambiguous(options), single.confidence.min(0.5))
                }
                _ => (Answer::Choice(single.option), single.confidence),
            }
        }
        _ => {
            // Any two marked bubbles within epsilon of each other are already
            // both in this set, so the multi-mark arm covers the tie rule.
            let mut options: Vec<usize> = marked.iter().map(|s| s.option).collect();
            options.sort_unstable();
            let confidence = marked
                .iter()
                .map(|s| s.confidence)
                .fold(0.0f32, f32::max);
            (Answer::Ambiguous(options), confidence)
        }
    };

    QuestionAnswer {
        question,
        answer,
        confidence,
        low_confidence,
        bubbles: states.to_vec(),
    }
}
