//! Scan orchestration: Rectify → Locate → Classify → Resolve.
//!
//! [`Scanner`] is the primary entry point. It wraps a [`SheetTemplate`] and a
//! [`ScanConfig`]; create once, scan many images. Configuration travels as an
//! explicit value, so concurrent scans with different settings never
//! interfere.

use image::GrayImage;

use crate::classify::{classify_regions, BubbleState, ClassifyConfig};
use crate::debug_dump::{render_overlay, DebugArtifacts, DebugDump, ImageDebug, DEBUG_SCHEMA_V1};
use crate::grid::bubble_regions;
use crate::rectify::{matrix3_to_array, rectify, GeometryError, RectifyConfig};
use crate::resolve::{resolve_question, QuestionAnswer};
use crate::template::{SheetTemplate, TemplateError};
use crate::ScanReport;

/// Full scan configuration threaded through the pipeline.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScanConfig {
    pub rectify: RectifyConfig,
    pub classify: ClassifyConfig,
    /// Fill-ratio distance below which two top bubbles tie as ambiguous.
    pub ambiguity_epsilon: f32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            rectify: RectifyConfig::default(),
            classify: ClassifyConfig::default(),
            ambiguity_epsilon: 0.08,
        }
    }
}

/// Fatal scan failures. Ambiguous answers are data, not errors.
#[derive(Debug)]
pub enum ScanError {
    /// Template rejected before any image processing.
    Template(TemplateError),
    /// Fiducial location or transform estimation failed.
    Geometry(GeometryError),
    /// A caller-supplied canonical image does not match the template size.
    CanonicalSizeMismatch { expected: [u32; 2], got: [u32; 2] },
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Template(e) => write!(f, "template configuration error: {}", e),
            Self::Geometry(e) => write!(f, "sheet alignment failed: {}", e),
            Self::CanonicalSizeMismatch { expected, got } => write!(
                f,
                "canonical image is {}x{} but the template defines {}x{}",
                got[0], got[1], expected[0], expected[1]
            ),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Template(e) => Some(e),
            Self::Geometry(e) => Some(e),
            Self::CanonicalSizeMismatch { .. } => None,
        }
    }
}

impl From<TemplateError> for ScanError {
    fn from(e: TemplateError) -> Self {
        Self::Template(e)
    }
}

impl From<GeometryError> for ScanError {
    fn from(e: GeometryError) -> Self {
        Self::Geometry(e)
    }
}

/// Primary scanning interface.
pub struct Scanner {
    template: SheetTemplate,
    config: ScanConfig,
}

impl Scanner {
    /// Create a scanner with default configuration.
    pub fn new(template: SheetTemplate) -> Self {
        Self::with_config(template, ScanConfig::default())
    }

    /// Create a scanner with full config control.
    pub fn with_config(template: SheetTemplate, config: ScanConfig) -> Self {
        Self { template, config }
    }

    /// Load template JSON and create a scanner in one step.
    pub fn from_template_json_file(
        path: &std::path::Path,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self::new(SheetTemplate::from_json_file(path)?))
    }

    pub fn template(&self) -> &SheetTemplate {
        &self.template
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Mutable access for post-construction tuning.
    pub fn config_mut(&mut self) -> &mut ScanConfig {
        &mut self.config
    }

    /// Scan a raw grayscale capture: rectify, then read the grid.
    pub fn scan(&self, raw: &GrayImage) -> Result<ScanReport, ScanError> {
        let rectified = rectify(raw, &self.template, &self.config.rectify)?;
        let answers = self.read_grid(&rectified.canonical);
        Ok(self.build_report(
            raw.dimensions(),
            answers,
            Some(matrix3_to_array(&rectified.homography)),
            Some(rectified.stats),
        ))
    }

    /// Scan an already-canonical image, skipping rectification.
    ///
    /// The image must match the template's page size exactly.
    pub fn scan_canonical(&self, canonical: &GrayImage) -> Result<ScanReport, ScanError> {
        let expected = self.template.page_size_px;
        let got = [canonical.width(), canonical.height()];
        if got != expected {
            return Err(ScanError::CanonicalSizeMismatch { expected, got });
        }
        let answers = self.read_grid(canonical);
        Ok(self.build_report(canonical.dimensions(), answers, None, None))
    }

    /// Scan with debug artifact collection: canonical frame, overlay, and a
    /// versioned JSON dump for human audit.
    pub fn scan_with_debug(
        &self,
        raw: &GrayImage,
    ) -> Result<(ScanReport, DebugArtifacts), ScanError> {
        let rectified = rectify(raw, &self.template, &self.config.rectify)?;
        let regions = bubble_regions(&self.template);
        let states = classify_regions(&rectified.canonical, &regions, &self.config.classify);
        let answers = self.resolve_all(&states);

        let overlay = render_overlay(&rectified.canonical, &regions, &states, &self.template);
        let report = self.build_report(
            raw.dimensions(),
            answers,
            Some(matrix3_to_array(&rectified.homography)),
            Some(rectified.stats.clone()),
        );
        let dump = DebugDump {
            schema_version: DEBUG_SCHEMA_V1.to_string(),
            image: ImageDebug {
                width: raw.width(),
                height: raw.height(),
            },
            config: self.config.clone(),
            template: self.template.to_spec(),
            fiducials: Some(rectified.stats),
            candidates: rectified.candidates,
            bubbles: states,
        };

        Ok((
            report,
            DebugArtifacts {
                canonical: rectified.canonical,
                overlay,
                dump,
            },
        ))
    }

    fn read_grid(&self, canonical: &GrayImage) -> Vec<QuestionAnswer> {
        let regions = bubble_regions(&self.template);
        let states = classify_regions(canonical, &regions, &self.config.classify);
        self.resolve_all(&states)
    }

    fn resolve_all(&self, states: &[BubbleState]) -> Vec<QuestionAnswer> {
        states
            .chunks(self.template.options)
            .enumerate()
            .map(|(question, chunk)| {
                resolve_question(question, chunk, self.config.ambiguity_epsilon)
            })
            .collect()
    }

    fn build_report(
        &self,
        image_size: (u32, u32),
        answers: Vec<QuestionAnswer>,
        homography: Option<[[f64; 3]; 3]>,
        fiducials: Option<crate::rectify::FiducialStats>,
    ) -> ScanReport {
        debug_assert_eq!(answers.len(), self.template.questions);
        let report = ScanReport::new(
            self.template.name.clone(),
            [image_size.0, image_size.1],
            self.template.page_size_px,
            answers,
            homography,
            fiducials,
        );

        tracing::info!(
            "{} questions: {} answered, {} blank, {} ambiguous",
            report.answers.len(),
            report.n_choice,
            report.n_blank,
            report.n_ambiguous,
        );
        if report.n_low_confidence > 0 {
            tracing::warn!(
                n_low_confidence = report.n_low_confidence,
                "low-confidence classifications present; inspect debug overlay"
            );
        }
        report
    }
}
