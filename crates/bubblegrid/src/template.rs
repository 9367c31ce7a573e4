//! Runtime answer-sheet template.
//!
//! Template JSON follows a parametric schema (`bubblegrid.template.v1`):
//! fiducial and bubble positions are generated at runtime from the page and
//! grid parameters. Per-bubble coordinate lists are intentionally not part of
//! the schema.

use std::path::Path;

const TEMPLATE_SCHEMA_V1: &str = "bubblegrid.template.v1";

const DEFAULT_NAME: &str = "bubblegrid_a4_50q";
const DEFAULT_PAGE_SIZE_PX: [u32; 2] = [850, 1100];
const DEFAULT_QUESTIONS: usize = 50;
const DEFAULT_OPTIONS: usize = 4;
const DEFAULT_COLUMNS: usize = 2;
const DEFAULT_GRID_ORIGIN_PX: [f64; 2] = [160.0, 150.0];
const DEFAULT_ROW_PITCH_PX: f64 = 36.0;
const DEFAULT_OPTION_PITCH_PX: f64 = 40.0;
const DEFAULT_COLUMN_STRIDE_PX: f64 = 380.0;
const DEFAULT_BUBBLE_RADIUS_PX: f64 = 12.0;
const DEFAULT_FIDUCIAL_SIZE_PX: f64 = 40.0;
const DEFAULT_FIDUCIAL_INSET_PX: f64 = 50.0;
const DEFAULT_ANCHOR_RATIO: f64 = 0.65;

/// Page corner hosting a fiducial marker, in clockwise order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomRight,
    BottomLeft,
}

impl Corner {
    /// Clockwise corner cycle starting at the top-left.
    pub const CYCLE: [Corner; 4] = [
        Corner::TopLeft,
        Corner::TopRight,
        Corner::BottomRight,
        Corner::BottomLeft,
    ];
}

/// A single printed fiducial marker: a filled square inset from a page corner.
///
/// The anchor marker is printed smaller than the other three; its unique size
/// breaks the rotational symmetry of the marker layout.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Fiducial {
    pub corner: Corner,
    /// Marker center in canonical page pixels.
    pub center_px: [f64; 2],
    /// Side length of the printed square in canonical pixels.
    pub size_px: f64,
    pub anchor: bool,
}

/// Errors raised while constructing a [`SheetTemplate`].
///
/// All template errors are fatal and surface before any image processing.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateError {
    /// The JSON schema string did not match the supported version.
    UnsupportedSchema { found: String },
    /// A parameter failed validation.
    Invalid { reason: String },
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedSchema { found } => write!(
                f,
                "unsupported template schema '{}' (expected '{}')",
                found, TEMPLATE_SCHEMA_V1
            ),
            Self::Invalid { reason } => write!(f, "invalid sheet template: {}", reason),
        }
    }
}

impl std::error::Error for TemplateError {}

/// Serialized template parameters (`bubblegrid.template.v1`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateSpecV1 {
    pub schema: String,
    pub name: String,
    pub page_size_px: [u32; 2],
    pub questions: usize,
    pub options: usize,
    pub columns: usize,
    pub grid_origin_px: [f64; 2],
    pub row_pitch_px: f64,
    pub option_pitch_px: f64,
    pub column_stride_px: f64,
    pub bubble_radius_px: f64,
    pub fiducial_size_px: f64,
    pub fiducial_inset_px: f64,
    pub anchor_ratio: f64,
}

impl Default for TemplateSpecV1 {
    fn default() -> Self {
        Self {
            schema: TEMPLATE_SCHEMA_V1.to_string(),
            name: DEFAULT_NAME.to_string(),
            page_size_px: DEFAULT_PAGE_SIZE_PX,
            questions: DEFAULT_QUESTIONS,
            options: DEFAULT_OPTIONS,
            columns: DEFAULT_COLUMNS,
            grid_origin_px: DEFAULT_GRID_ORIGIN_PX,
            row_pitch_px: DEFAULT_ROW_PITCH_PX,
            option_pitch_px: DEFAULT_OPTION_PITCH_PX,
            column_stride_px: DEFAULT_COLUMN_STRIDE_PX,
            bubble_radius_px: DEFAULT_BUBBLE_RADIUS_PX,
            fiducial_size_px: DEFAULT_FIDUCIAL_SIZE_PX,
            fiducial_inset_px: DEFAULT_FIDUCIAL_INSET_PX,
            anchor_ratio: DEFAULT_ANCHOR_RATIO,
        }
    }
}

/// Runtime sheet template shared read-only by the rectifier and grid locator.
///
/// Immutable once constructed; every constructor validates the geometry so a
/// malformed template is rejected before any image work starts.
#[derive(Debug, Clone)]
pub struct SheetTemplate {
    pub name: String,
    pub page_size_px: [u32; 2],
    pub questions: usize,
    pub options: usize,
    pub columns: usize,
    pub grid_origin_px: [f64; 2],
    pub row_pitch_px: f64,
    pub option_pitch_px: f64,
    pub column_stride_px: f64,
    pub bubble_radius_px: f64,
    pub fiducial_size_px: f64,
    pub fiducial_inset_px: f64,
    pub anchor_ratio: f64,

    fiducials: Vec<Fiducial>,
}

impl SheetTemplate {
    /// Load a template from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        let spec: TemplateSpecV1 = serde_json::from_str(&data)?;
        Self::from_spec(spec).map_err(Into::into)
    }

    /// Build a template from parsed spec parameters.
    pub fn from_spec(spec: TemplateSpecV1) -> Result<Self, TemplateError> {
        if spec.schema != TEMPLATE_SCHEMA_V1 {
            return Err(TemplateError::UnsupportedSchema { found: spec.schema });
        }

        validate_spec(&spec).map_err(|reason| TemplateError::Invalid { reason })?;
        let fiducials = generate_fiducials(&spec);

        Ok(Self {
            name: spec.name,
            page_size_px: spec.page_size_px,
            questions: spec.questions,
            options: spec.options,
            columns: spec.columns,
            grid_origin_px: spec.grid_origin_px,
            row_pitch_px: spec.row_pitch_px,
            option_pitch_px: spec.option_pitch_px,
            column_stride_px: spec.column_stride_px,
            bubble_radius_px: spec.bubble_radius_px,
            fiducial_size_px: spec.fiducial_size_px,
            fiducial_inset_px: spec.fiducial_inset_px,
            anchor_ratio: spec.anchor_ratio,
            fiducials,
        })
    }

    /// Build the embedded default template with a custom grid size.
    pub fn with_grid(questions: usize, options: usize) -> Result<Self, TemplateError> {
        let spec = TemplateSpecV1 {
            questions,
            options,
            ..TemplateSpecV1::default()
        };
        Self::from_spec(spec)
    }

    /// Serializable spec parameters for this template.
    pub fn to_spec(&self) -> TemplateSpecV1 {
        TemplateSpecV1 {
            schema: TEMPLATE_SCHEMA_V1.to_string(),
            name: self.name.clone(),
            page_size_px: self.page_size_px,
            questions: self.questions,
            options: self.options,
            columns: self.columns,
            grid_origin_px: self.grid_origin_px,
            row_pitch_px: self.row_pitch_px,
            option_pitch_px: self.option_pitch_px,
            column_stride_px: self.column_stride_px,
            bubble_radius_px: self.bubble_radius_px,
            fiducial_size_px: self.fiducial_size_px,
            fiducial_inset_px: self.fiducial_inset_px,
            anchor_ratio: self.anchor_ratio,
        }
    }

    /// All fiducial markers, in the clockwise [`Corner::CYCLE`] order.
    pub fn fiducials(&self) -> &[Fiducial] {
        &self.fiducials
    }

    /// Number of markers the rectifier must find.
    pub fn required_fiducials(&self) -> usize {
        self.fiducials.len()
    }

    /// The orientation-breaking anchor marker.
    pub fn anchor(&self) -> &Fiducial {
        self.fiducials
            .iter()
            .find(|fid| fid.anchor)
            .expect("validated template has exactly one anchor")
    }

    /// Index of the anchor marker within [`Corner::CYCLE`].
    pub fn anchor_cycle_index(&self) -> usize {
        self.fiducials
            .iter()
            .position(|fid| fid.anchor)
            .expect("validated template has exactly one anchor")
    }

    /// Questions laid out per column (last column may be short).
    pub fn questions_per_column(&self) -> usize {
        self.questions.div_ceil(self.columns)
    }

    /// Canonical-pixel center of bubble `(question, option)`.
    ///
    /// Questions run top-to-bottom within a column, columns left-to-right,
    /// options left-to-right within a row.
    pub fn bubble_center(&self, question: usize, option: usize) -> [f64; 2] {
        debug_assert!(question < self.questions && option < self.options);
        let per_column = self.questions_per_column();
        let column = question / per_column;
        let row = question % per_column;
        [
            self.grid_origin_px[0]
                + column as f64 * self.column_stride_px
                + option as f64 * self.option_pitch_px,
            self.grid_origin_px[1] + row as f64 * self.row_pitch_px,
        ]
    }
}

impl Default for SheetTemplate {
    fn default() -> Self {
        Self::from_spec(TemplateSpecV1::default()).expect("default template spec must be valid")
    }
}

fn generate_fiducials(spec: &TemplateSpecV1) -> Vec<Fiducial> {
    let w = spec.page_size_px[0] as f64;
    let h = spec.page_size_px[1] as f64;
    let inset = spec.fiducial_inset_px;
    let centers = [
        [inset, inset],
        [w - inset, inset],
        [w - inset, h - inset],
        [inset, h - inset],
    ];

    Corner::CYCLE
        .iter()
        .zip(centers)
        .map(|(&corner, center_px)| {
            let anchor = corner == Corner::BottomRight;
            let size_px = if anchor {
                spec.fiducial_size_px * spec.anchor_ratio
            } else {
                spec.fiducial_size_px
            };
            Fiducial {
                corner,
                center_px,
                size_px,
                anchor,
            }
        })
        .collect()
}

fn validate_spec(spec: &TemplateSpecV1) -> Result<(), String> {
    if spec.name.trim().is_empty() {
        return Err("template name must not be empty".to_string());
    }

    let [w, h] = spec.page_size_px;
    if w < 64 || h < 64 {
        return Err(format!("page size {}x{} is too small", w, h));
    }

    if spec.questions == 0 {
        return Err("questions must be >= 1".to_string());
    }
    if spec.options < 2 {
        return Err("options must be >= 2".to_string());
    }
    if spec.columns == 0 || spec.columns > spec.questions {
        return Err(format!(
            "columns must be in 1..={} (got {})",
            spec.questions, spec.columns
        ));
    }

    for (value, label) in [
        (spec.row_pitch_px, "row_pitch_px"),
        (spec.option_pitch_px, "option_pitch_px"),
        (spec.bubble_radius_px, "bubble_radius_px"),
        (spec.fiducial_size_px, "fiducial_size_px"),
        (spec.fiducial_inset_px, "fiducial_inset_px"),
    ] {
        if !value.is_finite() || value <= 0.0 {
            return Err(format!("{} must be finite and > 0", label));
        }
    }
    if !spec.column_stride_px.is_finite() || (spec.columns > 1 && spec.column_stride_px <= 0.0) {
        return Err("column_stride_px must be finite and > 0".to_string());
    }
    if !spec.anchor_ratio.is_finite() || spec.anchor_ratio <= 0.0 || spec.anchor_ratio >= 1.0 {
        return Err("anchor_ratio must be in (0, 1)".to_string());
    }

    if 2.0 * spec.bubble_radius_px >= spec.option_pitch_px
        || 2.0 * spec.bubble_radius_px >= spec.row_pitch_px
    {
        return Err("bubble diameter must be smaller than both pitches".to_string());
    }

    // Markers must be fully on the page and the marker quad non-degenerate.
    let half = spec.fiducial_size_px * 0.5;
    if spec.fiducial_inset_px < half {
        return Err("fiducial_inset_px must be at least half the marker size".to_string());
    }
    if w as f64 - 2.0 * spec.fiducial_inset_px <= spec.fiducial_size_px
        || h as f64 - 2.0 * spec.fiducial_inset_px <= spec.fiducial_size_px
    {
        return Err("fiducial markers overlap across the page; reduce size or inset".to_string());
    }

    // Grid bounds: every bubble inside the page with its radius as margin.
    let per_column = spec.questions.div_ceil(spec.columns);
    let r = spec.bubble_radius_px;
    let max_x = spec.grid_origin_px[0]
        + (spec.columns - 1) as f64 * spec.column_stride_px
        + (spec.options - 1) as f64 * spec.option_pitch_px;
    let max_y = spec.grid_origin_px[1] + (per_column - 1) as f64 * spec.row_pitch_px;
    if spec.grid_origin_px[0] - r < 0.0 || spec.grid_origin_px[1] - r < 0.0 {
        return Err("grid origin leaves no margin for the bubble radius".to_string());
    }
    if max_x + r >= w as f64 || max_y + r >= h as f64 {
        return Err(format!(
            "grid extends to ({:.0}, {:.0}) and does not fit the {}x{} page",
            max_x + r,
            max_y + r,
            w,
            h
        ));
    }

    // Grid must stay clear of the marker squares.
    let grid = [
        spec.grid_origin_px[0] - r,
        spec.grid_origin_px[1] - r,
        max_x + r,
        max_y + r,
    ];
    for fid in generate_fiducials(spec) {
        let half = fid.size_px * 0.5 + 4.0;
        let marker = [
            fid.center_px[0] - half,
            fid.center_px[1] - half,
            fid.center_px[0] + half,
            fid.center_px[1] + half,
        ];
        let overlaps = grid[0] < marker[2]
            && marker[0] < grid[2]
            && grid[1] < marker[3]
            && marker[1] < grid[3];
        if overlaps {
            return Err(format!(
                "answer grid overlaps the {:?} fiducial marker",
                fid.corner
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_has_expected_shape() {
        let tpl = SheetTemplate::default();
        assert_eq!(tpl.questions, 50);
        assert_eq!(tpl.options, 4);
        assert_eq!(tpl.questions_per_column(), 25);
        assert_eq!(tpl.required_fiducials(), 4);
        assert_eq!(tpl.anchor().corner, Corner::BottomRight);
        assert!(tpl.anchor().size_px < tpl.fiducial_size_px);
    }

    #[test]
    fn bubble_centers_follow_column_layout() {
        let tpl = SheetTemplate::default();
        assert_eq!(tpl.bubble_center(0, 0), [160.0, 150.0]);
        assert_eq!(tpl.bubble_center(0, 3), [280.0, 150.0]);
        assert_eq!(tpl.bubble_center(1, 0), [160.0, 186.0]);
        // First question of the second column.
        assert_eq!(tpl.bubble_center(25, 0), [540.0, 150.0]);
    }

    #[test]
    fn from_json_requires_v1_schema() {
        let spec = TemplateSpecV1 {
            schema: "bubblegrid.template.v0".to_string(),
            ..TemplateSpecV1::default()
        };
        let err = SheetTemplate::from_spec(spec).expect_err("expected error");
        assert!(matches!(err, TemplateError::UnsupportedSchema { .. }));
    }

    #[test]
    fn spec_rejects_unknown_fields() {
        let raw = r#"{
            "schema": "bubblegrid.template.v1",
            "name": "x",
            "page_size_px": [850, 1100],
            "questions": 50,
            "options": 4,
            "columns": 2,
            "grid_origin_px": [160.0, 150.0],
            "row_pitch_px": 36.0,
            "option_pitch_px": 40.0,
            "column_stride_px": 380.0,
            "bubble_radius_px": 12.0,
            "fiducial_size_px": 40.0,
            "fiducial_inset_px": 50.0,
            "anchor_ratio": 0.65,
            "bubbles": []
        }"#;
        let parsed: Result<TemplateSpecV1, _> = serde_json::from_str(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn non_positive_pitch_is_a_config_error() {
        let spec = TemplateSpecV1 {
            row_pitch_px: 0.0,
            ..TemplateSpecV1::default()
        };
        let err = SheetTemplate::from_spec(spec).expect_err("expected error");
        assert!(matches!(err, TemplateError::Invalid { .. }));
    }

    #[test]
    fn oversized_grid_is_rejected() {
        let spec = TemplateSpecV1 {
            questions: 400,
            ..TemplateSpecV1::default()
        };
        assert!(SheetTemplate::from_spec(spec).is_err());
    }

    #[test]
    fn bubble_diameter_must_fit_the_pitch() {
        let spec = TemplateSpecV1 {
            bubble_radius_px: 30.0,
            ..TemplateSpecV1::default()
        };
        assert!(SheetTemplate::from_spec(spec).is_err());
    }

    #[test]
    fn spec_round_trips_through_json() {
        let tpl = SheetTemplate::default();
        let json = serde_json::to_string(&tpl.to_spec()).expect("serialize");
        let spec: TemplateSpecV1 = serde_json::from_str(&json).expect("parse");
        let back = SheetTemplate::from_spec(spec).expect("valid");
        assert_eq!(back.name, tpl.name);
        assert_eq!(back.fiducials().len(), 4);
    }
}
