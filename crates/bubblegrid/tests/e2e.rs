//! End-to-end detection properties: render → fill → distort → scan.

use bubblegrid::render::render_sheet;
use bubblegrid::synth::{distort, fill_marks, fill_marks_noisy, occlude, random_answers};
use bubblegrid::{Answer, GeometryError, ScanError, Scanner, SheetTemplate};
use image::GrayImage;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Repeating A-B-C-D answer pattern across all questions.
fn pattern_marks(template: &SheetTemplate) -> Vec<(usize, usize)> {
    (0..template.questions)
        .map(|q| (q, q % template.options))
        .collect()
}

fn filled_sheet(template: &SheetTemplate, marks: &[(usize, usize)]) -> GrayImage {
    let mut sheet = render_sheet(template);
    fill_marks(&mut sheet, template, marks, 1.0);
    sheet
}

fn expect_choices(template: &SheetTemplate, marks: &[(usize, usize)]) -> Vec<Option<usize>> {
    let mut expected = vec![None; template.questions];
    for &(q, k) in marks {
        expected[q] = Some(k);
    }
    expected
}

#[test]
fn round_trip_reproduces_known_marks_exactly() {
    let tpl = SheetTemplate::default();
    let marks = pattern_marks(&tpl);
    let sheet = filled_sheet(&tpl, &marks);

    let scanner = Scanner::new(tpl.clone());
    let report = scanner.scan(&sheet).expect("scan");

    assert_eq!(report.answers.len(), tpl.questions);
    assert_eq!(report.choices(), expect_choices(&tpl, &marks));
    assert_eq!(report.n_blank, 0);
    assert_eq!(report.n_ambiguous, 0);
}

#[test]
fn blank_sheet_yields_blank_for_every_question() {
    let tpl = SheetTemplate::default();
    let sheet = render_sheet(&tpl);

    let scanner = Scanner::new(tpl.clone());
    let report = scanner.scan(&sheet).expect("scan");

    assert_eq!(report.n_blank, tpl.questions);
    assert!(report.answers.iter().all(|a| a.answer == Answer::Blank));
}

#[test]
fn fully_marked_question_is_ambiguous_with_all_options() {
    let tpl = SheetTemplate::default();
    let mut marks = pattern_marks(&tpl);
    marks.retain(|&(q, _)| q != 7);
    for k in 0..tpl.options {
        marks.push((7, k));
    }
    let sheet = filled_sheet(&tpl, &marks);

    let scanner = Scanner::new(tpl.clone());
    let report = scanner.scan(&sheet).expect("scan");

    assert_eq!(
        report.answers[7].answer,
        Answer::Ambiguous((0..tpl.options).collect())
    );
    assert_eq!(report.n_ambiguous, 1);
}

#[test]
fn small_rotation_matches_the_unskewed_result() {
    let tpl = SheetTemplate::default();
    let marks = pattern_marks(&tpl);
    let sheet = filled_sheet(&tpl, &marks);
    let scanner = Scanner::new(tpl.clone());

    let upright = scanner.scan(&sheet).expect("upright scan");
    for angle in [-3.0, 2.0, 5.0] {
        let skewed = distort(&sheet, angle, 1.15, 255);
        let report = scanner
            .scan(&skewed)
            .unwrap_or_else(|e| panic!("scan at {angle} degrees: {e}"));
        assert_eq!(
            report.choices(),
            upright.choices(),
            "answers changed at {angle} degrees"
        );
    }
}

#[test]
fn quarter_and_half_turns_are_reoriented_by_the_anchor() {
    let tpl = SheetTemplate::default();
    let marks = pattern_marks(&tpl);
    let sheet = filled_sheet(&tpl, &marks);
    let scanner = Scanner::new(tpl.clone());
    let expected = expect_choices(&tpl, &marks);

    for (angle, steps) in [(90.0, 1usize), (180.0, 2), (270.0, 3)] {
        let turned = distort(&sheet, angle, 1.0, 255);
        let report = scanner
            .scan(&turned)
            .unwrap_or_else(|e| panic!("scan at {angle} degrees: {e}"));
        assert_eq!(report.choices(), expected, "answers changed at {angle} degrees");
        assert_eq!(
            report.fiducials.as_ref().map(|f| f.rotation_steps),
            Some(steps)
        );
    }
}

#[test]
fn extreme_skew_never_yields_a_wrong_answer_map() {
    let tpl = SheetTemplate::default();
    let marks = pattern_marks(&tpl);
    let sheet = filled_sheet(&tpl, &marks);
    let scanner = Scanner::new(tpl.clone());
    let expected = expect_choices(&tpl, &marks);

    for angle in [40.0, 45.0, 57.0] {
        match scanner.scan(&distort(&sheet, angle, 1.0, 255)) {
            // Allowed: still aligned, but then the answers must be exact.
            Ok(report) => assert_eq!(report.choices(), expected, "wrong map at {angle} degrees"),
            Err(ScanError::Geometry(_)) => {}
            Err(other) => panic!("unexpected error at {angle} degrees: {other}"),
        }
    }
}

#[test]
fn occluded_fiducial_fails_with_insufficient_markers() {
    let tpl = SheetTemplate::default();
    let mut sheet = render_sheet(&tpl);
    // Paint over the top-left marker.
    occlude(&mut sheet, 0, 0, 110, 110, 255);

    let scanner = Scanner::new(tpl);
    let err = scanner.scan(&sheet).expect_err("occluded marker");
    match err {
        ScanError::Geometry(GeometryError::InsufficientMarkers { needed, got }) => {
            assert_eq!((needed, got), (4, 3));
        }
        other => panic!("expected InsufficientMarkers, got {other}"),
    }
    // The user-facing message names the counts.
    let err = scanner.scan(&sheet).expect_err("occluded marker");
    assert!(err.to_string().contains("3 of 4 required fiducials detected"));
}

#[test]
fn occluded_fiducial_on_a_marked_sheet_still_fails_closed() {
    let tpl = SheetTemplate::default();
    let marks = pattern_marks(&tpl);
    let mut sheet = filled_sheet(&tpl, &marks);
    occlude(&mut sheet, 0, 0, 110, 110, 255);

    let scanner = Scanner::new(tpl);
    assert!(matches!(
        scanner.scan(&sheet),
        Err(ScanError::Geometry(_))
    ));
}

#[test]
fn mirrored_capture_is_rejected() {
    let tpl = SheetTemplate::default();
    let sheet = filled_sheet(&tpl, &pattern_marks(&tpl));
    let mirrored: GrayImage = image::imageops::flip_horizontal(&sheet);

    let scanner = Scanner::new(tpl);
    assert!(matches!(
        scanner.scan(&mirrored),
        Err(ScanError::Geometry(_))
    ));
}

#[test]
fn canonical_rescan_is_bit_identical() {
    let tpl = SheetTemplate::default();
    let mut rng = StdRng::seed_from_u64(11);
    let plan = random_answers(tpl.questions, tpl.options, 0.2, &mut rng);
    let mut sheet = render_sheet(&tpl);
    let marks: Vec<(usize, usize)> = plan
        .iter()
        .enumerate()
        .filter_map(|(q, c)| c.map(|k| (q, k)))
        .collect();
    fill_marks(&mut sheet, &tpl, &marks, 1.0);

    let scanner = Scanner::new(tpl);
    let first = scanner.scan_canonical(&sheet).expect("first");
    let second = scanner.scan_canonical(&sheet).expect("second");
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn noisy_pencil_marks_are_still_detected() {
    let tpl = SheetTemplate::default();
    let marks = pattern_marks(&tpl);
    let mut sheet = render_sheet(&tpl);
    let mut rng = StdRng::seed_from_u64(3);
    fill_marks_noisy(&mut sheet, &tpl, &marks, 0.7, &mut rng);

    let scanner = Scanner::new(tpl.clone());
    let report = scanner.scan(&sheet).expect("scan");
    assert_eq!(report.choices(), expect_choices(&tpl, &marks));
}

#[test]
fn skipped_questions_survive_distortion_as_blanks() {
    let tpl = SheetTemplate::default();
    let mut rng = StdRng::seed_from_u64(29);
    let plan = random_answers(tpl.questions, tpl.options, 0.15, &mut rng);
    let mut sheet = render_sheet(&tpl);
    bubblegrid::synth::fill_plan(&mut sheet, &tpl, &plan, 1.0);

    let scanner = Scanner::new(tpl.clone());
    let skewed = distort(&sheet, 4.0, 1.1, 255);
    let report = scanner.scan(&skewed).expect("scan");

    assert_eq!(report.choices(), plan);
    let n_skipped = plan.iter().filter(|c| c.is_none()).count();
    assert_eq!(report.n_blank, n_skipped);
}

#[test]
fn debug_scan_returns_canonical_overlay_and_dump() {
    let tpl = SheetTemplate::default();
    let sheet = filled_sheet(&tpl, &pattern_marks(&tpl));

    let scanner = Scanner::new(tpl.clone());
    let (report, artifacts) = scanner.scan_with_debug(&sheet).expect("scan");

    assert_eq!(
        artifacts.canonical.dimensions(),
        (tpl.page_size_px[0], tpl.page_size_px[1])
    );
    assert_eq!(artifacts.overlay.dimensions(), artifacts.canonical.dimensions());
    assert_eq!(artifacts.dump.bubbles.len(), tpl.questions * tpl.options);
    assert_eq!(artifacts.dump.schema_version, "bubblegrid.debug.v1");
    assert!(artifacts.dump.fiducials.is_some());
    assert_eq!(report.answers.len(), tpl.questions);
}
