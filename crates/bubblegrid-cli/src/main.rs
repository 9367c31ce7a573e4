//! bubblegrid CLI — generate, fill, scan, and export MCQ answer sheets.

mod export;

use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bubblegrid::render::render_sheet;
use bubblegrid::synth::{fill_plan, random_answers, AnswerPlan};
use bubblegrid::{Answer, BinarizeMode, ScanConfig, ScanReport, Scanner, SheetTemplate};
use rand::rngs::StdRng;
use rand::SeedableRng;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "bubblegrid")]
#[command(about = "Detect marked bubbles on photographed or scanned MCQ answer sheets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan an answer-sheet image and write the answer map as JSON.
    Scan(CliScanArgs),

    /// Render a blank printable answer sheet.
    Render(CliRenderArgs),

    /// Fill a blank sheet with simulated marks for testing.
    Fill(CliFillArgs),

    /// Append a scan report to a CSV file, one row per sheet.
    Export(CliExportArgs),

    /// Print the embedded (or a custom) template specification.
    TemplateInfo {
        /// Path to a template JSON; the embedded default when omitted.
        #[arg(long)]
        template: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
struct CliScanArgs {
    /// Path to the answer-sheet image.
    #[arg(long)]
    image: PathBuf,

    /// Template JSON; the embedded default when omitted.
    #[arg(long)]
    template: Option<PathBuf>,

    /// Directory receiving the result file and debug artifacts.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Result filename inside the output directory.
    #[arg(long, default_value = "scanned_answers.json")]
    output_filename: String,

    /// Fill ratio at or above which a bubble counts as marked.
    #[arg(long, default_value = "0.45")]
    mark_threshold: f32,

    /// Fill ratio below which a bubble is unmarked.
    #[arg(long, default_value = "0.18")]
    low_threshold: f32,

    /// Fixed dark-pixel cutoff (0-255) instead of the Otsu estimate.
    #[arg(long)]
    fixed_cutoff: Option<u8>,

    /// Fill-ratio distance below which two top bubbles tie as ambiguous.
    #[arg(long, default_value = "0.08")]
    ambiguity_epsilon: f32,

    /// Retain debug artifacts (canonical frame, overlay, JSON dump).
    #[arg(long)]
    debug: bool,

    /// Print the per-question answer listing to stdout.
    #[arg(long)]
    print: bool,
}

#[derive(Debug, Clone, Args)]
struct CliRenderArgs {
    /// Output image path.
    #[arg(long, default_value = "mcq_answer_sheet.png")]
    out: PathBuf,

    /// Template JSON; the embedded default when omitted.
    #[arg(long)]
    template: Option<PathBuf>,

    /// Override the number of questions on the embedded template.
    #[arg(long)]
    questions: Option<usize>,

    /// Override the options per question on the embedded template.
    #[arg(long)]
    options: Option<usize>,
}

#[derive(Debug, Clone, Args)]
struct CliFillArgs {
    /// Path to a blank answer-sheet image (e.g. from `render`).
    blank_sheet: PathBuf,

    /// Output path for the filled sheet.
    #[arg(long, default_value = "filled_answer_sheet.png")]
    out: PathBuf,

    /// Template JSON; the embedded default when omitted.
    #[arg(long)]
    template: Option<PathBuf>,

    /// Simulated mark darkness in (0, 1].
    #[arg(long, default_value = "0.8")]
    intensity: f32,

    /// Probability of leaving a question unanswered.
    #[arg(long, default_value = "0.1")]
    skip_prob: f64,

    /// RNG seed for reproducible sheets; random when omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// JSON answer key (question number → option letter) to fill instead of
    /// random answers.
    #[arg(long)]
    answer_key: Option<PathBuf>,

    /// Write the generated answers as a JSON answer key.
    #[arg(long)]
    save_answers: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CliExportArgs {
    /// Scan report JSON produced by `scan`.
    #[arg(short, long, default_value = "scanned_answers.json")]
    input: PathBuf,

    /// CSV file to create or append to.
    #[arg(short, long, default_value = "answers.csv")]
    output: PathBuf,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan(args) => run_scan(&args),
        Commands::Render(args) => run_render(&args),
        Commands::Fill(args) => run_fill(&args),
        Commands::Export(args) => run_export(&args),
        Commands::TemplateInfo { template } => run_template_info(template.as_deref()),
    }
}

fn load_template(path: Option<&Path>) -> CliResult<SheetTemplate> {
    match path {
        Some(path) => SheetTemplate::from_json_file(path),
        None => Ok(SheetTemplate::default()),
    }
}

// ── scan ───────────────────────────────────────────────────────────────

fn run_scan(args: &CliScanArgs) -> CliResult<()> {
    tracing::info!("Loading image: {}", args.image.display());
    let img = image::open(&args.image).map_err(|e| -> CliError {
        format!("failed to open image {}: {}", args.image.display(), e).into()
    })?;
    let gray = img.to_luma8();
    tracing::info!("Image size: {}x{}", gray.width(), gray.height());

    let template = load_template(args.template.as_deref())?;
    let mut config = ScanConfig::default();
    config.classify.mark_threshold = args.mark_threshold;
    config.classify.low_threshold = args.low_threshold;
    config.ambiguity_epsilon = args.ambiguity_epsilon;
    if let Some(cutoff) = args.fixed_cutoff {
        config.classify.binarize = BinarizeMode::Fixed(cutoff);
    }

    let scanner = Scanner::with_config(template, config);

    std::fs::create_dir_all(&args.output_dir)?;
    let report = if args.debug {
        let (report, artifacts) = scanner.scan_with_debug(&gray)?;
        artifacts
            .canonical
            .save(args.output_dir.join("canonical.png"))?;
        artifacts.overlay.save(args.output_dir.join("overlay.png"))?;
        let dump_path = args.output_dir.join("debug.json");
        std::fs::write(&dump_path, serde_json::to_string_pretty(&artifacts.dump)?)?;
        tracing::info!("Debug artifacts written to {}", args.output_dir.display());
        report
    } else {
        scanner.scan(&gray)?
    };

    tracing::info!(
        "{} questions: {} answered, {} blank, {} ambiguous",
        report.answers.len(),
        report.n_choice,
        report.n_blank,
        report.n_ambiguous,
    );

    if args.print {
        print_answers(&report);
    }

    let out_path = args.output_dir.join(&args.output_filename);
    std::fs::write(&out_path, serde_json::to_string_pretty(&report)?)?;
    tracing::info!("Results written to {}", out_path.display());

    Ok(())
}

fn print_answers(report: &ScanReport) {
    println!("=== SCANNED ANSWERS ===");
    for qa in &report.answers {
        let text = match &qa.answer {
            Answer::Choice(k) => export::option_letter(*k).to_string(),
            Answer::Blank => "no answer detected".to_string(),
            Answer::Ambiguous(options) => format!(
                "ambiguous ({})",
                options
                    .iter()
                    .map(|&k| export::option_letter(k).to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        };
        println!("Question {:2}: {}", qa.question + 1, text);
    }
    println!(
        "Total answered: {}/{}",
        report.n_choice,
        report.answers.len()
    );
}

// ── render ─────────────────────────────────────────────────────────────

fn run_render(args: &CliRenderArgs) -> CliResult<()> {
    let template = match (args.template.as_deref(), args.questions, args.options) {
        (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
            return Err("--questions/--options cannot override a template file".into())
        }
        (Some(path), None, None) => SheetTemplate::from_json_file(path)?,
        (None, questions, options) => {
            let default = SheetTemplate::default();
            SheetTemplate::with_grid(
                questions.unwrap_or(default.questions),
                options.unwrap_or(default.options),
            )?
        }
    };

    let page = render_sheet(&template);
    page.save(&args.out)?;
    tracing::info!(
        "Blank sheet ({} questions x {} options) written to {}",
        template.questions,
        template.options,
        args.out.display()
    );
    Ok(())
}

// ── fill ───────────────────────────────────────────────────────────────

fn run_fill(args: &CliFillArgs) -> CliResult<()> {
    let template = load_template(args.template.as_deref())?;

    let img = image::open(&args.blank_sheet).map_err(|e| -> CliError {
        format!(
            "failed to open blank sheet {}: {}",
            args.blank_sheet.display(),
            e
        )
        .into()
    })?;
    let mut sheet = img.to_luma8();
    if [sheet.width(), sheet.height()] != template.page_size_px {
        return Err(format!(
            "blank sheet is {}x{} but the template defines {}x{}; \
             fill expects an unwarped sheet from `render`",
            sheet.width(),
            sheet.height(),
            template.page_size_px[0],
            template.page_size_px[1]
        )
        .into());
    }

    let plan = match &args.answer_key {
        Some(path) => read_answer_key(path, &template)?,
        None => {
            let mut rng = match args.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            random_answers(template.questions, template.options, args.skip_prob, &mut rng)
        }
    };

    fill_plan(&mut sheet, &template, &plan, args.intensity);
    sheet.save(&args.out)?;

    let answered = plan.iter().filter(|c| c.is_some()).count();
    tracing::info!(
        "Filled {}/{} questions at intensity {:.2}; written to {}",
        answered,
        template.questions,
        args.intensity,
        args.out.display()
    );

    if let Some(path) = &args.save_answers {
        std::fs::write(path, serde_json::to_string_pretty(&plan_to_key(&plan))?)?;
        tracing::info!("Answer key saved to {}", path.display());
    }

    Ok(())
}

/// Answer-key JSON: 1-based question number → option letter.
fn plan_to_key(plan: &AnswerPlan) -> BTreeMap<String, Option<String>> {
    plan.iter()
        .enumerate()
        .map(|(q, choice)| {
            (
                (q + 1).to_string(),
                choice.map(|k| export::option_letter(k).to_string()),
            )
        })
        .collect()
}

fn read_answer_key(path: &Path, template: &SheetTemplate) -> CliResult<AnswerPlan> {
    let data = std::fs::read_to_string(path)?;
    let key: BTreeMap<String, Option<String>> = serde_json::from_str(&data)?;

    let mut plan: AnswerPlan = vec![None; template.questions];
    for (question, letter) in key {
        let number: usize = question
            .parse()
            .map_err(|_| -> CliError { format!("bad question number '{}'", question).into() })?;
        if number == 0 || number > template.questions {
            return Err(format!("question {} outside 1..={}", number, template.questions).into());
        }
        let Some(letter) = letter else { continue };
        let letter = letter.trim().to_ascii_uppercase();
        let k = match letter.as_bytes() {
            [c @ b'A'..=b'Z'] => (c - b'A') as usize,
            _ => return Err(format!("bad option letter '{}'", letter).into()),
        };
        if k >= template.options {
            return Err(format!(
                "option '{}' outside the {} options of question {}",
                letter, template.options, number
            )
            .into());
        }
        plan[number - 1] = Some(k);
    }
    Ok(plan)
}

// ── export ─────────────────────────────────────────────────────────────

fn run_export(args: &CliExportArgs) -> CliResult<()> {
    let data = std::fs::read_to_string(&args.input).map_err(|e| -> CliError {
        format!("failed to read {}: {}", args.input.display(), e).into()
    })?;
    let report: ScanReport = serde_json::from_str(&data)?;

    export::export_report_csv(&report, &args.output)?;
    tracing::info!(
        "Appended {} answers to {}",
        report.answers.len(),
        args.output.display()
    );
    Ok(())
}

// ── template-info ──────────────────────────────────────────────────────

fn run_template_info(path: Option<&Path>) -> CliResult<()> {
    let template = load_template(path)?;

    println!("bubblegrid template '{}'", template.name);
    println!(
        "  page:           {}x{} px",
        template.page_size_px[0], template.page_size_px[1]
    );
    println!(
        "  grid:           {} questions x {} options in {} columns",
        template.questions, template.options, template.columns
    );
    println!(
        "  pitches:        row {} px, option {} px, column stride {} px",
        template.row_pitch_px, template.option_pitch_px, template.column_stride_px
    );
    println!("  bubble radius:  {} px", template.bubble_radius_px);
    println!(
        "  fiducials:      {} squares, side {} px, inset {} px",
        template.required_fiducials(),
        template.fiducial_size_px,
        template.fiducial_inset_px
    );
    println!(
        "  anchor:         {:?}, {:.0}% linear size",
        template.anchor().corner,
        template.anchor_ratio * 100.0
    );
    Ok(())
}
