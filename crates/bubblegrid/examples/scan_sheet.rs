use bubblegrid::{Scanner, SheetTemplate};
use std::error::Error;
use std::path::Path;

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <sheet.png> [template.json] [out.json]", args[0]);
        std::process::exit(2);
    }

    let template = match args.get(2) {
        Some(path) => SheetTemplate::from_json_file(Path::new(path))?,
        None => SheetTemplate::default(),
    };
    let image = image::open(&args[1])?.to_luma8();

    let scanner = Scanner::new(template);
    let report = scanner.scan(&image)?;

    println!(
        "{} questions: {} answered, {} blank, {} ambiguous.",
        report.answers.len(),
        report.n_choice,
        report.n_blank,
        report.n_ambiguous
    );

    if let Some(out_path) = args.get(3) {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(out_path, json)?;
        println!("Wrote {out_path}");
    }
    Ok(())
}
