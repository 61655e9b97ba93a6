// `windlass validate <file|glob> [--strict]`

use std::path::PathBuf;

use serde::Serialize;

use crate::output::OutputFormat;
use crate::CliError;

#[derive(Serialize)]
struct ValidationReport {
    file: String,
    valid: bool,
    warnings: Vec<String>,
    error: Option<String>,
}

pub fn run(pattern: &str, strict: bool, format: OutputFormat) -> Result<(), CliError> {
    let paths = resolve(pattern)?;
    if paths.is_empty() {
        return Err(CliError::Usage(format!("no documents match `{pattern}`")));
    }

    let mut reports = Vec::with_capacity(paths.len());
    for path in &paths {
        let report = match windlass_core::parse_file(path) {
            Ok(parsed) => ValidationReport {
                file: path.display().to_string(),
                valid: !(strict && !parsed.warnings.is_empty()),
                warnings: parsed.warnings.iter().map(|w| w.to_string()).collect(),
                error: None,
            },
            Err(e) => ValidationReport {
                file: path.display().to_string(),
                valid: false,
                warnings: Vec::new(),
                error: Some(e.to_string()),
            },
        };
        reports.push(report);
    }

    if format.is_text() {
        for report in &reports {
            let verdict = if report.valid { "ok" } else { "FAILED" };
            println!("{:<7} {}", verdict, report.file);
            for warning in &report.warnings {
                println!("        warning: {warning}");
            }
            if let Some(error) = &report.error {
                println!("        {error}");
            }
        }
        let failed = reports.iter().filter(|r| !r.valid).count();
        println!("{} document(s), {} failed", reports.len(), failed);
    } else {
        format.print_value(&reports);
    }

    if reports.iter().any(|r| !r.valid) {
        Err(CliError::Usage("validation failed".to_string()))
    } else {
        Ok(())
    }
}

fn resolve(pattern: &str) -> Result<Vec<PathBuf>, CliError> {
    let direct = PathBuf::from(pattern);
    if direct.is_file() {
        return Ok(vec![direct]);
    }
    let entries = glob::glob(pattern)
        .map_err(|e| CliError::Usage(format!("bad glob `{pattern}`: {e}")))?;
    let mut paths = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => paths.push(path),
            Ok(_) => {}
            Err(e) => return Err(CliError::Usage(format!("cannot read `{pattern}`: {e}"))),
        }
    }
    paths.sort();
    Ok(paths)
}
