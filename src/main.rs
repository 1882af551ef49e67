use classlint::*;

use clap::{App, Arg};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use walkdir::WalkDir;

fn main() {
    env_logger::init();

    let matches = App::new("classlint")
        .version("0.1.0")
        .about("Flags loops that provably cannot terminate in JVM class files")
        .arg(
            Arg::with_name("INPUT")
                .help("Class files or directories to scan recursively")
                .required(true)
                .multiple(true)
                .index(1),
        )
        .get_matches();

    let mut findings = 0usize;
    let mut failures = 0usize;

    for input in matches.values_of("INPUT").unwrap() {
        for class_file in class_files(input) {
            log::info!("Scanning '{}'", class_file.display());
            let scanned = fs::read(&class_file)
                .map_err(jvm::Error::IoError)
                .and_then(|bytes| analysis::scan_class_bytes(&bytes));
            match scanned {
                Ok(class_findings) => {
                    for finding in &class_findings {
                        println!("{}", finding);
                    }
                    findings += class_findings.len();
                }
                Err(err) => {
                    log::warn!("'{}': {}", class_file.display(), err);
                    failures += 1;
                }
            }
        }
    }

    if failures > 0 {
        log::warn!("{} file(s) could not be analyzed", failures);
    }
    if findings > 0 {
        process::exit(1);
    }
}

/// Expand an input path into the class files underneath it
///
/// A file argument is taken as-is; a directory is walked for `*.class`.
fn class_files(input: &str) -> Vec<PathBuf> {
    let path = Path::new(input);
    if path.is_file() {
        return vec![path.to_owned()];
    }
    let mut paths = vec![];
    for entry in WalkDir::new(path) {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file()
                    && entry.path().extension().map_or(false, |ext| ext == "class")
                {
                    paths.push(entry.path().to_owned());
                }
            }
            Err(err) => log::warn!("'{}': {}", input, err),
        }
    }
    paths
}
