//! RainVM assembler CLI.
//!
//! Reads assembler text and writes the compiled program.
//!
//! # Usage
//! ```text
//! assembler <input.rain> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `input.rain`: Assembler source file to compile
//!
//! # Options
//! - `-o, --output <file>`: Output file path (defaults to `<input>.bin`, or `<input>.json` with `--json`)
//! - `--json`: Write the JSON program format instead of the binary one
//!
//! # Examples
//! ```text
//! assembler price.rain
//! assembler price.rain -o price.bin
//! assembler price.rain --json
//! ```

use rainvm::virtual_machine::assembler::assemble_file;
use rainvm::{error, info, warn};
use std::env;
use std::path::Path;
use std::process;

#[tokio::main]
async fn main() {
    rainvm::utils::log::init_from_env();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let input_path = &args[1];
    let mut output_path: Option<String> = None;
    let mut json = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            k @ ("--output" | "-o") => {
                i += 1;
                if i >= args.len() {
                    error!("{k} requires an argument");
                    process::exit(1);
                }
                output_path = Some(args[i].clone());
                i += 1;
            }
            "--json" => {
                json = true;
                i += 1;
            }
            other => {
                error!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    if !Path::new(input_path).exists() {
        error!("Input file does not exist: {}", input_path);
        process::exit(1);
    }

    let output_path = output_path.unwrap_or_else(|| {
        let p = Path::new(input_path);
        let stem = p.file_stem().unwrap_or_default().to_string_lossy();
        let parent = p.parent().unwrap_or(Path::new("."));
        let extension = if json { "json" } else { "bin" };
        parent
            .join(format!("{}.{}", stem, extension))
            .to_string_lossy()
            .into_owned()
    });

    if let Some(parent) = Path::new(&output_path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        error!("Output directory does not exist: {}", parent.display());
        process::exit(1);
    }

    let program = match assemble_file(input_path).await {
        Ok(p) => p,
        Err(e) => {
            error!("Assembly failed: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = program.validate() {
        warn!("Program references data it does not define: {}", e);
    }

    let bytes = if json {
        match program.to_json_pretty() {
            Ok(text) => text.into_bytes(),
            Err(e) => {
                error!("{e}");
                process::exit(1);
            }
        }
    } else {
        program.to_bytes()
    };

    if let Err(e) = tokio::fs::write(&output_path, &bytes).await {
        error!("Failed to write output file: {}", e);
        process::exit(1);
    }

    info!(
        "Compiled {} -> {} ({} bytes, fingerprint {})",
        input_path,
        output_path,
        bytes.len(),
        program.fingerprint()
    );
}

const USAGE: &str = "\
RainVM Assembler

USAGE:
    {program} <input.rain> [OPTIONS]

ARGS:
    <input.rain>    Assembler source file to compile

OPTIONS:
    -o, --output <file>     Output file path (defaults to <input>.bin)
    --json                  Write the JSON program format
    -h, --help              Print this help message

EXAMPLES:
    # Compile to default output name
    {program} price.rain

    # Compile with explicit output
    {program} price.rain -o output.bin

    # Compile to JSON
    {program} price.rain --json
";

fn print_usage(program: &str) {
    info!("{}", USAGE.replace("{program}", program));
}
