//! RainVM command-line tool.
//!
//! Runs, links and summarizes programs off-chain.
//!
//! # Usage
//! ```text
//! rainvm run <program> [--world <snapshot.json>] [--entry <n>]
//! rainvm combine <a> <b> -o <out> [--splice-at <n>] [--sources <n>] [--position <p,..>] [--json]
//! rainvm inspect <program>
//! ```
//!
//! Programs are read in the binary format, as JSON, or as assembler text
//! when the file name ends in `.rain`.
//!
//! # Environment
//! - `RAINVM_LOG_LEVEL`: `info`, `warn` or `error`
//! - `RAINVM_LOG_TIMESTAMPS`: `0` or `1`

use rainvm::virtual_machine::assembler::assemble_file;
use rainvm::virtual_machine::collaborator::{ExecContext, WorldSnapshot};
use rainvm::virtual_machine::combiner::{CombineOptions, combine};
use rainvm::virtual_machine::errors::VMError;
use rainvm::virtual_machine::program::{Program, instructions};
use rainvm::virtual_machine::vm::RainVM;
use rainvm::{error, info};
use std::env;
use std::path::Path;
use std::process;

const ASSEMBLY_EXTENSION: &str = "rain";

#[tokio::main]
async fn main() {
    rainvm::utils::log::init_from_env();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let rest = &args[2..];
    let result = match args[1].as_str() {
        "run" => run(rest).await,
        "combine" => combine_files(rest).await,
        "inspect" => inspect(rest).await,
        other => {
            error!("Unknown command: {}\n", other);
            print_usage(&args[0]);
            process::exit(1);
        }
    };

    if let Err(e) = result {
        error!("{e}");
        process::exit(1);
    }
}

/// Returns the value following flag `args[*i]`, advancing past both.
fn flag_value<'a>(args: &'a [String], i: &mut usize) -> &'a str {
    let flag = &args[*i];
    *i += 1;
    if *i >= args.len() {
        error!("{flag} requires an argument");
        process::exit(1);
    }
    let value = &args[*i];
    *i += 1;
    value
}

fn parse_number(flag: &str, value: &str) -> usize {
    value.parse::<usize>().unwrap_or_else(|_| {
        error!("Invalid {flag}: '{value}' is not a valid number");
        process::exit(1);
    })
}

async fn load_program(path: &str) -> Result<Program, VMError> {
    if Path::new(path).extension().is_some_and(|e| e == ASSEMBLY_EXTENSION) {
        return assemble_file(path).await;
    }
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| VMError::IoError(format!("{path}: {e}")))?;
    Program::from_any(&data)
}

async fn load_world(path: &str) -> Result<ExecContext, VMError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| VMError::IoError(format!("{path}: {e}")))?;
    let snapshot = WorldSnapshot::from_json(&text).map_err(|e| VMError::DecodeError {
        reason: format!("{path}: {e}"),
    })?;
    Ok(snapshot.into_exec_context())
}

async fn run(args: &[String]) -> Result<(), VMError> {
    let mut program_path: Option<&str> = None;
    let mut world_path: Option<&str> = None;
    let mut entrypoint = 0usize;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--world" | "-w" => world_path = Some(flag_value(args, &mut i)),
            k @ ("--entry" | "-e") => entrypoint = parse_number(k, flag_value(args, &mut i)),
            other if program_path.is_none() && !other.starts_with('-') => {
                program_path = Some(other);
                i += 1;
            }
            other => {
                error!("Unexpected argument: {}", other);
                process::exit(1);
            }
        }
    }

    let Some(program_path) = program_path else {
        error!("run requires a program");
        process::exit(1);
    };

    let program = load_program(program_path).await?;
    program.validate()?;
    let ctx = match world_path {
        Some(path) => load_world(path).await?,
        None => ExecContext::new(),
    };

    let stack = RainVM::new(&program).run(&ctx, entrypoint).await?;
    info!(
        "Ran source {} of {} ({} value(s) on the stack)",
        entrypoint,
        program_path,
        stack.len()
    );
    for value in stack {
        println!("{value}");
    }
    Ok(())
}

async fn combine_files(args: &[String]) -> Result<(), VMError> {
    let mut inputs: Vec<&str> = Vec::new();
    let mut output_path: Option<&str> = None;
    let mut options = CombineOptions::default();
    let mut json = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--output" | "-o" => output_path = Some(flag_value(args, &mut i)),
            k @ "--splice-at" => options.splice_at = parse_number(k, flag_value(args, &mut i)),
            k @ "--sources" => options.number_of_sources = parse_number(k, flag_value(args, &mut i)),
            k @ "--position" => {
                let list = flag_value(args, &mut i);
                options.position = Some(list.split(',').map(|p| parse_number(k, p.trim())).collect());
            }
            "--json" => {
                json = true;
                i += 1;
            }
            other if !other.starts_with('-') => {
                inputs.push(other);
                i += 1;
            }
            other => {
                error!("Unexpected argument: {}", other);
                process::exit(1);
            }
        }
    }

    let ([a_path, b_path], Some(output_path)) = (inputs.as_slice(), output_path) else {
        error!("combine requires two programs and --output");
        process::exit(1);
    };

    let a = load_program(a_path).await?;
    let b = load_program(b_path).await?;
    let combined = combine(&a, &b, &options)?;

    let bytes = if json {
        combined.to_json_pretty()?.into_bytes()
    } else {
        combined.to_bytes()
    };
    tokio::fs::write(output_path, &bytes)
        .await
        .map_err(|e| VMError::IoError(format!("{output_path}: {e}")))?;

    info!(
        "Combined {} + {} -> {} ({} source(s), {} constant(s))",
        a_path,
        b_path,
        output_path,
        combined.sources.len(),
        combined.constants.len()
    );
    Ok(())
}

async fn inspect(args: &[String]) -> Result<(), VMError> {
    let [path] = args else {
        error!("inspect requires exactly one program");
        process::exit(1);
    };
    let program = load_program(path).await?;

    println!("fingerprint:      {}", program.fingerprint());
    println!("constants:        {}", program.constants.len());
    println!("stack length:     {}", program.stack_length);
    println!("arguments length: {}", program.arguments_length);
    println!("sources:          {}", program.sources.len());
    for (index, source) in program.sources.iter().enumerate() {
        println!(
            "  [{index}] {} instruction(s), {} byte(s)",
            instructions(source).count(),
            source.len()
        );
    }
    match program.validate() {
        Ok(()) => println!("valid:            yes"),
        Err(e) => println!("valid:            no ({e})"),
    }
    Ok(())
}

const USAGE: &str = "\
RainVM

USAGE:
    {program} run <program> [OPTIONS]
    {program} combine <a> <b> --output <file> [OPTIONS]
    {program} inspect <program>

PROGRAMS:
    Binary (.bin), JSON, or assembler text (.rain)

RUN OPTIONS:
    -w, --world <file>      JSON chain snapshot backing external reads
    -e, --entry <n>         Source to evaluate (defaults to 0)

COMBINE OPTIONS:
    -o, --output <file>     Output file path
    --splice-at <n>         First source of <a> receiving code (defaults to 0)
    --sources <n>           Leading sources of <b> to merge (defaults to 1)
    --position <p,..>       Byte offsets to insert at instead of appending
    --json                  Write JSON instead of the binary format

EXAMPLES:
    {program} run price.rain --world chain.json
    {program} combine price.bin discount.bin -o priced.bin
    {program} inspect priced.bin
";

fn print_usage(program: &str) {
    info!("{}", USAGE.replace("{program}", program));
}
