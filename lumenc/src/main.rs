//! `lumenc`: decode and run a single function body.
//!
//! Usage:
//!   lumenc disasm <body.bin> [--entry]
//!   lumenc run <body.bin> [--entry] --params i32,i32 --results i32 [--pages N] [args...]
//!
//! The input file holds either a bare body terminated by `end` (0x0B) or,
//! with `--entry`, a code-section entry with its size and local declarations.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{debug, info};
use lumen::{
    decode::{decode_function_body, Decoder},
    ir::{self, Function, Instruction},
    module::Module,
    runtime::{Config, Runtime},
    types::{FuncType, Val, ValType},
};

#[derive(Parser)]
#[command(name = "lumenc", version, about = "Decode and run WebAssembly function bodies")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the decoded instruction tree.
    Disasm(Input),
    /// Execute the body with the given signature and arguments.
    Run(RunArgs),
}

#[derive(Args)]
struct Input {
    /// File holding the encoded body.
    file: PathBuf,
    /// Treat the file as a code-section entry (size, locals, body).
    #[arg(long)]
    entry: bool,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    input: Input,
    /// Parameter types, comma separated.
    #[arg(long, value_delimiter = ',')]
    params: Vec<String>,
    /// Result types, comma separated.
    #[arg(long, value_delimiter = ',')]
    results: Vec<String>,
    /// Initial linear memory size in pages.
    #[arg(long, default_value_t = 1)]
    pages: usize,
    /// Upper bound for memory.grow, in pages.
    #[arg(long)]
    max_pages: Option<usize>,
    /// Arguments, one per parameter.
    #[arg(allow_hyphen_values = true)]
    args: Vec<String>,
}

struct Decoded {
    locals: Vec<ValType>,
    body: Vec<Instruction>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Disasm(input) => cmd_disasm(&input),
        Command::Run(args) => cmd_run(&args),
    }
}

fn load(input: &Input) -> Result<Decoded> {
    let bytes = std::fs::read(&input.file)
        .with_context(|| format!("cannot read {}", input.file.display()))?;
    debug!("read {} bytes from {}", bytes.len(), input.file.display());
    let decoded = if input.entry {
        let entry = Decoder::new(&bytes).decode_code_entry()?;
        Decoded { locals: entry.locals, body: entry.body }
    } else {
        Decoded { locals: Vec::new(), body: decode_function_body(&bytes)? }
    };
    Ok(decoded)
}

fn parse_types(names: &[String]) -> Result<Vec<ValType>> {
    names
        .iter()
        .map(|n| ValType::parse(n).ok_or_else(|| anyhow!("unknown value type {n:?}")))
        .collect()
}

fn cmd_disasm(input: &Input) -> Result<()> {
    let decoded = load(input)?;
    if !decoded.locals.is_empty() {
        let names: Vec<String> = decoded.locals.iter().map(ToString::to_string).collect();
        println!("(local {})", names.join(" "));
    }
    print!("{}", ir::disassemble(&decoded.body));
    Ok(())
}

fn cmd_run(run: &RunArgs) -> Result<()> {
    let ty = FuncType::new(parse_types(&run.params)?, parse_types(&run.results)?);
    if run.args.len() != ty.params.len() {
        bail!("expected {} arguments for {ty}, got {}", ty.params.len(), run.args.len());
    }
    let args = ty
        .params
        .iter()
        .zip(&run.args)
        .map(|(&t, text)| Val::parse(t, text).ok_or_else(|| anyhow!("cannot parse {text:?} as {t}")))
        .collect::<Result<Vec<_>>>()?;

    let decoded = load(&run.input)?;
    let mut module = Module::new();
    module.initial_memory_pages = run.pages;
    let main = module.add_function(Function::new("main", ty, decoded.locals, decoded.body));
    module.export("main", main);

    let mut config = Config::new();
    if let Some(max) = run.max_pages {
        config = config.max_memory_pages(max);
    }
    let mut machine = Runtime::with_config(config).instantiate(&module)?;
    info!("running {} with {} arguments", run.input.file.display(), args.len());

    let results = machine.invoke("main", &args)?;
    if results.is_empty() {
        println!("(no results)");
    }
    for v in results {
        println!("{v}");
    }
    Ok(())
}
