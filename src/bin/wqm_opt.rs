//! Mode switching driver for TIR files.
//!
//! Reads a TIR module from a file (or stdin), runs the pass over every
//! function and prints the rewritten module.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

use bumpalo::Bump;
use clap::Parser;
use wqm::test_ir::{TestIR, TestIRAdaptor};
use wqm::wqm::{analyze_function, ModeState};
use wqm::{PassConfig, WholeQuadMode};

#[derive(Parser, Debug)]
#[command(name = "wqm-opt", version, about = "Insert lane mode switches into TIR functions")]
struct Args {
    /// Input TIR file; stdin when omitted
    input: Option<PathBuf>,

    /// Process functions regardless of calling convention
    #[arg(long)]
    ignore_cc: bool,

    /// Print the solved annotations of each function before rewriting it
    #[arg(long)]
    print_state: bool,

    /// Print pass statistics to stderr
    #[arg(long)]
    stats: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let text = match &args.input {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let mut ir = match TestIR::parse(&text) {
        Ok(ir) => ir,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let config = PassConfig { require_pixel_shader: !args.ignore_cc, ..PassConfig::default() };
    let mut pass = WholeQuadMode::with_config(config);

    {
        let mut adaptor = TestIRAdaptor::new(&mut ir);
        let funcs: Vec<_> = adaptor.funcs().collect();
        for func in funcs {
            adaptor.switch_func(func);
            log::info!("running on {}", adaptor.func_name(func));

            if args.print_state {
                let arena = Bump::new();
                let mut state = ModeState::new_in(&arena, &adaptor);
                let global_flags = analyze_function(&mut state, &adaptor);
                println!("; {}: global {}", adaptor.func_name(func), global_flags);
                for line in state.display(&adaptor).to_string().lines() {
                    println!("; {}", line);
                }
            }

            if let Err(e) = pass.run(&mut adaptor) {
                eprintln!("Error in {}: {}", adaptor.func_name(func), e);
                process::exit(1);
            }
        }
    }

    print!("{}", ir);
    if args.stats {
        eprint!("{}", pass.stats());
    }
    Ok(())
}
