use std::{path::PathBuf, process};

use clap::Parser as ClapParser;

use slate::{HeapCreateInfo, Machine, MachineCreateInfo, MachineError, RunState, Value};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Module image to execute
    #[arg(help = "The .funk module to run")]
    module: PathBuf,

    /// Extra directories searched by `link`
    #[arg(short = 'L', long = "library-path", help = "Add a module search directory")]
    library_paths: Vec<PathBuf>,

    #[arg(long, help = "Arena size in KiB")]
    memory_kib: Option<usize>,

    #[arg(long, help = "Operand stack capacity in values")]
    stack_slots: Option<usize>,

    /// Run in slices of this many instructions instead of to completion
    #[arg(long, help = "Instructions per scheduling slice")]
    slice: Option<usize>,
}

fn run(machine: &mut Machine, slice: Option<usize>) -> Result<Value, MachineError> {
    let Some(budget) = slice else {
        return machine.run();
    };
    let mut slices = 0usize;
    while machine.run_slice(budget)? == RunState::Yielded {
        slices += 1;
        log::trace!("slice {slices} yielded at pc {:#06x}", machine.registers.pc);
    }
    log::debug!("halted after {} slice(s)", slices + 1);
    Ok(machine.return_value())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let mut module_paths = vec![PathBuf::from(".")];
    if let Some(dir) = cli.module.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        module_paths.push(dir.to_path_buf());
    }
    module_paths.extend(cli.library_paths);

    let info = MachineCreateInfo {
        heap: HeapCreateInfo {
            arena_size: cli.memory_kib.map(|kib| kib * 1024),
        },
        stack_slots: cli.stack_slots,
        module_paths,
    };

    let mut machine = match Machine::new(info) {
        Ok(machine) => machine,
        Err(err) => {
            eprintln!("Error creating machine: {err}");
            process::exit(1);
        }
    };

    let entry = machine
        .load_module_file(&cli.module)
        .and_then(|index| machine.set_entry(index));
    if let Err(err) = entry {
        eprintln!("Error loading '{}': {err}", cli.module.display());
        process::exit(1);
    }

    match run(&mut machine, cli.slice) {
        Ok(result) => process::exit((result.payload() & 0xFF) as i32),
        Err(err) => {
            eprintln!("Error: {err}");
            for line in &err.trace {
                eprintln!("  {line}");
            }
            process::exit(1);
        }
    }
}
