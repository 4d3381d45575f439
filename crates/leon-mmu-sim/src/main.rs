mod trace;

use std::path::PathBuf;

use leon_mmu::config::parse_page_size;
use leon_mmu::memory::DEFAULT_RAM_SIZE;
use leon_mmu::{Mmu, MmuConfig, Ram, Replacement, TlbType, TrapLog};

/// Nominal core clock for the power estimate: 100 MHz.
const CLOCK_PERIOD_S: f64 = 10e-9;

const USAGE: &str = "Usage: leon-mmu-sim [--combined] [--random] [--power] [--page-size N] <trace>";

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config = MmuConfig::from_env();
    let mut trace_path = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--combined" => config.tlb_type = TlbType::Combined,
            "--random" => config.replacement = Replacement::Random,
            "--power" => config.power_monitoring = true,
            "--page-size" => {
                let Some(size) = iter.next().and_then(|s| parse_page_size(&s.to_ascii_lowercase()))
                else {
                    eprintln!("--page-size expects 0..3 or 4k|8k|16k|32k");
                    std::process::exit(1);
                };
                config.page_size = size;
            }
            flag if flag.starts_with("--") => {
                eprintln!("Unknown option {}\n{}", flag, USAGE);
                std::process::exit(1);
            }
            path => trace_path = Some(PathBuf::from(path)),
        }
    }
    let Some(trace_path) = trace_path else {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    };

    let ops = match trace::load(&trace_path) {
        Ok(ops) => ops,
        Err(e) => {
            eprintln!("Failed to load trace {}: {}", trace_path.display(), e);
            std::process::exit(1);
        }
    };

    let mut mmu = match Mmu::new(config, Ram::new(DEFAULT_RAM_SIZE), TrapLog::new()) {
        Ok(mmu) => mmu,
        Err(e) => {
            eprintln!("Invalid MMU configuration: {}", e);
            std::process::exit(1);
        }
    };
    mmu.set_clock_period(CLOCK_PERIOD_S);

    let mut runner = trace::Runner::new(mmu);
    runner.run(&ops);

    let summary = &runner.summary;
    let mmu = &runner.mmu;
    println!(
        "{} accesses, {} failed, {} cycles, {} traps",
        summary.accesses,
        summary.faults,
        summary.cycles,
        mmu.exception_sink().traps.len()
    );
    print!("{}", mmu.report());
    if let Some(model) = mmu.power() {
        let elapsed = summary.cycles as f64 * CLOCK_PERIOD_S;
        println!("* Static power: {:e} W", model.sta_power);
        println!("* Internal power: {:e} W", model.int_power);
        if let Some(switching) = mmu.switching_power(elapsed) {
            println!("* Switching power: {:e} W", switching);
        }
    }
}
