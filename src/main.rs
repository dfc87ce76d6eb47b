mod admissible;
mod allocation;
mod calibrate;
mod config;
mod isotonic;
mod outcomes;
mod posterior;
mod selector;
mod trial;

use std::env;
use std::io::{self, Write};

use config::{EfficacyModel, ProbabilityModel, TrialConfig};

fn main() {
    let args: Vec<String> = env::args().collect();

    // If arguments provided, use CLI mode
    if args.len() > 1 {
        run_cli(&args[1..]);
        return;
    }

    // Otherwise, interactive menu
    run_interactive();
}

fn run_cli(args: &[String]) {
    if args.is_empty() {
        print_usage();
        return;
    }

    match args[0].as_str() {
        "simulate" | "s" => {
            let opts = parse_options(&args[1..]);
            if let Err(e) = run_simulate(&opts) {
                eprintln!("Error: {}", e);
            }
        }
        "calibrate" | "c" => {
            let opts = parse_options(&args[1..]);
            if let Err(e) = run_calibrate(&opts) {
                eprintln!("Error: {}", e);
            }
        }
        "help" | "-h" | "--help" => print_usage(),
        _ => {
            eprintln!("Unknown command: {}", args[0]);
            print_usage();
        }
    }
}

struct Options {
    doses: Option<Vec<f64>>,
    stages: Option<usize>,
    cohort: Option<usize>,
    sims: Option<usize>,
    seed: u64,
    reps: usize,
    scenario: Scenario,
    pooled: bool,
    no_early_stop: bool,
    export: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum Scenario {
    Graded,
    Flat,
    Unfavorable,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            doses: None,
            stages: None,
            cohort: None,
            sims: None,
            seed: 42,
            reps: 1000,
            scenario: Scenario::Graded,
            pooled: false,
            no_early_stop: false,
            export: true,
        }
    }
}

fn parse_options(args: &[String]) -> Options {
    let mut opts = Options::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--doses" | "-d" => {
                if i + 1 < args.len() {
                    opts.doses = Some(
                        args[i + 1]
                            .split(',')
                            .filter_map(|s| s.trim().parse().ok())
                            .collect(),
                    );
                    i += 1;
                }
            }
            "--stages" => {
                if i + 1 < args.len() {
                    opts.stages = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--cohort" => {
                if i + 1 < args.len() {
                    opts.cohort = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--sims" => {
                if i + 1 < args.len() {
                    opts.sims = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--seed" => {
                if i + 1 < args.len() {
                    opts.seed = args[i + 1].parse().unwrap_or(42);
                    i += 1;
                }
            }
            "--reps" | "-r" => {
                if i + 1 < args.len() {
                    opts.reps = args[i + 1].parse().unwrap_or(1000);
                    i += 1;
                }
            }
            "--scenario" => {
                if i + 1 < args.len() {
                    opts.scenario = match args[i + 1].as_str() {
                        "flat" => Scenario::Flat,
                        "unfavorable" => Scenario::Unfavorable,
                        _ => Scenario::Graded,
                    };
                    i += 1;
                }
            }
            "--pooled" => opts.pooled = true,
            "--no-early-stop" => opts.no_early_stop = true,
            "--no-export" => opts.export = false,
            _ => {}
        }
        i += 1;
    }
    opts
}

fn build_config(opts: &Options) -> TrialConfig {
    let mut cfg = TrialConfig::default();
    if let Some(doses) = &opts.doses {
        cfg.dose_levels = doses.clone();
    }
    if let Some(n) = opts.stages {
        cfg.n_stages = n;
    }
    if let Some(n) = opts.cohort {
        cfg.cohort_size = n;
    }
    if let Some(n) = opts.sims {
        cfg.n_sims = n;
    }
    if opts.pooled {
        cfg.efficacy_model = EfficacyModel::Pooled;
    }
    if opts.no_early_stop {
        cfg.early_stop = false;
    }
    cfg
}

fn build_model(opts: &Options, n_doses: usize) -> ProbabilityModel {
    match opts.scenario {
        Scenario::Graded => ProbabilityModel::graded(n_doses),
        Scenario::Flat => ProbabilityModel::flat(n_doses, 0.35, 0.05, [0.30, 0.30]),
        Scenario::Unfavorable => ProbabilityModel::unfavorable(n_doses),
    }
}

fn run_simulate(opts: &Options) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = build_config(opts);
    let model = build_model(opts, cfg.n_doses());

    println!("\n==========================================");
    println!("   ADAPTIVE DOSE-FINDING SIMULATION");
    println!("==========================================");
    println!("Run: {}  (seed {})\n", chrono_lite(), opts.seed);

    let result = trial::run_trial(&cfg, &model, opts.seed)?;

    println!("Stage | Enrolled | Admissible doses | Allocation");
    println!("------|----------|------------------|------------------------");
    for s in &result.stages {
        let enrolled = result
            .patients
            .iter()
            .filter(|p| p.stage == s.stage)
            .count();
        let adm: Vec<String> = s.admissible.iter().map(|j| (j + 1).to_string()).collect();
        let alloc: Vec<String> = s.allocation.iter().map(|p| format!("{:.2}", p)).collect();
        println!(
            "{:>5} | {:>8} | {:>16} | {}",
            s.stage,
            enrolled,
            if adm.is_empty() { "-".to_string() } else { adm.join(",") },
            alloc.join(" "),
        );
    }

    println!("\nTotal enrolled: {}", result.total_enrolled());
    if result.terminated_early {
        println!(
            "TERMINATED EARLY at stage {}: {}",
            result.termination_stage.unwrap_or(0),
            result.termination_reason.as_deref().unwrap_or("-"),
        );
    }

    let d = &result.decision;
    match d.dose {
        Some(j) => {
            println!(
                "\nFinal dose: level {} (index {})",
                cfg.dose_levels[j],
                j + 1
            );
            println!("Expected utility: {:.2}", d.expected_utility.unwrap_or(0.0));
        }
        None => println!("\nFinal dose: none"),
    }
    println!("PoC validated: {}", d.poc_validated);
    if let Some(p) = d.poc_prob {
        println!("Max PoC probability: {:.3}", p);
    }
    println!("Rationale: {}", d.rationale);

    if opts.export {
        trial::export_patients_csv(&result, "patients.csv")?;
        trial::export_allocations_csv(&result, &cfg, "allocations.csv")?;
        println!("\nWrote patients.csv and allocations.csv");
    }
    Ok(())
}

fn run_calibrate(opts: &Options) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = build_config(opts);
    let model = build_model(opts, cfg.n_doses());

    println!("\n==========================================");
    println!("   CALIBRATION SWEEP");
    println!("==========================================");
    println!(
        "Run: {}  (base seed {}, {} reps)\n",
        chrono_lite(),
        opts.seed,
        opts.reps
    );

    let summary = calibrate::calibrate(&cfg, &model, opts.seed, opts.reps)?;
    print!("{}", summary.render(&cfg));
    Ok(())
}

fn print_usage() {
    println!("oadf: outcome-adaptive dose-finding trial simulator");
    println!();
    println!("USAGE:");
    println!("  oadf                      Interactive mode");
    println!("  oadf simulate [options]   Run one simulated trial");
    println!("  oadf calibrate [options]  Replicate a scenario and aggregate");
    println!();
    println!("OPTIONS:");
    println!("  -d, --doses <a,b,c>      Dose levels (default 0.1,0.3,0.5)");
    println!("      --stages <N>         Number of stages (default 5)");
    println!("      --cohort <N>         Cohort size per stage (default 15)");
    println!("      --sims <N>           Posterior draws per dose (default 2000)");
    println!("      --seed <N>           RNG seed (default 42)");
    println!("  -r, --reps <N>           Calibration replications (default 1000)");
    println!("      --scenario <name>    graded | flat | unfavorable");
    println!("      --pooled             Pool efficacy across immune groups");
    println!("      --no-early-stop      Run all stages even with no admissible dose");
    println!("      --no-export          Skip CSV export (simulate only)");
    println!();
    println!("EXAMPLES:");
    println!("  oadf simulate --seed 7");
    println!("  oadf calibrate --scenario flat --reps 2000");
    println!("  oadf simulate --doses 0.05,0.15,0.3,0.6 --stages 4 --cohort 20");
}

fn run_interactive() {
    println!("\n==========================================");
    println!("   Outcome-Adaptive Dose-Finding");
    println!("==========================================");
    println!("\nSelect an option:");
    println!("  1. Simulate one trial");
    println!("  2. Calibration sweep");
    println!("  0. Exit");

    print!("\nSelect: ");
    io::stdout().flush().unwrap();

    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    match input.trim() {
        "1" => {
            let opts = interactive_options(false);
            if let Err(e) = run_simulate(&opts) {
                eprintln!("Error: {}", e);
            }
        }
        "2" => {
            let opts = interactive_options(true);
            if let Err(e) = run_calibrate(&opts) {
                eprintln!("Error: {}", e);
            }
        }
        "0" => println!("Goodbye!"),
        _ => println!("Invalid option"),
    }
}

fn interactive_options(with_reps: bool) -> Options {
    let mut opts = Options::default();

    let scenario = get_choice(
        "\nScenario:",
        &["graded (dose-response)", "flat (null)", "unfavorable (toxic)"],
    );
    opts.scenario = match scenario {
        2 => Scenario::Flat,
        3 => Scenario::Unfavorable,
        _ => Scenario::Graded,
    };

    opts.stages = Some(get_input_usize("Number of stages (e.g. 5): "));
    opts.cohort = Some(get_input_usize("Cohort size per stage (e.g. 15): "));
    if let Some(seed) = get_optional_input("Seed (Enter for 42): ") {
        opts.seed = seed;
    }
    if with_reps {
        opts.reps = get_input_usize("Replications (e.g. 1000): ");
    }
    opts
}

// === INPUT HELPERS ===

fn get_input_usize(prompt: &str) -> usize {
    loop {
        print!("{}", prompt);
        io::stdout().flush().unwrap();
        let mut buffer = String::new();
        match io::stdin().read_line(&mut buffer) {
            Ok(_) => match buffer.trim().parse::<usize>() {
                Ok(num) => return num,
                Err(_) => println!("Invalid number."),
            },
            Err(_) => println!("Error."),
        }
    }
}

fn get_optional_input(prompt: &str) -> Option<u64> {
    print!("{}", prompt);
    io::stdout().flush().unwrap();
    let mut buffer = String::new();
    io::stdin().read_line(&mut buffer).unwrap();
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        None
    } else {
        trimmed.parse::<u64>().ok()
    }
}

fn get_choice(prompt: &str, options: &[&str]) -> usize {
    loop {
        println!("{}", prompt);
        for (i, opt) in options.iter().enumerate() {
            println!("  {}. {}", i + 1, opt);
        }
        print!("Select: ");
        io::stdout().flush().unwrap();
        let mut buffer = String::new();
        if io::stdin().read_line(&mut buffer).is_ok() {
            if let Ok(num) = buffer.trim().parse::<usize>() {
                if num >= 1 && num <= options.len() {
                    return num;
                }
            }
        }
        println!("Invalid choice.");
    }
}

/// Simple timestamp without external crate (proper leap year handling)
fn chrono_lite() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
    let secs = duration.as_secs();
    let mut days = (secs / 86400) as i64;

    let mut year = 1970i64;
    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if days < days_in_year {
            break;
        }
        days -= days_in_year;
        year += 1;
    }

    let days_in_months: [i64; 12] = if is_leap_year(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };

    let mut month = 1;
    for &dm in &days_in_months {
        if days < dm {
            break;
        }
        days -= dm;
        month += 1;
    }

    let day = days + 1;
    let hours = (secs % 86400) / 3600;
    let mins = (secs % 3600) / 60;
    format!("{}-{:02}-{:02} {:02}:{:02} UTC", year, month, day, hours, mins)
}

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}
