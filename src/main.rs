mod aggregate;
mod gen_jobs;
mod stats;

const JOBS_PATH: &str = "jobs/";
const TOOLS_PATH: &str = "tools/";
const RESULTS_PATH: &str = "results/";

/// clap 2.x validator for unsigned integer arguments.
pub(crate) fn is_usize(s: String) -> Result<(), String> {
    s.parse::<usize>().map(|_| ()).map_err(|e| e.to_string())
}

fn run() -> Result<(), failure::Error> {
    let matches = clap::App::new("osu-runner")
        .subcommand(crate::gen_jobs::cli_options())
        .subcommand(crate::aggregate::cli_options())
        .setting(clap::AppSettings::SubcommandRequiredElseHelp)
        .setting(clap::AppSettings::DisableVersion)
        .get_matches();

    match matches.subcommand() {
        ("gen_jobs", Some(sub_m)) => crate::gen_jobs::run(sub_m),
        ("aggregate", Some(sub_m)) => crate::aggregate::run(sub_m),
        _ => {
            unreachable!();
        }
    }
}

fn main() {
    use console::style;

    env_logger::init();

    std::env::set_var("RUST_BACKTRACE", "1");

    // If an error returned, try to print something helpful
    if let Err(err) = run() {
        const MESSAGE: &str = r#"== ERROR ==================================================================================
`osu-runner` encountered an error. Nothing was submitted to Slurm; any files already written
to the output directory may be incomplete. Setting RUST_LOG=debug may offer clues.
"#;

        println!("{}", style(MESSAGE).red().bold());

        // Print error and backtrace
        println!(
            "`osu-runner` encountered the following error:\n{}\n{}",
            err.as_fail(),
            err.backtrace(),
        );

        std::process::exit(101);
    }
}
