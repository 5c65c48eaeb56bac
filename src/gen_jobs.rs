//! Generate one sbatch script per (toolchain, node count, core count)
//! configuration, sweeping the OSU collective benchmarks under each
//! toolchain's build, optionally with a Score-P instrumented pass.

use std::fs;
use std::path::{Path, PathBuf};

use clap::clap_app;
use failure::format_err;
use failure_derive::Fail;
use log::{debug, info};
use serde::Serialize;

/// The benchmark binaries each job runs, relative to the OSU build's `mpi/`
/// directory.
const BENCHMARKS: &[&str] = &["collective/osu_allgather", "collective/osu_allreduce"];

const DEFAULT_NODES: &[usize] = &[1];
const DEFAULT_CORES: &[usize] = &[4, 8, 16, 32, 64, 96];

#[derive(Debug, Fail)]
enum GenError {
    #[fail(display = "no toolchain environment files found in {}", _0)]
    NoToolchains(String),
}

#[derive(Debug, Clone, Serialize)]
struct Config {
    toolchain_dir: PathBuf,
    tools_dir: PathBuf,
    results_dir: PathBuf,
    out_dir: PathBuf,

    nodes: Vec<usize>,
    cores: Vec<usize>,
    repeats: usize,
    instrument: bool,

    time_limit: String,
    exclude: Vec<String>,
}

#[derive(Serialize)]
struct Manifest<'a> {
    config: &'a Config,
    jobs: Vec<String>,
}

pub fn cli_options() -> clap::App<'static, 'static> {
    clap_app! { gen_jobs =>
        (about: "Generate sbatch scripts for an OSU benchmark sweep.")
        (@setting ArgRequiredElseHelp)
        (@setting DisableVersion)
        (@arg TOOLCHAIN_DIR: +required +takes_value
         "Directory containing one environment file per toolchain. The file \
          names are the toolchain names.")
        (@arg OUT_DIR: --out_dir +takes_value default_value(crate::JOBS_PATH)
         "Directory to write the generated scripts (and manifest.json) to.")
        (@arg TOOLS_DIR: --tools_dir +takes_value default_value(crate::TOOLS_PATH)
         "Directory holding the per-toolchain OSU and Score-P builds.")
        (@arg RESULTS_DIR: --results_dir +takes_value default_value(crate::RESULTS_PATH)
         "Directory the jobs write their result files to.")
        (@arg NODES: --nodes +takes_value ... number_of_values(1) {crate::is_usize}
         "Node counts to sweep (default: 1).")
        (@arg CORES: --cores +takes_value ... number_of_values(1) {crate::is_usize}
         "Core counts to sweep (default: 4 8 16 32 64 96).")
        (@arg REPEATS: --repeats +takes_value default_value("5") {crate::is_usize}
         "How many trials of every benchmark each job runs.")
        (@arg INSTRUMENT: --instrument
         "Also run each benchmark against the Score-P instrumented build.")
        (@arg TIME_LIMIT: --time_limit +takes_value default_value("00:10:00")
         "Slurm time limit for each job.")
        (@arg EXCLUDE: --exclude +takes_value ... number_of_values(1)
         "Hosts to exclude from the allocation.")
    }
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let nodes = sub_m
        .values_of("NODES")
        .map(|vals| vals.map(|v| v.parse().unwrap()).collect())
        .unwrap_or_else(|| DEFAULT_NODES.to_vec());
    let cores = sub_m
        .values_of("CORES")
        .map(|vals| vals.map(|v| v.parse().unwrap()).collect())
        .unwrap_or_else(|| DEFAULT_CORES.to_vec());
    let exclude = sub_m
        .values_of("EXCLUDE")
        .map(|vals| vals.map(Into::into).collect())
        .unwrap_or_else(Vec::new);

    let cfg = Config {
        toolchain_dir: sub_m.value_of("TOOLCHAIN_DIR").unwrap().into(),
        tools_dir: sub_m.value_of("TOOLS_DIR").unwrap().into(),
        results_dir: sub_m.value_of("RESULTS_DIR").unwrap().into(),
        out_dir: sub_m.value_of("OUT_DIR").unwrap().into(),

        nodes,
        cores,
        repeats: sub_m.value_of("REPEATS").unwrap().parse().unwrap(),
        instrument: sub_m.is_present("INSTRUMENT"),

        time_limit: sub_m.value_of("TIME_LIMIT").unwrap().into(),
        exclude,
    };

    generate(&cfg).map(|_| ())
}

/// Render and write every job script, plus a manifest recording the sweep.
fn generate(cfg: &Config) -> Result<Vec<PathBuf>, failure::Error> {
    let toolchains = discover_toolchains(&cfg.toolchain_dir)?;

    fs::create_dir_all(&cfg.out_dir)
        .map_err(|e| format_err!("cannot create {}: {}", cfg.out_dir.display(), e))?;

    let mut written = Vec::new();
    for toolchain in &toolchains {
        for &nodes in &cfg.nodes {
            for &cores in &cfg.cores {
                let path = cfg
                    .out_dir
                    .join(format!("{}.sh", job_name(toolchain, nodes, cores)));
                fs::write(&path, render_script(cfg, toolchain, nodes, cores))?;
                debug!("wrote {}", path.display());
                written.push(path);
            }
        }
    }

    let manifest = Manifest {
        config: cfg,
        jobs: written
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect(),
    };
    fs::write(
        cfg.out_dir.join("manifest.json"),
        serde_json::to_string_pretty(&manifest)?,
    )?;

    info!(
        "generated {} job scripts in {}",
        written.len(),
        cfg.out_dir.display()
    );

    Ok(written)
}

/// Toolchain names are the file names in the toolchain directory, sorted.
fn discover_toolchains(dir: &Path) -> Result<Vec<String>, failure::Error> {
    let entries = fs::read_dir(dir)
        .map_err(|e| format_err!("cannot list toolchain dir {}: {}", dir.display(), e))?;

    let mut names = Vec::new();
    for entry in entries {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        names.push(name);
    }
    names.sort();

    if names.is_empty() {
        return Err(GenError::NoToolchains(dir.display().to_string()).into());
    }

    Ok(names)
}

fn job_name(toolchain: &str, nodes: usize, cores: usize) -> String {
    format!("{}_n{:03}_c{:05}", toolchain, nodes, cores)
}

fn result_file_name(
    toolchain: &str,
    state: &str,
    nodes: usize,
    cores: usize,
    exe: &str,
) -> String {
    format!(
        "{}_{}_n{:03}_c{:05}_{}",
        toolchain,
        state,
        nodes,
        cores,
        exe.replace('/', "-")
    )
}

fn render_script(cfg: &Config, toolchain: &str, nodes: usize, cores: usize) -> String {
    let name = job_name(toolchain, nodes, cores);

    let exclude = if cfg.exclude.is_empty() {
        String::new()
    } else {
        format!("#SBATCH --exclude={}\n", cfg.exclude.join(","))
    };

    // The Score-P launcher only needs to be on PATH for instrumented runs.
    let scorep_path = if cfg.instrument {
        format!(
            "export PATH={}:$PATH\n",
            cfg.tools_dir
                .join(format!("scorep_{}", toolchain))
                .join("bin")
                .display()
        )
    } else {
        String::new()
    };

    let stale = cfg
        .results_dir
        .join(format!("{}_*_n{:03}_c{:05}_*", toolchain, nodes, cores));

    format!(
        r#"#!/bin/bash

#SBATCH -J {name}
#SBATCH -N {nodes}
#SBATCH -n {cores}
#SBATCH --switch=1
#SBATCH --time={time}
#SBATCH --exclusive
#SBATCH --output={log}
{exclude}#SBATCH --hint=nomultithread

source {env_file}
{scorep_path}
rm -f {stale}

{trials}"#,
        name = name,
        nodes = nodes,
        cores = cores,
        time = cfg.time_limit,
        log = cfg.results_dir.join(format!("{}.log", name)).display(),
        exclude = exclude,
        env_file = cfg.toolchain_dir.join(toolchain).display(),
        scorep_path = scorep_path,
        stale = stale.display(),
        trials = render_trials(cfg, toolchain, nodes, cores),
    )
}

/// The body of a job: `repeats` trials, each running every benchmark under
/// every instrumentation state, appending to per-configuration result files.
fn render_trials(cfg: &Config, toolchain: &str, nodes: usize, cores: usize) -> String {
    let states: &[&str] = if cfg.instrument {
        &["scorepOFF", "scorepON"]
    } else {
        &["scorepOFF"]
    };

    let mut out = String::new();
    for trial in 1..=cfg.repeats {
        out.push_str(&format!("# trial {}\n", trial));
        for state in states {
            let osu_dir = cfg
                .tools_dir
                .join(format!("osu_{}_{}", toolchain, state))
                .join("libexec")
                .join("osu-micro-benchmarks")
                .join("mpi");
            out.push_str(&format!("cd {}\n", osu_dir.display()));

            if *state == "scorepON" {
                out.push_str("export SCOREP_ENABLE_PROFILING=true\n");
                out.push_str(&format!(
                    "export SCOREP_EXPERIMENT_DIRECTORY={}\n",
                    cfg.results_dir
                        .join(format!(
                            "scorep_{}_n{:03}_c{:05}_trial{}",
                            toolchain, nodes, cores, trial
                        ))
                        .display()
                ));
            }

            for exe in BENCHMARKS {
                let result_file = cfg
                    .results_dir
                    .join(result_file_name(toolchain, state, nodes, cores, exe));
                out.push_str(&format!("srun ./{} -z >> {}\n", exe, result_file.display()));
            }

            // Keep the Score-P environment scoped to the instrumented pass.
            if *state == "scorepON" {
                out.push_str("unset SCOREP_ENABLE_PROFILING SCOREP_EXPERIMENT_DIRECTORY\n");
            }
        }
        out.push('\n');
    }

    if cfg.instrument {
        // An aborted Score-P run leaves this behind in the working dir.
        out.push_str("rm -rf scorep-measurement-tmp\n");
    }

    out
}
