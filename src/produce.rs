// Copyright 2018 The Produce-rs Project Developers. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::Path;
use std::sync::Arc;
use std::thread;

use clap::{App, AppSettings, Arg, ArgMatches};

use super::build::{Build, BuildConfig, Producer, ProduceResult};
use super::debug_flags::set_explaining;
use super::disk_interface::{DiskInterface, RealDiskInterface};
use super::eval::{ScriptEvaluator, Value};
use super::graph::DependencyScan;
use super::rule_file_parser::parse_rule_file;
use super::rules::RuleSet;
use super::utils::{get_processor_count, shell_split};
use super::version::PRODUCE_VERSION;

fn build_app() -> App<'static, 'static> {
    App::new("produce")
        .version(PRODUCE_VERSION)
        .about("A dependency-directed build driver")
        .setting(AppSettings::DeriveDisplayOrder)
        .setting(AppSettings::UnifiedHelpMessage)
        .arg(
            Arg::with_name("always_build")
                .short("B")
                .long("always-build")
                .help("unconditionally produce every target reached"),
        )
        .arg(
            Arg::with_name("directory")
                .short("C")
                .long("directory")
                .takes_value(true)
                .value_name("DIR")
                .help("change to DIR before doing anything else"),
        )
        .arg(
            Arg::with_name("debug")
                .short("d")
                .long("debug")
                .help("explain what is being done and why"),
        )
        .arg(
            Arg::with_name("file")
                .short("f")
                .long("file")
                .takes_value(true)
                .value_name("FILE")
                .default_value("produce.ini")
                .help("specify the rule file"),
        )
        .arg(
            Arg::with_name("jobs")
                .short("j")
                .long("jobs")
                .takes_value(true)
                .value_name("N")
                .default_value("1")
                .help("run up to N recipes in parallel (0 means one per processor)"),
        )
        .arg(
            Arg::with_name("dry_run")
                .short("n")
                .long("dry-run")
                .help("print recipes instead of executing them"),
        )
        .arg(
            Arg::with_name("silent")
                .short("s")
                .long("silent")
                .help("do not echo recipes"),
        )
        .arg(
            Arg::with_name("pretend")
                .short("u")
                .long("pretend-up-to-date")
                .takes_value(true)
                .value_name("PATH")
                .multiple(true)
                .number_of_values(1)
                .help("treat PATH as up to date for this invocation"),
        )
        .arg(
            Arg::with_name("targets")
                .multiple(true)
                .value_name("TARGETS")
                .help("targets to produce; defaults to the 'default' global"),
        )
}

fn default_targets(ruleset: &RuleSet) -> Result<Vec<String>, String> {
    match ruleset.globals.lookup_variable("default") {
        Some(&Value::Str(ref list)) => {
            let targets =
                shell_split(list).map_err(|e| format!("in global 'default': {}", e))?;
            if targets.is_empty() {
                Err("no targets given and the 'default' global is empty".to_owned())
            } else {
                Ok(targets)
            }
        }
        Some(_) => Err("the 'default' global is not a string".to_owned()),
        None => Err("no targets given and no 'default' global is set".to_owned()),
    }
}

/// Phase 1 (realize the graph and decide staleness) and phase 2 (one
/// Producer per requested target).  Returns whether any recipe ran.
fn run_build_phases(build: &Arc<Build>, targets: &[String]) -> Result<bool, String> {
    let scan = DependencyScan::new(build);
    for target in targets {
        scan.add_target(target, &mut Vec::new())?;
    }

    ignore_sigint();
    let workers: Vec<_> = targets
        .iter()
        .map(|target| {
            let build = build.clone();
            let target = target.clone();
            thread::spawn(move || Producer::new(build, target, 0).produce())
        })
        .collect();
    let mut rebuilt_any = false;
    let mut first_error: Option<String> = None;
    for worker in workers {
        match worker.join() {
            Ok(Ok(ProduceResult::Rebuilt)) => rebuilt_any = true,
            Ok(Ok(ProduceResult::UpToDate)) => {}
            Ok(Err(e)) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            Err(_) => {
                if first_error.is_none() {
                    first_error = Some("producer thread panicked".to_owned());
                }
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(rebuilt_any),
    }
}

#[cfg(unix)]
fn ignore_sigint() {
    // Recipes inherit the terminal and receive the signal naturally; this
    // process stays alive to run the quarantine pass.
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_IGN);
    }
}

#[cfg(not(unix))]
fn ignore_sigint() {}

pub fn produce_entry() -> Result<(), isize> {
    let matches = build_app().get_matches();
    run_from_matches(&matches)
}

fn run_from_matches(matches: &ArgMatches) -> Result<(), isize> {
    if matches.is_present("debug") {
        set_explaining(true);
    }

    let mut config = BuildConfig::new();
    config.always_build = matches.is_present("always_build");
    config.dry_run = matches.is_present("dry_run");
    config.silent = matches.is_present("silent");
    if let Some(jobs) = matches.value_of("jobs") {
        let jobs = jobs.parse::<usize>().unwrap_or_else(|_| {
            fatal!("invalid -j parameter");
        });
        config.parallelism = if jobs == 0 { get_processor_count() } else { jobs };
    }
    if let Some(paths) = matches.values_of("pretend") {
        for path in paths {
            config.pretend_up_to_date.insert(path.to_owned());
        }
    }

    if let Some(dir) = matches.value_of_os("directory") {
        // The formatting of this string, complete with funny quotes, is so
        // Emacs can properly identify that the cwd has changed for
        // subsequent commands.
        print!("produce: Entering directory `{}'\n", Path::new(dir).display());
        std::env::set_current_dir(dir).unwrap_or_else(|e| {
            fatal!("chdir to '{}' - {}", Path::new(dir).display(), e);
        });
    }

    let rule_path = matches.value_of("file").unwrap_or("produce.ini").to_owned();
    let disk: Arc<dyn DiskInterface + Send + Sync> = Arc::new(RealDiskInterface {});

    let mut text = String::new();
    disk.read_file(Path::new(&rule_path), &mut text)
        .map_err(|e| {
            error!("loading '{}': {}", rule_path, e.message());
            1isize
        })?;
    let file = parse_rule_file(&rule_path, &text).map_err(|e| {
        error!("{}", e);
        1isize
    })?;
    let ruleset = RuleSet::from_rule_file(&rule_path, file, Box::new(ScriptEvaluator::new()))
        .map_err(|e| {
            error!("{}", e);
            1isize
        })?;

    let targets: Vec<String> = match matches.values_of("targets") {
        Some(values) => values.map(str::to_owned).collect(),
        None => default_targets(&ruleset).map_err(|e| {
            error!("{}", e);
            1isize
        })?,
    };

    let run_rewind = !config.pretend_up_to_date.is_empty() && !config.dry_run;
    let build = Build::new(config, ruleset, disk);

    // Phases 1 and 2, with the quarantine pass owed to the filesystem no
    // matter how they end: depfile synchronization can already run recipes
    // while the graph is still being realized.
    let built = run_build_phases(&build, &targets);

    // Phase 3: rename incomplete outputs out of the way, success or not.
    build.quarantine_incomplete();

    match built {
        Err(e) => {
            error!("{}", e);
            return Err(1);
        }
        Ok(false) => {
            print!("produce: all targets are up to date.\n");
        }
        Ok(true) => {}
    }

    // Phase 4: re-realize against the post-build filesystem so that
    // staleness suppressed by --pretend-up-to-date survives on disk.
    if run_rewind {
        build.plan.lock().unwrap().reset();
        let rewind = DependencyScan::rewind(&build);
        for target in &targets {
            rewind.add_target(target, &mut Vec::new()).map_err(|e| {
                error!("{}", e);
                1isize
            })?;
        }
        let pretended: Vec<String> =
            build.config.pretend_up_to_date.iter().cloned().collect();
        for target in pretended {
            // Pretend targets the requested roots do not reach still get
            // their pass.
            rewind.add_target(&target, &mut Vec::new()).map_err(|e| {
                error!("{}", e);
                1isize
            })?;
        }
    }

    Ok(())
}
