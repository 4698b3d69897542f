extern crate log;
extern crate pretty_env_logger;

use std::path::Path;
use std::process::exit;
use std::sync::Arc;

use clap::{arg, command, ArgMatches, Command};
use rayon::prelude::*;
use serde_json::{json, Value};

use omr_grader::classifier::ClassifierStore;
use omr_grader::interpret::{debug_writer, detect_file, load_sheet_image};
use omr_grader::{grade_sheet, register_answer_key, score, Answer, InterpretOptions, ScannerConfig};

fn main() {
    pretty_env_logger::init_custom_env("LOG");

    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("detect", sub_matches)) => run_detect(&options(&matches), sub_matches),
        Some(("score", sub_matches)) => run_score(sub_matches),
        Some(("grade", sub_matches)) => run_grade(&options(&matches), sub_matches),
        _ => unreachable!("a subcommand is required"),
    }
}

fn options(matches: &ArgMatches) -> InterpretOptions {
    let config = match matches.get_one::<String>("config") {
        Some(path) => match ScannerConfig::load(Path::new(path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                exit(1);
            }
        },
        None => ScannerConfig::default(),
    };

    let model_dir = matches
        .get_one::<String>("model_dir")
        .map_or("models", String::as_str);

    InterpretOptions {
        debug: matches.get_flag("debug"),
        config,
        classifier: Arc::new(ClassifierStore::open(model_dir)),
    }
}

fn image_paths<'a>(matches: &'a ArgMatches, id: &str) -> Vec<&'a String> {
    matches
        .get_many::<String>(id)
        .map(|paths| paths.collect())
        .unwrap_or_default()
}

fn run_detect(options: &InterpretOptions, matches: &ArgMatches) {
    let reports = image_paths(matches, "images")
        .par_iter()
        .map(|path| match detect_file(Path::new(path), options) {
            Ok(answers) => json!({ "path": path, "answers": answers }),
            Err(e) => json!({ "path": path, "error": e.to_string() }),
        })
        .collect::<Vec<Value>>();

    print_json(&reports);
}

fn parse_answers(list: &str) -> Vec<Answer> {
    list.split(',')
        .map(str::trim)
        .filter(|answer| !answer.is_empty())
        .map(Answer::from)
        .collect()
}

fn run_score(matches: &ArgMatches) {
    let key = matches.get_one::<String>("key").map_or_else(Vec::new, |s| parse_answers(s));
    let submission = matches
        .get_one::<String>("submission")
        .map_or_else(Vec::new, |s| parse_answers(s));

    print_json(&score(&key, &submission));
}

fn run_grade(options: &InterpretOptions, matches: &ArgMatches) {
    let Some(key_path) = matches.get_one::<String>("key").map(Path::new) else {
        eprintln!("Error: answer key image path is required");
        exit(1);
    };

    let key_image = match load_sheet_image(key_path) {
        Ok(img) => img,
        Err(e) => {
            eprintln!("Error reading answer key: {}", e);
            exit(1);
        }
    };
    let key = match register_answer_key(
        &key_image,
        options,
        &debug_writer(key_path, &key_image, options),
    ) {
        Ok(key) => key,
        Err(e) => {
            eprintln!("Error registering answer key: {}", e);
            exit(1);
        }
    };

    let sheets = image_paths(matches, "sheets")
        .par_iter()
        .map(|path| {
            let path = Path::new(path);
            let graded = load_sheet_image(path)
                .map_err(Into::into)
                .and_then(|img| grade_sheet(&key, &img, options, &debug_writer(path, &img, options)));
            match graded {
                Ok(graded) => json!({
                    "path": path,
                    "answers": graded.answers,
                    "percentage": graded.result.percentage(),
                    "result": graded.result,
                    "training": graded.training,
                }),
                Err(e) => json!({ "path": path, "error": e.to_string() }),
            }
        })
        .collect::<Vec<Value>>();

    print_json(&json!({ "key": key, "sheets": sheets }));
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            exit(1);
        }
    }
}

#[allow(clippy::cognitive_complexity)]
fn cli() -> Command {
    command!()
        .subcommand_required(true)
        .arg(
            arg!(--"model-dir" <DIR> "Directory holding the trained bubble classifier")
                .id("model_dir")
                .global(true),
        )
        .arg(arg!(-c --config <PATH> "Path to a scanner config JSON file").global(true))
        .arg(arg!(-d --debug "Write debug images next to each input").global(true))
        .subcommand(
            Command::new("detect")
                .about("Read the marked answers on one or more sheets")
                .arg(arg!(images: <IMAGE> ... "Sheet images").required(true)),
        )
        .subcommand(
            Command::new("score")
                .about("Score a comma-separated submission against a comma-separated key")
                .arg(arg!(-k --key <ANSWERS> "Reference answers, e.g. A,B,C").required(true))
                .arg(arg!(-s --submission <ANSWERS> "Submitted answers, e.g. A,C,C").required(true)),
        )
        .subcommand(
            Command::new("grade")
                .about("Register an answer key sheet and grade student sheets against it")
                .arg(arg!(-k --key <KEY_IMAGE> "Answer key sheet image").required(true))
                .arg(arg!(sheets: <SHEET> ... "Student sheet images").required(true)),
        )
}
