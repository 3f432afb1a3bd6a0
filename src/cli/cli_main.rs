//! Command line front end.
//!
//! `pyroquant [config.json] [command] [arguments]`
//!
//! commands:
//! - `run`: quantify every experiment of the matrix (default)
//! - `calibrate <data.csv> [output.json]`: fit and save an external calibration
//! - `database [output.csv]`: show the reference database, optionally export it
//! - `init`: write the default configuration to `config.json`
//! - `menu`: interactive menu
//!
//! The configuration file defaults to `pyroquant.json`; when it does not exist
//! the built-in defaults are used.
use crate::Quantification::calibration::{CalibrationBuilder, CalibrationDataset};
use crate::Quantification::pipeline::QuantificationSession;
use crate::Utils::load_from_file::{load_database_csv, read_csv_table, save_database_csv};
use crate::errors::PyroResult;
use crate::settings::PipelineConfig;
use log::{error, info};
use simplelog::{ColorChoice, Config, SimpleLogger, TermLogger, TerminalMode};
use std::io::{self, Write};

pub const DEFAULT_CONFIG: &str = "pyroquant.json";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Run,
    Calibrate { data: String, output: Option<String> },
    Database { output: Option<String> },
    Init,
    Menu,
    Help,
}

/// Splits the arguments (program name excluded) into the configuration path
/// and the command.
pub fn parse_args(args: &[String]) -> (String, Command) {
    let mut rest: Vec<&str> = args.iter().map(|a| a.as_str()).collect();
    let config = if rest.first().is_some_and(|a| a.ends_with(".json")) {
        rest.remove(0).to_string()
    } else {
        DEFAULT_CONFIG.to_string()
    };
    let command = match rest.as_slice() {
        [] | ["run"] => Command::Run,
        ["calibrate", data] => Command::Calibrate {
            data: data.to_string(),
            output: None,
        },
        ["calibrate", data, output] => Command::Calibrate {
            data: data.to_string(),
            output: Some(output.to_string()),
        },
        ["database"] => Command::Database { output: None },
        ["database", output] => Command::Database {
            output: Some(output.to_string()),
        },
        ["init"] => Command::Init,
        ["menu"] => Command::Menu,
        _ => Command::Help,
    };
    (config, command)
}

fn init_logging(config: &PipelineConfig) {
    let level = config.log_level();
    if TermLogger::init(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto).is_err() {
        // no terminal (or a logger is already set)
        let _ = SimpleLogger::init(level, Config::default());
    }
}

pub fn run_batch(config: &PipelineConfig) -> PyroResult<()> {
    let session = QuantificationSession::from_config(config.clone())?;
    let report = session.run()?;
    report.pretty_print();
    for processed in report.processed() {
        processed.summary.pretty_print();
    }
    Ok(())
}

pub fn run_calibration(
    config: &PipelineConfig,
    data: &str,
    output: Option<&str>,
) -> PyroResult<()> {
    let dataset = CalibrationDataset::from_table(&read_csv_table(data)?)?;
    let output = output
        .map(|o| o.to_string())
        .or_else(|| config.calibration_file.clone())
        .unwrap_or_else(|| "calibration.json".to_string());
    let fit = CalibrationBuilder::new(config.calibration).fit_and_save(&dataset, &[], &output)?;
    println!(
        "slope {:.6}, 95% CI [{:.6}, {:.6}], R2 {:.6}, {} points, excluded x = {:?}",
        fit.model.slope,
        fit.model.conf_interval[0],
        fit.model.conf_interval[1],
        fit.r_squared,
        fit.n_points,
        fit.excluded
    );
    Ok(())
}

pub fn show_database(config: &PipelineConfig, output: Option<&str>) -> PyroResult<()> {
    let database = load_database_csv(&config.database_file, &config.response_factors)?;
    database.pretty_print();
    if let Some(output) = output {
        save_database_csv(&database, output, true)?;
        info!("database exported to {}", output);
    }
    Ok(())
}

fn execute(config_path: &str, config: &PipelineConfig, command: &Command) -> PyroResult<()> {
    match command {
        Command::Run => run_batch(config),
        Command::Calibrate { data, output } => run_calibration(config, data, output.as_deref()),
        Command::Database { output } => show_database(config, output.as_deref()),
        Command::Init => {
            config.save(config_path)?;
            println!("configuration written to {}", config_path);
            Ok(())
        }
        Command::Menu => {
            run_interactive_menu(config_path, config);
            Ok(())
        }
        Command::Help => {
            print_help();
            Ok(())
        }
    }
}

pub fn cli_main(args: &[String]) -> PyroResult<()> {
    let (config_path, command) = parse_args(args);
    let config = PipelineConfig::load(&config_path)?;
    init_logging(&config);
    execute(&config_path, &config, &command)
}

fn print_help() {
    println!(
        "usage: pyroquant [config.json] \
         [run | calibrate <data.csv> [output.json] | database [output.csv] | init | menu]"
    );
}

pub fn run_interactive_menu(config_path: &str, config: &PipelineConfig) {
    loop {
        show_main_menu(config_path);
        let choice = get_user_input();
        let result = match choice.trim() {
            "1" => run_batch(config),
            "2" => {
                print!("\x1b[36mCalibration data file: \x1b[0m");
                io::stdout().flush().ok();
                let data = get_user_input();
                run_calibration(config, data.trim(), None)
            }
            "3" => show_database(config, None),
            "4" => execute(config_path, config, &Command::Init),
            "0" => {
                println!("Goodbye!");
                break;
            }
            _ => {
                println!("Invalid choice. Please try again.");
                Ok(())
            }
        };
        if let Err(e) = result {
            error!("{}", e);
        }
    }
}

fn show_main_menu(config_path: &str) {
    println!(
        "\x1b[34m\n PyroQuant: quantification of pyrolysis products\n configuration: {}\n\x1b[0m",
        config_path
    );
    println!("\x1b[33m1. Quantify all experiments\x1b[0m");
    println!("\x1b[33m2. Fit external calibration\x1b[0m");
    println!("\x1b[33m3. Show reference database\x1b[0m");
    println!("\x1b[33m4. Write configuration\x1b[0m");
    println!("\x1b[33m0. Exit\x1b[0m");
    print!("\x1b[36mEnter your choice: \x1b[0m");
    io::stdout().flush().ok();
}

fn get_user_input() -> String {
    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        // closed stdin ends the menu
        return "0".to_string();
    }
    if input.is_empty() {
        return "0".to_string();
    }
    input
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(parse_args(&[]), (DEFAULT_CONFIG.to_string(), Command::Run));
        assert_eq!(
            parse_args(&args(&["session.json", "calibrate", "cal.csv"])),
            (
                "session.json".to_string(),
                Command::Calibrate {
                    data: "cal.csv".to_string(),
                    output: None
                }
            )
        );
        assert_eq!(
            parse_args(&args(&["database", "out.csv"])).1,
            Command::Database {
                output: Some("out.csv".to_string())
            }
        );
        assert_eq!(parse_args(&args(&["frobnicate"])).1, Command::Help);
    }

    #[test]
    fn test_calibrate_command() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("cal.csv");
        std::fs::write(
            &data,
            "filename,sample,volume\n\
             cal_1,1.0,3.01\ncal_2,2.0,5.98\ncal_3,3.0,9.02\ncal_4,4.0,11.99\n",
        )
        .unwrap();
        let output = dir.path().join("calibration.json");
        let config = PipelineConfig::default();
        run_calibration(
            &config,
            &data.to_string_lossy(),
            Some(&output.to_string_lossy()),
        )
        .unwrap();
        let model = crate::Quantification::calibration::CalibrationModel::load(&output).unwrap();
        assert!((model.slope - 3.0).abs() < 1e-2);
    }
}
