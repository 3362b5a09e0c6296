//! sheetdb - A Git-backed store for tabular statistical datasets
//!
//! This is the main entry point for the sheetdb command-line interface.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use sheetdb::db::{Database, DatabaseConfig};
use sheetdb::model::CellValue;
use sheetdb::repository::{CellUpdate, FindOptions, SortDirection};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    // Parse simple command line args.
    let mut path = PathBuf::from(".sheetdb");
    let mut verbose = false;
    let mut command: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-d" | "--dataset" => {
                i += 1;
                if i < args.len() {
                    path = PathBuf::from(&args[i]);
                }
            }
            "-v" | "--verbose" => {
                verbose = true;
            }
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("sheetdb v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            arg if command.is_empty() && arg.starts_with('-') => {
                eprintln!("Unknown option: {}", arg);
                return ExitCode::FAILURE;
            }
            arg => command.push(arg.to_string()),
        }
        i += 1;
    }

    init_logging(verbose);

    if command.is_empty() {
        print_help();
        return ExitCode::FAILURE;
    }

    // Open dataset.
    let config = DatabaseConfig::new(&path)
        .create_if_missing(true)
        .verbose(verbose);

    let db = match Database::open_with_config(config) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error opening dataset: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run_command(&db, &command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr, filtered by `SHEETDB_LOG` (default `warn`, or `debug` with -v).
fn init_logging(verbose: bool) {
    let default = if verbose { "sheetdb=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("SHEETDB_LOG").unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_help() {
    println!("sheetdb - A Git-backed store for tabular statistical datasets");
    println!();
    println!("Usage: sheetdb [OPTIONS] COMMAND [ARGS...]");
    println!();
    println!("Options:");
    println!("  -d, --dataset PATH     Path to dataset directory (default: .sheetdb)");
    println!("  -v, --verbose          Enable debug logging");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
    println!();
    println!("Commands:");
    println!("  rows                           Print every row");
    println!("  column COL                     Print one column");
    println!("  variables                      Print every variable");
    println!("  history [N]                    Show the last N commits");
    println!("  stats                          Show dataset statistics");
    println!("  delete-row ROW                 Delete a row, shifting later rows up");
    println!("  insert-row ROW [CELLS...]      Insert a row, shifting later rows down");
    println!("  set ROW COL VALUE              Set one cell");
    println!("  sort COL [asc|desc]            Sort rows by a column");
    println!("  replace FIND REPLACE [--case] [--whole]");
    println!("                                 Find and replace in every cell");
    println!();
    println!("Set SHEETDB_LOG (e.g. SHEETDB_LOG=debug) to control log output.");
}

fn run_command(db: &Database, command: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let name = command[0].as_str();
    let args = &command[1..];

    match name {
        "rows" => {
            for (index, row) in db.rows().get_all_rows()?.iter().enumerate() {
                println!("{}\t{}", index, format_row(row));
            }
        }
        "column" => {
            let col: usize = parse_arg(args, 0, "COL")?;
            for (index, cell) in db.rows().get_column_data(col)?.iter().enumerate() {
                println!("{}\t{}", index, format_cell(cell));
            }
        }
        "variables" => {
            let variables = db.variables().get_all_variables()?;
            if variables.is_empty() {
                println!("(0 variables)");
            }
            for v in variables {
                println!("{}\t{}\t{}\t{}\t{}", v.column_index, v.id, v.name, v.var_type, v.label);
            }
        }
        "history" => {
            let limit = match args.first() {
                Some(n) => Some(n.parse::<usize>()?),
                None => Some(10),
            };
            for commit in db.history(limit)? {
                println!("{}  {}", &commit.id[..7.min(commit.id.len())], commit.message);
            }
        }
        "stats" => {
            let stats = db.stats()?;
            println!("Head:                {}", stats.head);
            println!("Tables:              {}", stats.tables);
            println!("Records:             {}", stats.total_records);
            println!("Rows:                {}", db.rows().row_count()?);
            println!("Variables:           {}", db.variables().variable_count()?);
        }
        "delete-row" => {
            let row: u64 = parse_arg(args, 0, "ROW")?;
            db.rows().delete_row(row)?;
            println!("Deleted row {}", row);
        }
        "insert-row" => {
            let row: u64 = parse_arg(args, 0, "ROW")?;
            let cells = args[1..].iter().map(|c| CellValue::from_input(c)).collect();
            db.rows().insert_row(row, cells)?;
            println!("Inserted row {}", row);
        }
        "set" => {
            let row: u64 = parse_arg(args, 0, "ROW")?;
            let col: usize = parse_arg(args, 1, "COL")?;
            let value = args.get(2).ok_or("missing VALUE")?;
            db.rows()
                .update_bulk_cells(&[CellUpdate::new(row, col, CellValue::from_input(value))], &[])?;
            println!("Set ({}, {})", row, col);
        }
        "sort" => {
            let col: usize = parse_arg(args, 0, "COL")?;
            let direction: SortDirection = match args.get(1) {
                Some(d) => d.parse()?,
                None => SortDirection::Ascending,
            };
            db.rows().sort_data(col, direction)?;
            println!("Sorted by column {}", col);
        }
        "replace" => {
            let find = args.first().ok_or("missing FIND")?;
            let replace = args.get(1).ok_or("missing REPLACE")?;
            let options = FindOptions {
                match_case: args[2..].iter().any(|a| a == "--case"),
                match_entire_cell: args[2..].iter().any(|a| a == "--whole"),
            };
            let replaced = db.rows().find_and_replace(find, replace, options)?;
            println!("{} cell(s) replaced", replaced);
        }
        other => return Err(format!("unknown command: {}", other).into()),
    }

    Ok(())
}

fn parse_arg<T>(args: &[String], index: usize, name: &str) -> Result<T, Box<dyn std::error::Error>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + 'static,
{
    let raw = args.get(index).ok_or_else(|| format!("missing {}", name))?;
    Ok(raw.parse::<T>()?)
}

fn format_row(row: &[CellValue]) -> String {
    row.iter().map(format_cell).collect::<Vec<_>>().join("\t")
}

fn format_cell(cell: &CellValue) -> String {
    match cell {
        CellValue::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}
