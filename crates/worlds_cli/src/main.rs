use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use saves::WorldCatalog;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    init_tracing();
    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    List,
    Duplicate { source_id: String, target_id: String },
    Copy { source_id: String },
}

#[derive(Debug, PartialEq, Eq)]
struct CliRequest {
    save_dir: PathBuf,
    command: Command,
}

fn run_cli() -> Result<(), String> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        return Err(usage_text());
    }
    if args[0] == "-h" || args[0] == "--help" {
        print!("{}", usage_text());
        return Ok(());
    }

    let request = parse_args(&args)?;
    let mut catalog = WorldCatalog::open(&request.save_dir).map_err(|error| error.to_string())?;

    match request.command {
        Command::List => {
            for listing in catalog.scan_worlds().map_err(|error| error.to_string())? {
                println!("{}  ({})", listing.display_name, listing.id);
            }
            Ok(())
        }
        Command::Duplicate {
            source_id,
            target_id,
        } => {
            let backup_dir = catalog
                .duplicate_world(&source_id, &target_id)
                .map_err(|error| error.to_string())?;
            println!("previous target files saved to {}", backup_dir.display());
            Ok(())
        }
        Command::Copy { source_id } => {
            let new_id = catalog
                .create_world_copy(&source_id)
                .map_err(|error| error.to_string())?;
            println!("created world {new_id}");
            Ok(())
        }
    }
}

fn parse_args(args: &[String]) -> Result<CliRequest, String> {
    let mut save_dir: Option<PathBuf> = None;
    let mut index = 0usize;
    while index < args.len() {
        match args[index].as_str() {
            "--save-dir" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --save-dir".to_string())?;
                save_dir = Some(PathBuf::from(value));
                index += 2;
            }
            _ => break,
        }
    }
    let save_dir = save_dir.ok_or_else(|| "missing required --save-dir option".to_string())?;

    let command = args
        .get(index)
        .ok_or_else(|| "missing subcommand".to_string())?
        .as_str();
    let command_args = &args[(index + 1)..];

    let command = match command {
        "list" => {
            if !command_args.is_empty() {
                return Err("list takes no arguments".to_string());
            }
            Command::List
        }
        "duplicate" => {
            let [source_id, target_id] = command_args else {
                return Err("duplicate requires <source-id> <target-id>".to_string());
            };
            Command::Duplicate {
                source_id: source_id.clone(),
                target_id: target_id.clone(),
            }
        }
        "copy" => {
            let [source_id] = command_args else {
                return Err("copy requires <source-id>".to_string());
            };
            Command::Copy {
                source_id: source_id.clone(),
            }
        }
        other => return Err(format!("unknown subcommand '{other}'")),
    };

    Ok(CliRequest { save_dir, command })
}

fn usage_text() -> String {
    [
        "usage: worlds_cli --save-dir <path> <command>",
        "",
        "commands:",
        "  list                               list valid worlds",
        "  duplicate <source-id> <target-id>  replace target with a copy of source",
        "  copy <source-id>                   clone source under a new id",
        "",
        "the duplicate command prints the backup directory holding the",
        "target's previous files; delete it once the result looks right.",
        "",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn save_dir_is_required() {
        let error = parse_args(&args(&["list"])).expect_err("error");
        assert!(error.contains("--save-dir"));
    }

    #[test]
    fn list_parses() {
        let request = parse_args(&args(&["--save-dir", "/saves", "list"])).expect("parse");
        assert_eq!(request.save_dir, PathBuf::from("/saves"));
        assert_eq!(request.command, Command::List);
    }

    #[test]
    fn duplicate_requires_two_ids() {
        let error =
            parse_args(&args(&["--save-dir", "/saves", "duplicate", "a"])).expect_err("error");
        assert!(error.contains("duplicate requires"));

        let request = parse_args(&args(&["--save-dir", "/saves", "duplicate", "a", "b"]))
            .expect("parse");
        assert_eq!(
            request.command,
            Command::Duplicate {
                source_id: "a".to_string(),
                target_id: "b".to_string(),
            }
        );
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        let error = parse_args(&args(&["--save-dir", "/saves", "frobnicate"])).expect_err("error");
        assert!(error.contains("unknown subcommand"));
    }
}
