//! Command-line front-end for frozendb.
//!
//! Unlike a typical one-shot-per-invocation CLI, this one is a small REPL:
//! `begin`, `add`, `savepoint`, `rollback`, and `commit` are separate
//! commands that share state (the open [`Database`] and, if any, the open
//! [`Transaction`]) across lines read from stdin, because a transaction has
//! to stay open across several commands before it commits. Every command
//! maps directly onto one `frozendb_core` call, with no logic of its own
//! beyond parsing and rendering.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use frozendb_core::{Database, DatabaseConfig, Error, FinderStrategy, Transaction};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "frozendb", version, about = "Embeddable append-only key-value store")]
struct Args {
    /// Path to the database file.
    path: PathBuf,

    /// Key-lookup strategy to use for this session.
    #[arg(long, value_enum, default_value_t = Strategy::InMemory)]
    finder: Strategy,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Strategy {
    Simple,
    InMemory,
    BinarySearch,
}

impl From<Strategy> for FinderStrategy {
    fn from(s: Strategy) -> Self {
        match s {
            Strategy::Simple => FinderStrategy::Simple,
            Strategy::InMemory => FinderStrategy::InMemory,
            Strategy::BinarySearch => FinderStrategy::BinarySearch,
        }
    }
}

/// Everything a running session needs between commands. `db` and `tx` are
/// independent locals rather than fields nested inside one another, since a
/// `create`/`begin` line needs to replace `db`/`tx` in place while a
/// previous one may still be live.
#[derive(Default)]
struct Session {
    db: Option<Database>,
    tx: Option<Transaction>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let strategy: FinderStrategy = args.finder.into();
    let mut session = Session::default();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                eprintln!("Error: io: {e}");
                return ExitCode::FAILURE;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Err(e) = dispatch(&mut session, &args.path, strategy, line) {
            eprintln!("Error: {}: {}", e.code(), e);
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}

fn dispatch(session: &mut Session, path: &PathBuf, strategy: FinderStrategy, line: &str) -> Result<(), Error> {
    let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "create" => {
            let (row_size, skew_ms) = parse_create_args(rest)?;
            session.db = Some(
                DatabaseConfig::new(path)
                    .row_size(row_size)
                    .skew_ms(skew_ms)
                    .finder(strategy)
                    .create()?,
            );
            Ok(())
        }
        "open" => {
            session.db = Some(DatabaseConfig::new(path).finder(strategy).open_writer()?);
            Ok(())
        }
        "begin" => {
            let db = current_db(session)?;
            session.tx = Some(db.begin_tx()?);
            Ok(())
        }
        "add" => {
            let (key, value) = parse_add_args(rest)?;
            let tx = current_tx(session)?;
            tx.add_row(key, &value)
        }
        "savepoint" => {
            let tx = current_tx(session)?;
            let n = tx.savepoint()?;
            println!("{n}");
            Ok(())
        }
        "rollback" => {
            let target: u8 = rest
                .parse()
                .map_err(|_| Error::InvalidInput { message: format!("{rest:?} is not a savepoint number 0-9") })?;
            let tx = session
                .tx
                .take()
                .ok_or_else(|| Error::InvalidAction { message: "no transaction is open".to_string() })?;
            tx.rollback(target)
        }
        "commit" => {
            let tx = session
                .tx
                .take()
                .ok_or_else(|| Error::InvalidAction { message: "no transaction is open".to_string() })?;
            tx.commit()
        }
        "get" => {
            let key: Uuid = rest
                .parse()
                .map_err(|e| Error::InvalidInput { message: format!("invalid key {rest:?}: {e}") })?;
            let db = current_db(session)?;
            match db.get(&key)? {
                Some(value) => {
                    let rendered = serde_json::to_string_pretty(&value).expect("Value always serializes");
                    println!("{rendered}");
                }
                None => println!("null"),
            }
            io::stdout().flush().ok();
            Ok(())
        }
        other => Err(Error::InvalidInput { message: format!("unrecognized command {other:?}") }),
    }
}

fn current_db(session: &mut Session) -> Result<&mut Database, Error> {
    session
        .db
        .as_mut()
        .ok_or_else(|| Error::InvalidAction { message: "no database is open; run create or open first".to_string() })
}

fn current_tx(session: &mut Session) -> Result<&mut Transaction, Error> {
    session
        .tx
        .as_mut()
        .ok_or_else(|| Error::InvalidAction { message: "no transaction is open; run begin first".to_string() })
}

fn parse_create_args(rest: &str) -> Result<(u32, i64), Error> {
    let mut parts = rest.split_whitespace();
    let row_size = parts
        .next()
        .ok_or_else(|| Error::InvalidInput { message: "create requires <row_size> <skew_ms>".to_string() })?
        .parse::<u32>()
        .map_err(|e| Error::InvalidInput { message: format!("invalid row_size: {e}") })?;
    let skew_ms = parts
        .next()
        .ok_or_else(|| Error::InvalidInput { message: "create requires <row_size> <skew_ms>".to_string() })?
        .parse::<i64>()
        .map_err(|e| Error::InvalidInput { message: format!("invalid skew_ms: {e}") })?;
    Ok((row_size, skew_ms))
}

/// Parses `add`'s `<key> <json>` arguments. `<key>` is either a UUIDv7
/// string or the literal `NOW`, which generates a fresh one; `<json>` is
/// everything after the key, since the value itself may contain spaces.
fn parse_add_args(rest: &str) -> Result<(Uuid, serde_json::Value), Error> {
    let (key_part, value_part) = rest
        .split_once(char::is_whitespace)
        .ok_or_else(|| Error::InvalidInput { message: "add requires <key> <json>".to_string() })?;

    let key = if key_part == "NOW" {
        Uuid::now_v7()
    } else {
        key_part
            .parse::<Uuid>()
            .map_err(|e| Error::InvalidInput { message: format!("invalid key {key_part:?}: {e}") })?
    };
    let value: serde_json::Value = serde_json::from_str(value_part.trim())
        .map_err(|e| Error::InvalidInput { message: format!("invalid JSON {value_part:?}: {e}") })?;
    Ok((key, value))
}
