//! # zsearch
//!
//! Purpose: Small command-line client for smoke-testing a target: connect,
//! compile a query in any of the supported languages, search, and print a
//! window of records.
//!
//! Usage: `zsearch HOST:PORT [-l pqf|cql|ccl] [-d DATABASE] [-n COUNT] QUERY`

use std::env;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use tracing_subscriber::EnvFilter;

use zoomrs_engine::{drive, Connection, Query};
use zoomrs_query::CclProfile;

struct Args {
    target: String,
    language: String,
    database: Option<String>,
    count: u64,
    query: String,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut target = None;
        let mut language = "pqf".to_owned();
        let mut database = None;
        let mut count = 5;
        let mut query = None;

        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-l" => {
                    language = args.next().context("-l needs a language")?;
                }
                "-d" => {
                    database = Some(args.next().context("-d needs a database")?);
                }
                "-n" => {
                    count = args
                        .next()
                        .context("-n needs a count")?
                        .parse()
                        .context("-n must be numeric")?;
                }
                _ if target.is_none() => target = Some(arg),
                _ if query.is_none() => query = Some(arg),
                other => bail!("unexpected argument '{other}'"),
            }
        }

        Ok(Args {
            target: target.context("missing HOST:PORT")?,
            language,
            database,
            count,
            query: query.context("missing QUERY")?,
        })
    }
}

fn compile(args: &Args, conn: &Connection) -> Result<Query> {
    match args.language.as_str() {
        "pqf" => Ok(Query::from_prefix(&args.query)?),
        "cql" => Ok(conn.compile_cql(&args.query)?),
        "ccl" => {
            // A small general-purpose qualifier set for ad hoc use.
            let mut profile = CclProfile::new();
            profile.add("ti", "1=4 t=l,r,b")?;
            profile.add("au", "1=1003 t=l,r,b")?;
            profile.add("su", "1=21 t=l,r,b")?;
            profile.add("isbn", "1=7")?;
            profile.add("term", "1=1016 t=l,r,b")?;
            Ok(Query::from_ccl(&args.query, &profile)?)
        }
        other => bail!("unknown query language '{other}'"),
    }
}

fn run(args: Args) -> Result<()> {
    let (host, port) = args
        .target
        .rsplit_once(':')
        .context("target must be HOST:PORT")?;
    let port: u16 = port.parse().context("port must be numeric")?;

    let conn = Connection::new();
    if let Some(database) = &args.database {
        conn.option_set("databaseName", database);
    }
    let query = compile(&args, &conn)?;
    eprintln!("query: {}", query.to_pqf());

    conn.connect(host, port);
    let rs = conn.search(&query).map_err(|err| {
        let last = conn.last_error();
        if last.is_ok() {
            anyhow!(err)
        } else {
            anyhow!("{} ({}): {}", last.message, last.code, last.addinfo)
        }
    })?;

    // Drive until the search settles; the first record fetch finishes it.
    while drive(&[&conn]).is_some() {
        if rs.state() != zoomrs_engine::OpState::Pending {
            break;
        }
    }

    println!("{} hits", rs.size());
    let shown = args.count.min(rs.size());
    for pos in 1..=shown {
        match rs.get_record(pos)? {
            Some(record) => {
                let body = record.get("render").unwrap_or_default();
                println!("-- {pos} ({})", record.syntax());
                println!("{}", String::from_utf8_lossy(&body));
            }
            None => println!("-- {pos} (no record)"),
        }
    }

    conn.close();
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::parse() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("zsearch: {err}");
            eprintln!("usage: zsearch HOST:PORT [-l pqf|cql|ccl] [-d DATABASE] [-n COUNT] QUERY");
            return ExitCode::FAILURE;
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("zsearch: {err:#}");
            ExitCode::FAILURE
        }
    }
}
