//! Decode a hex payload with a table from a `.csn` file and print the field dump.
//!
//! Usage:
//!   csn1_decode FILE.csn --table NAME [OPTIONS] HEX
//!   echo HEX | csn1_decode FILE.csn --table NAME
//!
//! Options:
//!   --table NAME         Table to decode (required unless --segments is given)
//!   --segments A,B,...   Decode a sequence of fixed-tag segments using these tables
//!   --start N            Start bit (default 0)
//!   --bits N             Bit budget (default: rest of the payload)
//!   --no-events          Only report how many bits the table covers
//!   --max-depth N        Nested table limit (default 64)
//!
//! Logging goes to stderr and follows RUST_LOG (default `warn`).

use anyhow::{anyhow, bail, Context};
use csn1dsl::frame::decode_segments;
use csn1dsl::{dump_events, parse, Codec, DecodeOptions, Record, Registry, ResolvedGrammar};
use std::io::{self, Read};
use tracing_subscriber::EnvFilter;

struct Args {
    grammar_path: String,
    table: Option<String>,
    segments: Vec<String>,
    start: usize,
    bits: Option<i64>,
    options: DecodeOptions,
    hex: Option<String>,
}

fn take_value(args: &mut Vec<String>, flag: &str) -> anyhow::Result<Option<String>> {
    match args.iter().position(|a| a == flag) {
        Some(pos) => {
            if pos + 1 >= args.len() {
                bail!("{} needs a value", flag);
            }
            let v = args.remove(pos + 1);
            args.remove(pos);
            Ok(Some(v))
        }
        None => Ok(None),
    }
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let table = take_value(&mut args, "--table")?;
    let segments: Vec<String> = take_value(&mut args, "--segments")?
        .map(|s| s.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect())
        .unwrap_or_default();
    let start = match take_value(&mut args, "--start")? {
        Some(s) => s.parse().with_context(|| format!("--start {}", s))?,
        None => 0,
    };
    let bits = match take_value(&mut args, "--bits")? {
        Some(s) => Some(s.parse().with_context(|| format!("--bits {}", s))?),
        None => None,
    };
    let mut options = DecodeOptions::default();
    if let Some(s) = take_value(&mut args, "--max-depth")? {
        options.max_depth = s.parse().with_context(|| format!("--max-depth {}", s))?;
    }
    if let Some(pos) = args.iter().position(|a| a == "--no-events") {
        args.remove(pos);
        options.collect_events = false;
    }
    if table.is_none() && segments.is_empty() {
        bail!("usage: csn1_decode FILE.csn --table NAME [--start N] [--bits N] [--no-events] HEX");
    }
    let mut positional = args.into_iter();
    let grammar_path = positional.next().ok_or_else(|| anyhow!("missing grammar file"))?;
    let hex = positional.next();
    Ok(Args { grammar_path, table, segments, start, bits, options, hex })
}

fn parse_hex(s: &str) -> anyhow::Result<Vec<u8>> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace() && *c != ':').collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).with_context(|| format!("bad hex at {}", i)))
        .collect()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let args = parse_args()?;
    let src = std::fs::read_to_string(&args.grammar_path).with_context(|| format!("reading {}", args.grammar_path))?;
    let grammar = parse(&src).map_err(|e| anyhow!("{}: {}", args.grammar_path, e))?;
    let resolved = ResolvedGrammar::resolve(grammar, &Registry::new()).map_err(|e| anyhow!("{}: {}", args.grammar_path, e))?;
    let codec = Codec::new(resolved).with_options(args.options);

    let hex = match args.hex {
        Some(h) => h,
        None => {
            let mut s = String::new();
            io::stdin().read_to_string(&mut s).context("reading payload from stdin")?;
            s
        }
    };
    let data = parse_hex(&hex)?;
    let budget = args.bits.unwrap_or((data.len() * 8) as i64 - args.start as i64);

    if !args.segments.is_empty() {
        let tables: Vec<&str> = args.segments.iter().map(String::as_str).collect();
        let result = decode_segments(&codec, &tables, &data, args.start, budget, 1)?;
        for seg in &result.segments {
            println!("== {} [bits {}..{}]", seg.table, seg.bit_range.0, seg.bit_range.1);
            print!("{}", dump_events(&seg.events, &data));
        }
        if let Some(e) = &result.error {
            eprintln!("{}", e);
            print!("{}", dump_events(&e.partial, &data));
            std::process::exit(1);
        }
        println!("remaining bits: {}", result.remaining_bits);
        return Ok(());
    }

    let table = args.table.as_deref().unwrap_or_default();
    let mut record = Record::new();
    match codec.decode(table, &data, args.start, budget, &mut record) {
        Ok(result) => {
            print!("{}", dump_events(&result.events, &data));
            println!("remaining bits: {}", result.remaining_bits);
            Ok(())
        }
        Err(e) => {
            print!("{}", dump_events(&e.partial, &data));
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
