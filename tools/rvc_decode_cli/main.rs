// rvc_decode_cli: decode candump output into JSON lines.
//
//   candump can0 | rvc_decode_cli
//   rvc_decode_cli --dgn 1FEDA capture.log
//
// Accepts the default candump layout (`can0  19FEDA80   [8]  20 FF ...`),
// the `-L` log layout (`(1700000000.000000) can0 19FEDA80#20FF...`) and bare
// `19FEDA80#20FF...` lines.

use clap::Parser;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use rvc2mqtt_lib::rvc::codec::decode_frame;
use rvc2mqtt_lib::rvc::{parse_dgn, RvcFrame, SchemaRegistry};

#[derive(Parser, Debug)]
#[command(name = "rvc_decode_cli")]
#[command(about = "Decode candump lines into RV-C JSON")]
struct Args {
    /// candump file to read (stdin when omitted)
    input: Option<PathBuf>,

    /// DGN catalog to use instead of the built-in one
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Only print frames for this DGN (hex)
    #[arg(long)]
    dgn: Option<String>,

    /// Report unparseable lines and unknown DGNs on stderr
    #[arg(short, long)]
    verbose: bool,
}

/// Extract `(id, is_extended, data)` from one candump line.
fn parse_line(line: &str) -> Result<(u32, bool, Vec<u8>), String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    if let Some(token) = tokens.iter().find(|t| t.contains('#')) {
        let (id, data) = token.split_once('#').ok_or("missing '#'")?;
        return Ok((parse_id(id)?, id.len() > 3, parse_hex(data)?));
    }

    let bracket = tokens
        .iter()
        .position(|t| t.starts_with('[') && t.ends_with(']'))
        .ok_or("no frame found")?;
    if bracket == 0 {
        return Err("missing identifier".to_string());
    }
    let id = tokens[bracket - 1];
    let len: usize = tokens[bracket]
        .trim_matches(|c| c == '[' || c == ']')
        .parse()
        .map_err(|_| format!("bad length {}", tokens[bracket]))?;
    let bytes = tokens[bracket + 1..]
        .iter()
        .take(len)
        .map(|b| u8::from_str_radix(b, 16).map_err(|_| format!("bad byte '{}'", b)))
        .collect::<Result<Vec<u8>, String>>()?;
    if bytes.len() != len {
        return Err(format!("expected {} bytes, got {}", len, bytes.len()));
    }
    Ok((parse_id(id)?, id.len() > 3, bytes))
}

fn parse_id(text: &str) -> Result<u32, String> {
    u32::from_str_radix(text, 16).map_err(|_| format!("bad identifier '{}'", text))
}

fn parse_hex(text: &str) -> Result<Vec<u8>, String> {
    // FD frames carry a flags nibble after a second '#'.
    let text = text.split('#').next().unwrap_or(text);
    hex::decode(text).map_err(|e| format!("bad data '{}': {}", text, e))
}

/// Decode one line to a JSON object, `Ok(None)` when filtered out.
fn decode_line(registry: &SchemaRegistry, line: &str, filter: Option<u32>) -> Result<Option<String>, String> {
    let (id, extended, data) = parse_line(line)?;
    let frame = RvcFrame::from_parts(id, extended, &data).map_err(|e| e.to_string())?;
    if let Some(dgn) = filter {
        let matches = frame.dgn() == dgn || registry.lookup(frame.dgn()).map(|(s, _)| s.dgn) == Some(dgn);
        if !matches {
            return Ok(None);
        }
    }
    let msg = decode_frame(registry, &frame).map_err(|e| e.to_string())?;
    serde_json::to_string(&msg).map(Some).map_err(|e| e.to_string())
}

fn main() {
    let args = Args::parse();

    let registry = match &args.catalog {
        Some(path) => match SchemaRegistry::from_path(path) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Failed to load catalog: {}", e);
                std::process::exit(1);
            }
        },
        None => SchemaRegistry::builtin().clone(),
    };

    let filter = match args.dgn.as_deref().map(parse_dgn) {
        Some(None) => {
            eprintln!("Invalid DGN '{}'", args.dgn.unwrap_or_default());
            std::process::exit(1);
        }
        Some(Some(dgn)) => Some(dgn),
        None => None,
    };

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => match std::fs::File::open(path) {
            Ok(f) => Box::new(BufReader::new(f)),
            Err(e) => {
                eprintln!("Failed to open {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    for (number, line) in reader.lines().enumerate() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match decode_line(&registry, &line, filter) {
            Ok(Some(json)) => println!("{}", json),
            Ok(None) => {}
            Err(e) if args.verbose => eprintln!("line {}: {}", number + 1, e),
            Err(_) => {}
        }
    }
}
