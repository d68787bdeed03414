use clap::{Parser, Subcommand, ValueEnum};
use std::io::Read;
use std::path::Path;
use tracing::debug;
use yamlscan_lexer::{tokenize_bytes, ScanOptions, Token};

#[derive(Parser)]
#[command(name = "yamlscan")]
#[command(about = "yamlscan: lexical scanner for YAML streams")]
#[command(version)]
struct Cli {
    /// Log scanner activity to stderr (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the token stream of a YAML file
    Tokens {
        /// Input file, or `-` for stdin
        path: String,

        /// Keep comment tokens
        #[arg(long)]
        comments: bool,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Check YAML files for lexical errors
    Check {
        /// Input files
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// One token per line: `line:column kind value`
    Text,
    /// A JSON array of tokens
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Tokens {
            path,
            comments,
            format,
        } => cmd_tokens(&path, comments, format),
        Command::Check { paths } => cmd_check(&paths),
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter)
        .init();
}

fn read_source(path: &str) -> Result<Vec<u8>, String> {
    if path == "-" {
        let mut bytes = Vec::new();
        std::io::stdin()
            .read_to_end(&mut bytes)
            .map_err(|e| format!("Error reading stdin: {e}"))?;
        return Ok(bytes);
    }

    let p = Path::new(path);
    if !p.exists() {
        return Err(format!("Error: file not found: {path}"));
    }
    std::fs::read(p).map_err(|e| format!("Error reading {path}: {e}"))
}

fn render_text(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        let at = token.span.start.to_string();
        out.push_str(&format!("{at:<8} {:<22} {:?}\n", token.kind.name(), token.value));
    }
    out
}

fn cmd_tokens(path: &str, comments: bool, format: Format) {
    let bytes = read_source(path).unwrap_or_else(|message| {
        eprintln!("{message}");
        std::process::exit(1);
    });

    let options = ScanOptions { emit_comments: comments };
    let tokens = match tokenize_bytes(&bytes, options) {
        Ok(tokens) => tokens,
        Err(e) => {
            eprintln!("{path}: {e}");
            eprintln!("({} tokens scanned before the error)", e.tokens.len());
            std::process::exit(1);
        }
    };
    debug!(path, count = tokens.len(), "tokenized");

    match format {
        Format::Text => print!("{}", render_text(&tokens)),
        Format::Json => match serde_json::to_string_pretty(&tokens) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error encoding tokens: {e}");
                std::process::exit(1);
            }
        },
    }
}

fn cmd_check(paths: &[String]) {
    let mut failed = false;
    for path in paths {
        let result = read_source(path).and_then(|bytes| {
            tokenize_bytes(&bytes, ScanOptions::default())
                .map(|_| ())
                .map_err(|e| format!("{path}: {e}"))
        });
        match result {
            Ok(()) => eprintln!("OK: {path}"),
            Err(message) => {
                eprintln!("{message}");
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}
