//! latticekv CLI Client
//!
//! Interactive REPL over the line-oriented TCP protocol. `exit` or `quit`
//! terminates the session.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use clap::Parser;

use latticekv::network::Client;

/// latticekv CLI
#[derive(Parser, Debug)]
#[command(name = "latticekv-cli")]
#[command(about = "REPL client for the latticekv key-value store")]
#[command(version)]
struct Args {
    /// Server address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:3223")]
    address: String,

    /// Idle timeout for the connection, e.g. "30s" or "5m"
    #[arg(short, long, default_value = "5m", value_parser = parse_duration)]
    timeout: Duration,
}

fn parse_duration(input: &str) -> Result<Duration, String> {
    humantime::parse_duration(input).map_err(|e| e.to_string())
}

fn main() {
    let args = Args::parse();

    let mut client = match Client::connect(&args.address, args.timeout) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error connecting to server: {}", e);
            std::process::exit(1);
        }
    };

    println!(
        "Connected to database server at {}. Enter commands (SET, GET, DEL) or 'exit' to quit.",
        args.address
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        let _ = stdout.flush();

        let mut input = String::new();
        match stdin.lock().read_line(&mut input) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            println!("Disconnecting from server");
            break;
        }

        match client.send(input) {
            Ok(response) => println!("{}", response),
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }
}
