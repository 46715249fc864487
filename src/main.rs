use clap::Parser;
use envgate::app::Console;
use envgate::errors::GateError;
use envgate::services::operator::SessionToken;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// Operator shell: select an environment, then run commands and health checks.
#[derive(Debug, Parser)]
#[command(name = "envgate", version)]
struct Cli {
    /// Directory holding crypto.key (overrides ENVGATE_INSTANCE_DIR).
    #[arg(long)]
    instance_dir: Option<std::path::PathBuf>,
    /// error | warn | info | debug (overrides LOG_LEVEL).
    #[arg(long)]
    log_level: Option<String>,
}

fn emit<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(err) => eprintln!("envgate: failed to render output: {}", err),
    }
}

fn emit_error(err: &GateError) {
    emit(&serde_json::json!({ "success": false, "error": err }));
}

async fn read_secret(lines: &mut Lines<BufReader<Stdin>>) -> Option<String> {
    lines.next_line().await.ok().flatten()
}

async fn run(console: Console) -> Result<(), GateError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut token: Option<SessionToken> = None;

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let (verb, rest) = trimmed
            .split_once(char::is_whitespace)
            .map(|(v, r)| (v, r.trim()))
            .unwrap_or((trimmed, ""));

        if verb == "login" {
            let password = read_secret(&mut lines).await.unwrap_or_default();
            match console.authenticate(rest, &password) {
                Ok(issued) => {
                    token = Some(issued);
                    emit(&serde_json::json!({ "success": true, "username": rest }));
                }
                Err(err) => emit_error(&err),
            }
            continue;
        }
        if verb == "quit" || verb == "exit" {
            break;
        }
        let authorized = token
            .as_ref()
            .ok_or_else(GateError::not_authenticated)
            .and_then(|t| console.authorize(t));
        if let Err(err) = authorized {
            emit_error(&err);
            continue;
        }

        match verb {
            "envs" => emit(&console.environments()),
            "select" => {
                let (name, user) = match rest.rsplit_once(" as ") {
                    Some((name, user)) => (name.trim(), Some(user.trim())),
                    None => (rest, None),
                };
                let password = match user {
                    Some(_) => read_secret(&mut lines).await,
                    None => None,
                };
                emit(
                    &console
                        .select_environment(name, user, password.as_deref())
                        .await,
                );
            }
            "run" => match console.run_command(rest).await {
                Ok(result) => emit(&result),
                Err(err) => emit_error(&err),
            },
            "status" => emit(&console.get_status().await),
            "procs" => match console.check_processes().await {
                Ok(report) => emit(&report),
                Err(err) => emit_error(&err),
            },
            "services" => match console.check_services().await {
                Ok(report) => emit(&report),
                Err(err) => emit_error(&err),
            },
            "close" => emit(&serde_json::json!({ "closed": console.close().await })),
            "diag" => emit(&console.diagnostics()),
            "logout" => {
                if let Some(t) = token.take() {
                    console.logout(&t);
                }
                console.close().await;
                emit(&serde_json::json!({ "success": true }));
            }
            other => emit_error(&GateError::invalid_params(format!(
                "Unknown command '{}'. Expected: login, envs, select, run, status, procs, services, close, diag, logout, quit",
                other
            ))),
        }
    }

    console.close().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Some(dir) = cli.instance_dir.as_ref() {
        std::env::set_var("ENVGATE_INSTANCE_DIR", dir);
    }
    if let Some(level) = cli.log_level.as_ref() {
        std::env::set_var("LOG_LEVEL", level);
    }

    let console = match Console::initialize() {
        Ok(console) => console,
        Err(err) => {
            eprintln!("envgate: {}", err);
            std::process::exit(1);
        }
    };
    if let Err(err) = run(console).await {
        eprintln!("envgate: {}", err);
        std::process::exit(1);
    }
}
