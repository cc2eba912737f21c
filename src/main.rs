// FACT — query-serving runtime: cache + circuit breaker + tool-calling
// pipeline in front of a read-only SQL executor.
//
// This binary only wires `fact::Core` together and exposes it as a
// single-shot query runner. The interactive CLI/HTTP surface a production
// deployment would put in front of this is out of scope for the core.

use std::process::ExitCode;

use fact::config::Config;
use fact::Core;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_filter = format!("fact={}", config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    if config.logging.audit_log_enabled {
        let file_appender = tracing_appender::rolling::daily(&config.logging.audit_log_dir, "fact-audit.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
            .init();
        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        None
    }
}

/// Parse `fact [--user-id ID] <query words...>`; falls back to reading the
/// query from stdin when no positional argument is given.
fn parse_args() -> (String, String) {
    let mut user_id = "cli".to_string();
    let mut query_parts = Vec::new();

    let mut args = std::env::args().skip(1).peekable();
    while let Some(arg) = args.next() {
        if arg == "--user-id" {
            if let Some(value) = args.next() {
                user_id = value;
            }
        } else {
            query_parts.push(arg);
        }
    }

    let query = if query_parts.is_empty() {
        let mut buf = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf).ok();
        buf
    } else {
        query_parts.join(" ")
    };

    (user_id, query)
}

#[tokio::main]
async fn main() -> ExitCode {
    Config::ensure_config_exists();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _logging_guard = init_logging(&config);

    let core = match Core::bootstrap(config).await {
        Ok(core) => core,
        Err(e) => {
            tracing::error!(%e, "failed to bootstrap core");
            eprintln!("startup error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let (user_id, query) = parse_args();

    let exit = match core.answer(&user_id, &query).await {
        Ok(outcome) => {
            println!("{}", outcome.response);
            tracing::info!(
                query_id = %outcome.query_id,
                cache_status = ?outcome.cache_status,
                latency_ms = outcome.latency_ms,
                llm_calls = outcome.llm_calls,
                "query completed"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error [{}]: {}", e.code(), e.message);
            ExitCode::FAILURE
        }
    };

    core.shutdown().await;
    exit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_logging_level_feeds_default_filter() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
    }
}
