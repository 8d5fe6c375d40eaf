pub mod logging;
pub mod security;
pub mod store;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let command = Command::new("warden")
        .about("Session and security control plane")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("WARDEN_PORT")
                .value_parser(clap::value_parser!(u16)),
        );

    let command = store::with_args(command);
    let command = security::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "warden");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some("Session and security control plane".to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_check_port_and_redis_url() {
        let command = new();
        let matches = command.get_matches_from(vec![
            "warden",
            "--port",
            "8080",
            "--redis-url",
            "redis://cache.internal:6379",
            "--token-secret",
            "sixty-four-bytes-of-entropy-go-here",
        ]);

        assert_eq!(matches.get_one::<u16>("port").copied(), Some(8080));
        assert_eq!(
            matches.get_one::<String>(store::ARG_REDIS_URL).cloned(),
            Some("redis://cache.internal:6379".to_string())
        );
        assert_eq!(
            matches
                .get_one::<String>(security::ARG_TOKEN_SECRET)
                .cloned(),
            Some("sixty-four-bytes-of-entropy-go-here".to_string())
        );
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("WARDEN_PORT", Some("443")),
                ("WARDEN_REDIS_URL", Some("redis://cache.internal:6380/1")),
                ("WARDEN_TOKEN_SECRET", Some("env-secret")),
                ("WARDEN_BLOCK_THRESHOLD", Some("7")),
                ("WARDEN_LOG_LEVEL", Some("info")),
            ],
            || {
                let command = new();
                let matches = command.get_matches_from(vec!["warden"]);
                assert_eq!(matches.get_one::<u16>("port").copied(), Some(443));
                assert_eq!(
                    matches.get_one::<String>(store::ARG_REDIS_URL).cloned(),
                    Some("redis://cache.internal:6380/1".to_string())
                );
                assert_eq!(
                    matches
                        .get_one::<i64>(security::ARG_BLOCK_THRESHOLD)
                        .copied(),
                    Some(7)
                );
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    Some(2)
                );
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        // loop cover all possible value_parse
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars(
                [
                    ("WARDEN_LOG_LEVEL", Some(level)),
                    ("WARDEN_TOKEN_SECRET", Some("env-secret")),
                ],
                || {
                    let command = new();
                    let matches = command.get_matches_from(vec!["warden"]);
                    assert_eq!(
                        matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                        u8::try_from(index).ok()
                    );
                },
            );
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, _) in levels.iter().enumerate() {
            temp_env::with_vars([("WARDEN_LOG_LEVEL", None::<String>)], || {
                let mut args = vec![
                    "warden".to_string(),
                    "--token-secret".to_string(),
                    "cli-secret".to_string(),
                ];

                // Add the appropriate number of "-v" flags based on the index
                if index > 0 {
                    let v = format!("-{}", "v".repeat(index));
                    args.push(v);
                }

                let command = new();
                let matches = command.get_matches_from(args);

                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn test_token_secret_required() {
        temp_env::with_vars([("WARDEN_TOKEN_SECRET", None::<&str>)], || {
            let command = new();
            let result = command.try_get_matches_from(vec!["warden"]);
            assert_eq!(
                result.map_err(|e| e.kind()),
                Err(clap::error::ErrorKind::MissingRequiredArgument)
            );
        });
    }

    #[test]
    fn test_unknown_arg_fails() {
        let command = new();
        let result = command.try_get_matches_from(vec![
            "warden",
            "--token-secret",
            "secret",
            "--dsn",
            "postgres://localhost",
        ]);
        assert_eq!(
            result.map_err(|e| e.kind()),
            Err(clap::error::ErrorKind::UnknownArgument)
        );
    }
}
