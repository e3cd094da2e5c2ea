use super::*;

#[test]
fn defaults_resolve() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.to_string(), "127.0.0.1:3000");
    assert_eq!(settings.server.graceful_shutdown, Duration::from_secs(30));
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert_eq!(settings.cache.backend, CacheBackend::Redis);
    assert!(settings.cache.url.is_none());
    assert_eq!(settings.cache.op_timeout, Duration::from_millis(250));
    assert_eq!(settings.cache.connect_timeout, Duration::from_secs(2));
    assert_eq!(settings.counters.ttl_seconds.get(), 86_400);
    assert_eq!(settings.counters.flag_ttl_seconds.get(), 86_400);
    assert_eq!(settings.rate_limit.window_seconds.get(), 60);
    assert_eq!(settings.rate_limit.max_requests.get(), 120);
    assert_eq!(settings.response_cache.ttl_seconds.get(), 60);
    assert_eq!(settings.response_cache.max_body_bytes.get(), 1024 * 1024);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.cache.url = Some("redis://file-host:6379".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        cache: CacheOverrides {
            cache_url: Some("redis://cli-host:6379".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(
        settings.cache.url.as_deref(),
        Some("redis://cli-host:6379")
    );
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn blank_cache_url_disables_cache() {
    let mut raw = RawSettings::default();
    raw.cache.url = Some("   ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.cache.url.is_none());
}

#[test]
fn memory_backend_parses_case_insensitively() {
    let mut raw = RawSettings::default();
    raw.cache.backend = Some("Memory".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.backend, CacheBackend::Memory);
}

#[test]
fn unknown_backend_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.backend = Some("memcached".to_string());
    let err = Settings::from_raw(raw).expect_err("backend should be rejected");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.backend",
            ..
        }
    ));
}

#[test]
fn zero_values_are_rejected() {
    let mut raw = RawSettings::default();
    raw.rate_limit.max_requests = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "rate_limit.max_requests",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.cache.op_timeout_ms = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.op_timeout_ms",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.response_cache.max_body_bytes = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "response_cache.max_body_bytes",
            ..
        })
    ));
}

#[test]
fn oversized_ttl_is_rejected() {
    let mut raw = RawSettings::default();
    raw.counters.ttl_seconds = Some(u64::from(u32::MAX) + 1);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "counters.ttl_seconds",
            ..
        })
    ));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["cachefront"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "cachefront",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--cache-backend",
        "memory",
        "--rate-limit-max-requests",
        "10",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(serve.overrides.cache.cache_backend.as_deref(), Some("memory"));
            assert_eq!(serve.overrides.rate_limit_max_requests, Some(10));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_check_cache_arguments() {
    let args = CliArgs::parse_from([
        "cachefront",
        "check-cache",
        "--cache-url",
        "redis://example:6379",
    ]);

    match args.command.expect("check-cache command") {
        Command::CheckCache(check) => {
            assert_eq!(
                check.cache.cache_url.as_deref(),
                Some("redis://example:6379")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}
