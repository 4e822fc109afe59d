use clap::Parser;
use egress_proxy::config::{Cli, Config, ConfigError, EnvVars};
use std::collections::HashMap;
use egress_proxy::proxy::limiter::{ClassQuota, QuotaTable};
use pretty_assertions::assert_eq;
use std::io::Write;
use std::net::IpAddr;
use std::time::Duration;

fn cli(args: &[&str]) -> Cli {
    let mut argv = vec!["egress-proxy", "--egress-base", "2001:db8::10"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

fn settings_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_config_defaults() {
    let cfg = Config::resolve(cli(&[]), EnvVars::with_api_key("secret")).unwrap();

    assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:8082");
    assert_eq!(cfg.egress_base, "2001:db8::10".parse::<IpAddr>().unwrap());
    assert_eq!(cfg.egress_count, 1);
    assert!(!cfg.verbose);
    assert!(!cfg.print_addrs);
    assert_eq!(cfg.api_domain, "bungie.net");
    assert_eq!(cfg.probe_header.as_str(), "x-betteruptime-probe");
    assert_eq!(cfg.request_timeout, Duration::from_secs(60));
    assert_eq!(cfg.stats_interval, Duration::from_secs(10));
    assert_eq!(cfg.quotas, QuotaTable::default());
    assert_eq!(cfg.log_level(), tracing::Level::INFO);
}

#[test]
fn test_config_flags() {
    let cfg = Config::resolve(
        cli(&["-n", "8", "--port", "9000", "--verbose", "--print-addrs"]),
        EnvVars::with_api_key("secret"),
    )
    .unwrap();

    assert_eq!(cfg.egress_count, 8);
    assert_eq!(cfg.listen_addr.port(), 9000);
    assert!(cfg.verbose);
    assert!(cfg.print_addrs);
    assert_eq!(cfg.log_level(), tracing::Level::DEBUG);
}

#[test]
fn test_config_zero_egress_count_rejected() {
    let result = Cli::try_parse_from(["egress-proxy", "--egress-base", "10.0.0.1", "-n", "0"]);

    assert!(result.is_err());
}

#[test]
fn test_config_unparseable_base_address_rejected() {
    let result = Cli::try_parse_from(["egress-proxy", "--egress-base", "not-an-ip"]);

    assert!(result.is_err());
}

#[test]
fn test_config_missing_secret() {
    let result = Config::resolve(cli(&[]), EnvVars::default());

    assert!(matches!(result, Err(ConfigError::MissingSecret)));
}

#[test]
fn test_config_empty_secret() {
    let result = Config::resolve(cli(&[]), EnvVars::with_api_key(""));

    assert!(matches!(result, Err(ConfigError::InvalidSecret)));
}

#[test]
fn test_config_debug_redacts_secret() {
    let cfg = Config::resolve(cli(&[]), EnvVars::with_api_key("hunter2")).unwrap();

    assert!(!format!("{:?}", cfg).contains("hunter2"));
}

#[test]
fn test_config_settings_file_overrides() {
    let file = settings_file(
        "api_domain: example.net\n\
         probe_header: x-health\n\
         request_timeout_secs: 5\n\
         rate_limits:\n  stats: { per_second: 5, burst: 10 }\n",
    );
    let path = file.path().to_str().unwrap();

    let cfg = Config::resolve(cli(&["--config", path]), EnvVars::with_api_key("secret")).unwrap();

    assert_eq!(cfg.api_domain, "example.net");
    assert_eq!(cfg.probe_header.as_str(), "x-health");
    assert_eq!(cfg.request_timeout, Duration::from_secs(5));
    assert_eq!(cfg.quotas.stats.per_second.get(), 5);
    assert_eq!(cfg.quotas.stats.burst.get(), 10);
    // Unspecified class keeps its default
    assert_eq!(cfg.quotas.web, ClassQuota::WEB);
}

#[test]
fn test_config_settings_file_zero_rate_rejected() {
    let file = settings_file("rate_limits:\n  web: { per_second: 0, burst: 10 }\n");
    let path = file.path().to_str().unwrap();

    let result = Config::resolve(cli(&["-c", path]), EnvVars::with_api_key("secret"));

    assert!(matches!(result, Err(ConfigError::ZeroRateLimit("web"))));
}

#[test]
fn test_config_settings_file_unknown_field_rejected() {
    let file = settings_file("listen: 0.0.0.0:1\n");
    let path = file.path().to_str().unwrap();

    let result = Config::resolve(cli(&["-c", path]), EnvVars::with_api_key("secret"));

    assert!(matches!(result, Err(ConfigError::ParseSettings { .. })));
}

#[test]
fn test_config_settings_file_missing() {
    let result = Config::resolve(
        cli(&["-c", "/nonexistent/egress-proxy.yaml"]),
        EnvVars::with_api_key("secret"),
    );

    assert!(matches!(result, Err(ConfigError::ReadSettings { .. })));
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::resolve(cli(&[]), EnvVars::with_api_key("secret")).unwrap();
    let cfg2 = cfg1.clone();

    assert_eq!(cfg1.listen_addr, cfg2.listen_addr);
    assert_eq!(cfg1.api_key, cfg2.api_key);
}

fn lookup(vars: &[(&str, &str)]) -> EnvVars {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    EnvVars::from_lookup(|name| vars.get(name).cloned())
}

#[test]
fn test_config_legacy_variable_names() {
    let env = lookup(&[("BUNGIE_API_KEY", "legacy-key"), ("IPV6", "2001:db8::40")]);
    let cli = Cli::try_parse_from(["egress-proxy", "-n", "4"]).unwrap();

    let cfg = Config::resolve(cli, env).unwrap();

    assert_eq!(cfg.api_key, "legacy-key");
    assert_eq!(cfg.egress_base, "2001:db8::40".parse::<IpAddr>().unwrap());
    assert_eq!(cfg.egress_count, 4);
}

#[test]
fn test_config_current_names_take_precedence() {
    let env = lookup(&[
        ("API_KEY", "current-key"),
        ("BUNGIE_API_KEY", "legacy-key"),
        ("IPV6", "2001:db8::40"),
    ]);

    let cfg = Config::resolve(cli(&[]), env).unwrap();

    assert_eq!(cfg.api_key, "current-key");
    // --egress-base wins over IPV6
    assert_eq!(cfg.egress_base, "2001:db8::10".parse::<IpAddr>().unwrap());
}

#[test]
fn test_config_missing_egress_base() {
    let cli = Cli::try_parse_from(["egress-proxy"]).unwrap();

    let result = Config::resolve(cli, EnvVars::with_api_key("secret"));

    assert!(matches!(result, Err(ConfigError::MissingEgressBase)));
}

#[test]
fn test_config_invalid_legacy_egress_base() {
    let env = lookup(&[("API_KEY", "secret"), ("IPV6", "fe80::zz")]);
    let cli = Cli::try_parse_from(["egress-proxy"]).unwrap();

    let result = Config::resolve(cli, env);

    assert!(matches!(result, Err(ConfigError::InvalidEgressBase(raw)) if raw == "fe80::zz"));
}

#[test]
fn test_config_reads_dotenv_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".env");
    std::fs::write(&path, "BUNGIE_API_KEY=from-file\nIPV6=2001:db8::99\n").unwrap();

    let vars: HashMap<String, String> = dotenvy::from_path_iter(&path)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let env = EnvVars::from_lookup(|name| vars.get(name).cloned());
    let cli = Cli::try_parse_from(["egress-proxy"]).unwrap();

    let cfg = Config::resolve(cli, env).unwrap();

    assert_eq!(cfg.api_key, "from-file");
    assert_eq!(cfg.egress_base, "2001:db8::99".parse::<IpAddr>().unwrap());
}
