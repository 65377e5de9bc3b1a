// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a file (YAML or JSON)
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config = parse_config(&contents, is_yaml(path))?;
    config.validate()?;
    Ok(config)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn parse_config(contents: &str, yaml: bool) -> Result<Config> {
    let config: Config = if yaml {
        serde_yaml::from_str(contents).context("Failed to parse YAML config")?
    } else {
        serde_json::from_str(contents).context("Failed to parse JSON config")?
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn loads_yaml_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "listen:\n  interfaces: [\"127.0.0.1\"]\n  ports: [8080, 8443]\n  bind_policy: ign_ebind\ntls: https_only\n"
        )
        .unwrap();

        let config = load_config(file.path()).await.unwrap();
        assert_eq!(
            config.listen.interfaces,
            vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]
        );
        assert_eq!(config.listen.ports, vec![8080, 8443]);
        assert_eq!(config.listen.bind_policy, BindPolicy::IgnoreFailed);
        assert_eq!(config.listen.backlog, 128);
        assert_eq!(config.tls, TlsMode::HttpsOnly);
        assert!(config.title.template.is_none());
        assert_eq!(config.probe.command_timeout_ms, 2000);
    }

    #[tokio::test]
    async fn loads_json_and_rejects_invalid() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"listen": {{"ports": []}}}}"#).unwrap();

        let err = load_config(file.path()).await.unwrap_err();
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn empty_document_uses_wildcard_defaults() {
        let config = parse_config("{}", false).unwrap();
        assert_eq!(
            config.listen.interfaces,
            vec![IpAddr::V4(Ipv4Addr::UNSPECIFIED)]
        );
        assert_eq!(config.listen.ports, vec![3923]);
        assert_eq!(config.listen.bind_policy, BindPolicy::Strict);
        config.validate().unwrap();
    }

    #[test]
    fn title_tags_are_parsed() {
        let yaml = "title:\n  template: \"cpp $lan\"\n  tags:\n    lan: [\"192.168.\", \"10.\"]\n";
        let config = parse_config(yaml, true).unwrap();
        assert_eq!(config.title.template.as_deref(), Some("cpp $lan"));
        assert_eq!(config.title.tags["lan"], vec!["192.168.", "10."]);
    }
}
