use crate::config::{AdBlockConfig, TimeoutsConfig};
use crate::probes::{run_command, Probe, ProbeError};
use crate::snapshot::AdBlockCounts;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

/// Query and block counts from the Pi-hole FTL database.
pub struct AdBlockProbe {
    db_path: String,
    blocked_statuses: Vec<u32>,
    window_secs: u64,
    sqlite_command: Vec<String>,
    timeout: Duration,
}

impl AdBlockProbe {
    pub fn new(cfg: &AdBlockConfig, timeouts: &TimeoutsConfig) -> Self {
        Self {
            db_path: cfg.db_path.clone(),
            blocked_statuses: cfg.blocked_statuses.clone(),
            window_secs: cfg.window_secs,
            sqlite_command: cfg.sqlite_command.clone(),
            timeout: Duration::from_millis(timeouts.adblock_ms),
        }
    }

    fn query(&self, since_unix: i64) -> String {
        let statuses = if self.blocked_statuses.is_empty() {
            // IN () is a syntax error in sqlite.
            "NULL".to_string()
        } else {
            self.blocked_statuses
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };
        format!(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status IN ({statuses}) THEN 1 ELSE 0 END), 0) \
             FROM queries WHERE timestamp > {since_unix};"
        )
    }
}

#[async_trait]
impl Probe for AdBlockProbe {
    type Output = AdBlockCounts;

    fn name(&self) -> &str {
        "adblock"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self) -> Result<AdBlockCounts, ProbeError> {
        if tokio::fs::metadata(&self.db_path).await.is_err() {
            return Err(ProbeError::Unavailable(format!(
                "ad-block database {}",
                self.db_path
            )));
        }

        let (program, leading) = self
            .sqlite_command
            .split_first()
            .ok_or_else(|| ProbeError::Unavailable("no sqlite command configured".to_string()))?;

        let since = Utc::now().timestamp().saturating_sub(self.window_secs as i64);
        let sql = self.query(since);
        let mut args: Vec<&str> = leading.iter().map(String::as_str).collect();
        args.extend(["-readonly", self.db_path.as_str(), sql.as_str()]);

        let out = run_command(program, &args, self.timeout)
            .await
            .map_err(|err| match err {
                ProbeError::NotFound(what) => ProbeError::Unavailable(what),
                other => other,
            })?
            .require_success(program)?;

        parse_counts(&out.stdout)
    }
}

/// Parses sqlite3's default `count|blocked` row.
fn parse_counts(stdout: &str) -> Result<AdBlockCounts, ProbeError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| ProbeError::ParseFailure("empty sqlite output".to_string()))?;

    let mut parts = line.split('|').map(str::trim);
    let queries = parts.next().and_then(|v| v.parse::<u64>().ok());
    let blocked = parts.next().and_then(|v| v.parse::<u64>().ok());
    match (queries, blocked) {
        (Some(queries), Some(blocked)) => Ok(AdBlockCounts { queries, blocked }),
        _ => Err(ProbeError::ParseFailure(format!("sqlite row '{line}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_count_row() {
        assert_eq!(
            parse_counts("1523|312\n"),
            Ok(AdBlockCounts {
                queries: 1523,
                blocked: 312
            })
        );
        assert!(matches!(parse_counts(""), Err(ProbeError::ParseFailure(_))));
        assert!(matches!(
            parse_counts("Error: no such table: queries"),
            Err(ProbeError::ParseFailure(_))
        ));
    }

    #[test]
    fn query_uses_configured_statuses() {
        let cfg = AdBlockConfig {
            blocked_statuses: vec![1, 4],
            ..AdBlockConfig::default()
        };
        let probe = AdBlockProbe::new(&cfg, &TimeoutsConfig::default());
        let sql = probe.query(100);
        assert!(sql.contains("status IN (1,4)"));
        assert!(sql.contains("timestamp > 100"));

        let cfg = AdBlockConfig {
            blocked_statuses: vec![],
            ..AdBlockConfig::default()
        };
        let probe = AdBlockProbe::new(&cfg, &TimeoutsConfig::default());
        assert!(probe.query(0).contains("status IN (NULL)"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn configured_shell_is_invoked_with_leading_args() {
        let db = tempfile::NamedTempFile::new().expect("temp db");
        // `sh -c` ignores the trailing positional args and prints a canned row.
        let cfg = AdBlockConfig {
            db_path: db.path().display().to_string(),
            sqlite_command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo '40|10'".to_string(),
                "pihole-FTL".to_string(),
            ],
            ..AdBlockConfig::default()
        };
        let probe = AdBlockProbe::new(&cfg, &TimeoutsConfig::default());
        assert_eq!(
            probe.invoke().await,
            Ok(AdBlockCounts {
                queries: 40,
                blocked: 10
            })
        );
    }

    #[tokio::test]
    async fn missing_shell_is_unavailable() {
        let db = tempfile::NamedTempFile::new().expect("temp db");
        let cfg = AdBlockConfig {
            db_path: db.path().display().to_string(),
            sqlite_command: vec!["hostdash-no-such-sqlite".to_string()],
            ..AdBlockConfig::default()
        };
        let probe = AdBlockProbe::new(&cfg, &TimeoutsConfig::default());
        assert!(matches!(
            probe.invoke().await,
            Err(ProbeError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn missing_database_is_unavailable() {
        let cfg = AdBlockConfig {
            db_path: "/nonexistent/pihole-FTL.db".to_string(),
            ..AdBlockConfig::default()
        };
        let probe = AdBlockProbe::new(&cfg, &TimeoutsConfig::default());
        assert!(matches!(
            probe.invoke().await,
            Err(ProbeError::Unavailable(_))
        ));
    }
}
