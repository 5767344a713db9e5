//! Executor backed by the `gsql` command-line client
//!
//! Every batch starts one client process, so hypothetical indexes are scoped
//! to the batch. Output is requested unaligned and tuples-only with a unit
//! separator between fields.

use super::{Executor, Row};
use crate::{Error, Result};
use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;
use tracing::trace;

const FIELD_SEPARATOR: char = '\u{1f}';

#[derive(Debug, Clone)]
pub struct GsqlExecutor {
    binary: String,
    host: Option<String>,
    port: u16,
    database: String,
    user: Option<String>,
    password: Option<String>,
    schema: String,
}

impl GsqlExecutor {
    pub fn new(port: u16, database: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            binary: "gsql".to_string(),
            host: None,
            port,
            database: database.into(),
            user: None,
            password: None,
            schema: schema.into(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.user = Some(user.into());
        self.password = password;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-p").arg(self.port.to_string());
        cmd.arg("-d").arg(&self.database);
        if let Some(host) = &self.host {
            cmd.arg("-h").arg(host);
        }
        if let Some(user) = &self.user {
            cmd.arg("-U").arg(user);
        }
        if let Some(password) = &self.password {
            cmd.env("PGPASSWORD", password);
        }
        cmd.args(["-A", "-t", "-q", "-v", "ON_ERROR_STOP=1"]);
        cmd.arg("-F").arg(FIELD_SEPARATOR.to_string());
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }

    fn script(&self, sqls: &[String]) -> String {
        let mut script = format!("SET current_schema = '{}';\n", self.schema.replace('\'', "''"));
        for sql in sqls {
            let sql = sql.trim().trim_end_matches(';');
            script.push_str(sql);
            script.push_str(";\n");
        }
        script
    }
}

/// Split unaligned tuples-only output into rows
pub fn parse_output(stdout: &str) -> Vec<Row> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.split(FIELD_SEPARATOR).map(|f| f.to_string()).collect())
        .collect()
}

impl Executor for GsqlExecutor {
    fn execute_sqls(&self, sqls: &[String]) -> Result<Vec<Row>> {
        let script = self.script(sqls);
        trace!(statements = sqls.len(), "Running gsql batch");

        let mut child = self
            .command()
            .spawn()
            .map_err(|e| Error::Executor(format!("failed to start {}: {}", self.binary, e)))?;
        // stdin is fed from its own thread so a large batch cannot block on a full stdout pipe
        let writer = child
            .stdin
            .take()
            .map(|mut stdin| thread::spawn(move || stdin.write_all(script.as_bytes())));
        let output = child
            .wait_with_output()
            .map_err(|e| Error::Executor(format!("{} did not finish: {}", self.binary, e)))?;
        let written = match writer.map(|handle| handle.join()) {
            Some(Ok(result)) => result,
            Some(Err(_)) => return Err(Error::Executor("gsql input writer panicked".to_string())),
            None => Ok(()),
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() || stderr.contains("ERROR") {
            let message = match stderr.trim() {
                "" => format!("{} exited with {}", self.binary, output.status),
                text => text.to_string(),
            };
            return Err(Error::Executor(message));
        }
        if let Err(e) = written {
            return Err(Error::Executor(format!("failed to send batch to {}: {}", self.binary, e)));
        }
        Ok(parse_output(&String::from_utf8_lossy(&output.stdout)))
    }

    fn schema(&self) -> &str {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdvisorConfig;
    use crate::index_advisor::{IndexAdvisor, QueryItem};

    #[test]
    fn test_parse_output_splits_fields() {
        let out = "16384\u{1f}<16384>btree_t_a\n\nSeq Scan on t  (cost=0.00..10.00 rows=1 width=4)\n";
        let rows = parse_output(out);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["16384".to_string(), "<16384>btree_t_a".to_string()]);
        assert_eq!(rows[1].len(), 1);
    }

    #[test]
    fn test_script_terminates_statements() {
        let executor = GsqlExecutor::new(5432, "postgres", "public");
        let script = executor.script(&["select 1;".to_string(), "select 2".to_string()]);
        assert!(script.starts_with("SET current_schema = 'public';"));
        assert!(script.contains("select 1;\nselect 2;\n"));
    }

    #[test]
    fn test_password_stays_off_the_command_line() {
        let executor = GsqlExecutor::new(5432, "postgres", "public")
            .with_credentials("omm", Some("s3cret".to_string()));
        let cmd = executor.command();
        assert!(cmd.get_args().all(|arg| arg != "s3cret"));
        assert!(cmd
            .get_envs()
            .any(|(key, value)| key == "PGPASSWORD" && value.is_some_and(|v| v == "s3cret")));
    }

    #[cfg(unix)]
    #[test]
    fn test_client_exiting_early_is_a_statement_error() {
        // `false` exits without reading its input
        let executor = GsqlExecutor::new(5432, "postgres", "public").with_binary("false");
        let values: Vec<String> = (0..20_000).map(|i| i.to_string()).collect();
        let statement = format!("select * from t where a in ({})", values.join(", "));

        let err = executor.execute_sqls(&[statement.clone()]).unwrap_err();
        assert!(matches!(err, Error::Executor(_)), "{:?}", err);
        assert!(err.is_per_query());

        let advisor = IndexAdvisor::new(&executor, AdvisorConfig::new("public")).unwrap();
        let report = advisor.advise(vec![QueryItem::new(statement, 1.0)], 1).unwrap();
        assert!(report.recommend_indexes.is_empty());
        assert_eq!(report.positive_stmt_count, 0);
    }
}
