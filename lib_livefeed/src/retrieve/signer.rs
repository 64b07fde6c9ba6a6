//! # Command Signer
//!
//! The push URL must carry a `signature` derived from a fixed subset of its query
//! parameters. The derivation itself is opaque, so it is delegated to an external
//! program: the canonical input string is written to its stdin and the first line of
//! its stdout is taken as the token.
//!
//! The same mechanism produces request signatures for the web API (`a_bogus`); those
//! cover the whole query, which the command then receives as `k=v&k=v`.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::core::collaborators::{CollaboratorError, SigningOracle};

/// Query parameters covered by the signature, in signing order.
pub const SIGNED_PARAMS: [&str; 13] = [
    "live_id",
    "aid",
    "version_code",
    "webcast_sdk_version",
    "room_id",
    "sub_room_id",
    "sub_channel_id",
    "did_rule",
    "user_unique_id",
    "device_platform",
    "device_type",
    "ac",
    "identity",
];

/// Canonical `k=v,k=v,...` signing input. Missing parameters are rendered empty.
pub fn signature_input(query: &BTreeMap<String, String>) -> String {
    SIGNED_PARAMS
        .iter()
        .map(|key| format!("{key}={}", query.get(*key).map(String::as_str).unwrap_or("")))
        .collect::<Vec<_>>()
        .join(",")
}

/// The query rendered as `k=v&k=v`, in key order.
pub fn query_string(query: &BTreeMap<String, String>) -> String {
    query
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// What the signing command reads on stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignerInput {
    /// [`signature_input`] over the push parameters.
    #[default]
    PushParams,
    /// [`query_string`] over every parameter.
    QueryString,
}

/// Signing oracle backed by an external command.
#[derive(Debug, Clone)]
pub struct CommandSigner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    input: SignerInput,
}

impl CommandSigner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(10),
            input: SignerInput::default(),
        }
    }

    /// Parses a whitespace-separated command line such as `node sign.js`.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_input(mut self, input: SignerInput) -> Self {
        self.input = input;
        self
    }

    async fn run(&self, input: &str) -> Result<String, CollaboratorError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CollaboratorError::Signing(format!("cannot spawn {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(format!("{input}\n").as_bytes())
                .await
                .map_err(|e| CollaboratorError::Signing(format!("cannot write signer input: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CollaboratorError::Signing(format!("signer did not finish: {e}")))?;
        if !output.status.success() {
            return Err(CollaboratorError::Signing(format!(
                "signer exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let token = stdout.lines().next().unwrap_or("").trim();
        if token.is_empty() {
            return Err(CollaboratorError::Signing("signer printed no token".to_string()));
        }
        Ok(token.to_string())
    }
}

#[async_trait]
impl SigningOracle for CommandSigner {
    async fn sign(&self, query: &BTreeMap<String, String>) -> Result<String, CollaboratorError> {
        let input = match self.input {
            SignerInput::PushParams => signature_input(query),
            SignerInput::QueryString => query_string(query),
        };
        debug!(program = %self.program, input = ?self.input, "requesting signature");
        tokio::time::timeout(self.timeout, self.run(&input))
            .await
            .map_err(|_| CollaboratorError::Signing(format!("signer timed out after {:?}", self.timeout)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn input_follows_signing_order_with_empty_defaults() {
        let q = query(&[
            ("room_id", "7392091211001140287"),
            ("aid", "6383"),
            ("live_id", "1"),
            ("compress", "gzip"),
            ("identity", "audience"),
        ]);
        assert_eq!(
            signature_input(&q),
            "live_id=1,aid=6383,version_code=,webcast_sdk_version=,room_id=7392091211001140287,\
             sub_room_id=,sub_channel_id=,did_rule=,user_unique_id=,device_platform=,\
             device_type=,ac=,identity=audience"
        );
    }

    #[test]
    fn parses_command_lines() {
        let signer = CommandSigner::from_command_line("  node  sign.js --fast ").unwrap();
        assert_eq!(signer.program, "node");
        assert_eq!(signer.args, vec!["sign.js", "--fast"]);
        assert!(CommandSigner::from_command_line("   ").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn token_is_first_stdout_line() {
        let signer = CommandSigner::new("cat", Vec::new());
        let q = query(&[("live_id", "1")]);
        assert_eq!(signer.sign(&q).await.unwrap(), signature_input(&q));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn query_string_mode_passes_every_parameter() {
        let signer = CommandSigner::new("cat", Vec::new()).with_input(SignerInput::QueryString);
        let q = query(&[("web_rid", "261378947940"), ("aid", "6383"), ("msToken", "")]);
        assert_eq!(signer.sign(&q).await.unwrap(), "aid=6383&msToken=&web_rid=261378947940");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_is_a_signing_error() {
        let signer = CommandSigner::new("false", Vec::new());
        assert!(matches!(
            signer.sign(&BTreeMap::new()).await,
            Err(CollaboratorError::Signing(_))
        ));
    }

    #[tokio::test]
    async fn missing_program_is_a_signing_error() {
        let signer = CommandSigner::new("definitely-not-a-signer-binary", Vec::new());
        assert!(matches!(
            signer.sign(&BTreeMap::new()).await,
            Err(CollaboratorError::Signing(_))
        ));
    }
}
