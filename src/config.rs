//! Server configuration and command-line flags

use crate::error::{ChatError, Result};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on
    pub port: String,
    /// Log level: debug, info, warn, error
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: "8080".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Parse configuration from command-line arguments (flags after argv[0]).
    ///
    /// Accepts `-port 9000`, `--port 9000`, `-port=9000`, and the same forms
    /// for `-log-level`.
    pub fn from_args<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let flag = arg.trim_start_matches('-');
            let (name, inline_value) = match flag.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (flag, None),
            };

            let mut value = || -> Result<String> {
                match inline_value.clone().or_else(|| args.next()) {
                    Some(v) => Ok(v),
                    None => Err(ChatError::validation(format!(
                        "flag -{} requires a value",
                        name
                    ))),
                }
            };

            match name {
                "port" => config.port = value()?,
                "log-level" => config.log_level = value()?,
                _ => {
                    return Err(ChatError::validation(format!("unknown flag: {}", arg)));
                }
            }
        }

        match config.log_level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ChatError::validation(format!(
                    "invalid log level: {}",
                    other
                )));
            }
        }

        Ok(config)
    }

    /// Address string for the TCP listener
    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}
