use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::constants::{
    DEFAULT_API_KEY_ENV, DEFAULT_BASE_URL, DEFAULT_BIND, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT,
};

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Provider model name (e.g., "gemini-pro")
    pub model: Option<String>,
    /// Root of the generative-language REST API
    pub base_url: Option<String>,
    /// Instruction sent out-of-band with every request
    pub system_prompt: Option<String>,
    /// Socket address for `sifra serve`
    pub bind: Option<String>,
    /// Environment variable holding the API key. The key itself is never
    /// written to the config file.
    pub api_key_env: Option<String>,
}

/// Values given on the command line; each one wins over the file.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub system_prompt: Option<String>,
    pub bind: Option<String>,
}

impl Config {
    pub fn model(&self) -> &str {
        non_empty(&self.model).unwrap_or(DEFAULT_MODEL)
    }

    pub fn base_url(&self) -> &str {
        non_empty(&self.base_url).unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn system_prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    pub fn bind(&self) -> &str {
        non_empty(&self.bind).unwrap_or(DEFAULT_BIND)
    }

    pub fn api_key_env(&self) -> &str {
        non_empty(&self.api_key_env).unwrap_or(DEFAULT_API_KEY_ENV)
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(self.api_key_env())
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        let ConfigOverrides {
            model,
            base_url,
            system_prompt,
            bind,
        } = overrides;
        if model.is_some() {
            self.model = model;
        }
        if base_url.is_some() {
            self.base_url = base_url;
        }
        if system_prompt.is_some() {
            self.system_prompt = system_prompt;
        }
        if bind.is_some() {
            self.bind = bind;
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
