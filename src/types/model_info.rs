use serde::{Deserialize, Serialize};

/// The subset of llama.cpp's `/props` response used to attribute audit records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// The alias the server was started with, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_alias: Option<String>,

    /// Path of the loaded model file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
}

impl ModelInfo {
    /// The best available model identifier.
    ///
    /// Prefers the alias, then the file name of the model path.
    pub fn identifier(&self) -> Option<String> {
        if let Some(alias) = self.model_alias.as_deref().filter(|a| !a.is_empty()) {
            return Some(alias.to_string());
        }
        self.model_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| p.rsplit(['/', '\\']).next().unwrap_or(p).to_string())
    }
}
