//! User-facing strings, looked up by stable identifiers.
//!
//! English is built in. A catalog file `{LOCALES_DIR}/{language}.json` maps
//! identifiers to translated text and may cover any subset of them.

use crate::config::Settings;
use di::{Ref, inject, injectable};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageId {
    PageTitle,
    Customize,
    MaxTokensLabel,
    SystemPromptLabel,
    You,
    Assistant,
    PromptPlaceholder,
    NoOutput,
    FileUpload,
    UploadHint,
    GenerateReport,
    DownloadCsv,
}

impl MessageId {
    pub const ALL: [MessageId; 12] = [
        MessageId::PageTitle,
        MessageId::Customize,
        MessageId::MaxTokensLabel,
        MessageId::SystemPromptLabel,
        MessageId::You,
        MessageId::Assistant,
        MessageId::PromptPlaceholder,
        MessageId::NoOutput,
        MessageId::FileUpload,
        MessageId::UploadHint,
        MessageId::GenerateReport,
        MessageId::DownloadCsv,
    ];

    pub fn key(self) -> &'static str {
        match self {
            MessageId::PageTitle => "page_title",
            MessageId::Customize => "customize",
            MessageId::MaxTokensLabel => "max_tokens_label",
            MessageId::SystemPromptLabel => "system_prompt_label",
            MessageId::You => "you",
            MessageId::Assistant => "assistant",
            MessageId::PromptPlaceholder => "prompt_placeholder",
            MessageId::NoOutput => "no_output",
            MessageId::FileUpload => "file_upload",
            MessageId::UploadHint => "upload_hint",
            MessageId::GenerateReport => "generate_report",
            MessageId::DownloadCsv => "download_csv",
        }
    }

    fn english(self) -> &'static str {
        match self {
            MessageId::PageTitle => "Code Llama 70B Instruct",
            MessageId::Customize => "Customize",
            MessageId::MaxTokensLabel => "Max tokens to return",
            MessageId::SystemPromptLabel => "System prompt",
            MessageId::You => "You",
            MessageId::Assistant => "Assistant",
            MessageId::PromptPlaceholder => "Enter your prompt...",
            MessageId::NoOutput => "No output received.",
            MessageId::FileUpload => "File Upload",
            MessageId::UploadHint => "Upload CSV or Excel file",
            MessageId::GenerateReport => "Generate Report",
            MessageId::DownloadCsv => "Download CSV",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    language: String,
    entries: HashMap<MessageId, String>,
}

#[injectable]
impl Catalog {
    #[inject]
    pub fn create(settings: Ref<Settings>) -> Catalog {
        Catalog::load(&settings.locales_dir, &settings.language)
    }
}

impl Catalog {
    pub fn english() -> Catalog {
        Catalog {
            language: "en_US".to_owned(),
            entries: MessageId::ALL
                .iter()
                .map(|id| (*id, id.english().to_owned()))
                .collect(),
        }
    }

    /// Loads `{dir}/{language}.json` over the English defaults.
    ///
    /// A missing or unreadable catalog is not fatal; English is used instead.
    pub fn load(dir: &Path, language: &str) -> Catalog {
        let mut catalog = Catalog::english();
        let path = dir.join(format!("{language}.json"));

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("no catalog at {}: {e}, using English", path.display());
                return catalog;
            }
        };

        match serde_json::from_str::<HashMap<MessageId, String>>(&raw) {
            Ok(overrides) => {
                info!(
                    "loaded {} translations for {language} from {}",
                    overrides.len(),
                    path.display()
                );
                catalog.language = language.to_owned();
                catalog.entries.extend(overrides);
            }
            Err(e) => warn!("invalid catalog {}: {e}, using English", path.display()),
        }

        catalog
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn get(&self, id: MessageId) -> &str {
        self.entries
            .get(&id)
            .map(String::as_str)
            .unwrap_or_else(|| id.english())
    }

    /// All entries keyed by their stable identifier.
    pub fn to_map(&self) -> HashMap<&'static str, String> {
        MessageId::ALL
            .iter()
            .map(|id| (id.key(), self.get(*id).to_owned()))
            .collect()
    }
}
