use serde::{Deserialize, Serialize};

use crate::constants::PROMPT_PREVIEW_CHARS;
use crate::str_utils::truncate_with_ellipsis;

/// Work handed to a viewer from outside the chat box (selection or page).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PendingAction {
    Summary {
        text: String,
    },
    Chat {
        text: String,
    },
    Translate {
        text: String,
        target_language: String,
    },
    PageSummary {
        title: String,
        url: String,
        content: String,
    },
}

impl PendingAction {
    /// Text sent to the provider.
    pub fn prompt(&self) -> String {
        match self {
            PendingAction::Summary { text } => format!("Please summarize the following text:\n\n{}", text),
            PendingAction::Chat { text } => format!(
                "Discuss the following text and point out its key insights:\n\n{}",
                text
            ),
            PendingAction::Translate {
                text,
                target_language,
            } => format!(
                "Please translate the following text into {}:\n\n{}",
                target_language, text
            ),
            PendingAction::PageSummary {
                title,
                url,
                content,
            } => format!(
                "Please summarize the following web page:\nTitle: {}\nURL: {}\nContent: {}\n\n\
                 Give a concise summary that highlights the main points and key information.",
                title, url, content
            ),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PendingAction::Summary { .. } => "Explain",
            PendingAction::Chat { .. } => "Chat",
            PendingAction::Translate { .. } => "Translate",
            PendingAction::PageSummary { .. } => "Summarize page",
        }
    }

    /// Text shown as the user's side of the turn.
    pub fn display_text(&self) -> String {
        match self {
            PendingAction::Summary { text }
            | PendingAction::Chat { text }
            | PendingAction::Translate { text, .. } => format!(
                "{}\n{}",
                self.label(),
                truncate_with_ellipsis(text, PROMPT_PREVIEW_CHARS)
            ),
            PendingAction::PageSummary { url, .. } => format!("{}\nURL: {}", self.label(), url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_text_truncates_long_selections() {
        let action = PendingAction::Chat {
            text: "x".repeat(PROMPT_PREVIEW_CHARS + 5),
        };
        let shown = action.display_text();
        assert!(shown.starts_with("Chat\n"));
        assert!(shown.ends_with('…'));
        assert_eq!(shown.chars().count(), "Chat\n".len() + PROMPT_PREVIEW_CHARS + 1);
        // The provider still gets the whole selection.
        assert!(action.prompt().ends_with(&"x".repeat(PROMPT_PREVIEW_CHARS + 5)));
    }

    #[test]
    fn translate_names_the_target_language() {
        let action = PendingAction::Translate {
            text: "bonjour".to_string(),
            target_language: "English".to_string(),
        };
        assert!(action.prompt().contains("into English"));
    }

    #[test]
    fn page_summary_shows_only_the_url() {
        let action: PendingAction = serde_json::from_value(serde_json::json!({
            "type": "pageSummary",
            "title": "T",
            "url": "https://example.com",
            "content": "body",
        }))
        .unwrap();
        assert_eq!(action.display_text(), "Summarize page\nURL: https://example.com");
        assert!(action.prompt().contains("Content: body"));
    }
}
