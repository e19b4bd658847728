//! Web app manifest parsing and validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Manifest request to {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("Manifest is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Manifest is invalid: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// How the app asks to be displayed once installed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayMode {
    Fullscreen,
    Standalone,
    MinimalUi,
    Browser,
}

impl DisplayMode {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "fullscreen" => Some(Self::Fullscreen),
            "standalone" => Some(Self::Standalone),
            "minimal-ui" => Some(Self::MinimalUi),
            "browser" => Some(Self::Browser),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestIcon {
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub sizes: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

/// A web app manifest as served to the page.
///
/// Fields are optional at parse time so that [`validate`](Self::validate)
/// can report every missing one at once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebManifest {
    pub name: Option<String>,
    pub short_name: Option<String>,
    #[serde(default)]
    pub icons: Vec<ManifestIcon>,
    pub start_url: Option<String>,
    pub display: Option<String>,
    pub theme_color: Option<String>,
    pub background_color: Option<String>,
}

impl WebManifest {
    pub fn parse(bytes: &[u8]) -> Result<Self, ManifestError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Check the fields an installable app needs.
    pub fn validate(&self) -> Result<(), ManifestError> {
        let mut problems = Vec::new();

        if self.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
            problems.push("missing name".to_string());
        }
        if self
            .start_url
            .as_deref()
            .map_or(true, |u| u.trim().is_empty())
        {
            problems.push("missing start_url".to_string());
        }
        match self.display.as_deref() {
            None => problems.push("missing display".to_string()),
            Some(display) if DisplayMode::parse(display).is_none() => {
                problems.push(format!("unsupported display {display:?}"));
            }
            Some(_) => {}
        }

        if self.icons.is_empty() {
            problems.push("icons must not be empty".to_string());
        }
        for (i, icon) in self.icons.iter().enumerate() {
            if icon.src.trim().is_empty() {
                problems.push(format!("icon {i} has no src"));
            }
            if !icon.sizes.split_whitespace().all(is_icon_size) || icon.sizes.trim().is_empty() {
                problems.push(format!("icon {i} has invalid sizes {:?}", icon.sizes));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ManifestError::Invalid(problems))
        }
    }

    /// Parsed display mode, if present and supported.
    #[must_use]
    pub fn display_mode(&self) -> Option<DisplayMode> {
        self.display.as_deref().and_then(DisplayMode::parse)
    }
}

/// `any` or `<width>x<height>`.
fn is_icon_size(size: &str) -> bool {
    if size == "any" {
        return true;
    }
    let Some((w, h)) = size.split_once(['x', 'X']) else {
        return false;
    };
    w.parse::<u32>().is_ok_and(|w| w > 0) && h.parse::<u32>().is_ok_and(|h| h > 0)
}
