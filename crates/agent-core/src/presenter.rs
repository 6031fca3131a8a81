//! Presentation Sink
//!
//! Fire-and-forget rendering of intermediate content for a human watching
//! a run. Nothing rendered here feeds back into control flow.

use std::path::PathBuf;

use serde::Serialize;

/// Something worth showing
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Presentation {
    Text(String),
    Data(serde_json::Value),
    Image(PathBuf),
}

impl From<&str> for Presentation {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Presentation {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Sink for human-facing output
pub trait Presenter: Send + Sync {
    fn render(&self, content: Presentation, title: Option<&str>);
}

/// Renders as structured tracing events
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingPresenter;

impl Presenter for TracingPresenter {
    fn render(&self, content: Presentation, title: Option<&str>) {
        let title = title.unwrap_or("");
        match content {
            Presentation::Text(text) => tracing::info!(title, "{}", text),
            Presentation::Data(value) => tracing::info!(title, data = %value, "structured output"),
            Presentation::Image(path) => tracing::info!(title, image = %path.display(), "image output"),
        }
    }
}

/// Discards everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn render(&self, _content: Presentation, _title: Option<&str>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presentation_serializes_with_kind_tag() {
        let json = serde_json::to_value(Presentation::from("hello")).unwrap();
        assert_eq!(json["kind"], "text");
    }
}
