use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One named part of a conversation review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSection {
    pub key: String,
    pub text: String,
}

/// Review of a conversation. Section keys are free-form and keep the order
/// the server sent them in.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Review {
    pub sections: Vec<ReviewSection>,
}

/// Sections the relay always answers with, even when the model output could
/// not be split.
pub const DEFAULT_SECTIONS: [(&str, &str); 3] = [
    ("insights", "Could not extract insights."),
    ("summary", "Could not generate a summary."),
    ("deep_dive", "Could not suggest deep-dive perspectives."),
];

impl Review {
    /// Build from the review endpoint's JSON object. Non-string values are
    /// kept in their JSON form rather than dropped.
    pub fn from_json(value: Value) -> Self {
        let sections = match value {
            Value::Object(map) => map
                .into_iter()
                .map(|(key, value)| ReviewSection {
                    key,
                    text: match value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    },
                })
                .collect(),
            Value::Null => Vec::new(),
            Value::String(text) => vec![ReviewSection {
                key: "review".to_string(),
                text,
            }],
            other => vec![ReviewSection {
                key: "review".to_string(),
                text: other.to_string(),
            }],
        };
        Self { sections }
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .sections
            .iter()
            .map(|s| (s.key.clone(), Value::String(s.text.clone())))
            .collect();
        Value::Object(map)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Render as markdown: one `###` heading per section, in order.
    pub fn to_markdown(&self) -> String {
        let body = self
            .sections
            .iter()
            .map(|s| format!("### {}\n\n{}\n", title_case(&s.key), s.text))
            .collect::<Vec<_>>()
            .join("\n");
        format!("## Review\n\n{}", body)
    }

    /// Split a model reply on `## ` headings. Each heading becomes a
    /// snake_case key; numbering such as `1.` is dropped.
    pub fn from_markdown(text: &str) -> Self {
        let mut sections: Vec<ReviewSection> = Vec::new();
        let mut current: Option<(String, Vec<&str>)> = None;

        for line in text.lines() {
            if let Some(heading) = line.trim_start().strip_prefix("## ") {
                if let Some((key, body)) = current.take() {
                    sections.push(ReviewSection {
                        key,
                        text: body.join("\n").trim().to_string(),
                    });
                }
                current = Some((snake_case_key(heading), Vec::new()));
            } else if let Some((_, body)) = current.as_mut() {
                body.push(line);
            }
        }
        if let Some((key, body)) = current {
            sections.push(ReviewSection {
                key,
                text: body.join("\n").trim().to_string(),
            });
        }
        sections.retain(|s| !s.key.is_empty());

        if sections.is_empty() {
            sections = DEFAULT_SECTIONS
                .iter()
                .map(|(key, _)| ReviewSection {
                    key: key.to_string(),
                    text: String::new(),
                })
                .collect();
        }
        for section in sections.iter_mut().filter(|s| s.text.is_empty()) {
            section.text = DEFAULT_SECTIONS
                .iter()
                .find(|(key, _)| *key == section.key)
                .map(|(_, fallback)| fallback.to_string())
                .unwrap_or_else(|| "No content.".to_string());
        }
        Self { sections }
    }
}

/// `deep_dive` -> `Deep Dive`
pub fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn snake_case_key(heading: &str) -> String {
    let heading = heading
        .trim()
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.')
        .trim();
    // Drop a trailing parenthetical such as "Insights (notes)".
    let heading = heading.split('(').next().unwrap_or(heading);
    let mut key = String::new();
    for c in heading.chars() {
        if c.is_alphanumeric() {
            key.extend(c.to_lowercase());
        } else if !key.ends_with('_') && !key.is_empty() {
            key.push('_');
        }
    }
    key.trim_end_matches('_').to_string()
}
