use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::CliError;

/// Wrapper every command prints: metadata, payload, and per-item errors.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub meta: Meta,
    pub data: Value,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Meta {
    pub request_id: Uuid,
    pub command: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub warnings: Vec<String>,
}

impl Envelope {
    pub fn new(command: &'static str, data: Value) -> Self {
        Self {
            meta: Meta {
                request_id: Uuid::new_v4(),
                command,
                generated_at: OffsetDateTime::now_utc(),
                warnings: Vec::new(),
            },
            data,
            errors: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.meta.warnings.extend(warnings);
        self
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors.extend(errors);
        self
    }
}

pub fn render(envelope: &Envelope, pretty: bool) -> Result<(), CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(envelope)?
    } else {
        serde_json::to_string(envelope)?
    };
    println!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_serializes_meta_data_and_errors() {
        let envelope = Envelope::new("audit", json!([]))
            .with_warnings(vec!["SPY:etf is unreliable".to_string()])
            .with_errors(vec!["QQQ: upstream down".to_string()]);
        let value = serde_json::to_value(&envelope).expect("serialize");

        assert_eq!(value["meta"]["command"], "audit");
        assert_eq!(value["meta"]["warnings"][0], "SPY:etf is unreliable");
        assert_eq!(value["errors"][0], "QQQ: upstream down");
        assert!(value["meta"]["generated_at"].as_str().is_some());
        assert_eq!(value["data"], json!([]));
    }
}
