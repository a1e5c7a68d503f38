use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::StructuringError;
use crate::pipeline::types::{Manifest, ModelPart};

/// Reconciled extraction result for one client bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisResult {
    #[serde(deserialize_with = "lenient::properties")]
    pub properties: Vec<PropertyRecord>,
    #[serde(deserialize_with = "lenient::year")]
    pub tax_year: Option<i32>,
    /// Always the pipeline's own manifest; whatever the model reported is discarded.
    #[serde(deserialize_with = "lenient::discard")]
    pub all_files_detected: Manifest,
    #[serde(deserialize_with = "lenient::optional_text")]
    pub email_draft: Option<String>,
}

/// Income and expenses for one rental property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyRecord {
    #[serde(deserialize_with = "lenient::text")]
    pub address: String,
    #[serde(deserialize_with = "lenient::line_items")]
    pub income: BTreeMap<String, LineItem>,
    #[serde(deserialize_with = "lenient::amounts")]
    pub income_prior: BTreeMap<String, f64>,
    #[serde(deserialize_with = "lenient::line_items")]
    pub expenses: BTreeMap<String, LineItem>,
    #[serde(deserialize_with = "lenient::amounts")]
    pub expenses_prior: BTreeMap<String, f64>,
    #[serde(deserialize_with = "lenient::text_list")]
    pub source_files_read: Vec<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub notes: String,
}

impl PropertyRecord {
    /// Every `source_file` cited by a current-year income or expense line.
    pub fn cited_sources(&self) -> impl Iterator<Item = &str> {
        self.income
            .values()
            .chain(self.expenses.values())
            .map(|item| item.source_file.trim())
            .filter(|s| !s.is_empty())
    }
}

/// Current-year amount with its provenance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LineItem {
    pub amount: f64,
    pub source_file: String,
}

impl LineItem {
    pub fn new(amount: f64, source_file: impl Into<String>) -> Self {
        Self {
            amount,
            source_file: source_file.into(),
        }
    }
}

impl<'de> Deserialize<'de> for LineItem {
    /// Accepts `{"amount": .., "source_file": ..}` or a bare amount.
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(lenient::line_item(&value))
    }
}

/// Extraction model abstraction (allows mocking).
pub trait LlmClient {
    /// Send the instruction prompt followed by the ordered parts; return the raw reply text.
    fn generate(&self, prompt: &str, parts: &[ModelPart]) -> Result<String, StructuringError>;
}

impl<T: LlmClient + ?Sized> LlmClient for std::sync::Arc<T> {
    fn generate(&self, prompt: &str, parts: &[ModelPart]) -> Result<String, StructuringError> {
        (**self).generate(prompt, parts)
    }
}

/// Tolerant field decoders: model output is advisory, so odd shapes degrade to
/// empty values instead of failing the whole response.
mod lenient {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use super::{LineItem, PropertyRecord};
    use crate::pipeline::types::Manifest;

    pub fn amount_of(value: &Value) -> f64 {
        match value {
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::String(s) => parse_amount(s),
            _ => 0.0,
        }
    }

    /// `"$1,234.50"`, `"(200)"` (negative) and `" 75 "` all parse; anything else is 0.
    pub fn parse_amount(raw: &str) -> f64 {
        let trimmed = raw.trim();
        let negative = trimmed.starts_with('(') && trimmed.ends_with(')');
        let cleaned: String = trimmed
            .chars()
            .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-'))
            .collect();
        let value = cleaned.parse::<f64>().unwrap_or(0.0);
        if negative {
            -value.abs()
        } else {
            value
        }
    }

    fn text_of(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => other.to_string(),
        }
    }

    pub fn line_item(value: &Value) -> LineItem {
        match value {
            Value::Object(map) => LineItem {
                amount: map.get("amount").map(amount_of).unwrap_or(0.0),
                source_file: map.get("source_file").map(text_of).unwrap_or_default(),
            },
            other => LineItem {
                amount: amount_of(other),
                source_file: String::new(),
            },
        }
    }

    pub fn properties<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<PropertyRecord>, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(match value {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match serde_json::from_value(item) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping unreadable property record");
                        None
                    }
                })
                .collect(),
            _ => Vec::new(),
        })
    }

    pub fn year<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i32>, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(match value {
            Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn discard<'de, D: Deserializer<'de>>(d: D) -> Result<Manifest, D::Error> {
        serde::de::IgnoredAny::deserialize(d)?;
        Ok(Manifest::default())
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(text_of(&Value::deserialize(d)?))
    }

    pub fn optional_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let text = text_of(&Value::deserialize(d)?);
        Ok(if text.trim().is_empty() { None } else { Some(text) })
    }

    pub fn text_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Array(items) => items
                .iter()
                .map(text_of)
                .filter(|s| !s.trim().is_empty())
                .collect(),
            Value::String(s) if !s.trim().is_empty() => vec![s],
            _ => Vec::new(),
        })
    }

    pub fn line_items<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<BTreeMap<String, LineItem>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), line_item(v))).collect(),
            _ => BTreeMap::new(),
        })
    }

    pub fn amounts<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, f64>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| {
                    // Some replies reuse the current-year shape for prior amounts.
                    let amount = match v {
                        Value::Object(_) => line_item(v).amount,
                        other => amount_of(other),
                    };
                    (k.clone(), amount)
                })
                .collect(),
            _ => BTreeMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_record_deserializes() {
        let json = r#"{
            "address": "12 Elm St",
            "income": {"Rent": {"amount": 18000, "source_file": "ledger.xlsx"}},
            "income_prior": {"Rent": 17500},
            "expenses": {"Repairs": {"amount": "1,250.40", "source_file": "Email.msg > invoice.pdf"}},
            "expenses_prior": {"Repairs": 900.0},
            "source_files_read": ["ledger.xlsx", "Email.msg > invoice.pdf"],
            "notes": "Roof replaced in May"
        }"#;
        let record: PropertyRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.address, "12 Elm St");
        assert_eq!(record.income["Rent"], LineItem::new(18000.0, "ledger.xlsx"));
        assert_eq!(record.income_prior["Rent"], 17500.0);
        assert!((record.expenses["Repairs"].amount - 1250.40).abs() < 1e-9);
        assert_eq!(record.source_files_read.len(), 2);
        assert_eq!(record.notes, "Roof replaced in May");
    }

    #[test]
    fn missing_and_null_fields_default_to_empty() {
        let record: PropertyRecord =
            serde_json::from_str(r#"{"address": null, "income": null, "notes": null}"#).unwrap();
        assert_eq!(record, PropertyRecord::default());
    }

    #[test]
    fn bare_amounts_accepted_as_line_items() {
        let record: PropertyRecord =
            serde_json::from_str(r#"{"income": {"Rent": 1200, "Laundry": "85.50"}}"#).unwrap();
        assert_eq!(record.income["Rent"], LineItem::new(1200.0, ""));
        assert_eq!(record.income["Laundry"].amount, 85.5);
    }

    #[test]
    fn amount_parsing_handles_currency_formats() {
        assert_eq!(lenient::parse_amount("$1,234.50"), 1234.5);
        assert_eq!(lenient::parse_amount("(200.00)"), -200.0);
        assert_eq!(lenient::parse_amount("-75"), -75.0);
        assert_eq!(lenient::parse_amount("n/a"), 0.0);
    }

    #[test]
    fn unreadable_property_is_dropped_not_fatal() {
        let result: AnalysisResult = serde_json::from_str(
            r#"{"properties": [{"address": "A"}, "garbage", {"address": "B"}], "tax_year": "2024"}"#,
        )
        .unwrap();
        let addresses: Vec<&str> = result.properties.iter().map(|p| p.address.as_str()).collect();
        assert_eq!(addresses, vec!["A", "B"]);
        assert_eq!(result.tax_year, Some(2024));
    }

    #[test]
    fn model_manifest_is_never_trusted_at_parse_time() {
        let result: AnalysisResult =
            serde_json::from_str(r#"{"all_files_detected": ["hallucinated.pdf"]}"#).unwrap();
        assert!(result.all_files_detected.is_empty());
    }

    #[test]
    fn blank_email_draft_is_none() {
        let result: AnalysisResult = serde_json::from_str(r#"{"email_draft": "  "}"#).unwrap();
        assert_eq!(result.email_draft, None);
    }

    #[test]
    fn cited_sources_skip_blank_provenance() {
        let mut record = PropertyRecord::default();
        record.income.insert("Rent".into(), LineItem::new(1.0, "a.pdf"));
        record.expenses.insert("Tax".into(), LineItem::new(1.0, " "));
        record.expenses.insert("Fees".into(), LineItem::new(1.0, "b.pdf "));
        let cited: Vec<&str> = record.cited_sources().collect();
        assert_eq!(cited, vec!["a.pdf", "b.pdf"]);
    }
}
