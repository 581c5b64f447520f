//! Turns the feed's XML into predictions.
//!
//! The feed looks like
//!
//! ```xml
//! <stop>
//!   <id>1234</id>
//!   <pre><pt>3</pt><pu>MINUTES</pu><fd>108 NEWARK</fd><v>6373</v><rn>108</rn><rd>108</rd><zone></zone></pre>
//!   <pre>...</pre>
//! </stop>
//! ```
//!
//! or carries a `<noPredictionMessage>` instead of `<pre>` entries.

use crate::error::ProxyError;
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const ROOT_TAG: &str = "stop";
const PREDICTION_TAG: &str = "pre";
const NO_PREDICTION_TAG: &str = "noPredictionMessage";
const TEXT_FIELD: &str = "$t";

/// Used when the feed sends an empty `noPredictionMessage` element.
pub const DEFAULT_NO_PREDICTION_MESSAGE: &str = "No arrival times";

/// One arrival prediction, kept exactly as the feed sent it. Every field is a string
/// (or, for `zone` and empty elements, an object); nothing is coerced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Prediction(Map<String, Value>);

impl Prediction {
    fn text(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn vehicle(&self) -> Option<&str> {
        self.text("v")
    }

    /// `rn`: route number without the letter suffix
    pub fn route_number(&self) -> Option<&str> {
        self.text("rn")
    }
}

#[cfg(test)]
impl Prediction {
    pub(crate) fn from_fields(fields: Map<String, Value>) -> Self {
        Prediction(fields)
    }

    pub(crate) fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedFeed {
    /// Feed-supplied "no predictions" text
    Sentinel(String),
    /// Always a list, even when the feed held a single `pre`
    Predictions(Vec<Prediction>),
}

pub fn normalize(raw: &str) -> Result<NormalizedFeed, ProxyError> {
    let doc = Document::parse(raw)
        .map_err(|e| ProxyError::UpstreamMalformed(format!("feed is not valid xml: {e}")))?;

    let root = doc.root_element();
    if !root.has_tag_name(ROOT_TAG) {
        return Err(ProxyError::UpstreamMalformed(format!(
            "expected <{ROOT_TAG}> root, found <{}>",
            root.tag_name().name()
        )));
    }

    let stop = match element_to_json(root) {
        Value::Object(fields) => fields,
        // <stop>text</stop>
        _ => Map::new(),
    };

    if let Some(message) = stop.get(NO_PREDICTION_TAG) {
        // repeated tags collapse into an array, the first non-empty one wins
        let message = match message {
            Value::String(text) if !text.is_empty() => Some(text.clone()),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .find(|text| !text.is_empty())
                .map(str::to_string),
            _ => None,
        }
        .unwrap_or_else(|| DEFAULT_NO_PREDICTION_MESSAGE.to_string());
        return Ok(NormalizedFeed::Sentinel(message));
    }

    match stop.get(PREDICTION_TAG) {
        Some(Value::Array(entries)) => entries
            .iter()
            .map(prediction_from_value)
            .collect::<Result<Vec<_>, _>>()
            .map(NormalizedFeed::Predictions),
        Some(entry) => Ok(NormalizedFeed::Predictions(vec![prediction_from_value(entry)?])),
        None => Err(ProxyError::UpstreamMalformed(format!(
            "<{ROOT_TAG}> has neither <{PREDICTION_TAG}> nor <{NO_PREDICTION_TAG}>"
        ))),
    }
}

fn prediction_from_value(value: &Value) -> Result<Prediction, ProxyError> {
    match value {
        Value::Object(fields) if !fields.is_empty() => Ok(Prediction(fields.clone())),
        other => Err(ProxyError::UpstreamMalformed(format!(
            "<{PREDICTION_TAG}> is not an element with fields: {other}"
        ))),
    }
}

// Leaf elements become their trimmed text (or `{}` when empty). Anything with attributes
// or child elements becomes an object; repeated child tags collapse into an array.
fn element_to_json(node: Node) -> Value {
    let children: Vec<Node> = node.children().filter(|n| n.is_element()).collect();
    let text: String = node
        .children()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string();

    if children.is_empty() && node.attributes().next().is_none() {
        return if text.is_empty() { Value::Object(Map::new()) } else { Value::String(text) };
    }

    let mut fields = Map::new();
    for attr in node.attributes() {
        fields.insert(attr.name().to_string(), Value::String(attr.value().to_string()));
    }

    for child in children {
        let name = child.tag_name().name().to_string();
        let value = element_to_json(child);
        match fields.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                fields.insert(name, value);
            }
        }
    }

    if !text.is_empty() {
        fields.insert(TEXT_FIELD.to_string(), Value::String(text));
    }

    Value::Object(fields)
}
