//! Context-change notifications
//!
//! A [`Notification`] is the decoded body of one upstream change
//! notification: an ordered list of [`ContextElement`]s, each describing
//! one entity and the attributes that changed.
//!
//! Two body shapes are accepted:
//!
//! ```text
//! {"subscriptionId": "..", "originator": "..",
//!  "contextResponses": [{"contextElement": {..}, "statusCode": {..}}, ..]}
//!
//! {"contextElements": [{..}, ..]}
//! ```
//!
//! Element order is preserved exactly; routing relies on position.

use crate::error::DecodeError;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// One changed attribute of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextAttribute {
    /// Attribute name
    pub name: String,
    /// Declared attribute type, empty when absent
    #[serde(rename = "type", default)]
    pub attr_type: String,
    /// New value, kept as raw JSON
    #[serde(default)]
    pub value: serde_json::Value,
    /// Attribute metadata, passed through unchanged
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadatas: Vec<serde_json::Value>,
}

/// One entity's updated-attribute set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextElement {
    /// Entity id
    pub id: String,
    /// Entity type, empty when absent
    #[serde(rename = "type", default)]
    pub entity_type: String,
    /// Whether `id` is a pattern; accepts `"true"` strings and booleans
    #[serde(
        rename = "isPattern",
        default,
        serialize_with = "pattern_to_str",
        deserialize_with = "pattern_from_any"
    )]
    pub is_pattern: bool,
    /// Changed attributes
    #[serde(default)]
    pub attributes: Vec<ContextAttribute>,
}

impl ContextElement {
    /// Default destination name for this entity: `<id>_<type>`
    pub fn default_destination(&self) -> String {
        format!("{}_{}", self.id, self.entity_type)
    }

    /// Compact JSON encoding used as the persisted payload
    pub fn to_json_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Short human-readable description for logs
    pub fn summary(&self) -> ElementSummary<'_> {
        ElementSummary(self)
    }
}

/// Log-friendly view of a [`ContextElement`]
pub struct ElementSummary<'a>(&'a ContextElement);

impl fmt::Display for ElementSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let element = self.0;
        write!(f, "{}/{} [", element.id, element.entity_type)?;
        for (i, attr) in element.attributes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&attr.name)?;
        }
        f.write_str("]")
    }
}

/// Decoded change notification
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Notification {
    /// Subscription that triggered the notification
    pub subscription_id: Option<String>,
    /// Broker that sent it
    pub originator: Option<String>,
    /// Changed entities, in the order they were sent
    pub context_elements: Vec<ContextElement>,
}

impl Notification {
    /// Build a notification directly from elements
    pub fn from_elements(context_elements: Vec<ContextElement>) -> Self {
        Self {
            subscription_id: None,
            originator: None,
            context_elements,
        }
    }

    /// Decode a notification body
    ///
    /// Fails with [`DecodeError::Empty`] when the body parses but carries
    /// no elements, since there is nothing to persist or route.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let wire: WireNotification = serde_json::from_slice(body)?;
        let notification = match wire {
            WireNotification::Responses(n) => Notification {
                subscription_id: n.subscription_id,
                originator: n.originator,
                context_elements: n
                    .context_responses
                    .into_iter()
                    .map(|r| r.context_element)
                    .collect(),
            },
            WireNotification::Elements(n) => Notification::from_elements(n.context_elements),
        };

        if notification.context_elements.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(notification)
    }

    /// Number of context elements
    pub fn len(&self) -> usize {
        self.context_elements.len()
    }

    /// Whether the notification has no elements
    pub fn is_empty(&self) -> bool {
        self.context_elements.is_empty()
    }

    /// Per-element default destinations, in element order
    pub fn default_destinations(&self) -> Vec<String> {
        self.context_elements
            .iter()
            .map(ContextElement::default_destination)
            .collect()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireNotification {
    Responses(ResponsesBody),
    Elements(ElementsBody),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsesBody {
    #[serde(default)]
    subscription_id: Option<String>,
    #[serde(default)]
    originator: Option<String>,
    context_responses: Vec<ContextResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextResponse {
    context_element: ContextElement,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ElementsBody {
    context_elements: Vec<ContextElement>,
}

// Brokers send isPattern as "true"/"false" strings; accept real booleans too.
fn pattern_from_any<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(b) => Ok(b),
        serde_json::Value::String(s) => Ok(s.eq_ignore_ascii_case("true")),
        serde_json::Value::Null => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "invalid isPattern value: {other}"
        ))),
    }
}

fn pattern_to_str<S>(value: &bool, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(if *value { "true" } else { "false" })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const NGSI_BODY: &str = r#"{
        "subscriptionId": "51c0ac9ed714fb3b37d7d5a8",
        "originator": "localhost",
        "contextResponses": [
            {
                "contextElement": {
                    "attributes": [
                        {"name": "temperature", "type": "centigrade", "value": "26.5"}
                    ],
                    "type": "Room",
                    "isPattern": "false",
                    "id": "Room1"
                },
                "statusCode": {"code": "200", "reasonPhrase": "OK"}
            },
            {
                "contextElement": {
                    "attributes": [
                        {"name": "pressure", "type": "mmHg", "value": "720",
                         "metadatas": [{"name": "unit", "type": "string", "value": "mmHg"}]}
                    ],
                    "type": "Room",
                    "isPattern": "false",
                    "id": "Room2"
                },
                "statusCode": {"code": "200", "reasonPhrase": "OK"}
            }
        ]
    }"#;

    #[test]
    fn test_decode_context_responses() {
        let n = Notification::decode(NGSI_BODY.as_bytes()).unwrap();
        assert_eq!(n.subscription_id.as_deref(), Some("51c0ac9ed714fb3b37d7d5a8"));
        assert_eq!(n.originator.as_deref(), Some("localhost"));
        assert_eq!(n.len(), 2);
        assert_eq!(n.context_elements[0].id, "Room1");
        assert_eq!(n.context_elements[1].id, "Room2");
        assert_eq!(n.context_elements[1].attributes[0].metadatas.len(), 1);
        assert!(!n.context_elements[0].is_pattern);
    }

    #[test]
    fn test_decode_flat_elements() {
        let body = r#"{"contextElements": [
            {"id": "Car1", "type": "Car", "isPattern": true, "attributes": []}
        ]}"#;
        let n = Notification::decode(body.as_bytes()).unwrap();
        assert_eq!(n.len(), 1);
        assert!(n.context_elements[0].is_pattern);
        assert!(n.subscription_id.is_none());
    }

    #[test]
    fn test_decode_empty_is_error() {
        let body = r#"{"contextResponses": []}"#;
        assert_eq!(Notification::decode(body.as_bytes()), Err(DecodeError::Empty));
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        let result = Notification::decode(b"not json at all");
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_default_destinations_follow_element_order() {
        let n = Notification::decode(NGSI_BODY.as_bytes()).unwrap();
        assert_eq!(n.default_destinations(), vec!["Room1_Room", "Room2_Room"]);
    }

    #[test]
    fn test_element_json_keeps_wire_shape() {
        let n = Notification::decode(NGSI_BODY.as_bytes()).unwrap();
        let bytes = n.context_elements[0].to_json_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["id"], "Room1");
        assert_eq!(value["type"], "Room");
        assert_eq!(value["isPattern"], "false");
        assert_eq!(value["attributes"][0]["name"], "temperature");
        assert!(value["attributes"][0].get("metadatas").is_none());
    }

    #[test]
    fn test_summary_lists_attribute_names() {
        let n = Notification::decode(NGSI_BODY.as_bytes()).unwrap();
        assert_eq!(
            n.context_elements[0].summary().to_string(),
            "Room1/Room [temperature]"
        );
    }
}
