/// Outbound email the assistant proposes to send to a broker.
///
/// The backend attaches it to a reply as `metadata: {to, subject, body}`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EmailDraft {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl EmailDraft {
    /// Extracts a draft from reply metadata.
    ///
    /// Returns `None` unless `to`, `subject` and `body` are all strings.
    pub fn from_metadata(metadata: &serde_json::Value) -> Option<Self> {
        let field = |name: &str| {
            metadata
                .get(name)
                .and_then(|v| v.as_str())
                .map(ToOwned::to_owned)
        };
        Some(Self {
            to: field("to")?,
            subject: field("subject")?,
            body: field("body")?,
        })
    }
}
