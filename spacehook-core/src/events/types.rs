/// Request to converge part of the remote webhook state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReconcileRequest {
    /// Every connection, including orphan cleanup.
    All,
    /// One connection, including orphan cleanup.
    Connection(String),
    /// A single trigger's webhook, by trigger id.
    Trigger(String),
    /// A multibranch source's aggregate webhook, by source id.
    Source(String),
}

impl std::fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileRequest::All => write!(f, "all"),
            ReconcileRequest::Connection(id) => write!(f, "connection:{id}"),
            ReconcileRequest::Trigger(id) => write!(f, "trigger:{id}"),
            ReconcileRequest::Source(id) => write!(f, "source:{id}"),
        }
    }
}

/// One raw inbound delivery, as received by the HTTP layer.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}
