pub mod payload;
pub mod repository;
pub mod status;
pub mod webhook;

pub use payload::{
    CodeReviewAction, CodeReviewEvent, PayloadError, RepoPushEvent, SafeMergeBuildRef,
    SafeMergeCommand, TitleChange,
    WebhookEnvelope, WebhookEvent, event_codes,
};
pub use repository::{
    BranchInfo, GitEntry, GitEntryType, MergeRequestRecord, MergeRequestState, Page, PageRequest,
    Participant, ParticipantRole, ProjectRecord, RepositoryUrls, ReviewerState,
};
pub use status::{CommitExecutionStatus, ExternalCheckReport};
pub use webhook::{
    CreateWebhookRequest, EndpointSpec, EventTypeCodes, SubscriptionDefinition,
    SubscriptionFilter, SubscriptionRecord, UpdateWebhookRequest, WebhookRecord,
};

/// Wrapper used by list endpoints that return `{"data": [...]}`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DataList<T> {
    pub data: Vec<T>,
}
