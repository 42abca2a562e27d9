pub mod baseline;
pub mod cache;
pub mod error;
pub mod identifiers;
pub mod node;
pub mod record;
pub mod references;
pub mod similarity;
pub mod store;
pub mod test_support;

pub use baseline::{Baseline, BaselineKind, BaselineStore, InMemoryBaselineStore};
pub use cache::{CacheKey, SearchCache};
pub use error::{SyncError, truncate_for_error};
pub use identifiers::{NodeId, PlatformId, RemoteId, ScopeId};
pub use node::{DateOrigin, ExternalLink, NodeLevel, NodeState, PlanNode, RemoteKind, TargetDate};
pub use record::{FailedCheck, SyncCheck, SyncRecord, SyncStatus};
pub use references::{
    REF_LINE_PREFIX, ReferenceLine, body_contains_reference, body_without_references,
    compose_body, format_title, is_valid_tracking_id, normalize_name, parse_reference_lines,
    parse_title_marker, title_name,
};
pub use similarity::{DEFAULT_SIMILARITY_THRESHOLD, names_match, word_overlap};
pub use store::{BASELINE_SCHEMA_VERSION, SqliteBaselineStore};
