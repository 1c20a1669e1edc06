pub mod extract;
pub mod interact;
pub mod job;
pub mod keyword;

pub(crate) mod detail_page;
pub(crate) mod list_page;

pub use extract::{extract_fields, find_detail_url, strip_excluded};
pub use interact::{collect_items, ListSurface, ResolvedInteraction};
pub use job::{JobError, JobOutcome, JobResult, ScrapeEngine};
pub use keyword::matches_keywords;
