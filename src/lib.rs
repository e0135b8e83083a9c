pub mod zotero;

// 重新导出常用类型和函数，方便外部使用
pub use zotero::{
    client::{ClientConfig, LibrarySyncSummary, ZoteroSyncClient},
    error::{ApiError, TagIndexError},
    formats::{CitationFormat, FormatRegistry},
    merge::{merge_update, MergeOptions, Update},
    tags::{make_tag_list, TagIndex},
    types::{LibraryHandle, LibraryPath, Record, Tag},
    EmptySyncListener, SyncListener,
};
